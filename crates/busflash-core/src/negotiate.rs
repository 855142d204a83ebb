//! Connection parameter negotiation.
//!
//! Finds the first settings candidate under which a device answers a
//! lightweight identity probe. Candidates are tried in a fixed priority
//! order: settings supplied by the caller or config, then previously-known
//! settings, then the short fallback list. Silence on one candidate just
//! advances to the next; only exhausting every candidate is a failure.

use crate::device::{BootloaderProbe, DeviceHandle, Mode};
use crate::error::{Error, Result};
use crate::port::ExchangeFault;
use crate::retry::retry_exchange;
use crate::settings::{ConnectionSettings, BOOTLOADER_SETTINGS, FALLBACK_CANDIDATES};

/// Which operating mode negotiation is probing for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTarget {
    /// Probe with application-mode identity reads.
    Alive,
    /// Probe with the bootloader presence check (faster: bootloaders answer
    /// at a fixed, predictable speed).
    Bootloader,
}

/// Assemble the candidate list in priority order, deduplicated.
fn candidates(
    target: ModeTarget,
    hints: &[ConnectionSettings],
    known: Option<ConnectionSettings>,
) -> Vec<ConnectionSettings> {
    let mut out: Vec<ConnectionSettings> = Vec::new();
    let mut push = |s: ConnectionSettings| {
        if !out.contains(&s) {
            out.push(s);
        }
    };
    if target == ModeTarget::Bootloader {
        // Every bootloader listens on the fixed defaults; try them first.
        push(BOOTLOADER_SETTINGS);
    }
    for &s in hints {
        push(s);
    }
    if let Some(s) = known {
        push(s);
    }
    for s in FALLBACK_CANDIDATES {
        push(s);
    }
    out
}

/// Try candidates until the device answers; returns the working settings.
///
/// On success the handle's port is left configured with the returned
/// settings and the handle's mode tag reflects what answered. Exhausting
/// every candidate yields [`Error::NoResponse`]. A decoded protocol fault
/// aborts immediately: something answered, and probing further under wrong
/// assumptions is unsafe.
pub fn negotiate(
    handle: &mut DeviceHandle<'_>,
    target: ModeTarget,
    hints: &[ConnectionSettings],
    known: Option<ConnectionSettings>,
) -> Result<ConnectionSettings> {
    let retry = *handle.retry();
    for settings in candidates(target, hints, known) {
        log::debug!(
            "probing {} for {:?} under {}",
            handle.address(),
            target,
            settings
        );
        handle.configure(&settings)?;
        match target {
            ModeTarget::Alive => {
                handle
                    .port_mut()
                    .set_response_timeout(retry.response_timeout);
                let outcome = retry_exchange(retry.probe_attempts, || {
                    let _ = handle.read_slave_id_once()?;
                    Ok(())
                });
                match outcome {
                    Ok(()) => {
                        log::info!(
                            "device {} answered alive under {}",
                            handle.address(),
                            settings
                        );
                        handle.set_mode(Mode::Alive);
                        return Ok(settings);
                    }
                    Err(ExchangeFault::NoResponse) => continue,
                    Err(fault) => {
                        return Err(crate::port::fault_to_error(handle.address(), fault))
                    }
                }
            }
            ModeTarget::Bootloader => match handle.probe_bootloader()? {
                BootloaderProbe::Answered => {
                    log::info!(
                        "device {} answered in bootloader under {}",
                        handle.address(),
                        settings
                    );
                    handle.set_mode(Mode::InBootloader);
                    return Ok(settings);
                }
                BootloaderProbe::Silent => continue,
            },
        }
    }
    Err(Error::NoResponse {
        address: handle.address().clone(),
    })
}
