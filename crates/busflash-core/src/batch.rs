//! Whole-bus batch orchestration.
//!
//! A batch run walks every configured device, port by port. For each port
//! the sequence is strict and symmetric: pause the bus consumers, open the
//! port, run every device operation, restore the port's initial settings,
//! resume the consumers. The restore/resume tail runs no matter how the
//! per-device operations went, so a crashed update never leaves the shared
//! bus paused or reconfigured.

use crate::device::{BusAddress, DeviceHandle};
use crate::error::{ErrorKind, Result};
use crate::port::{BusPort, BusPortFactory};
use crate::retry::RetryPolicy;
use crate::settings::{ConnectionSettings, BOOTLOADER_SETTINGS};
use std::fmt;
use std::time::Duration;

/// One row of the external device list.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    /// Operator-facing device name from the config.
    pub label: String,
    /// Bus address of the device.
    pub address: BusAddress,
    /// UART parameters the config declares for this device, used as the
    /// first negotiation candidate.
    pub settings: Option<ConnectionSettings>,
    /// Per-device response timeout override.
    pub response_timeout: Option<Duration>,
}

/// Source of the device list (driver config file, command line).
pub trait DeviceListProvider {
    /// Every device that should be processed, in config order.
    fn devices(&mut self) -> Result<Vec<DeviceEntry>>;
}

/// Proof that the consumers of one port are paused; handed back on resume.
#[derive(Debug)]
pub struct PortLease {
    port: String,
}

impl PortLease {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }

    /// Port this lease covers.
    pub fn port(&self) -> &str {
        &self.port
    }
}

/// Control over other processes using the bus (the poll driver, mostly).
///
/// Pausing is best effort: implementations log what they could not stop
/// rather than failing, since a missing driver is the common case on a
/// bench setup.
pub trait BusConsumerControl {
    /// Stop whatever else is talking on `port`.
    fn pause(&mut self, port: &str) -> PortLease;

    /// Let the paused consumers continue.
    fn resume(&mut self, lease: PortLease);
}

/// A [`BusConsumerControl`] for buses with no other consumers.
pub struct NoConsumers;

impl BusConsumerControl for NoConsumers {
    fn pause(&mut self, port: &str) -> PortLease {
        PortLease::new(port)
    }

    fn resume(&mut self, _lease: PortLease) {}
}

/// Result of one device within a batch.
#[derive(Debug)]
pub struct UpdateOutcome {
    /// Device label from the config.
    pub label: String,
    /// Bus address.
    pub address: BusAddress,
    /// `None` on success, the failure class otherwise.
    pub error: Option<ErrorKind>,
}

impl UpdateOutcome {
    fn ok(entry: &DeviceEntry) -> Self {
        Self {
            label: entry.label.clone(),
            address: entry.address.clone(),
            error: None,
        }
    }

    fn failed(entry: &DeviceEntry, kind: ErrorKind) -> Self {
        Self {
            label: entry.label.clone(),
            address: entry.address.clone(),
            error: Some(kind),
        }
    }
}

/// Everything that happened during one batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<UpdateOutcome>,
}

impl BatchReport {
    /// Per-device outcomes, grouped by port in config order.
    pub fn outcomes(&self) -> &[UpdateOutcome] {
        &self.outcomes
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &UpdateOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    /// True when every device succeeded.
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<&UpdateOutcome> = self.failures().collect();
        write!(
            f,
            "{}/{} devices updated",
            self.outcomes.len() - failed.len(),
            self.outcomes.len()
        )?;
        if !failed.is_empty() {
            write!(f, "; failed:")?;
            for outcome in failed {
                write!(
                    f,
                    " {} ({}): {}",
                    outcome.label,
                    outcome.address,
                    outcome.error.unwrap_or(ErrorKind::Other)
                )?;
            }
        }
        Ok(())
    }
}

fn group_by_port(devices: &[DeviceEntry]) -> Vec<(String, Vec<DeviceEntry>)> {
    let mut groups: Vec<(String, Vec<DeviceEntry>)> = Vec::new();
    for entry in devices {
        match groups.iter_mut().find(|(p, _)| *p == entry.address.port) {
            Some((_, group)) => group.push(entry.clone()),
            None => groups.push((entry.address.port.clone(), vec![entry.clone()])),
        }
    }
    groups
}

/// Resumes the paused consumers when dropped, whatever the exit path.
struct ResumeOnDrop<'a> {
    consumers: &'a mut dyn BusConsumerControl,
    lease: Option<PortLease>,
}

impl<'a> ResumeOnDrop<'a> {
    fn pause(consumers: &'a mut dyn BusConsumerControl, port: &str) -> Self {
        let lease = consumers.pause(port);
        Self {
            consumers,
            lease: Some(lease),
        }
    }
}

impl Drop for ResumeOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.consumers.resume(lease);
        }
    }
}

/// Puts the port's initial settings back when dropped.
struct RestoreOnDrop {
    bus: Box<dyn BusPort>,
    port: String,
    initial: ConnectionSettings,
}

impl Drop for RestoreOnDrop {
    fn drop(&mut self) {
        if let Err(err) = self.bus.configure(&self.initial) {
            log::warn!("could not restore settings on {}: {err}", self.port);
        }
    }
}

/// Run `per_device` over every entry, handling port lifecycle and consumer
/// pausing. Individual failures are recorded, never propagated: one dead
/// device must not strand the rest of the bus. The lease and the port
/// settings are held by drop guards acquired in order and released in
/// reverse, so a panic inside `per_device` cannot leave the consumers
/// paused or the port reconfigured.
pub fn run_batch<F>(
    devices: &[DeviceEntry],
    factory: &mut dyn BusPortFactory,
    consumers: &mut dyn BusConsumerControl,
    retry: &RetryPolicy,
    mut per_device: F,
) -> BatchReport
where
    F: FnMut(&mut DeviceHandle<'_>, &DeviceEntry) -> Result<()>,
{
    let mut outcomes = Vec::new();
    for (port, group) in group_by_port(devices) {
        let paused = ResumeOnDrop::pause(&mut *consumers, &port);
        let initial = group
            .first()
            .and_then(|entry| entry.settings)
            .unwrap_or(BOOTLOADER_SETTINGS);
        let mut guarded = match factory.open(&port, &initial, retry.response_timeout) {
            Ok(bus) => RestoreOnDrop {
                bus,
                port: port.clone(),
                initial,
            },
            Err(err) => {
                log::error!("cannot open {port}: {err}");
                let kind = err.kind();
                for entry in &group {
                    outcomes.push(UpdateOutcome::failed(entry, kind));
                }
                continue;
            }
        };
        for entry in &group {
            let device_retry = match entry.response_timeout {
                Some(timeout) => retry.with_response_timeout(timeout),
                None => *retry,
            };
            let mut handle =
                DeviceHandle::new(guarded.bus.as_mut(), entry.address.clone(), device_retry);
            match per_device(&mut handle, entry) {
                Ok(()) => {
                    log::info!("{} ({}) done", entry.label, entry.address);
                    outcomes.push(UpdateOutcome::ok(entry));
                    // Give a freshly rebooted device a moment before the
                    // next exchange hits the same bus.
                    std::thread::sleep(retry.reboot_settle);
                }
                Err(err) => {
                    log::error!("{} ({}) failed: {err}", entry.label, entry.address);
                    outcomes.push(UpdateOutcome::failed(entry, err.kind()));
                }
            }
        }
        // Declaration order ends the iteration with the settings restore,
        // then the resume.
        drop(guarded);
        drop(paused);
    }
    BatchReport { outcomes }
}
