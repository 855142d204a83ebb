//! busflash-core - update/recovery orchestration for serial-bus MCU devices
//!
//! This crate drives firmware and bootloader updates on devices that share a
//! single half-duplex serial bus. It knows nothing about the wire encoding:
//! all bus I/O goes through the [`port::BusPort`] trait, implemented by
//! `busflash-proto` for real hardware and by scripted fakes in tests.
//!
//! The pieces, leaves first:
//!
//! - [`negotiate`] - find working connection settings for an address
//! - [`probe`] - classify a reachable device as alive or in-bootloader
//! - [`resolve`] - map a device identity to a firmware release
//! - [`flash`] - drive the mode transition and chunked image transfer
//! - [`batch`] - sequence all of the above over a whole bus
//!
//! External collaborators (firmware catalog, identity cache, device list,
//! bus-consumer control, user confirmation) are injected as traits so the
//! engine can be exercised without hardware or network access.

pub mod batch;
pub mod device;
pub mod error;
pub mod flash;
pub mod image;
pub mod negotiate;
pub mod port;
pub mod probe;
pub mod resolve;
pub mod retry;
pub mod settings;
pub mod update;
pub mod version;

#[cfg(test)]
pub(crate) mod testutil;

pub use device::{BusAddress, DeviceHandle, Mode};
pub use error::{Error, ErrorKind, Result};
pub use retry::RetryPolicy;
pub use settings::ConnectionSettings;

/// Confirmation hook for irreversible steps (settings erase, major-version
/// jumps). The CLI asks on stdin; forced/non-interactive runs auto-confirm
/// and must never block.
pub trait Prompt {
    /// Ask the operator to confirm `message`. Returns `false` on decline.
    fn confirm(&mut self, message: &str) -> bool;
}

/// A [`Prompt`] that confirms everything without interaction.
pub struct ForcedYes;

impl Prompt for ForcedYes {
    fn confirm(&mut self, message: &str) -> bool {
        log::debug!("auto-confirmed: {message}");
        true
    }
}
