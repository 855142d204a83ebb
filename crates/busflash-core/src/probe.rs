//! Operating-mode classification for a reachable device.

use crate::device::{BootloaderProbe, DeviceHandle, Mode};
use crate::error::{Error, Result};
use crate::port::ExchangeFault;
use crate::retry::retry_exchange;
use crate::settings::BOOTLOADER_SETTINGS;

/// Decide whether the device behind `handle` is running application
/// firmware, sitting in its bootloader, or not answering at all.
///
/// Order matters: the alive probe is harmless to a bootloader, but the
/// bootloader probe writes into the transfer window and is only sent once
/// the identity read failed (silence, or an exception reply: bootloaders
/// reject application-mode reads). If the bootloader stays silent at
/// the current settings it is re-probed at the fixed bootloader defaults,
/// since a device that just lost its application also lost any custom UART
/// configuration.
pub fn probe_state(handle: &mut DeviceHandle<'_>) -> Result<Mode> {
    let retry = *handle.retry();
    handle
        .port_mut()
        .set_response_timeout(retry.response_timeout);
    let alive = retry_exchange(retry.probe_attempts, || {
        let _ = handle.read_slave_id_once()?;
        Ok(())
    });
    match alive {
        Ok(()) => {
            handle.set_mode(Mode::Alive);
            return Ok(Mode::Alive);
        }
        // Silence may just be wrong settings; an exception means something
        // answered that refuses application-mode reads, which is exactly how
        // a bootloader behaves. Either way the bootloader probe decides.
        Err(ExchangeFault::NoResponse) | Err(ExchangeFault::Exception(_)) => {}
        Err(fault) => return Err(crate::port::fault_to_error(handle.address(), fault)),
    }
    if handle.probe_bootloader()? == BootloaderProbe::Answered {
        handle.set_mode(Mode::InBootloader);
        return Ok(Mode::InBootloader);
    }
    if handle.settings() != BOOTLOADER_SETTINGS {
        log::debug!(
            "device {} silent at {}; re-probing bootloader at defaults",
            handle.address(),
            handle.settings()
        );
        handle.configure(&BOOTLOADER_SETTINGS)?;
        if handle.probe_bootloader()? == BootloaderProbe::Answered {
            handle.set_mode(Mode::InBootloader);
            return Ok(Mode::InBootloader);
        }
    }
    Err(Error::NoResponse {
        address: handle.address().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BusAddress;
    use crate::settings::{ConnectionSettings, Parity, StopBits};
    use crate::testutil::{fast_retry, FakeDevice};

    fn addr() -> BusAddress {
        BusAddress::new("/dev/ttyRS485-1", 5).unwrap()
    }

    #[test]
    fn classifies_alive_device() {
        let settings = ConnectionSettings::new(115_200, Parity::None, StopBits::Two);
        let mut dev = FakeDevice::alive(5, settings);
        let mut handle = DeviceHandle::new(&mut dev, addr(), fast_retry());
        assert_eq!(probe_state(&mut handle).unwrap(), Mode::Alive);
        assert_eq!(handle.mode(), Mode::Alive);
    }

    #[test]
    fn finds_bootloader_after_falling_back_to_defaults() {
        let mut dev = FakeDevice::in_bootloader(5);
        let mut handle = DeviceHandle::new(&mut dev, addr(), fast_retry());
        let wrong = ConnectionSettings::new(115_200, Parity::None, StopBits::Two);
        handle.configure(&wrong).unwrap();
        assert_eq!(probe_state(&mut handle).unwrap(), Mode::InBootloader);
        assert_eq!(handle.settings(), BOOTLOADER_SETTINGS);
    }

    #[test]
    fn exception_to_the_alive_read_is_classified_as_bootloader() {
        // Already at the bootloader defaults the identity read is not
        // silent: the bootloader rejects it with a device exception. That
        // must lead into the bootloader probe, not a protocol fault.
        let mut dev = FakeDevice::in_bootloader(5);
        let mut handle = DeviceHandle::new(&mut dev, addr(), fast_retry());
        assert_eq!(probe_state(&mut handle).unwrap(), Mode::InBootloader);
        assert_eq!(handle.mode(), Mode::InBootloader);
    }

    #[test]
    fn silence_everywhere_is_no_response() {
        let mut dev = FakeDevice::unreachable();
        let mut handle = DeviceHandle::new(&mut dev, addr(), fast_retry());
        let err = probe_state(&mut handle).unwrap_err();
        assert!(matches!(err, Error::NoResponse { .. }));
    }
}
