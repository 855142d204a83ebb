//! Bounded retry parameters for every layer of bus I/O.

use crate::port::ExchangeFault;
use std::time::Duration;

/// One policy object parameterises all bounded retries: per-command protocol
/// calls, per-settings-candidate probing and per-chunk flash writes.
///
/// Only timeouts (`NoResponse`) are ever retried here; a decoded protocol
/// fault is surfaced to the caller, which decides whether to re-run
/// negotiation at a higher level.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts for a single protocol command in alive mode.
    pub command_attempts: u32,
    /// Response timeout for alive-mode exchanges.
    pub response_timeout: Duration,
    /// Attempts for one identity probe per settings candidate.
    pub probe_attempts: u32,
    /// Attempts for a bootloader probe. Bootloaders answer at a fixed,
    /// predictable speed, so fewer tries are needed; this keeps scans over
    /// many devices fast.
    pub bootloader_attempts: u32,
    /// Response timeout for bootloader-mode exchanges.
    pub bootloader_timeout: Duration,
    /// Attempts for a single flash data chunk write.
    pub chunk_attempts: u32,
    /// Extra response time granted for the info-block write; a valid info
    /// block triggers slow internal bookkeeping in the bootloader before it
    /// acknowledges.
    pub info_block_extra: Duration,
    /// Delay after a reboot command before the device accepts new traffic.
    pub reboot_settle: Duration,
    /// Grace period for a device to reappear alive after flashing. Its own
    /// named value on purpose: application firmware boot time is unrelated
    /// to the per-command response timeout.
    pub reappear_grace: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            command_attempts: 2,
            response_timeout: Duration::from_millis(500),
            probe_attempts: 2,
            bootloader_attempts: 1,
            bootloader_timeout: Duration::from_millis(200),
            chunk_attempts: 3,
            info_block_extra: Duration::from_secs(1),
            reboot_settle: Duration::from_millis(500),
            reappear_grace: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Override the alive-mode response timeout, keeping everything else.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// Run `attempt` up to `attempts` times, retrying only timeout-class faults.
///
/// The last fault is returned once attempts are exhausted. Protocol faults
/// abort immediately.
pub fn retry_exchange<T>(
    attempts: u32,
    mut attempt: impl FnMut() -> std::result::Result<T, ExchangeFault>,
) -> std::result::Result<T, ExchangeFault> {
    let attempts = attempts.max(1);
    let mut last = ExchangeFault::NoResponse;
    for i in 1..=attempts {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(fault) if fault.is_retryable() => {
                log::debug!("exchange attempt {i}/{attempts} timed out");
                last = fault;
            }
            Err(fault) => return Err(fault),
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_timeouts_until_exhausted() {
        let mut calls = 0;
        let result: std::result::Result<(), _> = retry_exchange(3, || {
            calls += 1;
            Err(ExchangeFault::NoResponse)
        });
        assert_eq!(calls, 3);
        assert_eq!(result.unwrap_err(), ExchangeFault::NoResponse);
    }

    #[test]
    fn succeeds_midway() {
        let mut calls = 0;
        let result = retry_exchange(3, || {
            calls += 1;
            if calls < 2 {
                Err(ExchangeFault::NoResponse)
            } else {
                Ok(7u16)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 2);
    }

    #[test]
    fn protocol_faults_abort_immediately() {
        let mut calls = 0;
        let result: std::result::Result<(), _> = retry_exchange(5, || {
            calls += 1;
            Err(ExchangeFault::Exception(0x02))
        });
        assert_eq!(calls, 1);
        assert_eq!(result.unwrap_err(), ExchangeFault::Exception(0x02));
    }
}
