//! Pausing other bus consumers for the duration of a port's batch.
//!
//! Whatever polls the bus (normally the serial poll driver) would corrupt
//! frames mid-flash, so its processes are stopped with SIGSTOP while a
//! port is being worked on and continued afterwards. `fuser` does the
//! process discovery and signalling; a system without it just proceeds
//! unpaused with a warning.

use crate::progress::StdinPrompt;
use busflash_core::batch::{BusConsumerControl, PortLease};
use busflash_core::Prompt;
use std::process::Command;

pub struct FuserConsumerControl {
    prompt: StdinPrompt,
}

impl FuserConsumerControl {
    pub fn new(force: bool) -> Self {
        Self {
            prompt: StdinPrompt { assume_yes: force },
        }
    }

    /// PIDs currently holding `port` open, best effort.
    fn holders(port: &str) -> Vec<String> {
        match Command::new("fuser").arg(port).output() {
            Ok(out) => String::from_utf8_lossy(&out.stdout)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            Err(e) => {
                log::warn!("fuser unavailable ({e}); cannot inspect {port} consumers");
                Vec::new()
            }
        }
    }

    fn signal(port: &str, signal: &str) -> bool {
        match Command::new("fuser").args(["-k", signal, port]).output() {
            Ok(out) => out.status.success(),
            Err(e) => {
                log::warn!("fuser -k {signal} {port} failed: {e}");
                false
            }
        }
    }
}

impl BusConsumerControl for FuserConsumerControl {
    fn pause(&mut self, port: &str) -> PortLease {
        let holders = Self::holders(port);
        if holders.is_empty() {
            log::debug!("no other processes using {port}");
            return PortLease::new(port);
        }
        let message = format!(
            "processes [{}] are using {port} and will be paused during the update; continue?",
            holders.join(", ")
        );
        if !self.prompt.confirm(&message) {
            log::warn!("leaving {port} consumers running; expect bus collisions");
            return PortLease::new(port);
        }
        if Self::signal(port, "-STOP") {
            log::info!("paused {} process(es) using {port}", holders.len());
        }
        PortLease::new(port)
    }

    fn resume(&mut self, lease: PortLease) {
        // Continue unconditionally; signalling processes that were never
        // stopped is harmless.
        if Self::signal(lease.port(), "-CONT") {
            log::info!("resumed processes using {}", lease.port());
        }
    }
}
