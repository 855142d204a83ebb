//! busflash-proto - register-bus RTU protocol client
//!
//! Implements the engine's [`busflash_core::port::BusPort`] trait on top of
//! RTU-style framing (CRC16, function codes 0x03/0x06/0x10) over a
//! byte-level [`transport::Transport`]. Two transports exist: a direct
//! serial port and a TCP connection to a remote serial server, selected by
//! the port string (`tcp://host:port`).

pub mod client;
pub mod error;
pub mod frame;
pub mod transport;

pub use client::{BusClient, PortFactory};
pub use error::{ProtoError, Result};
