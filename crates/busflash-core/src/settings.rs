//! Serial connection parameter sets.
//!
//! Devices on the bus may answer under different UART parameters; a
//! [`ConnectionSettings`] is a *candidate* set, discovered by negotiation
//! rather than assigned. The compact `9600N2` string form is the one
//! operators pass on the command line and the one driver configs use.

use crate::error::{Error, Result};
use std::fmt;

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl Parity {
    /// Single-letter form used in `9600N2`-style strings.
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'N' => Some(Parity::None),
            'O' => Some(Parity::Odd),
            'E' => Some(Parity::Even),
            _ => None,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopBits {
    /// One stop bit.
    One,
    /// Two stop bits.
    Two,
}

impl StopBits {
    /// Numeric form.
    pub fn count(self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// One candidate UART parameter set for talking to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionSettings {
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Parity setting.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Data bits per character; the bus protocol always uses 8.
    pub data_bits: u8,
}

/// Fixed parameters every bootloader listens on.
pub const BOOTLOADER_SETTINGS: ConnectionSettings = ConnectionSettings {
    baud_rate: 9600,
    parity: Parity::None,
    stop_bits: StopBits::Two,
    data_bits: 8,
};

/// Fallback candidates tried when nothing is known about a device, in
/// priority order. Kept short on purpose: a long scan multiplies the worst
/// case negotiation time by the per-candidate timeout.
pub const FALLBACK_CANDIDATES: [ConnectionSettings; 2] = [
    BOOTLOADER_SETTINGS,
    ConnectionSettings {
        baud_rate: 115_200,
        parity: Parity::None,
        stop_bits: StopBits::Two,
        data_bits: 8,
    },
];

impl ConnectionSettings {
    /// Build a settings candidate with 8 data bits.
    pub fn new(baud_rate: u32, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            baud_rate,
            parity,
            stop_bits,
            data_bits: 8,
        }
    }

    /// Parse the compact `9600N2` form: baud rate, parity letter, stop bits.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let parity_pos = s
            .char_indices()
            .find(|(_, c)| c.is_ascii_alphabetic())
            .map(|(i, _)| i)
            .ok_or_else(|| Error::BadSettings(s.to_string()))?;
        let (baud_str, rest) = s.split_at(parity_pos);
        let mut rest_chars = rest.chars();
        let parity = rest_chars
            .next()
            .and_then(Parity::from_letter)
            .ok_or_else(|| Error::BadSettings(s.to_string()))?;
        let baud_rate: u32 = baud_str
            .parse()
            .map_err(|_| Error::BadSettings(s.to_string()))?;
        let stop_bits = match rest_chars.as_str() {
            "1" => StopBits::One,
            "2" => StopBits::Two,
            _ => return Err(Error::BadSettings(s.to_string())),
        };
        Ok(Self::new(baud_rate, parity, stop_bits))
    }
}

impl fmt::Display for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.baud_rate,
            self.parity.letter(),
            self.stop_bits.count()
        )
    }
}
