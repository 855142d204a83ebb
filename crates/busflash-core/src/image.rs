//! Firmware artifact parsing.
//!
//! An artifact is a flat file of big-endian u16 registers: a fixed-length
//! info block first, then the payload, streamed to the bootloader in
//! bounded-size chunks. The info block carries signed metadata the
//! bootloader validates before accepting any data; its exact contents are
//! opaque to this tool.

use crate::error::{Error, Result};
use std::path::Path;

/// Registers in the leading info block.
pub const INFO_BLOCK_REGS: usize = 16;
/// Maximum registers per data chunk, fixed by the bootloader's window size.
pub const CHUNK_REGS: usize = 68;

/// Bytes occupied by the info block.
pub const INFO_BLOCK_BYTES: usize = INFO_BLOCK_REGS * 2;
/// Bytes per full data chunk.
pub const CHUNK_BYTES: usize = CHUNK_REGS * 2;

/// A parsed firmware artifact ready for transfer.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    info: Vec<u16>,
    chunks: Vec<Vec<u16>>,
}

impl FirmwareImage {
    /// Parse raw artifact bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(Error::BadImage(format!(
                "image must be an even number of bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.len() < INFO_BLOCK_BYTES {
            return Err(Error::BadImage(format!(
                "image too short for a {INFO_BLOCK_BYTES}-byte info block, got {}",
                bytes.len()
            )));
        }
        let regs: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        let (info, data) = regs.split_at(INFO_BLOCK_REGS);
        let chunks = data.chunks(CHUNK_REGS).map(<[u16]>::to_vec).collect();
        Ok(Self {
            info: info.to_vec(),
            chunks,
        })
    }

    /// Load and parse an artifact file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::BadImage(format!("{}: {e}", path.display())))?;
        Self::parse(&bytes)
    }

    /// The info block registers.
    pub fn info(&self) -> &[u16] {
        &self.info
    }

    /// The data chunks, each at most [`CHUNK_REGS`] registers.
    pub fn chunks(&self) -> &[Vec<u16>] {
        &self.chunks
    }

    /// Byte offset of chunk `index` within the artifact file, for failure
    /// reports that name the failing position.
    pub fn chunk_offset(&self, index: usize) -> usize {
        INFO_BLOCK_BYTES + index * CHUNK_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_bytes(data_regs: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for i in 0..(INFO_BLOCK_REGS + data_regs) {
            bytes.extend_from_slice(&(i as u16).to_be_bytes());
        }
        bytes
    }

    #[test]
    fn splits_info_and_chunks() {
        let image = FirmwareImage::parse(&image_bytes(CHUNK_REGS + 10)).unwrap();
        assert_eq!(image.info().len(), INFO_BLOCK_REGS);
        assert_eq!(image.chunks().len(), 2);
        assert_eq!(image.chunks()[0].len(), CHUNK_REGS);
        assert_eq!(image.chunks()[1].len(), 10);
        assert_eq!(image.info()[0], 0);
        assert_eq!(image.chunks()[0][0], INFO_BLOCK_REGS as u16);
    }

    #[test]
    fn chunk_offsets_are_file_positions() {
        let image = FirmwareImage::parse(&image_bytes(3 * CHUNK_REGS)).unwrap();
        assert_eq!(image.chunk_offset(0), INFO_BLOCK_BYTES);
        assert_eq!(image.chunk_offset(2), INFO_BLOCK_BYTES + 2 * CHUNK_BYTES);
    }

    #[test]
    fn rejects_odd_and_short_files() {
        assert!(FirmwareImage::parse(&[0u8; 33]).is_err());
        assert!(FirmwareImage::parse(&[0u8; 30]).is_err());
        assert!(FirmwareImage::parse(&[]).is_err());
    }

    #[test]
    fn info_only_image_has_no_chunks() {
        let image = FirmwareImage::parse(&image_bytes(0)).unwrap();
        assert!(image.chunks().is_empty());
    }
}
