//! RTU frame construction and validation.
//!
//! Frames are `[slave, function, payload.., crc_lo, crc_hi]` with the
//! standard reflected CRC16 (polynomial 0xA001). Exception replies set the
//! high bit of the echoed function code and carry a one-byte exception
//! code as payload.

use crate::error::{ProtoError, Result};

/// Read holding registers.
pub const FN_READ_HOLDING: u8 = 0x03;
/// Write a single holding register.
pub const FN_WRITE_SINGLE: u8 = 0x06;
/// Write multiple holding registers.
pub const FN_WRITE_MULTIPLE: u8 = 0x10;

/// Bit set in the echoed function code of an exception reply.
pub const EXCEPTION_BIT: u8 = 0x80;

/// CRC16 with polynomial 0xA001, initial value 0xFFFF.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.push(crc as u8);
    frame.push((crc >> 8) as u8);
    frame
}

/// Build a read-holding-registers request.
pub fn build_read(slave_id: u8, addr: u16, count: u16) -> Vec<u8> {
    with_crc(vec![
        slave_id,
        FN_READ_HOLDING,
        (addr >> 8) as u8,
        addr as u8,
        (count >> 8) as u8,
        count as u8,
    ])
}

/// Build a write-single-register request.
pub fn build_write_single(slave_id: u8, addr: u16, value: u16) -> Vec<u8> {
    with_crc(vec![
        slave_id,
        FN_WRITE_SINGLE,
        (addr >> 8) as u8,
        addr as u8,
        (value >> 8) as u8,
        value as u8,
    ])
}

/// Build a write-multiple-registers request.
pub fn build_write_multiple(slave_id: u8, addr: u16, values: &[u16]) -> Vec<u8> {
    let count = values.len() as u16;
    let mut frame = Vec::with_capacity(7 + values.len() * 2 + 2);
    frame.extend_from_slice(&[
        slave_id,
        FN_WRITE_MULTIPLE,
        (addr >> 8) as u8,
        addr as u8,
        (count >> 8) as u8,
        count as u8,
        (count * 2) as u8,
    ]);
    for value in values {
        frame.push((value >> 8) as u8);
        frame.push(*value as u8);
    }
    with_crc(frame)
}

/// Validate the trailing CRC of a complete frame.
pub fn verify_crc(frame: &[u8]) -> Result<()> {
    if frame.len() < 4 {
        return Err(ProtoError::Malformed(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let expected = crc16(body);
    let actual = u16::from(tail[0]) | (u16::from(tail[1]) << 8);
    if expected != actual {
        return Err(ProtoError::Crc { expected, actual });
    }
    Ok(())
}

/// How many bytes remain after the three-byte reply head, or an error for
/// an unrecognised function code.
pub fn remaining_after_head(head: &[u8; 3]) -> Result<usize> {
    if head[1] & EXCEPTION_BIT != 0 {
        // Exception reply: code already in head, CRC remains.
        return Ok(2);
    }
    match head[1] {
        FN_READ_HOLDING => Ok(usize::from(head[2]) + 2),
        // Echoed address and value/count, then CRC.
        FN_WRITE_SINGLE | FN_WRITE_MULTIPLE => Ok(5),
        other => Err(ProtoError::Malformed(format!(
            "unexpected function code {other:#04x}"
        ))),
    }
}

/// Extract register values from a validated read reply.
pub fn parse_read_reply(frame: &[u8], expected_count: u16) -> Result<Vec<u16>> {
    let byte_count = usize::from(frame[2]);
    if byte_count != usize::from(expected_count) * 2 || frame.len() != 3 + byte_count + 2 {
        return Err(ProtoError::Malformed(format!(
            "expected {expected_count} registers, reply carries {byte_count} bytes"
        )));
    }
    Ok(frame[3..3 + byte_count]
        .chunks_exact(2)
        .map(|pair| (u16::from(pair[0]) << 8) | u16::from(pair[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_crc_vector() {
        // Classic reference frame: 01 03 00 00 00 01 -> CRC bytes 84 0A.
        let frame = build_read(1, 0, 1);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
        verify_crc(&frame).unwrap();
    }

    #[test]
    fn corrupted_frame_fails_crc() {
        let mut frame = build_read(1, 0, 1);
        frame[3] ^= 0xFF;
        assert!(matches!(verify_crc(&frame), Err(ProtoError::Crc { .. })));
    }

    #[test]
    fn write_multiple_layout() {
        let frame = build_write_multiple(5, 0x2000, &[0x1234, 0x5678]);
        assert_eq!(
            &frame[..11],
            &[0x05, 0x10, 0x20, 0x00, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78]
        );
        verify_crc(&frame).unwrap();
    }

    #[test]
    fn reply_head_lengths() {
        assert_eq!(remaining_after_head(&[1, FN_READ_HOLDING, 4]).unwrap(), 6);
        assert_eq!(remaining_after_head(&[1, FN_WRITE_SINGLE, 0]).unwrap(), 5);
        assert_eq!(
            remaining_after_head(&[1, FN_READ_HOLDING | EXCEPTION_BIT, 2]).unwrap(),
            2
        );
        assert!(remaining_after_head(&[1, 0x2B, 0]).is_err());
    }

    #[test]
    fn read_reply_roundtrip() {
        let mut reply = vec![0x05, 0x03, 0x04, 0x00, 0x05, 0x01, 0x00];
        let crc = crc16(&reply);
        reply.push(crc as u8);
        reply.push((crc >> 8) as u8);
        verify_crc(&reply).unwrap();
        assert_eq!(parse_read_reply(&reply, 2).unwrap(), vec![0x0005, 0x0100]);
        assert!(parse_read_reply(&reply, 3).is_err());
    }
}
