//! Modbus request construction and response decoding (§4.2).
//!
//! Frames travel the wire as uppercase hex (§3 "Modbus Frame"). CRC is
//! computed on outbound frames only — the HTTP gateway is the CRC
//! authority for inbound frames (§4.2).

use super::crc::append_crc;
use super::hex;
use super::registers::{address_of, RegisterId};
use crate::error::ModbusError;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Outcome of [`parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Ok,
    Exception(u8),
}

/// Build a read-holding-registers request spanning the contiguous
/// address range covering every register in `regs`.
///
/// Returns `(frame_hex, start, count)`. `NoRegisters` if `regs` is
/// empty.
pub fn build_read(slave: u8, regs: &[RegisterId]) -> Result<(String, u16, u16), ModbusError> {
    if regs.is_empty() {
        return Err(ModbusError::NoRegisters);
    }
    let addrs: Vec<u16> = regs.iter().copied().map(address_of).collect();
    let start = *addrs.iter().min().unwrap();
    let end = *addrs.iter().max().unwrap();
    let count = end - start + 1;

    let mut frame = vec![
        slave,
        READ_HOLDING_REGISTERS,
        (start >> 8) as u8,
        (start & 0xFF) as u8,
        (count >> 8) as u8,
        (count & 0xFF) as u8,
    ];
    append_crc(&mut frame);

    Ok((hex::encode_upper(&frame), start, count))
}

/// Build a write-single-register request.
#[must_use]
pub fn build_write(slave: u8, addr: u16, value: u16) -> String {
    let mut frame = vec![
        slave,
        WRITE_SINGLE_REGISTER,
        (addr >> 8) as u8,
        (addr & 0xFF) as u8,
        (value >> 8) as u8,
        (value & 0xFF) as u8,
    ];
    append_crc(&mut frame);
    hex::encode_upper(&frame)
}

/// Parse a frame received from the gateway, checking only for malformed
/// encoding and exception responses. CRC is not re-verified (§4.2).
pub fn parse(frame_hex: &str) -> Result<ParseOutcome, ModbusError> {
    if frame_hex.len() < 6 || !hex::is_hex(frame_hex) {
        return Err(ModbusError::Malformed);
    }
    let bytes = hex::decode(frame_hex).ok_or(ModbusError::Malformed)?;
    if bytes.len() < 3 {
        return Err(ModbusError::Malformed);
    }
    let func = bytes[1];
    if func & 0x80 != 0 {
        return Ok(ParseOutcome::Exception(bytes[2]));
    }
    Ok(ParseOutcome::Ok)
}

/// Decode a read-holding-registers response, returning the values of
/// `regs` in the order given. Registers not covered by the response
/// range decode as `0`.
pub fn decode_read_response(
    frame_hex: &str,
    start: u16,
    count: u16,
    regs: &[RegisterId],
) -> Result<Vec<u16>, ModbusError> {
    let bytes = hex::decode(frame_hex).ok_or(ModbusError::Malformed)?;
    if bytes.len() < 3 {
        return Err(ModbusError::Malformed);
    }
    let func = bytes[1];
    if func & 0x80 != 0 {
        return Err(ModbusError::Exception(bytes[2]));
    }
    if func != READ_HOLDING_REGISTERS {
        return Err(ModbusError::Malformed);
    }
    let byte_count = bytes[2] as usize;
    if byte_count != 2 * count as usize {
        return Err(ModbusError::Malformed);
    }
    let payload = &bytes[3..];
    if payload.len() < byte_count {
        return Err(ModbusError::Malformed);
    }

    let mut words = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let hi = payload[i * 2];
        let lo = payload[i * 2 + 1];
        words.push(u16::from_be_bytes([hi, lo]));
    }

    let mut out = Vec::with_capacity(regs.len());
    for &reg in regs {
        let addr = address_of(reg);
        if addr < start || addr >= start + count {
            out.push(0);
            continue;
        }
        let offset = (addr - start) as usize;
        out.push(words[offset]);
    }
    Ok(out)
}
