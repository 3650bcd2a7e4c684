//! Opcodes, status codes, and per-opcode request encoders / result decoders.
//!
//! Each `encode_*` builds the command frame for one opcode from §4.3; the
//! corresponding `extract_*` pulls the typed result back out of a decoded
//! [`ResponseBody`](crate::frame::ResponseBody).

use crate::address::{zone_selector, Size, Zone};
use crate::bigint::BigInt;
use crate::error::{Error, Result};
use crate::frame::{decode_response, encode_command, Frame, ResponseBody};

pub mod opcode {
    pub const DEV_REV: u8 = 0x30;
    pub const RANDOM: u8 = 0x1B;
    pub const READ: u8 = 0x02;
    pub const WRITE: u8 = 0x12;
    pub const NONCE: u8 = 0x16;
    pub const HMAC: u8 = 0x11;
    pub const MAC: u8 = 0x08;
    pub const LOCK: u8 = 0x17;
}

pub mod status {
    pub const OK: u8 = 0x00;
    pub const MISCOMPARE: u8 = 0x01;
    pub const PARSE_ERROR: u8 = 0x03;
    pub const EXEC_ERROR: u8 = 0x0F;
    pub const WAKE_OK: u8 = 0x11;
    pub const COMM_ERROR: u8 = 0xFF;
}

/// Mode bit selecting whether the serial number and OTP head bytes are
/// mixed into an HMAC/MAC digest.
pub const MODE_SN_IN_DIGEST: u8 = 0x40;

pub fn encode_dev_rev() -> Result<Frame> {
    encode_command(opcode::DEV_REV, 0, 0, &[])
}

pub fn encode_random() -> Result<Frame> {
    encode_command(opcode::RANDOM, 0, 0, &[])
}

pub fn encode_read(zone: Zone, size: Size, address: u8) -> Result<Frame> {
    encode_command(opcode::READ, zone_selector(zone, size), address as u16, &[])
}

pub fn encode_write(zone: Zone, size: Size, address: u8, payload: &[u8]) -> Result<Frame> {
    if payload.len() != size.byte_len() {
        return Err(Error::InvalidInput("write payload length does not match zone size"));
    }
    encode_command(opcode::WRITE, zone_selector(zone, size), address as u16, payload)
}

pub fn encode_nonce(mode: u8, challenge: &[u8]) -> Result<Frame> {
    if challenge.len() != 32 {
        return Err(Error::InvalidInput("challenge must be 32 bytes"));
    }
    encode_command(opcode::NONCE, mode, 0, challenge)
}

pub fn encode_hmac(mode: u8, slot: u8) -> Result<Frame> {
    encode_command(opcode::HMAC, mode, slot as u16, &[])
}

pub fn encode_mac(mode: u8, slot: u8, challenge: &[u8]) -> Result<Frame> {
    if challenge.len() != 32 {
        return Err(Error::InvalidInput("challenge must be 32 bytes"));
    }
    encode_command(opcode::MAC, mode, slot as u16, challenge)
}

/// `zone` is the Lock opcode's own encoding (config = 0, data = 1), distinct
/// from the Read/Write zone selector byte.
pub fn encode_lock(zone: u8, crc: [u8; 2]) -> Result<Frame> {
    encode_command(opcode::LOCK, zone, u16::from_le_bytes(crc), &[])
}

/// Parses a response body that is expected to be a single status byte.
pub fn extract_status(bytes: &[u8]) -> Result<u8> {
    match decode_response(bytes)? {
        ResponseBody::Status(s) => Ok(s),
        ResponseBody::Data(d) => Err(Error::Communication(format!(
            "expected status byte, got {}-byte payload",
            d.len()
        ))),
    }
}

/// Parses a response body that is expected to carry a data payload.
pub fn extract_data(bytes: &[u8]) -> Result<BigInt> {
    match decode_response(bytes)? {
        ResponseBody::Data(d) => BigInt::from_slice(&d),
        ResponseBody::Status(s) => Err(Error::BadDeviceStatus(s)),
    }
}
