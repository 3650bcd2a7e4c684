//! Wire framing: build command frames and validate/strip response frames.
//!
//! Command frame: `[len | opcode | param1 | param2_lo | param2_hi | payload.. | crc_lo | crc_hi]`.
//! Response frame: `[len | body.. | crc_lo | crc_hi]`. `len` counts itself and the CRC.

use crate::crc;
use crate::error::{Error, Result};

/// Largest frame this codec ever builds or parses: a 32-byte Write/MAC
/// payload plus a 5-byte command header and 2-byte CRC, rounded up.
pub const CAPACITY: usize = 96;

/// A frame's raw bytes in a fixed-capacity stack buffer.
#[derive(Clone)]
pub struct Frame {
    data: [u8; CAPACITY],
    len: usize,
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("len", &self.len).finish()
    }
}

/// A decoded command frame, for round-trip testing and for the server-side
/// emulator which must parse commands rather than just responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: u8,
    pub param1: u8,
    pub param2: u16,
    pub payload: Vec<u8>,
}

/// A decoded, validated response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Single-byte body: a status code.
    Status(u8),
    /// Multi-byte body: an operation result.
    Data(Vec<u8>),
}

pub fn encode_command(opcode: u8, param1: u8, param2: u16, payload: &[u8]) -> Result<Frame> {
    let total = 5 + payload.len() + 2;
    if total > CAPACITY {
        return Err(Error::MemoryAllocation);
    }
    let mut data = [0u8; CAPACITY];
    data[0] = total as u8;
    data[1] = opcode;
    data[2] = param1;
    data[3] = (param2 & 0x00FF) as u8;
    data[4] = (param2 >> 8) as u8;
    data[5..5 + payload.len()].copy_from_slice(payload);
    let crc = crc::crc16(&data[..5 + payload.len()]);
    data[5 + payload.len()] = crc[0];
    data[5 + payload.len() + 1] = crc[1];
    Ok(Frame { data, len: total })
}

pub fn decode_command(bytes: &[u8]) -> Result<CommandFrame> {
    if bytes.len() < 7 {
        return Err(Error::Communication("command frame too short".into()));
    }
    let len = bytes[0] as usize;
    if len != bytes.len() {
        return Err(Error::Communication("command frame length mismatch".into()));
    }
    let body = &bytes[..len - 2];
    let crc = [bytes[len - 2], bytes[len - 1]];
    if !crc::verify(body, crc) {
        return Err(Error::Communication("command frame CRC mismatch".into()));
    }
    Ok(CommandFrame {
        opcode: bytes[1],
        param1: bytes[2],
        param2: u16::from_le_bytes([bytes[3], bytes[4]]),
        payload: bytes[5..len - 2].to_vec(),
    })
}

pub fn decode_response(bytes: &[u8]) -> Result<ResponseBody> {
    if bytes.len() < 4 {
        return Err(Error::Communication("response frame too short".into()));
    }
    let len = bytes[0] as usize;
    if len != bytes.len() {
        return Err(Error::Communication("response frame length mismatch".into()));
    }
    let body = &bytes[..len - 2];
    let crc = [bytes[len - 2], bytes[len - 1]];
    if !crc::verify(body, crc) {
        return Err(Error::Communication("response frame CRC mismatch".into()));
    }
    let payload = &bytes[1..len - 2];
    if payload.len() == 1 {
        let status = payload[0];
        if is_error_status(status) {
            return Err(Error::BadDeviceStatus(status));
        }
        return Ok(ResponseBody::Status(status));
    }
    Ok(ResponseBody::Data(payload.to_vec()))
}

/// Builds a response frame for an arbitrary body (status byte or data
/// payload). Used by the emulator, which plays the role of "chip" and so
/// must produce response frames instead of only parsing them.
pub fn encode_response(body: &[u8]) -> Result<Frame> {
    let total = 1 + body.len() + 2;
    if total > CAPACITY {
        return Err(Error::MemoryAllocation);
    }
    let mut data = [0u8; CAPACITY];
    data[0] = total as u8;
    data[1..1 + body.len()].copy_from_slice(body);
    let crc = crc::crc16(&data[..1 + body.len()]);
    data[1 + body.len()] = crc[0];
    data[1 + body.len() + 1] = crc[1];
    Ok(Frame { data, len: total })
}

fn is_error_status(status: u8) -> bool {
    matches!(status, crate::ops::status::MISCOMPARE
        | crate::ops::status::PARSE_ERROR
        | crate::ops::status::EXEC_ERROR
        | crate::ops::status::COMM_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_rev_command_frame_matches_expected_bytes() {
        let frame = encode_command(0x30, 0, 0, &[]).unwrap();
        let crc = crc::crc16(&[0x07, 0x30, 0x00, 0x00, 0x00]);
        assert_eq!(frame.as_bytes(), &[0x07, 0x30, 0x00, 0x00, 0x00, crc[0], crc[1]]);
    }

    #[test]
    fn command_round_trips() {
        let payload = [1u8, 2, 3, 4];
        let frame = encode_command(0x12, 0x80, 0x0008, &payload).unwrap();
        let decoded = decode_command(frame.as_bytes()).unwrap();
        assert_eq!(decoded.opcode, 0x12);
        assert_eq!(decoded.param1, 0x80);
        assert_eq!(decoded.param2, 0x0008);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn response_with_bad_crc_is_rejected() {
        let mut bytes = vec![0x04, 0x00, 0xAB, 0xCD];
        bytes[2] ^= 0xFF;
        assert!(matches!(decode_response(&bytes), Err(Error::Communication(_))));
    }

    #[test]
    fn response_with_error_status_is_rejected() {
        let body = [0x04u8, crate::ops::status::EXEC_ERROR];
        let crc = crc::crc16(&body);
        let bytes = [body[0], body[1], crc[0], crc[1]];
        assert!(matches!(decode_response(&bytes), Err(Error::BadDeviceStatus(0x0F))));
    }
}
