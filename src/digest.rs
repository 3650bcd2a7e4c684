//! Emulator digest engine: assembles the chip's documented 88-byte HMAC/MAC
//! message and hashes it with SHA-256 (§4.8). Bit-exactness of the assembly
//! is the whole point of this module; every field offset below is load-bearing.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const MESSAGE_LEN: usize = 88;

/// Assembles the 88-byte HMAC/MAC message per §4.8, without hashing it.
/// Exposed at `pub(crate)` visibility so tests can assert on the message
/// layout itself rather than only on the SHA-256 output it feeds.
///
/// `otp_head` must supply at least the first 11 bytes of the OTP zone;
/// `serial` must supply at least the first 8 bytes of the serial number
/// (the native SN's 9th byte is never mixed into the digest).
pub(crate) fn build_message(
    slot_key: &[u8],
    challenge: &[u8],
    opcode: u8,
    mode: u8,
    slot_id: u16,
    otp_head: &[u8],
    serial: &[u8],
    sn_in_digest: bool,
) -> Result<[u8; MESSAGE_LEN]> {
    if slot_key.len() != 32 {
        return Err(Error::InvalidInput("slot key must be 32 bytes"));
    }
    if challenge.len() != 32 {
        return Err(Error::InvalidInput("challenge must be 32 bytes"));
    }
    if otp_head.len() < 11 {
        return Err(Error::InvalidInput("OTP head must supply at least 11 bytes"));
    }
    if serial.len() < 8 {
        return Err(Error::InvalidInput("serial must supply at least 8 bytes"));
    }

    let mut msg = [0u8; MESSAGE_LEN];
    msg[0..32].copy_from_slice(slot_key);
    msg[32..64].copy_from_slice(challenge);
    msg[64] = opcode;
    msg[65] = mode;
    msg[66..68].copy_from_slice(&slot_id.to_le_bytes());

    if sn_in_digest {
        msg[68..76].copy_from_slice(&otp_head[0..8]);
        msg[76..79].copy_from_slice(&otp_head[8..11]);
        msg[80..84].copy_from_slice(&serial[0..4]);
        msg[84..86].copy_from_slice(&serial[4..6]);
        msg[86..88].copy_from_slice(&serial[6..8]);
    }
    // else: the corresponding ranges stay zero, matching a cleared sn-flag.

    Ok(msg)
}

/// `otp_head` must supply at least the first 11 bytes of the OTP zone;
/// `serial` must supply at least the first 8 bytes of the serial number
/// (the native SN's 9th byte is never mixed into the digest).
pub fn hmac_mac_digest(
    slot_key: &[u8],
    challenge: &[u8],
    opcode: u8,
    mode: u8,
    slot_id: u16,
    otp_head: &[u8],
    serial: &[u8],
    sn_in_digest: bool,
) -> Result<[u8; 32]> {
    let msg = build_message(slot_key, challenge, opcode, mode, slot_id, otp_head, serial, sn_in_digest)?;
    let mut hasher = Sha256::new();
    hasher.update(msg);
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sn_flag_cleared_zeroes_digest_tail() {
        // Spec §8 scenario 3: slot 7 key = FF x 32, challenge = 00 x 32,
        // sn-flag cleared. Message bytes 68..87 must be all zero.
        let slot_key = [0xFFu8; 32];
        let challenge = [0x00u8; 32];
        let otp_head = [0xAAu8; 11];
        let serial = [0xBBu8; 8];
        let msg = build_message(&slot_key, &challenge, 0x08, 0x00, 7, &otp_head, &serial, false).unwrap();
        assert_eq!(&msg[68..88], &[0u8; 20][..]);
    }

    #[test]
    fn sn_flag_changes_digest() {
        let slot_key = [0u8; 32];
        let challenge = [0x79u8; 32];
        let otp_head = [0u8; 11];
        let serial = [0x01, 0x23, 0, 0, 0, 0, 0, 0];
        let with_sn = hmac_mac_digest(&slot_key, &challenge, 0x11, 0x40, 0, &otp_head, &serial, true).unwrap();
        let without_sn = hmac_mac_digest(&slot_key, &challenge, 0x11, 0x40, 0, &otp_head, &serial, false).unwrap();
        assert_ne!(with_sn, without_sn);
    }

    #[test]
    fn rejects_undersized_inputs() {
        let err = hmac_mac_digest(&[0u8; 31], &[0u8; 32], 0, 0, 0, &[0u8; 11], &[0u8; 8], false).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
