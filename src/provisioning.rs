//! Parser for the provisioning config file format (§6): 16 slot-key lines
//! followed by 16 OTP-word lines, the same two leading sections the emulator
//! config file uses. The provisioning CLI that drives a chip from this file
//! is an external collaborator (§1 Out of scope); this crate only supplies
//! the parser, grounded on `chipinit/main.c`'s `read_config`.

use std::fs;
use std::path::Path;

use crate::crc::parse_hex_line;
use crate::error::{Error, Result};

const NUM_SLOTS: usize = 16;
const NUM_OTP_WORDS: usize = 16;

/// The two provisionable sections of a config file: slot keys and OTP words.
#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub slots: [[u8; 32]; NUM_SLOTS],
    pub otp: [[u8; 4]; NUM_OTP_WORDS],
}

impl ProvisioningConfig {
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        if lines.len() < NUM_SLOTS + NUM_OTP_WORDS {
            return Err(Error::Communication(format!(
                "provisioning config has {} data lines, expected {}",
                lines.len(),
                NUM_SLOTS + NUM_OTP_WORDS
            )));
        }

        let mut slots = [[0u8; 32]; NUM_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            let bytes = parse_hex_line(lines[i], 32)
                .ok_or_else(|| Error::Communication(format!("slot {i}: malformed hex line")))?;
            slot.copy_from_slice(&bytes);
        }

        let mut otp = [[0u8; 4]; NUM_OTP_WORDS];
        for (i, word) in otp.iter_mut().enumerate() {
            let bytes = parse_hex_line(lines[NUM_SLOTS + i], 4)
                .ok_or_else(|| Error::Communication(format!("OTP word {i}: malformed hex line")))?;
            word.copy_from_slice(&bytes);
        }

        Ok(ProvisioningConfig { slots, otp })
    }
}
