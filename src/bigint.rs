//! Fixed-capacity byte container used for every variable-width payload that
//! crosses the wire: challenges, responses, slot contents, OTP/config words,
//! serial numbers.
//!
//! A real allocator is unnecessary here — nothing the protocol carries is
//! larger than a slot (32 bytes) — so this is a stack buffer with a used-length
//! field rather than a `Vec<u8>`. A length of zero is the decoder's way of
//! signalling "this payload could not be produced", matching the C library's
//! `number->bytes == 0` convention.

use crate::error::{Error, Result};

pub const CAPACITY: usize = 32;

#[derive(Clone)]
pub struct BigInt {
    data: [u8; CAPACITY],
    len: usize,
}

impl BigInt {
    /// The canonical "decode failed" value: zero length, zeroed storage.
    pub fn empty() -> Self {
        BigInt { data: [0u8; CAPACITY], len: 0 }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > CAPACITY {
            return Err(Error::MemoryAllocation);
        }
        let mut data = [0u8; CAPACITY];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(BigInt { data, len: bytes.len() })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl std::fmt::Debug for BigInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigInt").field("len", &self.len).finish()
    }
}

// Slot keys, TempKey contents and serial numbers all pass through this type at
// some point; zero it on the way out regardless of what it happened to hold.
impl Drop for BigInt {
    fn drop(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }
}
