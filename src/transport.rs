//! Byte-level transport abstraction and its concrete backends.
//!
//! The session driver (`session.rs`) only ever talks to a `Transport`; it
//! never knows whether the frames it hands over end up on a USB-bridge file
//! descriptor, a native I2C bus, or an in-process emulator.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ops::{extract_status, status};

/// Word-address bytes prefixing a packet on the wire, matching the chip's
/// documented I2C addressing scheme (reset / sleep / idle / command).
pub mod word_address {
    pub const RESET: u8 = 0x00;
    pub const SLEEP: u8 = 0x01;
    pub const IDLE: u8 = 0x02;
    pub const COMMAND: u8 = 0x03;
}

/// Time the chip needs after a wake pulse before it will answer.
pub const WAKE_DELAY: Duration = Duration::from_micros(1500);

pub trait Transport {
    fn wake(&mut self) -> Result<()>;
    fn send(&mut self, frame: &[u8]) -> Result<()>;
    fn receive(&mut self) -> Result<Vec<u8>>;
    fn idle(&mut self) -> Result<()>;
}

/// Shared implementation for the USB-bridge and native-I2C backends: both
/// differ only in how their underlying descriptor is opened, not in how
/// they speak the wake/frame/idle sequence over it.
pub struct RawDeviceTransport<S: Read + Write> {
    stream: S,
}

impl<S: Read + Write> RawDeviceTransport<S> {
    pub fn new(stream: S) -> Self {
        RawDeviceTransport { stream }
    }

    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_byte = [0u8; 1];
        self.stream.read_exact(&mut len_byte)?;
        let len = len_byte[0] as usize;
        if len < 3 {
            return Err(Error::Communication("response frame shorter than minimum length".into()));
        }
        let mut rest = vec![0u8; len - 1];
        self.stream.read_exact(&mut rest)?;
        let mut frame = Vec::with_capacity(len);
        frame.push(len_byte[0]);
        frame.extend_from_slice(&rest);
        Ok(frame)
    }
}

impl<S: Read + Write> Transport for RawDeviceTransport<S> {
    fn wake(&mut self) -> Result<()> {
        self.stream.write_all(&[word_address::RESET])?;
        std::thread::sleep(WAKE_DELAY);
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(frame.len() + 1);
        buf.push(word_address::COMMAND);
        buf.extend_from_slice(frame);
        self.stream.write_all(&buf)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        self.read_frame()
    }

    fn idle(&mut self) -> Result<()> {
        self.stream.write_all(&[word_address::IDLE])?;
        let frame = self.read_frame()?;
        let confirmed = extract_status(&frame)?;
        if confirmed != status::OK && confirmed != status::WAKE_OK {
            return Err(Error::Communication(format!("idle not confirmed: status 0x{confirmed:02X}")));
        }
        Ok(())
    }
}

/// Placeholder for the vendor MPSSE bitbang I2C adapter. No driver for it
/// ships in this crate (it is an external collaborator); this variant exists
/// so the transport type is exhaustive and the public `Handle::open_mpsse`
/// constructor has somewhere to point until an embedding application wires
/// a real adapter in.
pub struct MpsseTransport;

impl Transport for MpsseTransport {
    fn wake(&mut self) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn send(&mut self, _frame: &[u8]) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        Err(Error::NotImplemented)
    }

    fn idle(&mut self) -> Result<()> {
        Err(Error::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A `Read + Write` double that discards writes and replays a fixed
    /// response queue, for exercising `RawDeviceTransport` without real I/O.
    struct LoopbackStream {
        to_read: Cursor<Vec<u8>>,
    }

    impl Read for LoopbackStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.to_read.read(buf)
        }
    }

    impl Write for LoopbackStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn receive_reads_exactly_the_declared_length() {
        let crc = crate::crc::crc16(&[0x04, status::OK]);
        let wire = vec![0x04, status::OK, crc[0], crc[1]];
        let stream = LoopbackStream { to_read: Cursor::new(wire.clone()) };
        let mut transport = RawDeviceTransport::new(stream);
        let frame = transport.receive().unwrap();
        assert_eq!(frame, wire);
    }

    #[test]
    fn mpsse_transport_is_not_implemented() {
        let mut t = MpsseTransport;
        assert!(matches!(t.wake(), Err(Error::NotImplemented)));
        assert!(matches!(t.idle(), Err(Error::NotImplemented)));
    }
}
