//! Public API surface: the session driver (§4.5) and the high-level calls
//! built on top of it (§4.9, data model `Handle`).
//!
//! Every public method here follows the canonical wake → operate → idle
//! sequence exactly once; multi-step calls (challenge-response) open a single
//! wake/idle bracket around more than one operation, matching
//! `atsha_low_challenge_response`/`atsha_low_challenge_response_mac` in the
//! original driver.

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::address::{slot_address, validate_challenge, validate_config_addr, validate_otp_addr, validate_slot, Size, Zone};
use crate::bigint::BigInt;
use crate::config::Config;
use crate::emulator::{EmulatorState, EmulatorTransport, SerialNumberSource, ServerEmulatorTransport};
use crate::error::{Error, Result};
use crate::lock::{ProcessLock, DEFAULT_LOCK_PATH, DEFAULT_TIMEOUT};
use crate::ops::{self, status, MODE_SN_IN_DIGEST};
use crate::transport::{MpsseTransport, RawDeviceTransport, Transport};

/// OTP address holding the key-origin tag the original reads eagerly at
/// `atsha_open_emulation` time (`ATSHA204_OTP_MEMORY_MAP_ORIGIN_KEY_SET`;
/// the header defining its exact value was not among the retrieved sources,
/// so this crate picks OTP word 0 — see DESIGN.md).
const OTP_KEY_ORIGIN_ADDR: u8 = 0x00;

/// Config-zone addresses carrying the chip's native 9-byte serial number on
/// real hardware (Atmel ATSHA204 config-zone layout: SN[0:3] at word 0,
/// SN[4:7] at word 2, SN[8] as the low byte of word 3).
const SN_CONFIG_ADDR_LOW: u8 = 0x00;
const SN_CONFIG_ADDR_MID: u8 = 0x02;
const SN_CONFIG_ADDR_HIGH: u8 = 0x03;

/// Transport polymorphism as a closed variant set (§9 REDESIGN FLAGS), rather
/// than the original's tagged integer plus per-branch `if`/`switch` code.
enum TransportKind {
    Usb(RawDeviceTransport<File>),
    NativeI2c(RawDeviceTransport<File>),
    Mpsse(MpsseTransport),
    FileEmulator(EmulatorTransport),
    ServerEmulator(ServerEmulatorTransport),
}

impl TransportKind {
    fn is_physical(&self) -> bool {
        matches!(self, TransportKind::Usb(_) | TransportKind::NativeI2c(_) | TransportKind::Mpsse(_))
    }

    fn is_server_emulation(&self) -> bool {
        matches!(self, TransportKind::ServerEmulator(_))
    }
}

impl Transport for TransportKind {
    fn wake(&mut self) -> Result<()> {
        match self {
            TransportKind::Usb(t) | TransportKind::NativeI2c(t) => t.wake(),
            TransportKind::Mpsse(t) => t.wake(),
            TransportKind::FileEmulator(t) => t.wake(),
            TransportKind::ServerEmulator(t) => t.wake(),
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        match self {
            TransportKind::Usb(t) | TransportKind::NativeI2c(t) => t.send(frame),
            TransportKind::Mpsse(t) => t.send(frame),
            TransportKind::FileEmulator(t) => t.send(frame),
            TransportKind::ServerEmulator(t) => t.send(frame),
        }
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        match self {
            TransportKind::Usb(t) | TransportKind::NativeI2c(t) => t.receive(),
            TransportKind::Mpsse(t) => t.receive(),
            TransportKind::FileEmulator(t) => t.receive(),
            TransportKind::ServerEmulator(t) => t.receive(),
        }
    }

    fn idle(&mut self) -> Result<()> {
        match self {
            TransportKind::Usb(t) | TransportKind::NativeI2c(t) => t.idle(),
            TransportKind::Mpsse(t) => t.idle(),
            TransportKind::FileEmulator(t) => t.idle(),
            TransportKind::ServerEmulator(t) => t.idle(),
        }
    }
}

/// A session instance: one transport, an optional held process lock, cached
/// device identity, and the explicit `Config` that replaces the original's
/// global verbose/log-callback state (§9 REDESIGN FLAGS).
pub struct Handle {
    transport: TransportKind,
    _lock: Option<ProcessLock>,
    config: Config,
    cached_serial: Option<Vec<u8>>,
    cached_key_origin: Option<u32>,
}

impl Handle {
    /// Opens a USB-bridge transport at `path`, acquiring the cross-process
    /// exclusion lock first (lock-then-open, §9 REDESIGN FLAGS).
    pub fn open_usb(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let lock = ProcessLock::acquire(DEFAULT_LOCK_PATH, DEFAULT_TIMEOUT)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Handle {
            transport: TransportKind::Usb(RawDeviceTransport::new(file)),
            _lock: Some(lock),
            config,
            cached_serial: None,
            cached_key_origin: None,
        })
    }

    /// Opens a native I2C bus device at `path`, same locking discipline as [`Handle::open_usb`].
    pub fn open_native_i2c(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let lock = ProcessLock::acquire(DEFAULT_LOCK_PATH, DEFAULT_TIMEOUT)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Handle {
            transport: TransportKind::NativeI2c(RawDeviceTransport::new(file)),
            _lock: Some(lock),
            config,
            cached_serial: None,
            cached_key_origin: None,
        })
    }

    /// Opens the MPSSE-I2C adapter. No driver for the adapter itself ships
    /// in this crate (§1 Out of scope); every call on the resulting handle
    /// fails with [`Error::NotImplemented`] until an embedding application
    /// wires a real adapter behind [`MpsseTransport`].
    pub fn open_mpsse(config: Config) -> Result<Self> {
        let lock = ProcessLock::acquire(DEFAULT_LOCK_PATH, DEFAULT_TIMEOUT)?;
        Ok(Handle {
            transport: TransportKind::Mpsse(MpsseTransport),
            _lock: Some(lock),
            config,
            cached_serial: None,
            cached_key_origin: None,
        })
    }

    /// Opens a device-side file-backed emulator, caching serial number and
    /// key-origin eagerly, matching `atsha_open_emulation`.
    pub fn open_emulator(path: impl AsRef<Path>, sn_source: SerialNumberSource, config: Config) -> Result<Self> {
        let state = EmulatorState::parse(path)?;
        let mut handle = Handle {
            transport: TransportKind::FileEmulator(EmulatorTransport::new(state, sn_source)),
            _lock: None,
            config,
            cached_serial: None,
            cached_key_origin: None,
        };
        let sn = handle.serial_number()?;
        handle.cached_serial = Some(sn);
        let origin = handle.key_origin()?;
        handle.cached_key_origin = Some(origin);
        Ok(handle)
    }

    /// Opens a server-side emulator: holds one known slot key and serial
    /// number only, to independently verify a response received over some
    /// other channel, matching `atsha_open_server_emulation`.
    pub fn open_server_emulator(slot: u8, slot_key: [u8; 32], serial: Vec<u8>, otp_head: [u8; 11], config: Config) -> Result<Self> {
        validate_slot(slot)?;
        Ok(Handle {
            transport: TransportKind::ServerEmulator(ServerEmulatorTransport::new(slot, slot_key, serial.clone(), otp_head)),
            _lock: None,
            config,
            cached_serial: Some(serial),
            cached_key_origin: None,
        })
    }

    /// Wake, read and confirm the wake-ok status. Any failure at this step —
    /// transport error or a status other than `WAKE_OK` — is reported as
    /// [`Error::WakeNotConfirmed`] (§7).
    fn wake_and_confirm(&mut self) -> Result<()> {
        self.transport.wake().map_err(|_| Error::WakeNotConfirmed)?;
        let frame = self.transport.receive().map_err(|_| Error::WakeNotConfirmed)?;
        match ops::extract_status(&frame) {
            Ok(status::WAKE_OK) => Ok(()),
            _ => Err(Error::WakeNotConfirmed),
        }
    }

    /// Runs the canonical wake → send/receive/decode → idle sequence (§4.5)
    /// around a single operation. `body` builds and sends the command frame
    /// and decodes its response; idle failure is logged, not propagated.
    fn call<T>(&mut self, body: impl FnOnce(&mut TransportKind) -> Result<T>) -> Result<T> {
        self.wake_and_confirm()?;
        let result = body(&mut self.transport);
        if let Err(e) = self.transport.idle() {
            self.config.warn(&format!("idle not confirmed: {e}"));
        }
        result
    }

    fn send_and_decode<T>(transport: &mut TransportKind, frame: crate::frame::Frame, decode: impl FnOnce(&[u8]) -> Result<T>) -> Result<T> {
        transport.send(frame.as_bytes())?;
        let resp = transport.receive()?;
        decode(&resp)
    }

    /// DevRev: 4-byte hardware/emulator revision.
    pub fn dev_rev(&mut self) -> Result<[u8; 4]> {
        let frame = ops::encode_dev_rev()?;
        let data = self.call(|t| Self::send_and_decode(t, frame, ops::extract_data))?;
        to_array(&data)
    }

    /// Random: 32 bytes from the chip's RNG, or the emulator's fixed pattern (§4.7).
    pub fn random(&mut self) -> Result<[u8; 32]> {
        let frame = ops::encode_random()?;
        let data = self.call(|t| Self::send_and_decode(t, frame, ops::extract_data))?;
        to_array(&data)
    }

    /// Raw Read at an arbitrary zone/size/address, after bounds-checking
    /// config and OTP addresses (§8, property 5). Data-zone reads are meant
    /// to go through [`Handle::slot_read`], which derives a slot-aligned address.
    pub fn raw_read(&mut self, zone: Zone, size: Size, address: u8) -> Result<BigInt> {
        match zone {
            Zone::Config => validate_config_addr(address)?,
            Zone::Otp => validate_otp_addr(address)?,
            Zone::Data => {}
        }
        let frame = ops::encode_read(zone, size, address)?;
        self.call(|t| Self::send_and_decode(t, frame, ops::extract_data))
    }

    /// Reads a whole 32-byte data slot.
    pub fn slot_read(&mut self, slot: u8) -> Result<BigInt> {
        validate_slot(slot)?;
        self.raw_read(Zone::Data, Size::ThirtyTwoBytes, slot_address(slot))
    }

    /// Raw Write at an arbitrary zone/size/address.
    pub fn raw_write(&mut self, zone: Zone, size: Size, address: u8, payload: &[u8]) -> Result<()> {
        match zone {
            Zone::Config => validate_config_addr(address)?,
            Zone::Otp => validate_otp_addr(address)?,
            Zone::Data => {}
        }
        let frame = ops::encode_write(zone, size, address, payload)?;
        let s = self.call(|t| Self::send_and_decode(t, frame, ops::extract_status))?;
        status_to_unit(s)
    }

    /// Writes a whole 32-byte data slot (provisioning use only — real
    /// hardware rejects this once the data zone is locked).
    pub fn slot_write(&mut self, slot: u8, key: &[u8; 32]) -> Result<()> {
        validate_slot(slot)?;
        self.raw_write(Zone::Data, Size::ThirtyTwoBytes, slot_address(slot), key)
    }

    /// Writes one 4-byte OTP word.
    pub fn otp_write(&mut self, addr: u8, word: &[u8; 4]) -> Result<()> {
        self.raw_write(Zone::Otp, Size::FourBytes, addr, word)
    }

    /// Writes one 4-byte configuration word.
    pub fn config_write(&mut self, addr: u8, word: &[u8; 4]) -> Result<()> {
        self.raw_write(Zone::Config, Size::FourBytes, addr, word)
    }

    /// Loads `challenge` into TempKey, pass-through mode. Required before
    /// [`Handle::hmac`] (§8, scenario 6).
    pub fn nonce(&mut self, challenge: &[u8]) -> Result<()> {
        validate_challenge(challenge)?;
        let frame = ops::encode_nonce(0, challenge)?;
        let s = self.call(|t| Self::send_and_decode(t, frame, ops::extract_status))?;
        status_to_unit(s)
    }

    /// HMAC over the current TempKey and `slot`'s key. Fails if TempKey was
    /// never loaded by a preceding [`Handle::nonce`] (the device reports this
    /// as an execution error; the emulator reports it directly).
    pub fn hmac(&mut self, slot: u8, sn_in_digest: bool) -> Result<[u8; 32]> {
        validate_slot(slot)?;
        let mode = if sn_in_digest { MODE_SN_IN_DIGEST } else { 0 };
        let frame = ops::encode_hmac(mode, slot)?;
        let data = self.call(|t| Self::send_and_decode(t, frame, ops::extract_data))?;
        to_array(&data)
    }

    /// MAC over an inline `challenge` and `slot`'s key — a single operation,
    /// unlike the Nonce+HMAC pair.
    pub fn mac(&mut self, slot: u8, challenge: &[u8], sn_in_digest: bool) -> Result<[u8; 32]> {
        validate_slot(slot)?;
        validate_challenge(challenge)?;
        let mode = if sn_in_digest { MODE_SN_IN_DIGEST } else { 0 };
        let frame = ops::encode_mac(mode, slot, challenge)?;
        let data = self.call(|t| Self::send_and_decode(t, frame, ops::extract_data))?;
        to_array(&data)
    }

    /// Challenge-response via Nonce then HMAC, under a single wake/idle
    /// bracket (§4.5 "Multi-step operations"), mirroring
    /// `atsha_low_challenge_response`.
    pub fn challenge_response_hmac(&mut self, slot: u8, challenge: &[u8], sn_in_digest: bool) -> Result<[u8; 32]> {
        validate_slot(slot)?;
        validate_challenge(challenge)?;
        let mode = if sn_in_digest { MODE_SN_IN_DIGEST } else { 0 };
        self.call(|t| {
            let nonce_frame = ops::encode_nonce(mode, challenge)?;
            let s = Self::send_and_decode(t, nonce_frame, ops::extract_status)?;
            status_to_unit(s)?;
            let hmac_frame = ops::encode_hmac(mode, slot)?;
            let data = Self::send_and_decode(t, hmac_frame, ops::extract_data)?;
            to_array(&data)
        })
    }

    /// Challenge-response via a single MAC call, mirroring
    /// `atsha_low_challenge_response_mac`.
    pub fn challenge_response_mac(&mut self, slot: u8, challenge: &[u8], sn_in_digest: bool) -> Result<[u8; 32]> {
        self.mac(slot, challenge, sn_in_digest)
    }

    /// Irrevocably locks the configuration zone. `crc` is the CRC-16 of the
    /// full 88-byte config zone, computed by the caller and cross-checked on
    /// the chip (§4.9).
    pub fn lock_config(&mut self, crc: [u8; 2]) -> Result<()> {
        if self.transport.is_server_emulation() {
            return Err(Error::NotImplemented);
        }
        let frame = ops::encode_lock(0, crc)?;
        let s = self.call(|t| Self::send_and_decode(t, frame, ops::extract_status))?;
        status_to_unit(s)
    }

    /// Irrevocably locks the data zone (including OTP). `crc` is the CRC-16
    /// of the concatenated data-then-OTP zone bytes (§4.9).
    pub fn lock_data(&mut self, crc: [u8; 2]) -> Result<()> {
        if self.transport.is_server_emulation() {
            return Err(Error::NotImplemented);
        }
        let frame = ops::encode_lock(1, crc)?;
        let s = self.call(|t| Self::send_and_decode(t, frame, ops::extract_status))?;
        status_to_unit(s)
    }

    /// The serial number used to identify this chip/emulator: the cached
    /// value if one was already resolved, else a fresh read (native 9 bytes
    /// on real hardware and device-side emulation, host-assembled 8 bytes in
    /// host-supplied mode, the configured value for server-side emulation).
    pub fn serial_number(&mut self) -> Result<Vec<u8>> {
        if let Some(sn) = &self.cached_serial {
            return Ok(sn.clone());
        }
        let sn = match &self.transport {
            TransportKind::FileEmulator(e) => e.serial_number(),
            TransportKind::ServerEmulator(e) => e.serial(),
            TransportKind::Usb(_) | TransportKind::NativeI2c(_) | TransportKind::Mpsse(_) => {
                let low = self.raw_read(Zone::Config, Size::FourBytes, SN_CONFIG_ADDR_LOW)?;
                let mid = self.raw_read(Zone::Config, Size::FourBytes, SN_CONFIG_ADDR_MID)?;
                let high = self.raw_read(Zone::Config, Size::FourBytes, SN_CONFIG_ADDR_HIGH)?;
                let mut sn = vec![0u8; 9];
                sn[0..4].copy_from_slice(low.as_bytes());
                sn[4..8].copy_from_slice(mid.as_bytes());
                sn[8] = high.as_bytes()[0];
                sn
            }
        };
        self.cached_serial = Some(sn.clone());
        Ok(sn)
    }

    /// The key-origin tag cached from OTP at open time (device-side
    /// emulation) or on first use (real hardware).
    pub fn key_origin(&mut self) -> Result<u32> {
        if let Some(origin) = self.cached_key_origin {
            return Ok(origin);
        }
        let word = self.raw_read(Zone::Otp, Size::FourBytes, OTP_KEY_ORIGIN_ADDR)?;
        let bytes: [u8; 4] = to_array(&word)?;
        let origin = u32::from_le_bytes(bytes);
        self.cached_key_origin = Some(origin);
        Ok(origin)
    }

    /// Whether this handle holds the cross-process lock (true for every
    /// physical transport, false for both emulator variants).
    pub fn holds_lock(&self) -> bool {
        self.transport.is_physical()
    }
}

// Field drop order (transport, then lock) releases the bus before the
// cross-process lock, matching §5 Resource ownership. `transport`'s own
// `Drop` impl (where applicable) zeroes TempKey; this zeroes the cached
// serial number, the one piece of secret-adjacent material `Handle` itself holds.
impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(sn) = &mut self.cached_serial {
            sn.iter_mut().for_each(|b| *b = 0);
        }
    }
}

fn status_to_unit(s: u8) -> Result<()> {
    if s == status::OK {
        Ok(())
    } else {
        Err(Error::BadDeviceStatus(s))
    }
}

fn to_array<const N: usize>(data: &BigInt) -> Result<[u8; N]> {
    if data.len() != N {
        return Err(Error::Communication(format!("expected {N}-byte payload, got {}", data.len())));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(data.as_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn fixture_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    fn sample_config() -> String {
        let mut lines = Vec::new();
        for i in 0u8..16 {
            if i == 3 {
                lines.push("ab".repeat(32));
            } else {
                lines.push("00".repeat(32));
            }
        }
        for _ in 0..16 {
            lines.push("00000000".to_string());
        }
        lines.push("0123456789abcdef01".to_string());
        lines.push("deadbeef".to_string());
        lines.join("\n")
    }

    fn open_handle() -> (tempfile::NamedTempFile, Handle) {
        let f = fixture_file(&sample_config());
        let handle = Handle::open_emulator(f.path(), SerialNumberSource::Native, Config::default()).unwrap();
        (f, handle)
    }

    #[test]
    fn dev_rev_returns_configured_revision() {
        let (_f, mut h) = open_handle();
        assert_eq!(h.dev_rev().unwrap(), [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn slot_out_of_range_is_rejected_before_touching_transport() {
        let (_f, mut h) = open_handle();
        assert!(matches!(h.slot_read(16), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn hmac_without_nonce_fails() {
        let (_f, mut h) = open_handle();
        assert!(h.hmac(0, false).is_err());
    }

    /// The published test challenge from the hardware-comparison tool
    /// (`chiptest/main.c`), reused verbatim rather than a flat filler value.
    const PUBLISHED_TEST_CHALLENGE: [u8; 32] = [
        0x79, 0x55, 0x98, 0x14, 0x78, 0x0F, 0xCC, 0xAA, 0x09, 0x2C, 0xFA, 0xFA, 0xF8, 0x03, 0xF5, 0x18, 0xA1, 0x3E,
        0xC7, 0x50, 0x44, 0x44, 0x88, 0xF6, 0x4D, 0xAC, 0xC2, 0x0B, 0x2A, 0xA3, 0x24, 0x5B,
    ];

    #[test]
    fn challenge_response_hmac_round_trips() {
        let (_f, mut h) = open_handle();
        let response = h.challenge_response_hmac(3, &PUBLISHED_TEST_CHALLENGE, false).unwrap();
        assert_eq!(response.len(), 32);
    }

    #[test]
    fn lock_is_not_implemented_for_server_emulation() {
        let mut h = Handle::open_server_emulator(0, [0u8; 32], vec![0u8; 8], [0u8; 11], Config::default()).unwrap();
        assert!(matches!(h.lock_config([0, 0]), Err(Error::NotImplemented)));
    }

    #[test]
    fn emulator_handle_does_not_hold_process_lock() {
        let (_f, h) = open_handle();
        assert!(!h.holds_lock());
    }
}
