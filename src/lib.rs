//! Host driver and software emulator for a secure-element crypto
//! authenticator chip: 16 data slots, an OTP zone, a configuration zone, and
//! a hardware HMAC/MAC engine over SHA-256.
//!
//! [`Handle`] is the session entry point. Every public call wakes the
//! device (or emulator), runs exactly one wire operation (or, for
//! challenge-response, a Nonce/HMAC pair under one wake/idle bracket), lets
//! the device idle, and returns. [`emulator::EmulatorTransport`] reimplements
//! the chip's HMAC/MAC digest assembly in software against a text config
//! file, so the same [`Handle`] API drives either real hardware or a pure
//! emulator.

pub mod address;
pub mod bigint;
pub mod config;
pub mod crc;
pub mod digest;
pub mod emulator;
pub mod error;
pub mod frame;
mod handle;
pub mod lock;
pub mod ops;
pub mod provisioning;
pub mod transport;

pub use address::{Size, Zone};
pub use bigint::BigInt;
pub use config::Config;
pub use emulator::SerialNumberSource;
pub use error::{Error, Result};
pub use handle::Handle;
pub use provisioning::ProvisioningConfig;
