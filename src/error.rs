//! Crate-wide error type.
//!
//! Mirrors the error kinds of the original driver (`ATSHA_ERR_*`) one-to-one,
//! but returns them through `Result` instead of an integer status code.

use thiserror::Error;

/// Everything that can go wrong talking to a chip or an emulator.
#[derive(Debug, Error)]
pub enum Error {
    /// A fixed-capacity buffer could not hold the requested payload.
    #[error("buffer capacity exceeded")]
    MemoryAllocation,

    /// A caller-supplied argument is out of range (slot, address, challenge length).
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// The transport failed to send/receive, or the frame was malformed (bad length or CRC).
    #[error("communication error: {0}")]
    Communication(String),

    /// A well-formed response frame carried a non-success status byte.
    #[error("device returned status 0x{0:02X}")]
    BadDeviceStatus(u8),

    /// The operation is not supported by this transport (e.g. Lock on a server-side emulator).
    #[error("operation not implemented for this transport")]
    NotImplemented,

    /// Wake was sent but the chip did not confirm with the wake-ok status.
    #[error("wake not confirmed")]
    WakeNotConfirmed,

    /// Acquiring the cross-process exclusion lock timed out.
    #[error("timed out acquiring device lock")]
    LockTimeout,

    /// Underlying I/O failure opening or using a transport or config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
