#![forbid(unsafe_code)]
//! Error types for flashbd.
//!
//! # Error Taxonomy
//!
//! Every fallible operation in the workspace returns [`FbdError`]. The
//! variants fall into four classes, mirroring how a filesystem sitting on top
//! of real flash would see failures:
//!
//! | Class | Variant | errno | Raised by |
//! |-------|---------|-------|-----------|
//! | Contract violation | `InvalidArgument` | `EINVAL` | misaligned/out-of-range access, bad configuration, program into an unerased region |
//! | I/O | `Io` | OS errno or `EIO` | backend construction, read, program, erase, sync |
//! | I/O | `BadBlock` | `EIO` | simulated program/erase fault on a worn-out block |
//! | Data corruption | `Corrupt` | `EILSEQ` | simulated read fault (ECC failure) on a worn-out block |
//! | Power loss | `PowerLoss` | `EIO` | the power-loss countdown reached zero |
//!
//! Nothing in flashbd retries. Faults are surfaced unchanged so the layer
//! under test owns its own recovery policy.
//!
//! ## Power loss
//!
//! `PowerLoss` is not an ordinary I/O error. It marks the crash boundary of a
//! simulated session: once a device has produced it, the device refuses all
//! further I/O. Harness code matches on [`FbdError::is_power_loss`] to stop a
//! workload and re-open the persistent backend.
//!
//! ## Design Constraints
//!
//! - `fbd-error` MUST NOT depend on `fbd-types` (no cyclic deps). Block
//!   indices are carried as plain `u32`.
//! - All string payloads are owned.

use thiserror::Error;

/// Unified error type for all flashbd operations.
#[derive(Debug, Error)]
pub enum FbdError {
    /// Caller contract violation: misaligned or out-of-range access, invalid
    /// configuration, or a program into a region that does not hold the
    /// erase pattern.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Simulated program or erase failure on a bad block.
    #[error("simulated {op} failure on bad block {block}")]
    BadBlock { block: u32, op: &'static str },

    /// Simulated read failure on a bad block, surfaced the way an
    /// uncorrectable ECC error would be.
    #[error("corrupt data in block {block}: {detail}")]
    Corrupt { block: u32, detail: String },

    /// The power-loss countdown expired. The device is now powered off.
    #[error("simulated power loss")]
    PowerLoss,
}

impl FbdError {
    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive, so adding a variant is a compile error
    /// until its errno is assigned.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::BadBlock { .. } | Self::PowerLoss => libc::EIO,
            Self::Corrupt { .. } => libc::EILSEQ,
        }
    }

    /// Whether this error belongs to the I/O class (real or simulated).
    #[must_use]
    pub fn is_io_class(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BadBlock { .. })
    }

    /// Whether this error is the simulated power cut.
    #[must_use]
    pub fn is_power_loss(&self) -> bool {
        matches!(self, Self::PowerLoss)
    }
}

/// Result alias using `FbdError`.
pub type Result<T> = std::result::Result<T, FbdError>;
