#![forbid(unsafe_code)]
//! flashbd public API facade.
//!
//! Re-exports the test device, its configuration and the raw backends
//! through one crate. Filesystem test suites depend on this instead of the
//! individual `fbd-*` crates.
//!
//! ```no_run
//! use flashbd::{BlockIndex, Geometry, TestBd, TestBdConfig};
//!
//! let config = TestBdConfig {
//!     erase_cycles: 100,
//!     power_cycles: 50,
//!     ..TestBdConfig::with_geometry(Geometry::default())
//! };
//! let mut bd = TestBd::create(&config, None)?;
//! bd.erase(BlockIndex(0))?;
//! bd.program(BlockIndex(0), 0, &[0x42; 16])?;
//! # Ok::<(), flashbd::FbdError>(())
//! ```

pub use fbd_block::{FileBd, FileBdConfig, RamBd, RamBdConfig, RawBlockDevice};
pub use fbd_error::{FbdError, Result};
pub use fbd_testbd::{
    Backend, IoStats, POWER_LOSS_EXIT_CODE, PowerLossAction, TestBd, TestBdConfig, WearTable,
};
pub use fbd_types::{BadBlockBehavior, BlockIndex, EraseValue, Geometry, OpKind, Wear};
