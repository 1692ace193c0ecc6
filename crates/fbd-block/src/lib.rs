#![forbid(unsafe_code)]
//! Raw block-device layer.
//!
//! Provides the [`RawBlockDevice`] trait that the fault-injecting test device
//! sits on, plus two interchangeable stores: [`RamBd`] (heap-backed, fast,
//! lost on drop) and [`FileBd`] (positional I/O on an image file, survives
//! re-creation against the same path).
//!
//! Stores only bounds-check. Alignment, wear and fault policy belong to the
//! layer above.

mod file;
mod ram;

pub use file::{FileBd, FileBdConfig};
pub use ram::{RamBd, RamBdConfig};

use fbd_error::{FbdError, Result};
use fbd_types::{BlockIndex, Geometry, OpKind};

/// Block-addressed raw flash interface.
///
/// `buf.len()` is the transfer size for `read` and `program`.
pub trait RawBlockDevice {
    /// Device geometry this store was built with.
    fn geometry(&self) -> Geometry;

    /// Read `buf.len()` bytes at `offset` within `block`.
    fn read(&mut self, block: BlockIndex, offset: u32, buf: &mut [u8]) -> Result<()>;

    /// Program `buf` at `offset` within `block`.
    fn program(&mut self, block: BlockIndex, offset: u32, buf: &[u8]) -> Result<()>;

    /// Erase `block`. The content of an erased block is undefined at this
    /// layer.
    fn erase(&mut self, block: BlockIndex) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&mut self) -> Result<()>;
}

/// Map `(block, offset, len)` to an absolute byte offset on a linear image,
/// rejecting anything outside the block.
pub(crate) fn image_offset(
    geometry: &Geometry,
    op: OpKind,
    block: BlockIndex,
    offset: u32,
    len: usize,
) -> Result<u64> {
    geometry
        .check_range(op, block, offset, len)
        .map_err(|err| FbdError::InvalidArgument(err.to_string()))?;
    geometry
        .block_offset(block)
        .and_then(|base| base.checked_add(u64::from(offset)))
        .ok_or_else(|| FbdError::InvalidArgument(format!("{op} offset overflows u64")))
}
