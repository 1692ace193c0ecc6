#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Erase-cycle counter for one block.
pub type Wear = u32;

/// Index of an erasable block on the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockIndex(pub u32);

impl BlockIndex {
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three kinds of access a flash device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Read,
    Program,
    Erase,
}

impl OpKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Program => "program",
            Self::Erase => "erase",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry violations detected before any I/O is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("invalid geometry field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("block out of range: block={block} erase_count={erase_count}")]
    BlockOutOfRange { block: u32, erase_count: u32 },
    #[error("misaligned {op}: offset={offset} len={len} granularity={granularity}")]
    Misaligned {
        op: OpKind,
        offset: u32,
        len: usize,
        granularity: u32,
    },
    #[error("{op} crosses block boundary: offset={offset} len={len} erase_size={erase_size}")]
    OutOfBlock {
        op: OpKind,
        offset: u32,
        len: usize,
        erase_size: u32,
    },
}

/// Physical layout of a simulated flash device.
///
/// All read and program offsets and sizes must be multiples of `read_size`
/// and `prog_size` respectively, and stay inside one `erase_size` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    /// Minimum read granularity in bytes.
    pub read_size: u32,
    /// Minimum program granularity in bytes.
    pub prog_size: u32,
    /// Size of an erasable block in bytes.
    pub erase_size: u32,
    /// Number of erasable blocks.
    pub erase_count: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            read_size: 16,
            prog_size: 16,
            erase_size: 512,
            erase_count: 128,
        }
    }
}

impl Geometry {
    /// Check that the geometry describes a usable device.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.read_size == 0 {
            return Err(GeometryError::InvalidField {
                field: "read_size",
                reason: "must be non-zero",
            });
        }
        if self.prog_size == 0 {
            return Err(GeometryError::InvalidField {
                field: "prog_size",
                reason: "must be non-zero",
            });
        }
        if self.erase_size == 0 {
            return Err(GeometryError::InvalidField {
                field: "erase_size",
                reason: "must be non-zero",
            });
        }
        if self.erase_count == 0 {
            return Err(GeometryError::InvalidField {
                field: "erase_count",
                reason: "must be non-zero",
            });
        }
        if self.erase_size % self.read_size != 0 {
            return Err(GeometryError::InvalidField {
                field: "erase_size",
                reason: "must be a multiple of read_size",
            });
        }
        if self.erase_size % self.prog_size != 0 {
            return Err(GeometryError::InvalidField {
                field: "erase_size",
                reason: "must be a multiple of prog_size",
            });
        }
        if self.device_len().is_none() {
            return Err(GeometryError::InvalidField {
                field: "erase_count",
                reason: "device length overflows u64",
            });
        }
        Ok(())
    }

    /// Total device length in bytes.
    #[must_use]
    pub fn device_len(&self) -> Option<u64> {
        u64::from(self.erase_size).checked_mul(u64::from(self.erase_count))
    }

    /// Byte offset of the start of `block` on a linear image.
    #[must_use]
    pub fn block_offset(&self, block: BlockIndex) -> Option<u64> {
        u64::from(block.0).checked_mul(u64::from(self.erase_size))
    }

    #[must_use]
    pub fn erase_size_usize(&self) -> usize {
        usize::try_from(self.erase_size).unwrap_or(usize::MAX)
    }

    pub fn check_block(&self, block: BlockIndex) -> Result<(), GeometryError> {
        if block.0 >= self.erase_count {
            return Err(GeometryError::BlockOutOfRange {
                block: block.0,
                erase_count: self.erase_count,
            });
        }
        Ok(())
    }

    /// Check that `[offset, offset + len)` stays inside one block.
    pub fn check_range(
        &self,
        op: OpKind,
        block: BlockIndex,
        offset: u32,
        len: usize,
    ) -> Result<(), GeometryError> {
        self.check_block(block)?;
        let end = u64::from(offset).saturating_add(u64::try_from(len).unwrap_or(u64::MAX));
        if end > u64::from(self.erase_size) {
            return Err(GeometryError::OutOfBlock {
                op,
                offset,
                len,
                erase_size: self.erase_size,
            });
        }
        Ok(())
    }

    /// Check a read request: aligned to `read_size` and inside the block.
    pub fn check_read(
        &self,
        block: BlockIndex,
        offset: u32,
        len: usize,
    ) -> Result<(), GeometryError> {
        self.check_aligned(OpKind::Read, offset, len, self.read_size)?;
        self.check_range(OpKind::Read, block, offset, len)
    }

    /// Check a program request: aligned to `prog_size` and inside the block.
    pub fn check_program(
        &self,
        block: BlockIndex,
        offset: u32,
        len: usize,
    ) -> Result<(), GeometryError> {
        self.check_aligned(OpKind::Program, offset, len, self.prog_size)?;
        self.check_range(OpKind::Program, block, offset, len)
    }

    fn check_aligned(
        &self,
        op: OpKind,
        offset: u32,
        len: usize,
        granularity: u32,
    ) -> Result<(), GeometryError> {
        let granularity_usize = usize::try_from(granularity).unwrap_or(usize::MAX);
        if granularity == 0 || offset % granularity != 0 || len % granularity_usize != 0 {
            return Err(GeometryError::Misaligned {
                op,
                offset,
                len,
                granularity,
            });
        }
        Ok(())
    }
}

/// What erased flash reads back as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EraseValue {
    /// Do not emulate erased content. Erase leaves the backing bytes as they
    /// were, and no shadow pattern is maintained.
    None,
    /// Fill erased blocks with this byte.
    Fill(u8),
}

impl Default for EraseValue {
    fn default() -> Self {
        Self::Fill(0xFF)
    }
}

impl EraseValue {
    #[must_use]
    pub fn fill(self) -> Option<u8> {
        match self {
            Self::None => None,
            Self::Fill(byte) => Some(byte),
        }
    }
}

/// How a block fails once its wear reaches the configured threshold.
///
/// There is deliberately no read-noop: a read must always return a
/// consistent value for a given state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BadBlockBehavior {
    /// Program fails with an I/O error and writes nothing.
    #[default]
    ProgramError,
    /// Erase fails with an I/O error and leaves wear untouched.
    EraseError,
    /// Read fails with a corrupt-data error.
    ReadError,
    /// Program reports success but writes nothing (stuck cells).
    ProgramNoop,
    /// Erase reports success but erases nothing (read-only media).
    EraseNoop,
}

impl BadBlockBehavior {
    pub const ALL: [Self; 5] = [
        Self::ProgramError,
        Self::EraseError,
        Self::ReadError,
        Self::ProgramNoop,
        Self::EraseNoop,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Geometry {
        Geometry {
            read_size: 16,
            prog_size: 16,
            erase_size: 512,
            erase_count: 4,
        }
    }

    #[test]
    fn default_geometry_is_valid() {
        Geometry::default().validate().unwrap();
    }

    #[test]
    fn geometry_rejects_zero_fields() {
        let mut geom = small();
        geom.prog_size = 0;
        assert_eq!(
            geom.validate(),
            Err(GeometryError::InvalidField {
                field: "prog_size",
                reason: "must be non-zero",
            })
        );

        let mut geom = small();
        geom.erase_count = 0;
        assert!(geom.validate().is_err());
    }

    #[test]
    fn geometry_rejects_uneven_erase_size() {
        let geom = Geometry {
            read_size: 16,
            prog_size: 24,
            erase_size: 512,
            erase_count: 4,
        };
        assert!(matches!(
            geom.validate(),
            Err(GeometryError::InvalidField {
                field: "erase_size",
                ..
            })
        ));
    }

    #[test]
    fn read_checks_alignment_and_bounds() {
        let geom = small();
        geom.check_read(BlockIndex(0), 0, 16).unwrap();
        geom.check_read(BlockIndex(3), 496, 16).unwrap();
        geom.check_read(BlockIndex(3), 0, 512).unwrap();

        assert!(matches!(
            geom.check_read(BlockIndex(0), 8, 16),
            Err(GeometryError::Misaligned { .. })
        ));
        assert!(matches!(
            geom.check_read(BlockIndex(0), 0, 15),
            Err(GeometryError::Misaligned { .. })
        ));
        assert!(matches!(
            geom.check_read(BlockIndex(0), 512, 16),
            Err(GeometryError::OutOfBlock { .. })
        ));
        assert!(matches!(
            geom.check_read(BlockIndex(4), 0, 16),
            Err(GeometryError::BlockOutOfRange {
                block: 4,
                erase_count: 4
            })
        ));
    }

    #[test]
    fn program_uses_prog_granularity() {
        let geom = Geometry {
            read_size: 1,
            prog_size: 64,
            erase_size: 512,
            erase_count: 2,
        };
        geom.check_read(BlockIndex(1), 3, 7).unwrap();
        geom.check_program(BlockIndex(1), 64, 128).unwrap();
        assert!(geom.check_program(BlockIndex(1), 3, 64).is_err());
    }

    #[test]
    fn block_offsets_are_linear() {
        let geom = small();
        assert_eq!(geom.device_len(), Some(2048));
        assert_eq!(geom.block_offset(BlockIndex(2)), Some(1024));
    }

    #[test]
    fn config_enums_round_trip_through_json() {
        let behavior: BadBlockBehavior = serde_json::from_str("\"program-noop\"").unwrap();
        assert_eq!(behavior, BadBlockBehavior::ProgramNoop);

        let erase: EraseValue = serde_json::from_str("{\"fill\":0}").unwrap();
        assert_eq!(erase.fill(), Some(0));
        let none: EraseValue = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(none.fill(), None);
        assert_eq!(EraseValue::default().fill(), Some(0xFF));
    }
}
