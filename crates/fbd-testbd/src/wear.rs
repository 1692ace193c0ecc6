//! Per-block erase-cycle counters.
//!
//! The table either owns its storage or borrows a caller-supplied buffer.
//! A borrowed buffer outlives the device, so wear can be inspected after a
//! simulated crash or carried into the next device instance.

use fbd_error::{FbdError, Result};
use fbd_types::{BlockIndex, Wear};

#[derive(Debug)]
pub enum WearTable<'w> {
    /// Allocated by the device and dropped with it.
    Owned(Vec<Wear>),
    /// Caller-owned buffer, truncated to `erase_count` entries.
    Borrowed(&'w mut [Wear]),
}

impl WearTable<'static> {
    /// Allocate a zeroed table of `erase_count` counters.
    pub fn owned(erase_count: u32) -> Result<Self> {
        let len = usize::try_from(erase_count)
            .map_err(|_| FbdError::InvalidArgument("erase_count does not fit usize".to_owned()))?;
        let mut wear = Vec::new();
        wear.try_reserve_exact(len)
            .map_err(|_| FbdError::Io(std::io::ErrorKind::OutOfMemory.into()))?;
        wear.resize(len, 0);
        Ok(Self::Owned(wear))
    }
}

impl<'w> WearTable<'w> {
    /// Adopt `buffer`, which must hold at least `erase_count` entries.
    pub fn borrowed(buffer: &'w mut [Wear], erase_count: u32) -> Result<Self> {
        let needed = usize::try_from(erase_count)
            .map_err(|_| FbdError::InvalidArgument("erase_count does not fit usize".to_owned()))?;
        if buffer.len() < needed {
            return Err(FbdError::InvalidArgument(format!(
                "wear buffer too small: len={} erase_count={erase_count}",
                buffer.len()
            )));
        }
        Ok(Self::Borrowed(&mut buffer[..needed]))
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Wear] {
        match self {
            Self::Owned(wear) => wear,
            Self::Borrowed(wear) => wear,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [Wear] {
        match self {
            Self::Owned(wear) => wear,
            Self::Borrowed(wear) => wear,
        }
    }

    pub fn get(&self, block: BlockIndex) -> Result<Wear> {
        self.as_slice()
            .get(block.as_usize())
            .copied()
            .ok_or_else(|| out_of_range(block, self.as_slice().len()))
    }

    pub fn set(&mut self, block: BlockIndex, wear: Wear) -> Result<()> {
        let len = self.as_slice().len();
        let slot = self
            .as_mut_slice()
            .get_mut(block.as_usize())
            .ok_or_else(|| out_of_range(block, len))?;
        *slot = wear;
        Ok(())
    }

    /// Record one erase cycle, returning the new count.
    pub fn increment(&mut self, block: BlockIndex) -> Result<Wear> {
        let len = self.as_slice().len();
        let slot = self
            .as_mut_slice()
            .get_mut(block.as_usize())
            .ok_or_else(|| out_of_range(block, len))?;
        *slot = slot.saturating_add(1);
        Ok(*slot)
    }
}

fn out_of_range(block: BlockIndex, len: usize) -> FbdError {
    FbdError::InvalidArgument(format!(
        "block out of range: block={block} erase_count={len}"
    ))
}
