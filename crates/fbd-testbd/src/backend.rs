use fbd_block::{FileBd, RamBd, RawBlockDevice};
use fbd_error::Result;
use fbd_types::{BlockIndex, Geometry};
use std::path::Path;

/// The raw store behind a test device. Chosen once at creation.
#[derive(Debug)]
pub enum Backend {
    Ram(RamBd),
    File(FileBd),
}

impl Backend {
    /// Whether content survives the device being destroyed.
    #[must_use]
    pub fn persists(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Image path of a file-backed store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Ram(_) => None,
            Self::File(bd) => Some(bd.path()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ram(_) => "rambd",
            Self::File(_) => "filebd",
        }
    }
}

impl RawBlockDevice for Backend {
    fn geometry(&self) -> Geometry {
        match self {
            Self::Ram(bd) => bd.geometry(),
            Self::File(bd) => bd.geometry(),
        }
    }

    fn read(&mut self, block: BlockIndex, offset: u32, buf: &mut [u8]) -> Result<()> {
        match self {
            Self::Ram(bd) => bd.read(block, offset, buf),
            Self::File(bd) => bd.read(block, offset, buf),
        }
    }

    fn program(&mut self, block: BlockIndex, offset: u32, buf: &[u8]) -> Result<()> {
        match self {
            Self::Ram(bd) => bd.program(block, offset, buf),
            Self::File(bd) => bd.program(block, offset, buf),
        }
    }

    fn erase(&mut self, block: BlockIndex) -> Result<()> {
        match self {
            Self::Ram(bd) => bd.erase(block),
            Self::File(bd) => bd.erase(block),
        }
    }

    fn sync(&mut self) -> Result<()> {
        match self {
            Self::Ram(bd) => bd.sync(),
            Self::File(bd) => bd.sync(),
        }
    }
}
