use crate::{RawBlockDevice, image_offset};
use fbd_error::{FbdError, Result};
use fbd_types::{BlockIndex, Geometry, OpKind};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Configuration for [`RamBd`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RamBdConfig {
    /// Byte the backing buffer is initialised with.
    pub fill: u8,
}

/// Heap-backed block store. Content is lost on drop.
#[derive(Debug, Clone)]
pub struct RamBd {
    geometry: Geometry,
    bytes: Vec<u8>,
}

impl RamBd {
    pub fn new(geometry: Geometry, config: &RamBdConfig) -> Result<Self> {
        let len = device_len(&geometry)?;
        trace!(
            erase_size = geometry.erase_size,
            erase_count = geometry.erase_count,
            fill = config.fill,
            "rambd_create"
        );
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| FbdError::Io(std::io::ErrorKind::OutOfMemory.into()))?;
        bytes.resize(len, config.fill);
        Ok(Self { geometry, bytes })
    }

    /// Adopt an existing linear image. `image.len()` must equal the device
    /// length.
    pub fn from_image(geometry: Geometry, image: Vec<u8>) -> Result<Self> {
        let len = device_len(&geometry)?;
        if image.len() != len {
            return Err(FbdError::InvalidArgument(format!(
                "image length mismatch: got={} expected={len}",
                image.len()
            )));
        }
        Ok(Self {
            geometry,
            bytes: image,
        })
    }

    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.bytes
    }

    fn span(&self, op: OpKind, block: BlockIndex, offset: u32, len: usize) -> Result<usize> {
        let start = image_offset(&self.geometry, op, block, offset, len)?;
        usize::try_from(start)
            .map_err(|_| FbdError::InvalidArgument(format!("{op} offset does not fit usize")))
    }
}

fn device_len(geometry: &Geometry) -> Result<usize> {
    geometry
        .validate()
        .map_err(|err| FbdError::InvalidArgument(err.to_string()))?;
    geometry
        .device_len()
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| FbdError::InvalidArgument("device length does not fit usize".to_owned()))
}

impl RawBlockDevice for RamBd {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&mut self, block: BlockIndex, offset: u32, buf: &mut [u8]) -> Result<()> {
        let start = self.span(OpKind::Read, block, offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn program(&mut self, block: BlockIndex, offset: u32, buf: &[u8]) -> Result<()> {
        let start = self.span(OpKind::Program, block, offset, buf.len())?;
        self.bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn erase(&mut self, block: BlockIndex) -> Result<()> {
        self.geometry
            .check_block(block)
            .map_err(|err| FbdError::InvalidArgument(err.to_string()))
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
