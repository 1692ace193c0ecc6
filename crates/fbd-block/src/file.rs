use crate::{RawBlockDevice, image_offset};
use fbd_error::{FbdError, Result};
use fbd_types::{BlockIndex, Geometry, OpKind};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration for [`FileBd`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileBdConfig {
    /// Issue a data sync after every program.
    pub sync_on_program: bool,
}

/// File-backed block store using `pread`/`pwrite` style I/O.
///
/// The image file is created if missing and grown to the device length, but
/// never truncated, so content written by a previous instance survives.
#[derive(Debug)]
pub struct FileBd {
    file: File,
    path: PathBuf,
    geometry: Geometry,
    config: FileBdConfig,
}

impl FileBd {
    pub fn open(path: impl AsRef<Path>, geometry: Geometry, config: &FileBdConfig) -> Result<Self> {
        geometry
            .validate()
            .map_err(|err| FbdError::InvalidArgument(err.to_string()))?;
        let device_len = geometry
            .device_len()
            .ok_or_else(|| FbdError::InvalidArgument("device length overflows u64".to_owned()))?;

        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let existing = file.metadata()?.len();
        if existing < device_len {
            file.set_len(device_len)?;
        }
        debug!(
            path = %path.display(),
            existing_len = existing,
            device_len,
            "filebd_open"
        );
        Ok(Self {
            file,
            path,
            geometry,
            config: config.clone(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RawBlockDevice for FileBd {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn read(&mut self, block: BlockIndex, offset: u32, buf: &mut [u8]) -> Result<()> {
        let pos = image_offset(&self.geometry, OpKind::Read, block, offset, buf.len())?;
        self.file.read_exact_at(buf, pos)?;
        Ok(())
    }

    fn program(&mut self, block: BlockIndex, offset: u32, buf: &[u8]) -> Result<()> {
        let pos = image_offset(&self.geometry, OpKind::Program, block, offset, buf.len())?;
        self.file.write_all_at(buf, pos)?;
        if self.config.sync_on_program {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn erase(&mut self, block: BlockIndex) -> Result<()> {
        self.geometry
            .check_block(block)
            .map_err(|err| FbdError::InvalidArgument(err.to_string()))
    }

    fn sync(&mut self) -> Result<()> {
        trace!(path = %self.path.display(), "filebd_sync");
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> Geometry {
        Geometry {
            read_size: 16,
            prog_size: 16,
            erase_size: 512,
            erase_count: 4,
        }
    }

    #[test]
    fn open_grows_image_to_device_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let bd = FileBd::open(&path, geom(), &FileBdConfig::default()).unwrap();
        assert_eq!(bd.path(), path.as_path());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2048);
    }

    #[test]
    fn content_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        {
            let mut bd = FileBd::open(&path, geom(), &FileBdConfig::default()).unwrap();
            bd.program(BlockIndex(3), 496, &[0x3C; 16]).unwrap();
            bd.sync().unwrap();
        }

        let mut bd = FileBd::open(
            &path,
            geom(),
            &FileBdConfig {
                sync_on_program: true,
            },
        )
        .unwrap();
        let mut buf = [0_u8; 16];
        bd.read(BlockIndex(3), 496, &mut buf).unwrap();
        assert_eq!(buf, [0x3C; 16]);
    }

    #[test]
    fn reopen_does_not_truncate_larger_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        std::fs::write(&path, vec![9_u8; 4096]).unwrap();

        let mut bd = FileBd::open(&path, geom(), &FileBdConfig::default()).unwrap();
        let mut buf = [0_u8; 16];
        bd.read(BlockIndex(0), 0, &mut buf).unwrap();
        assert_eq!(buf, [9; 16]);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn open_fails_with_io_error_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("disk.img");
        let err = FileBd::open(&path, geom(), &FileBdConfig::default()).unwrap_err();
        assert!(matches!(err, FbdError::Io(_)));
    }

    #[test]
    fn out_of_block_program_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bd =
            FileBd::open(dir.path().join("d.img"), geom(), &FileBdConfig::default()).unwrap();
        assert!(matches!(
            bd.program(BlockIndex(0), 512, &[0; 16]),
            Err(FbdError::InvalidArgument(_))
        ));
    }
}
