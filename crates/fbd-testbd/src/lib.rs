#![forbid(unsafe_code)]
//! Fault-injecting test block device.
//!
//! [`TestBd`] wraps a raw store ([`RamBd`](fbd_block::RamBd) when no path is
//! given, [`FileBd`](fbd_block::FileBd) otherwise) and layers on the
//! behavior a flash filesystem has to survive:
//!
//! - alignment and bounds validation for every access,
//! - per-block wear tracking with a configurable bad-block threshold and
//!   failure mode,
//! - erase-value emulation, so programs into unerased regions are caught and
//!   erased blocks read back a known pattern,
//! - a power-loss countdown that cuts power right after the N-th write.
//!
//! Every call checks power state, then geometry, then the bad-block policy,
//! and only then reaches the backend. Wear and the power countdown are
//! updated after the backend write succeeds.

mod backend;
pub mod config;
pub mod policy;
pub mod power;
pub mod wear;

pub use backend::Backend;
pub use config::{POWER_LOSS_EXIT_CODE, PowerLossAction, TestBdConfig};
pub use policy::{BlockState, Decision};
pub use power::{PowerEvent, PowerLossGovernor};
pub use wear::WearTable;

use fbd_block::{FileBd, RamBd, RawBlockDevice};
use fbd_error::{FbdError, Result};
use fbd_types::{BadBlockBehavior, BlockIndex, GeometryError, OpKind, Wear};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Operation counters for one device instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoStats {
    pub reads: u64,
    pub programs: u64,
    pub erases: u64,
    pub syncs: u64,
    /// Bad-block operations that reported success without doing anything.
    pub noops: u64,
    /// Bad-block operations that failed by policy.
    pub faults: u64,
}

impl IoStats {
    /// Writes that reached the backend and were charged to the power-loss
    /// countdown.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.programs + self.erases
    }
}

fn invalid(err: GeometryError) -> FbdError {
    FbdError::InvalidArgument(err.to_string())
}

/// A simulated flash device.
///
/// `'w` is the lifetime of a caller-supplied wear buffer; devices that own
/// their wear table are `TestBd<'static>`.
#[derive(Debug)]
pub struct TestBd<'w> {
    backend: Backend,
    persist: bool,
    power: PowerLossGovernor,
    wear: WearTable<'w>,
    config: TestBdConfig,
    stats: IoStats,
}

impl TestBd<'static> {
    /// Create a device with an internally owned wear table.
    ///
    /// `path` selects the backend: `Some` opens (or creates) a persistent
    /// image file, `None` uses an in-memory store.
    pub fn create(config: &TestBdConfig, path: Option<&Path>) -> Result<Self> {
        config.validate()?;
        let backend = open_backend(config, path)?;
        let wear = WearTable::owned(config.geometry.erase_count)?;
        Ok(Self::assemble(config, backend, wear))
    }

    /// Create an in-memory device whose store starts out as `image`.
    ///
    /// `image` must be exactly `erase_size * erase_count` bytes.
    pub fn create_from_image(config: &TestBdConfig, image: Vec<u8>) -> Result<Self> {
        config.validate()?;
        let backend = Backend::Ram(RamBd::from_image(config.geometry, image)?);
        let wear = WearTable::owned(config.geometry.erase_count)?;
        Ok(Self::assemble(config, backend, wear))
    }
}

fn open_backend(config: &TestBdConfig, path: Option<&Path>) -> Result<Backend> {
    Ok(match path {
        Some(path) => Backend::File(FileBd::open(path, config.geometry, &config.file)?),
        None => Backend::Ram(RamBd::new(config.geometry, &config.ram)?),
    })
}

impl<'w> TestBd<'w> {
    /// Create a device whose wear counters live in `wear`.
    ///
    /// The buffer must hold at least `erase_count` entries. The device reads
    /// and updates it in place and never frees it, so its contents remain
    /// available after the device is gone.
    pub fn create_with_wear(
        config: &TestBdConfig,
        path: Option<&Path>,
        wear: &'w mut [Wear],
    ) -> Result<Self> {
        config.validate()?;
        let table = WearTable::borrowed(wear, config.geometry.erase_count)?;
        let backend = open_backend(config, path)?;
        Ok(Self::assemble(config, backend, table))
    }

    fn assemble(config: &TestBdConfig, backend: Backend, wear: WearTable<'w>) -> Self {
        let persist = backend.persists();
        debug!(
            backend = backend.name(),
            path = ?backend.path(),
            persist,
            owned_wear = wear.is_owned(),
            erase_size = config.geometry.erase_size,
            erase_count = config.geometry.erase_count,
            erase_cycles = config.erase_cycles,
            power_cycles = config.power_cycles,
            "testbd_create"
        );
        Self {
            backend,
            persist,
            power: PowerLossGovernor::new(config.power_cycles),
            wear,
            config: config.clone(),
            stats: IoStats::default(),
        }
    }

    /// Release the device. Owned resources are freed; a borrowed wear
    /// buffer and the content of a persistent backend are left intact.
    pub fn destroy(self) {
        debug!(
            backend = self.backend.name(),
            persist = self.persist,
            owned_wear = self.wear.is_owned(),
            powered_off = self.power.is_powered_off(),
            "testbd_destroy"
        );
    }

    #[must_use]
    pub fn config(&self) -> &TestBdConfig {
        &self.config
    }

    /// Whether backend content survives this device being destroyed.
    #[must_use]
    pub fn persist(&self) -> bool {
        self.persist
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    #[must_use]
    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    /// Writes left before power is cut (`0` when simulation is disabled).
    #[must_use]
    pub fn power_cycles(&self) -> u32 {
        self.power.remaining()
    }

    #[must_use]
    pub fn is_powered_off(&self) -> bool {
        self.power.is_powered_off()
    }

    #[must_use]
    pub fn wear_table(&self) -> &[Wear] {
        self.wear.as_slice()
    }

    /// Read `buf.len()` bytes at `offset` within `block`.
    pub fn read(&mut self, block: BlockIndex, offset: u32, buf: &mut [u8]) -> Result<()> {
        trace!(block = block.0, offset, size = buf.len(), "testbd_read");
        self.power.ensure_powered()?;
        self.config
            .geometry
            .check_read(block, offset, buf.len())
            .map_err(invalid)?;

        let state = self.block_state(block)?;
        match policy::decide(OpKind::Read, state, self.config.badblock_behavior) {
            Decision::Fail => {
                self.stats.faults += 1;
                debug!(block = block.0, offset, "testbd_read_fault");
                return Err(FbdError::Corrupt {
                    block: block.0,
                    detail: "uncorrectable read on worn-out block".to_owned(),
                });
            }
            // Reads never noop.
            Decision::Proceed | Decision::Noop => {}
        }

        self.backend.read(block, offset, buf)?;
        self.stats.reads += 1;
        Ok(())
    }

    /// Program `buf` at `offset` within `block`. The region must have been
    /// erased.
    pub fn program(&mut self, block: BlockIndex, offset: u32, buf: &[u8]) -> Result<()> {
        trace!(block = block.0, offset, size = buf.len(), "testbd_program");
        self.power.ensure_powered()?;
        self.config
            .geometry
            .check_program(block, offset, buf.len())
            .map_err(invalid)?;

        let state = self.block_state(block)?;
        match policy::decide(OpKind::Program, state, self.config.badblock_behavior) {
            Decision::Fail => {
                self.stats.faults += 1;
                debug!(block = block.0, offset, "testbd_program_fault");
                return Err(FbdError::BadBlock {
                    block: block.0,
                    op: OpKind::Program.as_str(),
                });
            }
            Decision::Noop => {
                self.stats.noops += 1;
                debug!(block = block.0, offset, "testbd_program_noop");
                return Ok(());
            }
            Decision::Proceed => {}
        }

        // Under erase-noop a bad block may still hold data from before a
        // dropped erase, so its content is undefined.
        let erase_dropped = state == BlockState::Bad
            && self.config.badblock_behavior == BadBlockBehavior::EraseNoop;
        if !erase_dropped && self.config.check_erased {
            if let Some(fill) = self.config.erase_value.fill() {
                self.ensure_erased(block, offset, buf.len(), fill)?;
            }
        }

        self.backend.program(block, offset, buf)?;
        self.stats.programs += 1;
        self.charge_write(OpKind::Program, block)
    }

    /// Erase `block`, filling it with the erase value when emulated.
    pub fn erase(&mut self, block: BlockIndex) -> Result<()> {
        trace!(block = block.0, "testbd_erase");
        self.power.ensure_powered()?;
        self.config.geometry.check_block(block).map_err(invalid)?;

        let state = self.block_state(block)?;
        match policy::decide(OpKind::Erase, state, self.config.badblock_behavior) {
            Decision::Fail => {
                self.stats.faults += 1;
                debug!(block = block.0, "testbd_erase_fault");
                return Err(FbdError::BadBlock {
                    block: block.0,
                    op: OpKind::Erase.as_str(),
                });
            }
            Decision::Noop => {
                self.stats.noops += 1;
                debug!(block = block.0, "testbd_erase_noop");
                return Ok(());
            }
            Decision::Proceed => {}
        }

        self.backend.erase(block)?;
        if let Some(fill) = self.config.erase_value.fill() {
            let pattern = vec![fill; self.config.geometry.erase_size_usize()];
            self.backend.program(block, 0, &pattern)?;
        }

        let wear = self.wear.increment(block)?;
        if state == BlockState::Good
            && policy::block_state(wear, self.config.erase_cycles) == BlockState::Bad
        {
            debug!(block = block.0, wear, "testbd_block_worn_out");
        }
        self.stats.erases += 1;
        self.charge_write(OpKind::Erase, block)
    }

    pub fn sync(&mut self) -> Result<()> {
        trace!("testbd_sync");
        self.power.ensure_powered()?;
        self.backend.sync()?;
        self.stats.syncs += 1;
        Ok(())
    }

    /// Current erase-cycle count of `block`.
    pub fn get_wear(&self, block: BlockIndex) -> Result<Wear> {
        self.wear.get(block)
    }

    /// Overwrite the erase-cycle count of `block`. Takes effect on the next
    /// operation, so it can move a block between good and bad immediately.
    /// The block index is checked before power state.
    pub fn set_wear(&mut self, block: BlockIndex, wear: Wear) -> Result<()> {
        trace!(block = block.0, wear, "testbd_setwear");
        self.config.geometry.check_block(block).map_err(invalid)?;
        self.power.ensure_powered()?;
        self.wear.set(block, wear)
    }

    pub fn is_bad(&self, block: BlockIndex) -> Result<bool> {
        Ok(self.block_state(block)? == BlockState::Bad)
    }

    fn block_state(&self, block: BlockIndex) -> Result<BlockState> {
        let wear = self.wear.get(block)?;
        Ok(policy::block_state(wear, self.config.erase_cycles))
    }

    fn ensure_erased(&mut self, block: BlockIndex, offset: u32, len: usize, fill: u8) -> Result<()> {
        let mut current = vec![0_u8; len];
        self.backend.read(block, offset, &mut current)?;
        if let Some(pos) = current.iter().position(|byte| *byte != fill) {
            return Err(FbdError::InvalidArgument(format!(
                "program into unerased region: block={block} offset={offset} len={len} \
                 first_dirty={} found={:#04x} erase_value={fill:#04x}",
                u64::from(offset) + u64::try_from(pos).unwrap_or(u64::MAX),
                current[pos]
            )));
        }
        Ok(())
    }

    fn charge_write(&mut self, op: OpKind, block: BlockIndex) -> Result<()> {
        match self.power.consume() {
            PowerEvent::Continue => Ok(()),
            PowerEvent::Tripped => Err(self.lose_power(op, block)),
        }
    }

    fn lose_power(&mut self, op: OpKind, block: BlockIndex) -> FbdError {
        // Persist the triggering write as far as the backend allows.
        if let Err(err) = self.backend.sync() {
            warn!(error = %err, "testbd_sync_before_power_loss_failed");
        }
        match self.config.power_loss {
            PowerLossAction::Halt => {
                self.power.power_off();
                warn!(
                    op = op.as_str(),
                    block = block.0,
                    writes = self.stats.writes(),
                    "testbd_power_loss"
                );
                FbdError::PowerLoss
            }
            PowerLossAction::Exit { code } => {
                warn!(
                    op = op.as_str(),
                    block = block.0,
                    writes = self.stats.writes(),
                    code,
                    "testbd_power_loss_exit"
                );
                std::process::exit(code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbd_types::{EraseValue, Geometry};

    fn small_config() -> TestBdConfig {
        TestBdConfig::with_geometry(Geometry {
            read_size: 16,
            prog_size: 16,
            erase_size: 512,
            erase_count: 4,
        })
    }

    #[test]
    fn ram_backend_when_no_path() {
        let bd = TestBd::create(&small_config(), None).unwrap();
        assert!(!bd.persist());
        assert!(matches!(bd.backend(), Backend::Ram(_)));
        assert_eq!(bd.wear_table(), &[0, 0, 0, 0]);
        assert_eq!(bd.power_cycles(), 0);
        bd.destroy();
    }

    #[test]
    fn file_backend_when_path_given() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.img");
        let bd = TestBd::create(&small_config(), Some(path.as_path())).unwrap();
        assert!(bd.persist());
        assert!(matches!(bd.backend(), Backend::File(_)));
        assert_eq!(bd.backend().path(), Some(path.as_path()));
    }

    #[test]
    fn create_fails_with_io_error_when_backend_cannot_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no").join("such").join("d.img");
        let err = TestBd::create(&small_config(), Some(path.as_path())).unwrap_err();
        assert!(matches!(err, FbdError::Io(_)));
    }

    #[test]
    fn create_reports_unallocatable_store_as_io_error() {
        let cfg = TestBdConfig::with_geometry(Geometry {
            read_size: 16,
            prog_size: 16,
            erase_size: 1 << 20,
            erase_count: u32::MAX,
        });
        assert!(matches!(TestBd::create(&cfg, None), Err(FbdError::Io(_))));
    }

    #[test]
    fn create_from_image_seeds_ram_store() {
        let mut image = vec![0xFF_u8; 2048];
        image[512..528].fill(0x3C);
        let mut bd = TestBd::create_from_image(&small_config(), image).unwrap();
        assert!(!bd.persist());
        assert_eq!(bd.backend().path(), None);

        let mut buf = [0_u8; 16];
        bd.read(BlockIndex(1), 0, &mut buf).unwrap();
        assert_eq!(buf, [0x3C; 16]);
        // The seeded image already holds the erase pattern past the data.
        bd.program(BlockIndex(1), 16, &[0x3D; 16]).unwrap();
        assert!(bd.program(BlockIndex(1), 0, &[0; 16]).is_err());

        assert!(matches!(
            TestBd::create_from_image(&small_config(), vec![0; 100]),
            Err(FbdError::InvalidArgument(_))
        ));
    }

    #[test]
    fn create_rejects_bad_geometry() {
        let mut cfg = small_config();
        cfg.geometry.erase_size = 500;
        assert!(matches!(
            TestBd::create(&cfg, None),
            Err(FbdError::InvalidArgument(_))
        ));
    }

    #[test]
    fn misaligned_access_is_invalid_argument() {
        let mut bd = TestBd::create(&small_config(), None).unwrap();
        let mut buf = [0_u8; 16];
        assert!(matches!(
            bd.read(BlockIndex(0), 8, &mut buf),
            Err(FbdError::InvalidArgument(_))
        ));
        assert!(matches!(
            bd.program(BlockIndex(0), 0, &[0; 10]),
            Err(FbdError::InvalidArgument(_))
        ));
        assert!(matches!(
            bd.read(BlockIndex(0), 512, &mut buf),
            Err(FbdError::InvalidArgument(_))
        ));
        assert!(matches!(
            bd.erase(BlockIndex(4)),
            Err(FbdError::InvalidArgument(_))
        ));
        assert_eq!(bd.stats(), &IoStats::default());
    }

    #[test]
    fn erase_counts_wear_even_without_threshold() {
        let mut bd = TestBd::create(&small_config(), None).unwrap();
        for _ in 0..5 {
            bd.erase(BlockIndex(1)).unwrap();
        }
        assert_eq!(bd.get_wear(BlockIndex(1)).unwrap(), 5);
        assert!(!bd.is_bad(BlockIndex(1)).unwrap());
        assert_eq!(bd.stats().erases, 5);
    }

    #[test]
    fn program_into_unerased_region_is_rejected() {
        let mut bd = TestBd::create(&small_config(), None).unwrap();
        // RamBd starts zeroed, erase value is 0xff.
        let err = bd.program(BlockIndex(0), 0, &[1; 16]).unwrap_err();
        assert!(matches!(err, FbdError::InvalidArgument(_)));

        bd.erase(BlockIndex(0)).unwrap();
        bd.program(BlockIndex(0), 0, &[1; 16]).unwrap();
        assert!(matches!(
            bd.program(BlockIndex(0), 0, &[2; 16]),
            Err(FbdError::InvalidArgument(_))
        ));
        bd.program(BlockIndex(0), 16, &[2; 16]).unwrap();
    }

    #[test]
    fn unerased_check_can_be_disabled() {
        let mut cfg = small_config();
        cfg.check_erased = false;
        let mut bd = TestBd::create(&cfg, None).unwrap();
        bd.program(BlockIndex(0), 0, &[1; 16]).unwrap();
        bd.program(BlockIndex(0), 0, &[2; 16]).unwrap();

        let mut buf = [0_u8; 16];
        bd.read(BlockIndex(0), 0, &mut buf).unwrap();
        assert_eq!(buf, [2; 16]);
    }

    #[test]
    fn erase_value_none_skips_fill() {
        let mut cfg = small_config();
        cfg.erase_value = EraseValue::None;
        let mut bd = TestBd::create(&cfg, None).unwrap();
        bd.program(BlockIndex(2), 0, &[7; 16]).unwrap();
        bd.erase(BlockIndex(2)).unwrap();

        let mut buf = [0_u8; 16];
        bd.read(BlockIndex(2), 0, &mut buf).unwrap();
        assert_eq!(buf, [7; 16]);
    }

    #[test]
    fn set_wear_moves_block_between_states() {
        let mut cfg = small_config();
        cfg.erase_cycles = 10;
        cfg.badblock_behavior = BadBlockBehavior::EraseError;
        let mut bd = TestBd::create(&cfg, None).unwrap();

        bd.set_wear(BlockIndex(3), 10).unwrap();
        assert!(bd.is_bad(BlockIndex(3)).unwrap());
        assert!(matches!(
            bd.erase(BlockIndex(3)),
            Err(FbdError::BadBlock { block: 3, op: "erase" })
        ));

        bd.set_wear(BlockIndex(3), 0).unwrap();
        assert!(!bd.is_bad(BlockIndex(3)).unwrap());
        bd.erase(BlockIndex(3)).unwrap();
        assert_eq!(bd.get_wear(BlockIndex(3)).unwrap(), 1);
        assert!(bd.set_wear(BlockIndex(4), 0).is_err());
        assert!(bd.get_wear(BlockIndex(4)).is_err());
    }

    #[test]
    fn halted_device_refuses_everything() {
        let mut cfg = small_config();
        cfg.power_cycles = 1;
        let mut bd = TestBd::create(&cfg, None).unwrap();
        assert_eq!(bd.power_cycles(), 1);
        assert!(matches!(bd.erase(BlockIndex(0)), Err(FbdError::PowerLoss)));
        assert!(bd.is_powered_off());

        let mut buf = [0_u8; 16];
        assert!(bd.read(BlockIndex(0), 0, &mut buf).unwrap_err().is_power_loss());
        assert!(bd.program(BlockIndex(0), 0, &[0; 16]).unwrap_err().is_power_loss());
        assert!(bd.erase(BlockIndex(1)).unwrap_err().is_power_loss());
        assert!(bd.sync().unwrap_err().is_power_loss());
        assert!(bd.set_wear(BlockIndex(0), 0).unwrap_err().is_power_loss());
        assert!(matches!(
            bd.set_wear(BlockIndex(4), 0),
            Err(FbdError::InvalidArgument(_))
        ));
        // Inspection still works after the crash.
        assert_eq!(bd.get_wear(BlockIndex(0)).unwrap(), 1);
    }
}
