use fbd_block::{FileBdConfig, RamBdConfig};
use fbd_error::{FbdError, Result};
use fbd_types::{BadBlockBehavior, EraseValue, Geometry, Wear};
use serde::{Deserialize, Serialize};

/// Exit code used when power loss terminates the process.
pub const POWER_LOSS_EXIT_CODE: i32 = 33;

/// What happens when the power-loss countdown expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PowerLossAction {
    /// Power the device off: the triggering call returns
    /// [`FbdError::PowerLoss`] and the device refuses all further I/O.
    #[default]
    Halt,
    /// Terminate the process with `code` after syncing the backend.
    Exit { code: i32 },
}

/// Test device configuration.
///
/// Immutable once a device is created from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestBdConfig {
    pub geometry: Geometry,
    /// Pattern erased blocks read back as; `EraseValue::None` skips the
    /// emulation entirely.
    pub erase_value: EraseValue,
    /// Erase cycles before a block goes bad. `0` disables bad blocks.
    pub erase_cycles: Wear,
    pub badblock_behavior: BadBlockBehavior,
    /// Writes (erase + program) allowed before power is cut. `0` disables.
    pub power_cycles: u32,
    pub power_loss: PowerLossAction,
    /// Reject programs into regions that do not hold the erase pattern.
    /// Only meaningful when `erase_value` is a fill byte.
    pub check_erased: bool,
    pub ram: RamBdConfig,
    pub file: FileBdConfig,
}

impl Default for TestBdConfig {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            erase_value: EraseValue::default(),
            erase_cycles: 0,
            badblock_behavior: BadBlockBehavior::default(),
            power_cycles: 0,
            power_loss: PowerLossAction::default(),
            check_erased: true,
            ram: RamBdConfig::default(),
            file: FileBdConfig::default(),
        }
    }
}

impl TestBdConfig {
    #[must_use]
    pub fn with_geometry(geometry: Geometry) -> Self {
        Self {
            geometry,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.geometry
            .validate()
            .map_err(|err| FbdError::InvalidArgument(err.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| FbdError::InvalidArgument(format!("invalid testbd config: {err}")))
    }
}
