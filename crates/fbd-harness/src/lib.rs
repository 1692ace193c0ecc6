#![forbid(unsafe_code)]
//! Crash harness for the flash test device.
//!
//! Generates deterministic workloads, runs them against a file-backed
//! [`TestBd`](fbd_testbd::TestBd) until simulated power loss, and checks
//! that what survives on disk is exactly the prefix of writes that completed.

pub mod crash;
pub mod workload;

pub use crash::{BlockDigest, CrashReport, CrashSession, SweepCase, SweepReport, power_loss_sweep};
pub use workload::{DeterministicRng, Workload, WorkloadOp};

use anyhow::{Context, Result, bail};
use fbd_testbd::TestBdConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// JSON description of a sweep run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub device: TestBdConfig,
    pub seed: u64,
    pub op_count: usize,
    pub max_cycles: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            device: TestBdConfig::default(),
            seed: 0xF1A5_4BD0_0000_0001,
            op_count: 200,
            max_cycles: 64,
        }
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid sweep config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.device.validate().context("invalid device configuration")?;
        if self.op_count == 0 {
            bail!("op_count must be greater than zero");
        }
        if self.max_cycles == 0 {
            bail!("max_cycles must be greater than zero");
        }
        Ok(())
    }

    /// Generate the workload and sweep every cut point into `dir`.
    pub fn run(&self, dir: &Path) -> Result<SweepReport> {
        self.validate()?;
        let workload = Workload::generate(self.seed, &self.device.geometry, self.op_count)
            .context("generate workload")?;
        power_loss_sweep(&self.device, dir, &workload.ops, self.max_cycles)
    }
}
