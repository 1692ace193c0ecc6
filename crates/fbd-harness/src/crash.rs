//! Crash sessions and power-loss sweeps.
//!
//! A session runs a workload against a file-backed device that halts after
//! a fixed number of writes, then reopens the image with power loss
//! disabled and digests what survived. A sweep repeats that for every cut
//! point and checks each survivor against a RAM replay of exactly the
//! writes that completed before the cut.

use crate::workload::WorkloadOp;
use anyhow::{Context, Result, bail};
use fbd_error::FbdError;
use fbd_testbd::{Backend, IoStats, PowerLossAction, TestBd, TestBdConfig};
use fbd_types::{BlockIndex, Geometry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Content digest of one erase block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDigest {
    pub block: u32,
    pub blake3: String,
}

/// What one crash session did and what survived it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashReport {
    /// Countdown the session ran with (`0` means power was never cut).
    pub power_cycles: u32,
    /// Operations issued, including the one that tripped power loss.
    pub executed_ops: usize,
    /// Writes that reached the image.
    pub writes: u64,
    /// Operations that failed on a bad block, including programs rejected
    /// because a failed erase left their region unerased.
    pub faulted_ops: usize,
    pub power_lost: bool,
    pub stats: IoStats,
    pub blocks: Vec<BlockDigest>,
}

/// Runs a single workload up to power loss.
#[derive(Debug)]
pub struct CrashSession;

impl CrashSession {
    /// Run `ops` on a device backed by `path` using `config`.
    ///
    /// The device always halts on power loss, whatever `config.power_loss`
    /// says, so the session can observe the cut and reopen the image.
    pub fn run(config: &TestBdConfig, path: &Path, ops: &[WorkloadOp]) -> Result<CrashReport> {
        let mut session_config = config.clone();
        session_config.power_loss = PowerLossAction::Halt;

        let mut bd = TestBd::create(&session_config, Some(path))
            .with_context(|| format!("create device on {}", path.display()))?;
        let mut executed_ops = 0_usize;
        let mut faulted_ops = 0_usize;
        let mut power_lost = false;

        for (index, op) in ops.iter().enumerate() {
            executed_ops += 1;
            match op.apply(&mut bd) {
                Ok(()) => {}
                Err(FbdError::PowerLoss) => {
                    power_lost = true;
                    break;
                }
                Err(err) if is_fault(&bd, op, &err) => {
                    debug!(op_index = index, error = %err, "crash_session_op_faulted");
                    faulted_ops += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("workload op {index} failed"));
                }
            }
        }

        let stats = *bd.stats();
        bd.destroy();

        let blocks = reopen_and_digest(config, path)?;
        info!(
            path = %path.display(),
            power_cycles = config.power_cycles,
            executed_ops,
            writes = stats.writes(),
            power_lost,
            "crash_session_complete"
        );
        Ok(CrashReport {
            power_cycles: config.power_cycles,
            executed_ops,
            writes: stats.writes(),
            faulted_ops,
            power_lost,
            stats,
            blocks,
        })
    }
}

/// Reopen `path` as a fresh device with power loss disabled and digest
/// every block.
fn reopen_and_digest(config: &TestBdConfig, path: &Path) -> Result<Vec<BlockDigest>> {
    // A fresh wear table has no bad blocks, so every read goes through.
    let mut survivor_config = config.clone();
    survivor_config.power_cycles = 0;
    let mut bd = TestBd::create(&survivor_config, Some(path))
        .with_context(|| format!("reopen {}", path.display()))?;

    let geometry = config.geometry;
    let mut buf = vec![0_u8; geometry.erase_size_usize()];
    let mut blocks = Vec::new();
    for block in 0..geometry.erase_count {
        bd.read(BlockIndex(block), 0, &mut buf)
            .with_context(|| format!("read back block {block}"))?;
        blocks.push(BlockDigest {
            block,
            blake3: blake3::hash(&buf).to_hex().to_string(),
        });
    }
    bd.destroy();
    Ok(blocks)
}

/// Whether `err` is an expected consequence of simulated wear rather than a
/// harness or device bug.
///
/// Workloads assume every erase lands. When an erase fails on a bad block
/// the region stays programmed, and the next program there is rejected as
/// unerased.
fn is_fault(bd: &TestBd<'_>, op: &WorkloadOp, err: &FbdError) -> bool {
    match err {
        FbdError::BadBlock { .. } | FbdError::Corrupt { .. } => true,
        FbdError::InvalidArgument(_) => match op {
            WorkloadOp::Program { block, .. } => bd.is_bad(BlockIndex(*block)).unwrap_or(false),
            WorkloadOp::Erase { .. } | WorkloadOp::Sync => false,
        },
        _ => false,
    }
}

fn geometry_len(geometry: &Geometry) -> Result<usize> {
    geometry
        .device_len()
        .and_then(|len| usize::try_from(len).ok())
        .context("device length does not fit usize")
}

/// Digest `image` block by block.
fn digest_image(geometry: &Geometry, image: &[u8]) -> Vec<BlockDigest> {
    image
        .chunks(geometry.erase_size_usize())
        .zip(0..geometry.erase_count)
        .map(|(chunk, block)| BlockDigest {
            block,
            blake3: blake3::hash(chunk).to_hex().to_string(),
        })
        .collect()
}

/// Apply `ops` to a RAM device until `writes` writes have landed and
/// return the per-block digests of the result.
///
/// The RAM store starts zeroed like a freshly created image file.
fn reference_digests(
    config: &TestBdConfig,
    ops: &[WorkloadOp],
    writes: u64,
) -> Result<Vec<BlockDigest>> {
    let mut reference_config = config.clone();
    reference_config.power_cycles = 0;
    let blank = vec![0_u8; geometry_len(&config.geometry)?];
    let mut bd = TestBd::create_from_image(&reference_config, blank)
        .context("create reference device")?;

    for (index, op) in ops.iter().enumerate() {
        if bd.stats().writes() >= writes {
            break;
        }
        match op.apply(&mut bd) {
            Ok(()) => {}
            Err(err) if is_fault(&bd, op, &err) => {}
            Err(err) => {
                return Err(err).with_context(|| format!("reference op {index} failed"));
            }
        }
    }

    match bd.backend() {
        Backend::Ram(ram) => Ok(digest_image(&config.geometry, ram.image())),
        Backend::File(_) => bail!("reference device must be RAM backed"),
    }
}

/// Outcome of one cut point in a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepCase {
    pub power_cycles: u32,
    pub power_lost: bool,
    pub writes: u64,
    pub matches_reference: bool,
    /// Blocks whose survivor content differs from the reference replay.
    pub mismatched_blocks: Vec<u32>,
}

/// Aggregate result of [`power_loss_sweep`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub max_cycles: u32,
    pub op_count: usize,
    pub passed_cases: u32,
    pub failed_cases: u32,
    pub duration_us: u64,
    pub cases: Vec<SweepCase>,
}

impl SweepReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failed_cases == 0
    }
}

/// Cut power after each of the first `max_cycles` writes of `ops` in turn.
///
/// Each cut point gets its own image under `dir` (`cut_<k>.img`), recreated
/// from scratch. The survivor must equal a replay of exactly `k` writes.
pub fn power_loss_sweep(
    config: &TestBdConfig,
    dir: &Path,
    ops: &[WorkloadOp],
    max_cycles: u32,
) -> Result<SweepReport> {
    if max_cycles == 0 {
        bail!("max_cycles must be greater than zero");
    }
    config
        .validate()
        .context("invalid device configuration")?;
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let start = Instant::now();
    let mut cases = Vec::with_capacity(usize::try_from(max_cycles).unwrap_or(0));
    let mut passed_cases = 0_u32;

    for power_cycles in 1..=max_cycles {
        let path = dir.join(format!("cut_{power_cycles:05}.img"));
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }

        let mut session_config = config.clone();
        session_config.power_cycles = power_cycles;
        let report = CrashSession::run(&session_config, &path, ops)?;
        let expected = reference_digests(config, ops, report.writes)?;

        let mismatched_blocks: Vec<u32> = report
            .blocks
            .iter()
            .zip(&expected)
            .filter(|(got, want)| got != want)
            .map(|(got, _)| got.block)
            .collect();
        let matches_reference = mismatched_blocks.is_empty();
        if matches_reference {
            passed_cases += 1;
        } else {
            warn!(power_cycles, ?mismatched_blocks, "power_loss_sweep_mismatch");
        }

        let exhausted = !report.power_lost;
        cases.push(SweepCase {
            power_cycles,
            power_lost: report.power_lost,
            writes: report.writes,
            matches_reference,
            mismatched_blocks,
        });
        if exhausted {
            // The workload finished before the cut; later cut points repeat it.
            debug!(power_cycles, "power_loss_sweep_workload_exhausted");
            break;
        }
    }

    let case_count = u32::try_from(cases.len()).unwrap_or(u32::MAX);
    Ok(SweepReport {
        max_cycles,
        op_count: ops.len(),
        passed_cases,
        failed_cases: case_count.saturating_sub(passed_cases),
        duration_us: u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
        cases,
    })
}
