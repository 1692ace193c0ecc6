//! Deterministic flash workloads.
//!
//! A [`Workload`] is a flat list of erase/program/sync calls generated from
//! a seed. Programs only ever target regions erased earlier in the same
//! workload, walking each block front to back one program burst at a time,
//! so a healthy device never rejects them as unerased.

use fbd_error::{FbdError, Result};
use fbd_testbd::TestBd;
use fbd_types::{BlockIndex, Geometry};
use serde::{Deserialize, Serialize};

/// Seeded xorshift generator. Same seed, same sequence, on every platform.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform-ish value in `0..upper_exclusive`; `0` when the range is empty.
    pub fn next_below(&mut self, upper_exclusive: u32) -> u32 {
        if upper_exclusive <= 1 {
            return 0;
        }
        let value = self.next_u64() % u64::from(upper_exclusive);
        u32::try_from(value).unwrap_or(0)
    }

    pub fn fill_bytes(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// One device call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkloadOp {
    Erase { block: u32 },
    Program { block: u32, offset: u32, data: Vec<u8> },
    Sync,
}

impl WorkloadOp {
    #[must_use]
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Sync)
    }

    pub fn apply(&self, bd: &mut TestBd<'_>) -> Result<()> {
        match self {
            Self::Erase { block } => bd.erase(BlockIndex(*block)),
            Self::Program {
                block,
                offset,
                data,
            } => bd.program(BlockIndex(*block), *offset, data),
            Self::Sync => bd.sync(),
        }
    }
}

/// Upper bound on program units per generated program call.
const MAX_UNITS_PER_PROGRAM: u32 = 4;

/// A generated operation sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub seed: u64,
    pub ops: Vec<WorkloadOp>,
}

impl Workload {
    /// Generate `op_count` operations for `geometry`.
    ///
    /// Roughly one in five calls is an erase, one in ten a sync; the rest
    /// program the next free units of a block that has been erased. While no
    /// block is erased a program slot becomes an erase.
    pub fn generate(seed: u64, geometry: &Geometry, op_count: usize) -> Result<Self> {
        geometry
            .validate()
            .map_err(|err| FbdError::InvalidArgument(err.to_string()))?;

        let mut rng = DeterministicRng::new(seed);
        // Next free offset per block; `None` until the block is erased.
        let blocks = usize::try_from(geometry.erase_count).unwrap_or(0);
        let mut cursor: Vec<Option<u32>> = vec![None; blocks];
        let mut ops = Vec::with_capacity(op_count);

        for _ in 0..op_count {
            let branch = rng.next_below(100);
            let op = if branch < 10 {
                WorkloadOp::Sync
            } else if branch < 30 {
                Self::erase(&mut rng, geometry, &mut cursor)
            } else {
                Self::program(&mut rng, geometry, &mut cursor)
                    .unwrap_or_else(|| Self::erase(&mut rng, geometry, &mut cursor))
            };
            ops.push(op);
        }

        Ok(Self { seed, ops })
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_write()).count()
    }

    fn erase(
        rng: &mut DeterministicRng,
        geometry: &Geometry,
        cursor: &mut [Option<u32>],
    ) -> WorkloadOp {
        let block = rng.next_below(geometry.erase_count);
        if let Some(slot) = usize::try_from(block).ok().and_then(|b| cursor.get_mut(b)) {
            *slot = Some(0);
        }
        WorkloadOp::Erase { block }
    }

    fn program(
        rng: &mut DeterministicRng,
        geometry: &Geometry,
        cursor: &mut [Option<u32>],
    ) -> Option<WorkloadOp> {
        let open: Vec<usize> = cursor
            .iter()
            .enumerate()
            .filter_map(|(index, next)| match next {
                Some(offset) if *offset < geometry.erase_size => Some(index),
                _ => None,
            })
            .collect();
        let count = u32::try_from(open.len()).ok().filter(|n| *n > 0)?;
        let index = open[usize::try_from(rng.next_below(count)).ok()?];
        let offset = cursor[index]?;

        let free_units = (geometry.erase_size - offset) / geometry.prog_size;
        let units = 1 + rng.next_below(free_units.min(MAX_UNITS_PER_PROGRAM));
        let len = units * geometry.prog_size;
        let mut data = vec![0_u8; usize::try_from(len).ok()?];
        rng.fill_bytes(&mut data);

        cursor[index] = Some(offset + len);
        Some(WorkloadOp::Program {
            block: u32::try_from(index).ok()?,
            offset,
            data,
        })
    }
}
