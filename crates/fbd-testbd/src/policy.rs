//! Bad-block decision logic.
//!
//! A block's state is a pure function of its wear and the configured
//! threshold. Once bad, every operation on the block consults the single
//! configured [`BadBlockBehavior`].

use fbd_types::{BadBlockBehavior, OpKind, Wear};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Good,
    Bad,
}

/// Outcome of consulting the policy before an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the operation against the backend.
    Proceed,
    /// Fail without touching the backend.
    Fail,
    /// Report success without touching the backend.
    Noop,
}

/// `erase_cycles == 0` disables bad blocks entirely.
#[must_use]
pub fn block_state(wear: Wear, erase_cycles: Wear) -> BlockState {
    if erase_cycles != 0 && wear >= erase_cycles {
        BlockState::Bad
    } else {
        BlockState::Good
    }
}

#[must_use]
pub fn decide(op: OpKind, state: BlockState, behavior: BadBlockBehavior) -> Decision {
    if state == BlockState::Good {
        return Decision::Proceed;
    }
    match (op, behavior) {
        (OpKind::Read, BadBlockBehavior::ReadError)
        | (OpKind::Program, BadBlockBehavior::ProgramError)
        | (OpKind::Erase, BadBlockBehavior::EraseError) => Decision::Fail,
        (OpKind::Program, BadBlockBehavior::ProgramNoop)
        | (OpKind::Erase, BadBlockBehavior::EraseNoop) => Decision::Noop,
        _ => Decision::Proceed,
    }
}
