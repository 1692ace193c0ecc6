//! Power-loss countdown.

use fbd_error::{FbdError, Result};

/// Result of charging one write against the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    Continue,
    /// This write was the last one before the power cut.
    Tripped,
}

/// Counts remaining writes (erase + program) until simulated power loss.
#[derive(Debug, Clone)]
pub struct PowerLossGovernor {
    remaining: u32,
    enabled: bool,
    powered_off: bool,
}

impl PowerLossGovernor {
    /// `cycles == 0` disables power-loss simulation.
    #[must_use]
    pub fn new(cycles: u32) -> Self {
        Self {
            remaining: cycles,
            enabled: cycles != 0,
            powered_off: false,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn is_powered_off(&self) -> bool {
        self.powered_off
    }

    pub fn ensure_powered(&self) -> Result<()> {
        if self.powered_off {
            return Err(FbdError::PowerLoss);
        }
        Ok(())
    }

    /// Charge one completed write.
    pub fn consume(&mut self) -> PowerEvent {
        if !self.enabled || self.powered_off {
            return PowerEvent::Continue;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            PowerEvent::Tripped
        } else {
            PowerEvent::Continue
        }
    }

    pub fn power_off(&mut self) {
        self.powered_off = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_governor_never_trips() {
        let mut gov = PowerLossGovernor::new(0);
        for _ in 0..1000 {
            assert_eq!(gov.consume(), PowerEvent::Continue);
        }
        assert!(gov.ensure_powered().is_ok());
    }

    #[test]
    fn kth_write_trips() {
        let mut gov = PowerLossGovernor::new(3);
        assert_eq!(gov.consume(), PowerEvent::Continue);
        assert_eq!(gov.remaining(), 2);
        assert_eq!(gov.consume(), PowerEvent::Continue);
        assert_eq!(gov.consume(), PowerEvent::Tripped);
        assert_eq!(gov.remaining(), 0);
    }

    #[test]
    fn powered_off_governor_rejects_io() {
        let mut gov = PowerLossGovernor::new(1);
        assert_eq!(gov.consume(), PowerEvent::Tripped);
        gov.power_off();
        assert!(gov.is_powered_off());
        assert!(matches!(gov.ensure_powered(), Err(FbdError::PowerLoss)));
        assert_eq!(gov.consume(), PowerEvent::Continue);
    }
}
