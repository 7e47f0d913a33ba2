//! ESC commands executed by the supervisor

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::esc::{
    pulse_width_in_range, EscId, NUM_ESCS, PULSE_MAX_US, PULSE_MIN_US, PULSE_NEUTRAL_US,
};
use std::time::{Duration, Instant};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A command for all four ESCs.
#[derive(Debug, Clone, Copy)]
pub struct EscCmd {
    /// Pulse width for each ESC in microseconds
    pub pulse_widths_us: [u16; NUM_ESCS],

    /// If set all ESCs are forced to neutral, ignoring `pulse_widths_us`
    pub emergency_stop: bool,

    /// When the command was issued
    pub timestamp: Instant,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EscCmdError {
    #[error(
        "Pulse width of {pulse_width_us} us for {esc} is outside the valid range ({}-{} us)",
        PULSE_MIN_US,
        PULSE_MAX_US
    )]
    OutOfRange { esc: EscId, pulse_width_us: u16 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EscCmd {
    pub fn new(pulse_widths_us: [u16; NUM_ESCS]) -> Self {
        Self {
            pulse_widths_us,
            emergency_stop: false,
            timestamp: Instant::now(),
        }
    }

    /// All ESCs at neutral.
    pub fn neutral() -> Self {
        Self::new([PULSE_NEUTRAL_US; NUM_ESCS])
    }

    /// All ESCs at neutral, applied without validation.
    pub fn emergency() -> Self {
        Self {
            emergency_stop: true,
            ..Self::neutral()
        }
    }

    /// Check every pulse width is within the valid range.
    ///
    /// Emergency commands are never validated by the supervisor, but the check still reports on
    /// their widths.
    pub fn validate(&self) -> Result<(), EscCmdError> {
        for (esc, &pulse_width_us) in EscId::ALL.iter().zip(self.pulse_widths_us.iter()) {
            if !pulse_width_in_range(pulse_width_us) {
                return Err(EscCmdError::OutOfRange {
                    esc: *esc,
                    pulse_width_us,
                });
            }
        }

        Ok(())
    }

    /// Time since the command was issued.
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(EscCmd::neutral().validate().is_ok());
        assert!(EscCmd::new([1000, 1500, 1750, 2000]).validate().is_ok());

        assert_eq!(
            EscCmd::new([900, 1500, 1500, 1500]).validate(),
            Err(EscCmdError::OutOfRange {
                esc: EscId::Esc1,
                pulse_width_us: 900
            })
        );
        assert_eq!(
            EscCmd::new([1500, 1500, 1500, 2001]).validate(),
            Err(EscCmdError::OutOfRange {
                esc: EscId::Esc4,
                pulse_width_us: 2001
            })
        );
    }

    #[test]
    fn test_emergency() {
        let cmd = EscCmd::emergency();

        assert!(cmd.emergency_stop);
        assert_eq!(cmd.pulse_widths_us, [PULSE_NEUTRAL_US; NUM_ESCS]);
        assert!(!EscCmd::neutral().emergency_stop);
    }
}
