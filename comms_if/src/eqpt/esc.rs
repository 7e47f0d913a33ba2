//! # ESC Equipment Commands
//!
//! Command identifiers and payload layouts exchanged between the remote and the ESC controller.
//! All multi-byte values on the wire are little-endian.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of ESCs driven by the controller.
pub const NUM_ESCS: usize = 4;

/// Minimum pulse width accepted by the ESCs (full reverse).
pub const PULSE_MIN_US: u16 = 1000;

/// Neutral pulse width (stopped).
pub const PULSE_NEUTRAL_US: u16 = 1500;

/// Maximum pulse width accepted by the ESCs (full forward).
pub const PULSE_MAX_US: u16 = 2000;

/// Length of a servo set payload, four pulse widths.
pub const SERVO_DEMS_LEN: usize = 2 * NUM_ESCS;

/// Length of an acknowledgment payload, four pulse widths plus the originating channel.
pub const SERVO_ACK_LEN: usize = SERVO_DEMS_LEN + 1;

/// Length of an arm state report payload.
pub const ARM_STATE_REPORT_LEN: usize = 1;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pulse width demands for all four ESCs, carried by the `Servo1..Servo4` commands.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoDems {
    pub pulse_widths_us: [u16; NUM_ESCS],
}

/// Acknowledgment sent back to the remote once a servo command has been forwarded.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoAck {
    /// The pulse widths that were forwarded to the ESCs
    pub pulse_widths_us: [u16; NUM_ESCS],

    /// The servo channel (1 to 4) of the command being acknowledged
    pub channel: u8,
}

/// Report of the controller's arm state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmStateReport {
    pub armed: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// IDs of the ESCs, in output order.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum EscId {
    Esc1,
    Esc2,
    Esc3,
    Esc4,
}

/// Command identifiers carried in the message header.
///
/// The four servo commands are semantically identical, they only identify which control on the
/// remote produced the command.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Copy, Clone)]
#[repr(u8)]
pub enum CmdId {
    /// Data/acknowledgment
    Data = 0x01,

    /// Arm the controller (write) or query the arm state (read)
    Armed = 0x03,

    /// Disarm the controller
    Disarmed = 0x04,

    Servo1 = 0x11,
    Servo2 = 0x12,
    Servo3 = 0x13,
    Servo4 = 0x14,
}

/// Errors which can occur while parsing a payload.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Expected a payload of {expected} bytes, found {found}")]
    InvalidLength { expected: usize, found: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EscId {
    /// All ESCs in output order.
    pub const ALL: [EscId; NUM_ESCS] = [EscId::Esc1, EscId::Esc2, EscId::Esc3, EscId::Esc4];

    /// Zero based index of this ESC.
    pub fn index(self) -> usize {
        match self {
            EscId::Esc1 => 0,
            EscId::Esc2 => 1,
            EscId::Esc3 => 2,
            EscId::Esc4 => 3,
        }
    }
}

impl fmt::Display for EscId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ESC{}", self.index() + 1)
    }
}

impl CmdId {
    /// If this is one of the servo commands return its channel number (1 to 4).
    pub fn servo_channel(self) -> Option<u8> {
        match self {
            CmdId::Servo1 => Some(1),
            CmdId::Servo2 => Some(2),
            CmdId::Servo3 => Some(3),
            CmdId::Servo4 => Some(4),
            _ => None,
        }
    }
}

impl From<CmdId> for u8 {
    fn from(id: CmdId) -> u8 {
        id as u8
    }
}

impl TryFrom<u8> for CmdId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CmdId::Data),
            0x03 => Ok(CmdId::Armed),
            0x04 => Ok(CmdId::Disarmed),
            0x11 => Ok(CmdId::Servo1),
            0x12 => Ok(CmdId::Servo2),
            0x13 => Ok(CmdId::Servo3),
            0x14 => Ok(CmdId::Servo4),
            v => Err(v),
        }
    }
}

impl ServoDems {
    /// Parse the demands from a servo command payload, which must be exactly 8 bytes.
    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        check_len(payload, SERVO_DEMS_LEN)?;

        Ok(Self {
            pulse_widths_us: read_pulse_widths(payload),
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SERVO_DEMS_LEN];
        write_pulse_widths(&mut buf, &self.pulse_widths_us);
        buf
    }

    /// Returns true if every pulse width is within `[PULSE_MIN_US, PULSE_MAX_US]`.
    pub fn in_range(&self) -> bool {
        self.pulse_widths_us.iter().all(|&w| pulse_width_in_range(w))
    }
}

impl ServoAck {
    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        check_len(payload, SERVO_ACK_LEN)?;

        Ok(Self {
            pulse_widths_us: read_pulse_widths(payload),
            channel: payload[SERVO_DEMS_LEN],
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SERVO_ACK_LEN];
        write_pulse_widths(&mut buf, &self.pulse_widths_us);
        buf[SERVO_DEMS_LEN] = self.channel;
        buf
    }
}

impl ArmStateReport {
    pub fn from_payload(payload: &[u8]) -> Result<Self, PayloadError> {
        check_len(payload, ARM_STATE_REPORT_LEN)?;

        Ok(Self {
            armed: payload[0] != 0,
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        vec![self.armed as u8]
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Clamp a pulse width into `[PULSE_MIN_US, PULSE_MAX_US]`.
pub fn clamp_pulse_width(pulse_width_us: u16) -> u16 {
    pulse_width_us.max(PULSE_MIN_US).min(PULSE_MAX_US)
}

/// Returns true if the pulse width is within `[PULSE_MIN_US, PULSE_MAX_US]`.
pub fn pulse_width_in_range(pulse_width_us: u16) -> bool {
    pulse_width_us >= PULSE_MIN_US && pulse_width_us <= PULSE_MAX_US
}

fn check_len(payload: &[u8], expected: usize) -> Result<(), PayloadError> {
    if payload.len() != expected {
        return Err(PayloadError::InvalidLength {
            expected,
            found: payload.len(),
        });
    }
    Ok(())
}

fn read_pulse_widths(buf: &[u8]) -> [u16; NUM_ESCS] {
    let mut widths = [0u16; NUM_ESCS];
    LittleEndian::read_u16_into(&buf[..SERVO_DEMS_LEN], &mut widths);
    widths
}

fn write_pulse_widths(buf: &mut [u8], widths: &[u16; NUM_ESCS]) {
    LittleEndian::write_u16_into(widths, &mut buf[..SERVO_DEMS_LEN]);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_servo_dems_layout() {
        // 1000, 1500, 1750, 2000 little-endian
        let payload = [0xE8, 0x03, 0xDC, 0x05, 0xD6, 0x06, 0xD0, 0x07];

        let dems = ServoDems::from_payload(&payload).unwrap();
        assert_eq!(dems.pulse_widths_us, [1000, 1500, 1750, 2000]);
        assert!(dems.in_range());
        assert_eq!(dems.to_payload(), payload.to_vec());
    }

    #[test]
    fn test_servo_dems_wrong_length() {
        assert_eq!(
            ServoDems::from_payload(&[0xE8, 0x03, 0xDC]),
            Err(PayloadError::InvalidLength {
                expected: 8,
                found: 3
            })
        );
        assert!(ServoDems::from_payload(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_servo_dems_out_of_range() {
        let dems = ServoDems {
            pulse_widths_us: [900, 1500, 1500, 1500],
        };
        assert!(!dems.in_range());
    }

    #[test]
    fn test_servo_ack_layout() {
        let ack = ServoAck {
            pulse_widths_us: [1000, 1500, 1750, 2000],
            channel: 3,
        };
        let payload = ack.to_payload();

        assert_eq!(payload.len(), SERVO_ACK_LEN);
        assert_eq!(&payload[..2], &[0xE8, 0x03]);
        assert_eq!(payload[8], 3);
        assert_eq!(ServoAck::from_payload(&payload), Ok(ack));
    }

    #[test]
    fn test_arm_state_report() {
        assert_eq!(ArmStateReport { armed: true }.to_payload(), vec![1]);
        assert_eq!(
            ArmStateReport::from_payload(&[0]),
            Ok(ArmStateReport { armed: false })
        );
        assert!(ArmStateReport::from_payload(&[]).is_err());
    }

    #[test]
    fn test_cmd_id() {
        for id in [
            CmdId::Data,
            CmdId::Armed,
            CmdId::Disarmed,
            CmdId::Servo1,
            CmdId::Servo2,
            CmdId::Servo3,
            CmdId::Servo4,
        ]
        .iter()
        {
            assert_eq!(CmdId::try_from(u8::from(*id)), Ok(*id));
        }

        assert_eq!(CmdId::try_from(0x7Fu8), Err(0x7F));
        assert_eq!(CmdId::Servo3.servo_channel(), Some(3));
        assert_eq!(CmdId::Armed.servo_channel(), None);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_pulse_width(0), PULSE_MIN_US);
        assert_eq!(clamp_pulse_width(999), PULSE_MIN_US);
        assert_eq!(clamp_pulse_width(1234), 1234);
        assert_eq!(clamp_pulse_width(2001), PULSE_MAX_US);
        assert_eq!(clamp_pulse_width(u16::MAX), PULSE_MAX_US);
    }

    #[test]
    fn test_esc_id() {
        for (i, id) in EscId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
        assert_eq!(EscId::Esc2.to_string(), "ESC2");
    }
}
