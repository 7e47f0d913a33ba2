//! # Message Framing
//!
//! Converts between a `(direction, command id, payload)` triple and the byte frame sent over the
//! transport.
//!
//! ## Frame layout
//!
//! | offset  | size | field                                                 |
//! |---------|------|-------------------------------------------------------|
//! | 0       | 1    | sync `0xA5`                                           |
//! | 1       | 1    | sync `0x5A`                                           |
//! | 2       | 1    | direction (`0x00` read, `0x01` write)                 |
//! | 3       | 1    | command id                                            |
//! | 4       | 1    | payload length `N`, at most [`MAX_PAYLOAD`]           |
//! | 5       | N    | payload                                               |
//! | 5 + N   | 2    | CRC-16/CCITT-FALSE of bytes `2..5 + N`, little-endian |
//! | 7 + N   | 1    | end marker `0x0D`                                     |
//!
//! A frame is therefore always [`FRAME_OVERHEAD`] bytes longer than its payload.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod crc;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

pub use self::crc::crc16;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum number of payload bytes in one frame.
pub const MAX_PAYLOAD: usize = 64;

/// Number of framing bytes added to the payload.
pub const FRAME_OVERHEAD: usize = 8;

/// Largest possible frame.
pub const MAX_FRAME_LEN: usize = MAX_PAYLOAD + FRAME_OVERHEAD;

const SYNC: [u8; 2] = [0xA5, 0x5A];
const END_MARKER: u8 = 0x0D;

const DIR_OFFSET: usize = 2;
const CMD_OFFSET: usize = 3;
const LEN_OFFSET: usize = 4;
const PAYLOAD_OFFSET: usize = 5;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A decoded message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub direction: MsgDirection,

    /// Raw command identifier, see [`crate::eqpt::esc::CmdId`] for the known values
    pub cmd_id: u8,

    pub payload: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Direction of a message, from the point of view of the sender.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgDirection {
    /// A request for, or report of, data
    Read,

    /// A command which changes state
    Write,
}

/// Reasons a frame could not be encoded or decoded.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MsgError {
    #[error("Payload of {0} bytes exceeds the maximum of {} bytes", MAX_PAYLOAD)]
    PayloadTooLong(usize),

    #[error("Frame of {0} bytes is shorter than the minimum of {} bytes", FRAME_OVERHEAD)]
    TooShort(usize),

    #[error("Invalid sync bytes {0:#04x} {1:#04x}")]
    InvalidSync(u8, u8),

    #[error("Invalid direction byte {0:#04x}")]
    InvalidDirection(u8),

    #[error("Frame is {found} bytes but its length field implies {expected} bytes")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Checksum mismatch (frame {found:#06x}, computed {computed:#06x})")]
    ChecksumMismatch { found: u16, computed: u16 },

    #[error("Invalid end marker {0:#04x}")]
    InvalidEndMarker(u8),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Msg {
    pub fn new(direction: MsgDirection, cmd_id: u8, payload: Vec<u8>) -> Self {
        Self {
            direction,
            cmd_id,
            payload,
        }
    }

    /// Encode this message into a frame.
    pub fn encode(&self) -> Result<Vec<u8>, MsgError> {
        encode(self.direction, self.cmd_id, &self.payload)
    }
}

impl From<MsgDirection> for u8 {
    fn from(dir: MsgDirection) -> u8 {
        match dir {
            MsgDirection::Read => 0x00,
            MsgDirection::Write => 0x01,
        }
    }
}

impl TryFrom<u8> for MsgDirection {
    type Error = MsgError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MsgDirection::Read),
            0x01 => Ok(MsgDirection::Write),
            v => Err(MsgError::InvalidDirection(v)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Encode a message into a frame.
///
/// The only failure is a payload longer than [`MAX_PAYLOAD`].
pub fn encode(direction: MsgDirection, cmd_id: u8, payload: &[u8]) -> Result<Vec<u8>, MsgError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(MsgError::PayloadTooLong(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&SYNC);
    frame.push(direction.into());
    frame.push(cmd_id);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);

    let mut crc_bytes = [0u8; 2];
    LittleEndian::write_u16(&mut crc_bytes, crc16(&frame[DIR_OFFSET..]));
    frame.extend_from_slice(&crc_bytes);
    frame.push(END_MARKER);

    Ok(frame)
}

/// Decode a frame.
///
/// Malformed frames are an expected outcome, the error describes why the frame was rejected.
pub fn decode(frame: &[u8]) -> Result<Msg, MsgError> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(MsgError::TooShort(frame.len()));
    }

    if frame[..2] != SYNC {
        return Err(MsgError::InvalidSync(frame[0], frame[1]));
    }

    let direction = MsgDirection::try_from(frame[DIR_OFFSET])?;
    let cmd_id = frame[CMD_OFFSET];

    let payload_len = frame[LEN_OFFSET] as usize;
    if payload_len > MAX_PAYLOAD {
        return Err(MsgError::PayloadTooLong(payload_len));
    }

    let expected = payload_len + FRAME_OVERHEAD;
    if frame.len() != expected {
        return Err(MsgError::LengthMismatch {
            expected,
            found: frame.len(),
        });
    }

    let payload_end = PAYLOAD_OFFSET + payload_len;
    let found = LittleEndian::read_u16(&frame[payload_end..payload_end + 2]);
    let computed = crc16(&frame[DIR_OFFSET..payload_end]);
    if found != computed {
        return Err(MsgError::ChecksumMismatch { found, computed });
    }

    let end = frame[payload_end + 2];
    if end != END_MARKER {
        return Err(MsgError::InvalidEndMarker(end));
    }

    Ok(Msg {
        direction,
        cmd_id,
        payload: frame[PAYLOAD_OFFSET..payload_end].to_vec(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn payload_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_round_trip() {
        for &len in [0, 1, 8, MAX_PAYLOAD].iter() {
            for &dir in [MsgDirection::Read, MsgDirection::Write].iter() {
                let payload = payload_of(len);
                let frame = encode(dir, 0x11, &payload).unwrap();

                assert_eq!(frame.len(), len + FRAME_OVERHEAD);
                assert!(frame.len() <= MAX_FRAME_LEN);
                assert_eq!(decode(&frame), Ok(Msg::new(dir, 0x11, payload)));
            }
        }
    }

    #[test]
    fn test_encode_deterministic() {
        let a = encode(MsgDirection::Write, 0x03, &[1, 2, 3]).unwrap();
        let b = Msg::new(MsgDirection::Write, 0x03, vec![1, 2, 3]).encode().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode(MsgDirection::Write, 0x03, &[]).unwrap();
        let crc = crc16(&[0x01, 0x03, 0x00]);

        assert_eq!(
            frame,
            vec![0xA5, 0x5A, 0x01, 0x03, 0x00, crc as u8, (crc >> 8) as u8, 0x0D]
        );
    }

    #[test]
    fn test_encode_payload_too_long() {
        assert_eq!(
            encode(MsgDirection::Write, 0x11, &payload_of(MAX_PAYLOAD + 1)),
            Err(MsgError::PayloadTooLong(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn test_decode_malformed() {
        let frame = encode(MsgDirection::Write, 0x11, &payload_of(8)).unwrap();

        // Truncated anywhere
        for cut in 0..frame.len() {
            assert!(decode(&frame[..cut]).is_err(), "truncated at {}", cut);
        }

        // Trailing garbage
        let mut long = frame.clone();
        long.push(0);
        assert!(matches!(decode(&long), Err(MsgError::LengthMismatch { .. })));

        // Bad sync
        let mut bad = frame.clone();
        bad[0] = 0x00;
        assert_eq!(decode(&bad), Err(MsgError::InvalidSync(0x00, 0x5A)));

        // Bad direction
        let mut bad = frame.clone();
        bad[2] = 0x07;
        assert_eq!(decode(&bad), Err(MsgError::InvalidDirection(0x07)));

        // Corrupted payload byte
        let mut bad = frame.clone();
        bad[6] ^= 0xFF;
        assert!(matches!(decode(&bad), Err(MsgError::ChecksumMismatch { .. })));

        // Bad end marker
        let mut bad = frame.clone();
        let last = bad.len() - 1;
        bad[last] = 0xFF;
        assert_eq!(decode(&bad), Err(MsgError::InvalidEndMarker(0xFF)));

        // Length field larger than allowed
        let mut bad = frame;
        bad[4] = (MAX_PAYLOAD + 1) as u8;
        assert_eq!(decode(&bad), Err(MsgError::PayloadTooLong(MAX_PAYLOAD + 1)));
    }
}
