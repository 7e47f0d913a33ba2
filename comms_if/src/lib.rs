//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the ESC control software: the wire framing
//! used between the remote and the robot, the ESC command and acknowledgment definitions, and the
//! network layer.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Message framing (encode/decode of direction, command id and payload)
pub mod msg;

/// Command and response definitions for equipment (like the ESCs)
pub mod eqpt;

/// Network module
pub mod net;
