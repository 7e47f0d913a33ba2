//! # ESC Control library.
//!
//! Drives four ESCs with software generated PWM and accepts commands from a remote over the
//! network.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// ESC supervisor - owns the PWM generators, executes commands and runs the watchdog
pub mod esc_ctrl;

/// ESC server - the network link to the remote
pub mod esc_server;

/// GPIO abstraction over the Raspberry Pi and a simulated bank
pub mod gpio;

/// Parameters for the ESC executable
pub mod params;

/// PWM generator - produces the servo signal for a single ESC
pub mod pwm_gen;

/// Servo control - arming and dispatch of commands from the remote
pub mod servo_ctrl;
