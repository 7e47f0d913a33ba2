//! # GPIO Module
//!
//! This module provides a unified GPIO output interface which can abstract over the Raspberry Pi
//! hardware and a simulated GPIO bank.
//!
//! A [`Gpio`] is shared by everything that needs pins, while each configured pin is handed out as
//! an exclusively owned [`OutputLine`]. The PWM generator thread takes ownership of its line, so
//! only that thread can ever drive the pin.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`Gpio`] implementation for the Raspberry Pi using `rppal`.
#[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
pub mod rpi;

/// Simulated [`Gpio`] which records the generated waveforms.
pub mod sim;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use sim::SimGpio;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing GPIO hardware.
pub trait Gpio: Send + Sync {
    /// Initialise the GPIO subsystem. Calling this more than once has no further effect.
    fn init(&self) -> Result<(), GpioError>;

    /// Configure the given pin as an output and take ownership of it.
    ///
    /// ## Arguments
    /// - `pin` - The BCM GPIO number of the pin
    fn configure_output(&self, pin: u8) -> Result<Box<dyn OutputLine>, GpioError>;
}

/// A single output pin.
///
/// Writing a level must be cheap and non-blocking as it's called twice per PWM cycle.
pub trait OutputLine: Send {
    /// The BCM GPIO number of this line.
    fn pin(&self) -> u8;

    /// Drive the line to the given level.
    fn set_level(&mut self, level: Level);
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Logic level of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// The GPIO implementation to use.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GpioBackend {
    /// Raspberry Pi GPIO through `rppal`
    Rppal,

    /// Simulated GPIO
    Sim,
}

#[derive(thiserror::Error, Debug)]
pub enum GpioError {
    #[error("The GPIO subsystem has not been initialised")]
    NotInitialised,

    #[error("Could not initialise the GPIO subsystem: {0}")]
    InitError(String),

    #[error("Could not configure pin {pin} as an output: {reason}")]
    ConfigureError { pin: u8, reason: String },

    #[error("The {0:?} GPIO backend is not available on this platform")]
    BackendUnavailable(GpioBackend),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Create the GPIO implementation for the given backend.
///
/// The GPIO subsystem is not initialised, that happens when the ESC supervisor is initialised.
pub fn new_backend(backend: GpioBackend) -> Result<Arc<dyn Gpio>, GpioError> {
    match backend {
        GpioBackend::Sim => Ok(Arc::new(SimGpio::new())),

        #[cfg(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64")))]
        GpioBackend::Rppal => Ok(Arc::new(rpi::RppalGpio::new())),

        #[cfg(not(all(target_os = "linux", any(target_arch = "arm", target_arch = "aarch64"))))]
        GpioBackend::Rppal => Err(GpioError::BackendUnavailable(backend)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sim_backend() {
        let gpio = new_backend(GpioBackend::Sim).unwrap();
        gpio.init().unwrap();

        let mut line = gpio.configure_output(18).unwrap();
        assert_eq!(line.pin(), 18);
        line.set_level(Level::High);
    }
}
