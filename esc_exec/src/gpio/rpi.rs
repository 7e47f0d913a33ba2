//! [`Gpio`] implementation for the Raspberry Pi

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use rppal::gpio::{self as rpi_gpio, OutputPin};
use std::sync::{Mutex, PoisonError};

use super::{Gpio, GpioError, Level, OutputLine};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Raspberry Pi GPIO, pins are addressed by BCM number.
pub struct RppalGpio {
    gpio: Mutex<Option<rpi_gpio::Gpio>>,
}

/// An output pin on the Raspberry Pi.
pub struct RppalLine {
    pin: OutputPin,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RppalGpio {
    pub fn new() -> Self {
        Self {
            gpio: Mutex::new(None),
        }
    }
}

impl Default for RppalGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpio for RppalGpio {
    fn init(&self) -> Result<(), GpioError> {
        let mut gpio = self.gpio.lock().unwrap_or_else(PoisonError::into_inner);

        if gpio.is_none() {
            *gpio = Some(rpi_gpio::Gpio::new().map_err(|e| GpioError::InitError(e.to_string()))?);
            info!("Raspberry Pi GPIO initialised");
        }

        Ok(())
    }

    fn configure_output(&self, pin: u8) -> Result<Box<dyn OutputLine>, GpioError> {
        let gpio = self.gpio.lock().unwrap_or_else(PoisonError::into_inner);

        let gpio = gpio.as_ref().ok_or(GpioError::NotInitialised)?;

        let mut output = gpio
            .get(pin)
            .map_err(|e| GpioError::ConfigureError {
                pin,
                reason: e.to_string(),
            })?
            .into_output();

        // The owner drives the pin low when stopping, the pin should not revert to an input
        // (floating) on drop
        output.set_reset_on_drop(false);
        output.set_low();

        Ok(Box::new(RppalLine { pin: output }))
    }
}

impl OutputLine for RppalLine {
    fn pin(&self) -> u8 {
        self.pin.pin()
    }

    fn set_level(&mut self, level: Level) {
        match level {
            Level::High => self.pin.set_high(),
            Level::Low => self.pin.set_low(),
        }
    }
}
