//! # ESC Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::esc::NUM_ESCS;
use serde::Deserialize;

use crate::{esc_ctrl::SupervisorParams, gpio::GpioBackend, pwm_gen::PwmGenParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EscExecParams {
    /// Endpoint the server binds to, which the remote connects to
    pub endpoint: String,

    /// The GPIO implementation to drive the ESCs with
    pub gpio_backend: GpioBackend,

    /// BCM GPIO pin numbers of ESC1 to ESC4
    pub esc_pins: [u8; NUM_ESCS],

    pub pwm: PwmGenParams,

    pub supervisor: SupervisorParams,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for EscExecParams {
    fn default() -> Self {
        Self {
            endpoint: "tcp://*:5030".into(),
            gpio_backend: GpioBackend::Rppal,
            esc_pins: [18, 12, 13, 19],
            pwm: PwmGenParams::default(),
            supervisor: SupervisorParams::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let params: EscExecParams = util::params::parse("").unwrap();

        assert_eq!(params.endpoint, "tcp://*:5030");
        assert_eq!(params.gpio_backend, GpioBackend::Rppal);
        assert_eq!(params.esc_pins, [18, 12, 13, 19]);
        assert_eq!(params.pwm.period_us, 20_000);
        assert_eq!(params.supervisor.watchdog_timeout_ms, 1000);
    }

    #[test]
    fn test_parse() {
        let params: EscExecParams = util::params::parse(
            r#"
            endpoint = "tcp://*:6000"
            gpio_backend = "sim"
            esc_pins = [5, 6, 7, 8]

            [pwm]
            startup_settle_ms = 500
            realtime_priority = false

            [supervisor]
            watchdog_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(params.endpoint, "tcp://*:6000");
        assert_eq!(params.gpio_backend, GpioBackend::Sim);
        assert_eq!(params.esc_pins, [5, 6, 7, 8]);
        assert_eq!(params.pwm.startup_settle_ms, 500);
        assert!(!params.pwm.realtime_priority);
        assert_eq!(params.pwm.period_us, 20_000);
        assert_eq!(params.supervisor.watchdog_timeout_ms, 250);
        assert_eq!(params.supervisor.wait_timeout_ms, 50);
    }

    #[test]
    fn test_parse_bad_backend() {
        assert!(util::params::parse::<EscExecParams>(r#"gpio_backend = "pigpio""#).is_err());
    }
}
