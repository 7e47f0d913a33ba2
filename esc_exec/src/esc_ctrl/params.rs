//! Parameters for the ESC supervisor

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SupervisorParams {
    /// Maximum time the supervisor waits for a new command before running its checks
    pub wait_timeout_ms: u64,

    /// If no valid command is executed for longer than this all ESCs are set to neutral
    pub watchdog_timeout_ms: u64,

    /// Sleep at the end of each supervisor iteration
    pub loop_sleep_ms: u64,

    /// Time to hold neutral before the generators are stopped
    pub stop_settle_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SupervisorParams {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }
}

impl Default for SupervisorParams {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 50,
            watchdog_timeout_ms: 1000,
            loop_sleep_ms: 10,
            stop_settle_ms: 100,
        }
    }
}
