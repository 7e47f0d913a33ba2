//! Simulated GPIO bank.
//!
//! Every level change is recorded with the time it happened, so the generated waveform can be
//! inspected. Only the most recent [`MAX_EDGES`] changes are kept per pin.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use super::{Gpio, GpioError, Level, OutputLine};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of level changes kept per pin.
pub const MAX_EDGES: usize = 512;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A simulated GPIO bank.
#[derive(Default)]
pub struct SimGpio {
    pins: Mutex<HashMap<u8, Arc<Mutex<PinState>>>>,

    failing_pins: Mutex<HashSet<u8>>,
}

/// A level change on a simulated pin.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub level: Level,
    pub at: Instant,
}

/// Output line handed out by [`SimGpio`].
pub struct SimLine {
    pin: u8,
    state: Arc<Mutex<PinState>>,
}

#[derive(Debug)]
struct PinState {
    level: Level,
    edges: VecDeque<Edge>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any future attempt to configure `pin` fail.
    pub fn fail_pin(&self, pin: u8) {
        lock(&self.failing_pins).insert(pin);
    }

    /// Current level of the pin, or `None` if it has never been configured.
    pub fn level(&self, pin: u8) -> Option<Level> {
        lock(&self.pins).get(&pin).map(|s| lock(s).level)
    }

    /// Recorded level changes of the pin, oldest first.
    pub fn edges(&self, pin: u8) -> Vec<Edge> {
        lock(&self.pins)
            .get(&pin)
            .map(|s| lock(s).edges.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget the recorded level changes of the pin.
    pub fn clear_edges(&self, pin: u8) {
        if let Some(s) = lock(&self.pins).get(&pin) {
            lock(s).edges.clear();
        }
    }
}

impl Gpio for SimGpio {
    fn init(&self) -> Result<(), GpioError> {
        debug!("Simulated GPIO initialised");
        Ok(())
    }

    fn configure_output(&self, pin: u8) -> Result<Box<dyn OutputLine>, GpioError> {
        if lock(&self.failing_pins).contains(&pin) {
            return Err(GpioError::ConfigureError {
                pin,
                reason: "simulated failure".into(),
            });
        }

        let state = lock(&self.pins)
            .entry(pin)
            .or_insert_with(|| {
                Arc::new(Mutex::new(PinState {
                    level: Level::Low,
                    edges: VecDeque::with_capacity(MAX_EDGES),
                }))
            })
            .clone();

        Ok(Box::new(SimLine { pin, state }))
    }
}

impl OutputLine for SimLine {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn set_level(&mut self, level: Level) {
        let at = Instant::now();
        let mut state = lock(&self.state);

        if state.level == level {
            return;
        }

        if state.edges.len() == MAX_EDGES {
            state.edges.pop_front();
        }
        state.edges.push_back(Edge { level, at });
        state.level = level;
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_edges_recorded() {
        let gpio = SimGpio::new();
        assert_eq!(gpio.level(4), None);

        let mut line = gpio.configure_output(4).unwrap();
        assert_eq!(gpio.level(4), Some(Level::Low));

        line.set_level(Level::High);
        line.set_level(Level::High);
        line.set_level(Level::Low);

        let edges = gpio.edges(4);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].level, Level::High);
        assert_eq!(edges[1].level, Level::Low);
        assert!(edges[1].at >= edges[0].at);
        assert_eq!(gpio.level(4), Some(Level::Low));

        gpio.clear_edges(4);
        assert!(gpio.edges(4).is_empty());
    }

    #[test]
    fn test_edge_history_bounded() {
        let gpio = SimGpio::new();
        let mut line = gpio.configure_output(5).unwrap();

        for i in 0..(MAX_EDGES * 2 + 1) {
            line.set_level(if i % 2 == 0 { Level::High } else { Level::Low });
        }

        assert_eq!(gpio.edges(5).len(), MAX_EDGES);
        assert_eq!(gpio.level(5), Some(Level::High));
    }

    #[test]
    fn test_failing_pin() {
        let gpio = SimGpio::new();
        gpio.fail_pin(13);

        assert!(matches!(
            gpio.configure_output(13),
            Err(GpioError::ConfigureError { pin: 13, .. })
        ));
        assert!(gpio.configure_output(12).is_ok());
    }
}
