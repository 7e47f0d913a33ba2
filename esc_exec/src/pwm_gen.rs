//! # PWM Generator
//!
//! Produces the 50 Hz servo signal for one ESC by driving a GPIO line from a dedicated thread.
//!
//! Each cycle the thread reads the live pulse width, drives the line HIGH for that many
//! microseconds, then LOW for the remainder of the period. Sleeping alone is not accurate to the
//! microsecond, so every wait sleeps for the target minus the scheduler overhead measured at
//! start-up, then spins until the exact time is reached.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::esc::{clamp_pulse_width, PULSE_MAX_US, PULSE_MIN_US, PULSE_NEUTRAL_US};
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU16, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use util::time::duration_to_micros;

use crate::gpio::{Gpio, GpioError, Level, OutputLine};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Timing parameters of the PWM generators.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PwmGenParams {
    /// Period of the output signal, 20 ms gives the standard 50 Hz servo rate
    pub period_us: u32,

    /// Time to hold neutral after start-up so the ESC can recognise the signal
    pub startup_settle_ms: u64,

    /// Time to hold neutral before stopping
    pub stop_settle_ms: u64,

    /// Sleep requested when measuring the scheduler overhead
    pub calib_sleep_us: u64,

    /// Request real-time scheduling for the generator thread
    pub realtime_priority: bool,
}

/// Generates the PWM signal for a single ESC.
pub struct PwmGenerator {
    pin: u8,

    gpio: Arc<dyn Gpio>,

    params: PwmGenParams,

    shared: Arc<Shared>,

    initialised: AtomicBool,

    /// The generator thread hands the output line back when it exits
    worker_jh: Mutex<Option<JoinHandle<Box<dyn OutputLine>>>>,
}

/// State shared with the generator thread.
#[derive(Debug)]
struct Shared {
    pulse_width_us: AtomicU16,

    running: AtomicBool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum PwmGenError {
    #[error("Could not configure the output pin: {0}")]
    GpioError(#[from] GpioError),

    #[error("Could not start the generator thread for pin {0}: {1}")]
    ThreadSpawnError(u8, io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PwmGenParams {
    fn default() -> Self {
        Self {
            period_us: 20_000,
            startup_settle_ms: 1000,
            stop_settle_ms: 100,
            calib_sleep_us: 100,
            realtime_priority: true,
        }
    }
}

impl PwmGenerator {
    /// Create a new generator for the given pin.
    ///
    /// Nothing is done to the pin until [`PwmGenerator::initialize`] is called.
    pub fn new(pin: u8, gpio: Arc<dyn Gpio>, params: PwmGenParams) -> Self {
        Self {
            pin,
            gpio,
            params,
            shared: Arc::new(Shared {
                pulse_width_us: AtomicU16::new(PULSE_NEUTRAL_US),
                running: AtomicBool::new(false),
            }),
            initialised: AtomicBool::new(false),
            worker_jh: Mutex::new(None),
        }
    }

    /// Configure the pin, start generating a neutral signal and wait for the ESC to settle.
    ///
    /// Failing to raise the generator thread's priority is logged but not an error.
    pub fn initialize(&self) -> Result<(), PwmGenError> {
        let mut worker_jh = self.lock_worker();

        if self.initialised.load(Ordering::SeqCst) {
            info!("ESC on pin {} already initialised", self.pin);
            return Ok(());
        }

        let mut line = self.gpio.configure_output(self.pin)?;
        line.set_level(Level::Low);

        info!("Initialising ESC on GPIO pin {}", self.pin);
        debug!(
            "    Period: {} us, pulse range: {}-{} us, neutral: {} us",
            self.params.period_us, PULSE_MIN_US, PULSE_MAX_US, PULSE_NEUTRAL_US
        );

        self.shared
            .pulse_width_us
            .store(PULSE_NEUTRAL_US, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let params = self.params.clone();
        let jh = thread::Builder::new()
            .name(format!("pwm_gen::{}", self.pin))
            .spawn(move || generator_thread(shared, line, params))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                error!("Failed to start PWM thread for pin {}: {}", self.pin, e);
                PwmGenError::ThreadSpawnError(self.pin, e)
            })?;

        *worker_jh = Some(jh);
        self.initialised.store(true, Ordering::SeqCst);
        drop(worker_jh);

        // Let the ESC recognise a stable neutral signal
        thread::sleep(Duration::from_millis(self.params.startup_settle_ms));

        info!("ESC initialisation complete on pin {}", self.pin);
        Ok(())
    }

    /// Set the pulse width in microseconds, clamped into the valid range.
    ///
    /// Takes effect from the next cycle.
    pub fn set_pulse_width(&self, pulse_width_us: u16) {
        let clamped = clamp_pulse_width(pulse_width_us);
        self.shared.pulse_width_us.store(clamped, Ordering::Relaxed);

        trace!("ESC pin {}: pulse width set to {} us", self.pin, clamped);
    }

    /// Set the throttle in percent, -100 is full reverse, 0 neutral and 100 full forward.
    pub fn set_throttle(&self, throttle_percent: i32) {
        self.set_pulse_width(throttle_to_pulse_width(throttle_percent));
    }

    /// Drive forwards with the given power in percent (0 to 100).
    pub fn set_forward(&self, power_percent: i32) {
        self.set_throttle(power_percent.max(0).min(100));
    }

    /// Drive in reverse with the given power in percent (0 to 100).
    pub fn set_reverse(&self, power_percent: i32) {
        self.set_throttle(-power_percent.max(0).min(100));
    }

    pub fn set_neutral(&self) {
        self.set_pulse_width(PULSE_NEUTRAL_US);
    }

    /// The pulse width currently being generated.
    pub fn pulse_width_us(&self) -> u16 {
        self.shared.pulse_width_us.load(Ordering::Relaxed)
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// True if the generator was initialised and its thread is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst) && self.initialised.load(Ordering::SeqCst)
    }

    /// Go to neutral, stop the generator thread and drive the pin low.
    ///
    /// Calling this on a stopped generator does nothing.
    pub fn stop(&self) {
        let mut worker_jh = self.lock_worker();

        if !self.initialised.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping ESC on pin {}", self.pin);

        self.set_neutral();
        thread::sleep(Duration::from_millis(self.params.stop_settle_ms));

        self.shared.running.store(false, Ordering::SeqCst);

        match worker_jh.take().map(|jh| jh.join()) {
            Some(Ok(mut line)) => line.set_level(Level::Low),
            Some(Err(_)) => error!("PWM thread for pin {} panicked", self.pin),
            None => (),
        }

        info!("ESC stopped on pin {}", self.pin);
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<Box<dyn OutputLine>>>> {
        self.worker_jh.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PwmGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Map a throttle percentage onto a pulse width, -100 => 1000 us, 0 => 1500 us, 100 => 2000 us.
pub fn throttle_to_pulse_width(throttle_percent: i32) -> u16 {
    let throttle = throttle_percent.max(-100).min(100);
    let half_range = (PULSE_MAX_US - PULSE_NEUTRAL_US) as i32;

    (PULSE_NEUTRAL_US as i32 + throttle * half_range / 100) as u16
}

fn generator_thread(
    shared: Arc<Shared>,
    mut line: Box<dyn OutputLine>,
    params: PwmGenParams,
) -> Box<dyn OutputLine> {
    let pin = line.pin();
    debug!("PWM thread started for GPIO pin {}", pin);

    if params.realtime_priority {
        match elevate_priority() {
            Ok(p) => debug!("PWM thread for pin {} running at real-time priority {}", pin, p),
            Err(e) => warn!("Could not set high priority for PWM thread on pin {}: {}", pin, e),
        }
    }

    let overhead = calibrate_overhead(Duration::from_micros(params.calib_sleep_us));
    debug!("PWM thread overhead: {} us", duration_to_micros(overhead));

    let period = Duration::from_micros(params.period_us as u64);

    while shared.running.load(Ordering::Acquire) {
        let cycle_start = Instant::now();

        let pulse = Duration::from_micros(shared.pulse_width_us.load(Ordering::Relaxed) as u64);

        line.set_level(Level::High);
        wait_until(cycle_start, pulse, overhead);

        line.set_level(Level::Low);
        wait_until(cycle_start, period, overhead);
    }

    debug!("PWM thread stopped for GPIO pin {}", pin);
    line
}

/// Measure how much longer than requested a short sleep takes.
fn calibrate_overhead(sleep: Duration) -> Duration {
    let start = Instant::now();
    thread::sleep(sleep);
    start.elapsed().checked_sub(sleep).unwrap_or_default()
}

/// Wait until `target` has elapsed since `start`, sleeping for as much of it as the overhead
/// allows and spinning for the rest.
fn wait_until(start: Instant, target: Duration, overhead: Duration) {
    let remaining = target.checked_sub(start.elapsed()).unwrap_or_default();

    if remaining > overhead {
        thread::sleep(remaining - overhead);
    }

    while start.elapsed() < target {
        std::hint::spin_loop();
    }
}

/// Put the calling thread in the `SCHED_FIFO` class at the highest priority.
#[cfg(target_os = "linux")]
fn elevate_priority() -> io::Result<i32> {
    // SAFETY: sched_param is plain data, and the calls only affect the calling thread.
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = max;

        match libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) {
            0 => Ok(max),
            e => Err(io::Error::from_raw_os_error(e)),
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn elevate_priority() -> io::Result<i32> {
    Err(io::Error::new(
        io::ErrorKind::Other,
        "real-time scheduling is only supported on linux",
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gpio::SimGpio;

    fn test_params() -> PwmGenParams {
        PwmGenParams {
            startup_settle_ms: 20,
            stop_settle_ms: 10,
            realtime_priority: false,
            ..Default::default()
        }
    }

    /// Median of the high times and of the periods (rising edge to rising edge) in microseconds.
    fn measure(gpio: &SimGpio, pin: u8) -> (u128, u128) {
        let edges = gpio.edges(pin);

        let mut highs = Vec::new();
        let mut periods = Vec::new();
        for w in edges.windows(3) {
            if w[0].level == Level::High {
                highs.push((w[1].at - w[0].at).as_micros());
                periods.push((w[2].at - w[0].at).as_micros());
            }
        }
        assert!(highs.len() >= 5, "only {} cycles recorded", highs.len());

        highs.sort_unstable();
        periods.sort_unstable();
        (highs[highs.len() / 2], periods[periods.len() / 2])
    }

    #[test]
    fn test_throttle_mapping() {
        assert_eq!(throttle_to_pulse_width(-100), 1000);
        assert_eq!(throttle_to_pulse_width(-50), 1250);
        assert_eq!(throttle_to_pulse_width(0), 1500);
        assert_eq!(throttle_to_pulse_width(50), 1750);
        assert_eq!(throttle_to_pulse_width(100), 2000);
        assert_eq!(throttle_to_pulse_width(-250), 1000);
        assert_eq!(throttle_to_pulse_width(250), 2000);
    }

    #[test]
    fn test_set_pulse_width_clamps() {
        let gen = PwmGenerator::new(18, Arc::new(SimGpio::new()), test_params());
        assert_eq!(gen.pulse_width_us(), PULSE_NEUTRAL_US);

        gen.set_pulse_width(1234);
        assert_eq!(gen.pulse_width_us(), 1234);

        gen.set_pulse_width(999);
        assert_eq!(gen.pulse_width_us(), PULSE_MIN_US);

        gen.set_pulse_width(0);
        assert_eq!(gen.pulse_width_us(), PULSE_MIN_US);

        gen.set_pulse_width(2001);
        assert_eq!(gen.pulse_width_us(), PULSE_MAX_US);

        gen.set_pulse_width(u16::MAX);
        assert_eq!(gen.pulse_width_us(), PULSE_MAX_US);
    }

    #[test]
    fn test_forward_reverse() {
        let gen = PwmGenerator::new(18, Arc::new(SimGpio::new()), test_params());

        gen.set_forward(50);
        assert_eq!(gen.pulse_width_us(), 1750);

        gen.set_forward(-20);
        assert_eq!(gen.pulse_width_us(), PULSE_NEUTRAL_US);

        gen.set_reverse(50);
        assert_eq!(gen.pulse_width_us(), 1250);

        gen.set_reverse(200);
        assert_eq!(gen.pulse_width_us(), PULSE_MIN_US);

        gen.set_neutral();
        assert_eq!(gen.pulse_width_us(), PULSE_NEUTRAL_US);
    }

    #[test]
    fn test_waveform_timing() {
        let gpio = Arc::new(SimGpio::new());
        let gen = PwmGenerator::new(18, gpio.clone(), test_params());

        gen.initialize().unwrap();
        assert!(gen.is_running());

        for &width in [1000u16, 1750, 2000].iter() {
            gen.set_pulse_width(width);
            thread::sleep(Duration::from_millis(50));
            gpio.clear_edges(18);
            thread::sleep(Duration::from_millis(300));

            let (high_us, period_us) = measure(&gpio, 18);
            assert!(
                (high_us as i64 - width as i64).abs() < 250,
                "high time {} us for {} us pulse",
                high_us,
                width
            );
            assert!(
                (period_us as i64 - 20_000).abs() < 500,
                "period {} us",
                period_us
            );
        }

        gen.stop();
    }

    #[test]
    fn test_stop() {
        let gpio = Arc::new(SimGpio::new());
        let gen = PwmGenerator::new(12, gpio.clone(), test_params());

        // Stopping before initialising does nothing
        gen.stop();
        assert!(!gen.is_running());
        assert_eq!(gpio.level(12), None);

        gen.initialize().unwrap();
        gen.initialize().unwrap();
        gen.set_pulse_width(1800);

        gen.stop();
        assert!(!gen.is_running());
        assert_eq!(gen.pulse_width_us(), PULSE_NEUTRAL_US);
        assert_eq!(gpio.level(12), Some(Level::Low));

        // Idempotent
        gen.stop();
        assert!(!gen.is_running());

        // Can be restarted
        gen.initialize().unwrap();
        assert!(gen.is_running());
    }

    #[test]
    fn test_init_failure() {
        let gpio = Arc::new(SimGpio::new());
        gpio.fail_pin(13);
        let gen = PwmGenerator::new(13, gpio, test_params());

        assert!(matches!(gen.initialize(), Err(PwmGenError::GpioError(_))));
        assert!(!gen.is_running());
    }
}
