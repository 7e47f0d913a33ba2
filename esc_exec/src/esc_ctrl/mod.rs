//! # ESC Control
//!
//! The [`EscSupervisor`] owns the four PWM generators and is the single point through which ESC
//! commands are given.
//!
//! Setting a command never blocks on the hardware. The new command is written into a single shared
//! slot and the supervisor thread is woken to execute it. If several commands are set before the
//! supervisor wakes only the most recent is executed.
//!
//! The supervisor thread also runs a watchdog: if no valid command has been executed within
//! [`SupervisorParams::watchdog_timeout_ms`] all ESCs are set to neutral.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod cmd;
pub mod params;
mod worker;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::esc::{clamp_pulse_width, EscId, NUM_ESCS, PULSE_NEUTRAL_US};
use log::{error, info, trace};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    gpio::{Gpio, GpioError},
    pwm_gen::{PwmGenError, PwmGenParams, PwmGenerator},
};

pub use cmd::{EscCmd, EscCmdError};
pub use params::SupervisorParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Supervises the four ESCs.
pub struct EscSupervisor {
    gpio: Arc<dyn Gpio>,

    shared: Arc<Shared>,

    worker_jh: Mutex<Option<JoinHandle<()>>>,
}

/// Status of the ESCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscStatusReport {
    /// Pulse width currently generated for each ESC
    pub pulse_widths_us: [u16; NUM_ESCS],

    /// Whether each ESC's generator is running
    pub escs_running: [bool; NUM_ESCS],

    /// Whether the supervisor thread is running
    pub supervisor_running: bool,
}

struct Shared {
    params: SupervisorParams,

    generators: Vec<PwmGenerator>,

    cmd_slot: Mutex<CmdSlot>,

    cmd_cvar: Condvar,

    running: AtomicBool,
}

/// The latest command set by a caller.
#[derive(Debug)]
struct CmdSlot {
    current: EscCmd,

    /// True if `current` has not yet been executed
    pending: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum EscSupervisorError {
    #[error("Could not initialise GPIO: {0}")]
    GpioInitError(#[from] GpioError),

    #[error("Could not initialise {esc} on pin {pin}: {source}")]
    GeneratorInitError {
        esc: EscId,
        pin: u8,
        source: PwmGenError,
    },

    #[error("Could not start the supervisor thread: {0}")]
    ThreadSpawnError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EscSupervisor {
    /// Create a new supervisor for ESCs on the given pins, in ESC1 to ESC4 order.
    ///
    /// No pins are touched until [`EscSupervisor::initialize`] is called.
    pub fn new(
        gpio: Arc<dyn Gpio>,
        pins: [u8; NUM_ESCS],
        pwm_params: PwmGenParams,
        params: SupervisorParams,
    ) -> Self {
        let generators = pins
            .iter()
            .map(|&pin| PwmGenerator::new(pin, gpio.clone(), pwm_params.clone()))
            .collect();

        Self {
            gpio,
            shared: Arc::new(Shared {
                params,
                generators,
                cmd_slot: Mutex::new(CmdSlot {
                    current: EscCmd::neutral(),
                    pending: false,
                }),
                cmd_cvar: Condvar::new(),
                running: AtomicBool::new(false),
            }),
            worker_jh: Mutex::new(None),
        }
    }

    /// Initialise the GPIO, start all generators at neutral and start the supervisor thread.
    ///
    /// If any generator fails to start those already started are stopped again before the error
    /// is returned.
    pub fn initialize(&self) -> Result<(), EscSupervisorError> {
        let mut worker_jh = lock(&self.worker_jh);

        if self.shared.running.load(Ordering::SeqCst) {
            info!("ESC supervisor already running");
            return Ok(());
        }

        info!("Initialising ESC supervisor");

        self.gpio.init()?;

        for (i, gen) in self.shared.generators.iter().enumerate() {
            if let Err(e) = gen.initialize() {
                let esc = EscId::ALL[i];
                error!("Failed to initialise {}: {}", esc, e);

                for started in self.shared.generators[..i].iter() {
                    started.stop();
                }

                return Err(EscSupervisorError::GeneratorInitError {
                    esc,
                    pin: gen.pin(),
                    source: e,
                });
            }
        }

        {
            let mut slot = lock(&self.shared.cmd_slot);
            slot.current = EscCmd::neutral();
            slot.pending = false;
        }

        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let jh = thread::Builder::new()
            .name("esc_ctrl::supervisor".into())
            .spawn(move || worker::worker_thread(shared));

        match jh {
            Ok(jh) => *worker_jh = Some(jh),
            Err(e) => {
                error!("Failed to start ESC supervisor thread: {}", e);
                self.shared.running.store(false, Ordering::SeqCst);
                for gen in self.shared.generators.iter() {
                    gen.stop();
                }
                return Err(EscSupervisorError::ThreadSpawnError(e));
            }
        }

        info!("ESC supervisor initialised");
        Ok(())
    }

    /// Set the pulse width of one ESC, clamped to the valid range.
    ///
    /// The other ESCs keep their last set widths.
    pub fn set_esc_pulse_width(&self, esc: EscId, pulse_width_us: u16) {
        let pulse_width_us = clamp_pulse_width(pulse_width_us);

        self.update_cmd(|cmd| cmd.pulse_widths_us[esc.index()] = pulse_width_us);
        trace!("{} set to {} us", esc, pulse_width_us);
    }

    pub fn set_esc_neutral(&self, esc: EscId) {
        self.set_esc_pulse_width(esc, PULSE_NEUTRAL_US);
    }

    /// Set every ESC to the same pulse width, clamped to the valid range.
    pub fn set_all_pulse_width(&self, pulse_width_us: u16) {
        let pulse_width_us = clamp_pulse_width(pulse_width_us);

        self.update_cmd(|cmd| cmd.pulse_widths_us = [pulse_width_us; NUM_ESCS]);
        trace!("All ESCs set to {} us", pulse_width_us);
    }

    pub fn set_all_neutral(&self) {
        self.set_all_pulse_width(PULSE_NEUTRAL_US);
    }

    /// Set all four pulse widths as a single command.
    ///
    /// The widths are not clamped, if any is out of range the whole command is rejected by the
    /// supervisor and no ESC changes.
    pub fn set_all_differential_pulse_width(&self, pulse_widths_us: [u16; NUM_ESCS]) {
        self.update_cmd(|cmd| cmd.pulse_widths_us = pulse_widths_us);
        trace!("ESC command set to {:?}", pulse_widths_us);
    }

    /// Force all ESCs to neutral.
    ///
    /// This is always accepted, regardless of the state of the supervisor.
    pub fn emergency_stop(&self) {
        {
            let mut slot = lock(&self.shared.cmd_slot);
            slot.current = EscCmd::emergency();
            slot.pending = true;
        }
        self.shared.cmd_cvar.notify_all();

        info!("Emergency stop requested");
    }

    /// Set all ESCs to neutral, stop the supervisor thread and then stop each generator.
    ///
    /// Calling this on a stopped supervisor does nothing.
    pub fn stop(&self) {
        let mut worker_jh = lock(&self.worker_jh);

        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping ESC supervisor");

        {
            let mut slot = lock(&self.shared.cmd_slot);
            slot.current = EscCmd::neutral();
            slot.pending = false;
        }
        self.shared.cmd_cvar.notify_all();

        if let Some(jh) = worker_jh.take() {
            if jh.join().is_err() {
                error!("ESC supervisor thread panicked");
            }
        }

        for gen in self.shared.generators.iter() {
            gen.set_neutral();
        }
        thread::sleep(Duration::from_millis(self.shared.params.stop_settle_ms));

        for gen in self.shared.generators.iter() {
            gen.stop();
        }

        info!("ESC supervisor stopped");
    }

    /// True while the supervisor thread is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Pulse width currently generated for the ESC.
    pub fn pulse_width_us(&self, esc: EscId) -> u16 {
        self.shared.generators[esc.index()].pulse_width_us()
    }

    pub fn esc_running(&self, esc: EscId) -> bool {
        self.shared.generators[esc.index()].is_running()
    }

    pub fn status(&self) -> EscStatusReport {
        let mut report = EscStatusReport {
            pulse_widths_us: [PULSE_NEUTRAL_US; NUM_ESCS],
            escs_running: [false; NUM_ESCS],
            supervisor_running: self.is_running(),
        };

        for (i, gen) in self.shared.generators.iter().enumerate() {
            report.pulse_widths_us[i] = gen.pulse_width_us();
            report.escs_running[i] = gen.is_running();
        }

        report
    }

    /// Modify the current command, mark it pending and wake the supervisor thread.
    fn update_cmd<F: FnOnce(&mut EscCmd)>(&self, f: F) {
        {
            let mut slot = lock(&self.shared.cmd_slot);
            let mut cmd = EscCmd::new(slot.current.pulse_widths_us);
            f(&mut cmd);
            slot.current = cmd;
            slot.pending = true;
        }
        self.shared.cmd_cvar.notify_one();
    }
}

impl Drop for EscSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Lock the mutex, recovering the data if a thread panicked while holding it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
