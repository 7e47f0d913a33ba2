//! Supervisor thread of the ESC controller

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::esc::{EscId, NUM_ESCS};
use log::{debug, info, trace, warn};
use std::{
    sync::{atomic::Ordering, Arc},
    thread,
};

use super::{cmd::EscCmd, lock, Shared};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State owned by the supervisor thread.
struct WorkerState {
    /// The last command which was applied to the generators
    last_executed: EscCmd,

    /// True while the watchdog is holding the ESCs at neutral
    watchdog_tripped: bool,

    /// ESCs whose generator has been reported as stopped
    stopped_escs: [bool; NUM_ESCS],
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

pub(super) fn worker_thread(shared: Arc<Shared>) {
    debug!("ESC supervisor thread started");

    let mut state = WorkerState {
        last_executed: EscCmd::neutral(),
        watchdog_tripped: false,
        stopped_escs: [false; NUM_ESCS],
    };

    while shared.running.load(Ordering::SeqCst) {
        // Wait for a new command, the timeout bounds the watchdog latency
        let cmd = {
            let slot = lock(&shared.cmd_slot);
            let (mut slot, _) = shared
                .cmd_cvar
                .wait_timeout_while(slot, shared.params.wait_timeout(), |s| {
                    !s.pending && shared.running.load(Ordering::SeqCst)
                })
                .unwrap_or_else(|e| e.into_inner());

            if slot.pending {
                slot.pending = false;
                Some(slot.current)
            } else {
                None
            }
        };

        if let Some(cmd) = cmd {
            execute(&shared, &mut state, cmd);
        }

        check_watchdog(&shared, &mut state);
        check_health(&shared, &mut state);

        thread::sleep(shared.params.loop_sleep());
    }

    debug!("ESC supervisor thread stopped");
}

fn execute(shared: &Shared, state: &mut WorkerState, cmd: EscCmd) {
    if cmd.emergency_stop {
        for gen in shared.generators.iter() {
            gen.set_neutral();
        }
        info!("Emergency stop executed, all ESCs at neutral");
    } else {
        if let Err(e) = cmd.validate() {
            warn!("Rejected ESC command {:?}: {}", cmd.pulse_widths_us, e);

            // Later single ESC updates merge into what is actually being generated
            let mut slot = lock(&shared.cmd_slot);
            if !slot.pending {
                slot.current.pulse_widths_us = state.last_executed.pulse_widths_us;
            }
            return;
        }

        for (gen, &pulse_width_us) in shared.generators.iter().zip(cmd.pulse_widths_us.iter()) {
            gen.set_pulse_width(pulse_width_us);
        }
        trace!("Executed ESC command {:?}", cmd.pulse_widths_us);
    }

    state.last_executed = cmd;

    if state.watchdog_tripped {
        info!("Valid ESC command received, watchdog cleared");
        state.watchdog_tripped = false;
    }
}

/// Force neutral if no valid command has been executed within the watchdog timeout.
fn check_watchdog(shared: &Shared, state: &mut WorkerState) {
    let age = state.last_executed.age();

    if age <= shared.params.watchdog_timeout() {
        return;
    }

    if !state.watchdog_tripped {
        warn!(
            "No valid ESC command for {} ms, setting all ESCs to neutral",
            age.as_millis()
        );
        state.watchdog_tripped = true;
    }

    for gen in shared.generators.iter() {
        gen.set_neutral();
    }

    // Stop later single ESC updates from being merged into the old widths
    {
        let mut slot = lock(&shared.cmd_slot);
        if !slot.pending {
            slot.current = EscCmd::neutral();
        }
    }

    state.last_executed = EscCmd::neutral();
}

fn check_health(shared: &Shared, state: &mut WorkerState) {
    for ((esc, gen), stopped) in EscId::ALL
        .iter()
        .zip(shared.generators.iter())
        .zip(state.stopped_escs.iter_mut())
    {
        let running = gen.is_running();

        if !running && !*stopped {
            warn!("PWM generator for {} (pin {}) is not running", esc, gen.pin());
            *stopped = true;
        } else if running && *stopped {
            info!("PWM generator for {} (pin {}) running again", esc, gen.pin());
            *stopped = false;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::esc_ctrl::{params::SupervisorParams, CmdSlot};
    use std::{
        sync::{atomic::AtomicBool, Condvar, Mutex},
        time::{Duration, Instant},
    };

    fn test_shared() -> Shared {
        Shared {
            params: SupervisorParams {
                watchdog_timeout_ms: 600,
                ..Default::default()
            },
            generators: Vec::new(),
            cmd_slot: Mutex::new(CmdSlot {
                current: EscCmd::neutral(),
                pending: false,
            }),
            cmd_cvar: Condvar::new(),
            running: AtomicBool::new(true),
        }
    }

    /// A state whose last executed command is older than the watchdog timeout.
    fn stale_state() -> WorkerState {
        let mut last_executed = EscCmd::new([1600; NUM_ESCS]);
        last_executed.timestamp = Instant::now()
            .checked_sub(Duration::from_millis(800))
            .unwrap();

        WorkerState {
            last_executed,
            watchdog_tripped: false,
            stopped_escs: [false; NUM_ESCS],
        }
    }

    #[test]
    fn test_emergency_stop_refreshes_watchdog() {
        let shared = test_shared();
        let mut state = stale_state();

        execute(&shared, &mut state, EscCmd::emergency());
        check_watchdog(&shared, &mut state);

        assert!(!state.watchdog_tripped);
        assert!(state.last_executed.emergency_stop);
    }

    #[test]
    fn test_rejected_command_does_not_refresh_watchdog() {
        let shared = test_shared();
        let mut state = stale_state();

        execute(&shared, &mut state, EscCmd::new([1500, 2100, 1500, 1500]));
        check_watchdog(&shared, &mut state);

        assert!(state.watchdog_tripped);
    }

    #[test]
    fn test_rejected_command_restores_merge_base() {
        let shared = test_shared();
        let mut state = stale_state();
        state.last_executed.timestamp = Instant::now();

        let bad = EscCmd::new([1500, 2100, 1500, 1500]);
        lock(&shared.cmd_slot).current = bad;
        execute(&shared, &mut state, bad);
        assert_eq!(lock(&shared.cmd_slot).current.pulse_widths_us, [1600; NUM_ESCS]);

        // A newer command set before the rejection is left alone
        {
            let mut slot = lock(&shared.cmd_slot);
            slot.current = EscCmd::new([1700; NUM_ESCS]);
            slot.pending = true;
        }
        execute(&shared, &mut state, bad);
        assert_eq!(lock(&shared.cmd_slot).current.pulse_widths_us, [1700; NUM_ESCS]);
    }
}
