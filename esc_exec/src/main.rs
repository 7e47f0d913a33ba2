//! # ESC Control Executable
//!
//! This executable drives the four ESCs of the vehicle:
//! - Generates the 50 Hz servo signal for each ESC on a GPIO pin
//! - Accepts arm, disarm and servo commands from the remote
//! - Holds the ESCs at neutral when disarmed, disconnected or when commands stop arriving

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::net::zmq;
use log::{error, info};
use std::sync::{mpsc::channel, Arc};

// Internal
use esc_lib::{
    esc_ctrl::EscSupervisor, esc_server::EscServer, gpio, params::EscExecParams,
    servo_ctrl::ServoController,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("esc_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("ESC Control Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: EscExecParams =
        util::params::load("esc_exec.toml").wrap_err("Could not load ESC exec params")?;

    info!("Parameters loaded");

    // ---- ESC INITIALISATION ----

    let gpio = gpio::new_backend(params.gpio_backend)
        .wrap_err_with(|| format!("Could not create the {:?} GPIO backend", params.gpio_backend))?;

    let supervisor = Arc::new(EscSupervisor::new(
        gpio,
        params.esc_pins,
        params.pwm.clone(),
        params.supervisor.clone(),
    ));
    supervisor
        .initialize()
        .wrap_err("Failed to initialise the ESCs")?;

    info!("ESCs initialised on pins {:?}", params.esc_pins);

    // ---- SERVER INITIALISATION ----

    let (outbound_tx, outbound_rx) = channel();
    let servo_ctrl = Arc::new(ServoController::new(supervisor, outbound_tx));

    let ctx = zmq::Context::new();
    let mut server = match EscServer::new(&ctx, &params.endpoint, servo_ctrl.clone(), outbound_rx)
    {
        Ok(s) => s,
        Err(e) => {
            servo_ctrl.shutdown();
            return Err(e).wrap_err("Failed to initialise server");
        }
    };

    info!("Server listening on {}", params.endpoint);

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop disarmed");

    loop {
        if let Err(e) = server.spin_once() {
            error!("Server error: {}", e);
            servo_ctrl.shutdown();

            return Err(e).wrap_err("Server failed, ESCs stopped");
        }
    }
}
