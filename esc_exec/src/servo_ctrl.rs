//! # Servo Control
//!
//! Receives frames from the transport, runs the arming state machine and forwards servo commands
//! to the [`EscSupervisor`].
//!
//! The controller starts disarmed. Servo commands are only forwarded while armed, and a disarm
//! command, an emergency stop or the transport disconnecting all force the ESCs to neutral and
//! return the controller to disarmed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::esc::{
        clamp_pulse_width, ArmStateReport, CmdId, ServoAck, ServoDems, NUM_ESCS, PULSE_MAX_US,
        PULSE_MIN_US,
    },
    msg::{self, Msg, MsgDirection},
    net::TransportObserver,
};
use log::{debug, error, info, trace, warn};
use std::{
    convert::TryFrom,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use crate::esc_ctrl::EscSupervisor;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Dispatches commands received from the remote to the ESC supervisor.
pub struct ServoController {
    supervisor: Arc<EscSupervisor>,

    /// Held while a servo command is checked and forwarded so a disarm cannot interleave
    arm_state: Mutex<ArmState>,

    connected: AtomicBool,

    /// Frames to be sent by the transport
    outbound: Mutex<Sender<Vec<u8>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmState {
    Disarmed,
    Armed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ServoController {
    /// Create a new disarmed controller.
    ///
    /// ## Arguments
    /// - `supervisor` - The supervisor which commands are forwarded to
    /// - `outbound` - Frames for the remote (acknowledgments and arm state reports) are sent here
    pub fn new(supervisor: Arc<EscSupervisor>, outbound: Sender<Vec<u8>>) -> Self {
        Self {
            supervisor,
            arm_state: Mutex::new(ArmState::Disarmed),
            connected: AtomicBool::new(false),
            outbound: Mutex::new(outbound),
        }
    }

    pub fn arm(&self) {
        {
            let mut arm_state = lock(&self.arm_state);
            if *arm_state == ArmState::Disarmed {
                info!("Controller armed");
            }
            *arm_state = ArmState::Armed;
        }

        self.send_arm_state(true);
    }

    /// Force all ESCs to neutral and disarm.
    pub fn disarm(&self) {
        self.force_disarm("disarm command");
    }

    /// Force all ESCs to neutral and disarm.
    pub fn emergency_stop(&self) {
        self.force_disarm("emergency stop");
    }

    pub fn is_armed(&self) -> bool {
        *lock(&self.arm_state) == ArmState::Armed
    }

    /// True if the transport has reported a connected peer.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// True if the ESC supervisor is running.
    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Disarm and stop the ESC supervisor, leaving all ESCs at neutral.
    pub fn shutdown(&self) {
        info!("Shutting down servo control");

        self.force_disarm("shutdown");
        self.supervisor.stop();
    }

    fn force_disarm(&self, reason: &str) {
        {
            let mut arm_state = lock(&self.arm_state);
            self.supervisor.emergency_stop();

            if *arm_state == ArmState::Armed {
                info!("Controller disarmed ({})", reason);
            } else {
                debug!("ESCs set to neutral ({}), controller already disarmed", reason);
            }
            *arm_state = ArmState::Disarmed;
        }

        self.send_arm_state(false);
    }

    fn handle_msg(&self, msg: Msg) {
        let cmd_id = match CmdId::try_from(msg.cmd_id) {
            Ok(c) => c,
            Err(id) => {
                warn!("Ignoring message with unknown command id {:#04x}", id);
                return;
            }
        };

        debug!("Received {:?} {:?} message", msg.direction, cmd_id);

        match cmd_id {
            CmdId::Armed => match msg.direction {
                MsgDirection::Read => self.send_arm_state(self.is_armed()),
                MsgDirection::Write => self.arm(),
            },
            CmdId::Disarmed => self.disarm(),
            CmdId::Servo1 | CmdId::Servo2 | CmdId::Servo3 | CmdId::Servo4 => {
                self.handle_servo(cmd_id, &msg.payload)
            }
            CmdId::Data => debug!("Ignoring data message from the remote"),
        }
    }

    fn handle_servo(&self, cmd_id: CmdId, payload: &[u8]) {
        let channel = cmd_id.servo_channel().unwrap_or(0);

        let arm_state = lock(&self.arm_state);

        if *arm_state != ArmState::Armed {
            warn!("Servo command on channel {} dropped, controller is disarmed", channel);
            return;
        }

        let dems = match ServoDems::from_payload(payload) {
            Ok(d) => d,
            Err(e) => {
                warn!("Invalid servo command on channel {}: {}", channel, e);
                return;
            }
        };

        if !dems.in_range() {
            warn!(
                "Servo command {:?} on channel {} rejected, pulse widths must be within {}-{} us",
                dems.pulse_widths_us, channel, PULSE_MIN_US, PULSE_MAX_US
            );
            return;
        }

        let mut pulse_widths_us = [0u16; NUM_ESCS];
        for (out, &w) in pulse_widths_us.iter_mut().zip(dems.pulse_widths_us.iter()) {
            *out = clamp_pulse_width(w);
        }

        self.supervisor.set_all_differential_pulse_width(pulse_widths_us);
        drop(arm_state);

        trace!("Servo command {:?} on channel {} forwarded", pulse_widths_us, channel);

        let ack = ServoAck {
            pulse_widths_us,
            channel,
        };
        self.send(MsgDirection::Read, CmdId::Data, &ack.to_payload());
    }

    fn send_arm_state(&self, armed: bool) {
        self.send(
            MsgDirection::Write,
            CmdId::Armed,
            &ArmStateReport { armed }.to_payload(),
        );
    }

    fn send(&self, direction: MsgDirection, cmd_id: CmdId, payload: &[u8]) {
        let frame = match msg::encode(direction, cmd_id.into(), payload) {
            Ok(f) => f,
            Err(e) => {
                error!("Could not encode {:?} message: {}", cmd_id, e);
                return;
            }
        };

        if lock(&self.outbound).send(frame).is_err() {
            warn!("Could not send {:?} message, the transport has stopped", cmd_id);
        }
    }
}

impl TransportObserver for ServoController {
    fn on_data_received(&self, data: &[u8]) {
        match msg::decode(data) {
            Ok(m) => self.handle_msg(m),
            Err(e) => warn!("Discarding malformed frame ({} bytes): {}", data.len(), e),
        }
    }

    fn on_connection_state_changed(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);

        if connected {
            info!("Remote connected");
        } else {
            warn!("Remote disconnected");
            self.emergency_stop();
        }
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
    use crate::{esc_ctrl::SupervisorParams, gpio::SimGpio, pwm_gen::PwmGenParams};
    use comms_if::eqpt::esc::{EscId, PULSE_NEUTRAL_US};
    use std::{
        sync::mpsc::{channel, Receiver},
        thread,
        time::Duration,
    };

    const SETTLE: Duration = Duration::from_millis(150);

    fn setup() -> (ServoController, Arc<EscSupervisor>, Receiver<Vec<u8>>) {
        let supervisor = Arc::new(EscSupervisor::new(
            Arc::new(SimGpio::new()),
            [18, 12, 13, 19],
            PwmGenParams {
                startup_settle_ms: 10,
                stop_settle_ms: 10,
                realtime_priority: false,
                ..Default::default()
            },
            SupervisorParams {
                watchdog_timeout_ms: 600,
                stop_settle_ms: 10,
                ..Default::default()
            },
        ));
        supervisor.initialize().unwrap();

        let (tx, rx) = channel();
        let ctrl = ServoController::new(supervisor.clone(), tx);
        ctrl.on_connection_state_changed(true);

        (ctrl, supervisor, rx)
    }

    fn frame(direction: MsgDirection, cmd_id: CmdId, payload: &[u8]) -> Vec<u8> {
        msg::encode(direction, cmd_id.into(), payload).unwrap()
    }

    fn servo_frame(cmd_id: CmdId, pulse_widths_us: [u16; NUM_ESCS]) -> Vec<u8> {
        frame(
            MsgDirection::Write,
            cmd_id,
            &ServoDems { pulse_widths_us }.to_payload(),
        )
    }

    fn sent(rx: &Receiver<Vec<u8>>) -> Vec<Msg> {
        rx.try_iter().map(|f| msg::decode(&f).unwrap()).collect()
    }

    fn widths(sup: &EscSupervisor) -> [u16; NUM_ESCS] {
        sup.status().pulse_widths_us
    }

    fn arm_report(armed: bool) -> Msg {
        Msg::new(
            MsgDirection::Write,
            CmdId::Armed.into(),
            ArmStateReport { armed }.to_payload(),
        )
    }

    #[test]
    fn test_arm_and_ack() {
        let (ctrl, sup, rx) = setup();
        assert!(!ctrl.is_armed());
        assert!(ctrl.is_connected());

        ctrl.on_data_received(&frame(MsgDirection::Write, CmdId::Armed, &[]));
        assert!(ctrl.is_armed());
        assert_eq!(sent(&rx), vec![arm_report(true)]);

        ctrl.on_data_received(&servo_frame(CmdId::Servo2, [1000, 1500, 1750, 2000]));

        let msgs = sent(&rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].direction, MsgDirection::Read);
        assert_eq!(msgs[0].cmd_id, u8::from(CmdId::Data));
        assert_eq!(
            ServoAck::from_payload(&msgs[0].payload).unwrap(),
            ServoAck {
                pulse_widths_us: [1000, 1500, 1750, 2000],
                channel: 2
            }
        );

        thread::sleep(SETTLE);
        assert_eq!(widths(&sup), [1000, 1500, 1750, 2000]);
    }

    #[test]
    fn test_invalid_width_rejected() {
        let (ctrl, sup, rx) = setup();

        ctrl.arm();
        ctrl.on_data_received(&servo_frame(CmdId::Servo1, [1200, 1300, 1400, 1600]));
        thread::sleep(SETTLE);
        assert_eq!(widths(&sup), [1200, 1300, 1400, 1600]);
        sent(&rx);

        ctrl.on_data_received(&servo_frame(CmdId::Servo1, [900, 1500, 1500, 1500]));
        thread::sleep(SETTLE);

        assert_eq!(widths(&sup), [1200, 1300, 1400, 1600]);
        assert!(sent(&rx).is_empty());
        assert!(ctrl.is_armed());
    }

    #[test]
    fn test_arming_gate() {
        let (ctrl, sup, rx) = setup();

        ctrl.on_data_received(&servo_frame(CmdId::Servo3, [1100, 1200, 1300, 1400]));
        thread::sleep(SETTLE);
        assert_eq!(widths(&sup), [PULSE_NEUTRAL_US; NUM_ESCS]);
        assert!(sent(&rx).is_empty());

        ctrl.arm();
        ctrl.on_data_received(&servo_frame(CmdId::Servo3, [1100, 1200, 1300, 1400]));
        thread::sleep(SETTLE);
        assert_eq!(widths(&sup), [1100, 1200, 1300, 1400]);
    }

    #[test]
    fn test_disarm() {
        let (ctrl, sup, rx) = setup();

        ctrl.arm();
        ctrl.on_data_received(&servo_frame(CmdId::Servo4, [1800; NUM_ESCS]));
        thread::sleep(SETTLE);
        assert_eq!(widths(&sup), [1800; NUM_ESCS]);
        sent(&rx);

        ctrl.on_data_received(&frame(MsgDirection::Write, CmdId::Disarmed, &[]));
        assert!(!ctrl.is_armed());
        assert_eq!(sent(&rx), vec![arm_report(false)]);

        thread::sleep(SETTLE);
        assert_eq!(widths(&sup), [PULSE_NEUTRAL_US; NUM_ESCS]);
    }

    #[test]
    fn test_disconnect() {
        let (ctrl, sup, _rx) = setup();

        ctrl.arm();
        ctrl.on_data_received(&servo_frame(CmdId::Servo1, [1300, 1700, 1300, 1700]));
        thread::sleep(SETTLE);
        assert_eq!(widths(&sup), [1300, 1700, 1300, 1700]);

        ctrl.on_connection_state_changed(false);
        assert!(!ctrl.is_armed());
        assert!(!ctrl.is_connected());

        thread::sleep(SETTLE);
        assert_eq!(widths(&sup), [PULSE_NEUTRAL_US; NUM_ESCS]);
    }

    #[test]
    fn test_arm_state_query() {
        let (ctrl, _sup, rx) = setup();

        ctrl.on_data_received(&frame(MsgDirection::Read, CmdId::Armed, &[]));
        assert!(!ctrl.is_armed());
        assert_eq!(sent(&rx), vec![arm_report(false)]);

        ctrl.arm();
        sent(&rx);
        ctrl.on_data_received(&frame(MsgDirection::Read, CmdId::Armed, &[]));
        assert!(ctrl.is_armed());
        assert_eq!(sent(&rx), vec![arm_report(true)]);
    }

    #[test]
    fn test_malformed_and_unknown() {
        let (ctrl, sup, rx) = setup();
        ctrl.arm();
        sent(&rx);

        // Garbage and a corrupted frame
        ctrl.on_data_received(&[0x01, 0x02, 0x03]);
        let mut corrupt = servo_frame(CmdId::Servo1, [1100; NUM_ESCS]);
        corrupt[6] ^= 0xFF;
        ctrl.on_data_received(&corrupt);

        // Unknown command id
        ctrl.on_data_received(&msg::encode(MsgDirection::Write, 0x7F, &[]).unwrap());

        // Wrong payload length
        ctrl.on_data_received(&frame(MsgDirection::Write, CmdId::Servo1, &[0xDC, 0x05]));

        thread::sleep(SETTLE);
        assert!(ctrl.is_armed());
        assert!(sent(&rx).is_empty());
        assert_eq!(widths(&sup), [PULSE_NEUTRAL_US; NUM_ESCS]);
    }

    #[test]
    fn test_shutdown() {
        let (ctrl, sup, _rx) = setup();

        ctrl.arm();
        ctrl.on_data_received(&servo_frame(CmdId::Servo1, [1900; NUM_ESCS]));
        thread::sleep(SETTLE);

        ctrl.shutdown();

        assert!(!ctrl.is_armed());
        assert!(!ctrl.is_running());
        assert_eq!(sup.pulse_width_us(EscId::Esc1), PULSE_NEUTRAL_US);
        assert!(!sup.esc_running(EscId::Esc1));
    }
}
