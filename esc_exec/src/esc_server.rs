//! # ESC Server
//!
//! The transport between the remote and the ESC controller. The server binds a zmq `PAIR` socket
//! which the remote connects to. Received frames and connection changes are passed on to a
//! [`TransportObserver`], and frames queued by the observer are sent back to the remote.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions, TransportObserver};
use log::{debug, warn};
use std::sync::{mpsc::Receiver, Arc};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Server side of the link to the remote.
pub struct EscServer {
    socket: MonitoredSocket,

    observer: Arc<dyn TransportObserver>,

    /// Frames waiting to be sent to the remote
    outbound: Receiver<Vec<u8>>,

    /// Connection state last reported to the observer
    connected: bool,

    /// Socket disconnect count when the observer was last updated
    disconnects: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EscServerError {
    #[error("Socket error: {0}")]
    SocketError(#[from] MonitoredSocketError),

    #[error("Could not receive a frame from the remote: {0}")]
    RecvError(zmq::Error),

    #[error("Could not send a frame to the remote: {0}")]
    SendError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EscServer {
    /// Create a new server bound to `endpoint`.
    ///
    /// This function will not wait for the remote to connect.
    pub fn new(
        ctx: &zmq::Context,
        endpoint: &str,
        observer: Arc<dyn TransportObserver>,
        outbound: Receiver<Vec<u8>>,
    ) -> Result<Self, EscServerError> {
        let socket_options = SocketOptions {
            bind: true,
            heartbeat_ivl: 500,
            heartbeat_timeout: 1000,
            linger: 0,
            recv_timeout: 20,
            send_timeout: 10,
        };

        let socket = MonitoredSocket::new(ctx, zmq::PAIR, socket_options, endpoint)?;

        debug!("ESC server bound to {}", endpoint);

        Ok(Self {
            socket,
            observer,
            outbound,
            connected: false,
            disconnects: 0,
        })
    }

    /// Run one iteration of the server.
    ///
    /// Reports any change in the connection state, delivers at most one received frame to the
    /// observer and then sends all queued outbound frames. Blocks for at most the receive timeout
    /// when nothing has been received.
    pub fn spin_once(&mut self) -> Result<(), EscServerError> {
        let disconnects = self.socket.disconnect_count();
        let connected = self.socket.connected();
        self.report_connection(connected, disconnects);

        match self.socket.recv_bytes(0) {
            Ok(frame) => self.observer.on_data_received(&frame),
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => return Err(EscServerError::RecvError(e)),
        }

        for frame in self.outbound.try_iter() {
            match self.socket.send(frame, 0) {
                Ok(()) => (),
                Err(zmq::Error::EAGAIN) => warn!("Remote not ready, dropping outbound frame"),
                Err(e) => return Err(EscServerError::SendError(e)),
            }
        }

        Ok(())
    }

    /// Pass connection changes on to the observer.
    ///
    /// A disconnect is reported whenever the disconnect count has gone up, even if the remote has
    /// already reconnected.
    fn report_connection(&mut self, connected: bool, disconnects: usize) {
        if disconnects != self.disconnects {
            self.disconnects = disconnects;

            if self.connected {
                self.connected = false;
                self.observer.on_connection_state_changed(false);
            }
        }

        if connected != self.connected {
            self.connected = connected;
            self.observer.on_connection_state_changed(connected);
        }
    }
}
