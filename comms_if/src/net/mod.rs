//! # Network Module
//!
//! This module provides networking abstractions over ZMQ. The bridge subscribes to the estimator's
//! publisher and binds its own publisher for the trajectory consumer.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};
use zmq::{Context, Socket, SocketEvent, SocketType};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Number of monitors that are registered. Used to provide unique IDs for each monitor endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network endpoints used by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetParams {
    /// Endpoint of the estimator's publisher, which the state subscriber connects to.
    pub estimator_endpoint: String,

    /// Endpoint the trajectory publisher binds to.
    pub trajectory_endpoint: String,
}

/// A zmq socket which is monitored providing additional information.
///
/// A background thread is run in order to monitor activity on the socket and update visible
/// information to the user. Currently this is only whether or not the socket is actually connected.
pub struct MonitoredSocket {
    socket: Socket,

    join_handle: Option<thread::JoinHandle<()>>,

    monitor_endpoint: String,

    shutdown: Arc<AtomicBool>,

    connected: Arc<AtomicBool>,
}

/// Represents options which can be set on a monitored socket.
///
/// Most options here correspond to those found in the
/// [`zmq_setsockopt`](http://api.zeromq.org/2-1:zmq-setsockopt) documentation.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Indicates if the socket should bind itself to the endpoint. Publishers should have this
    /// value set as `true`, subscribers should have it set as `false`.
    ///
    /// The default value is `false`.
    pub bind: bool,

    /// If true the `MonitoredSocket::new()` function will block until the socket is connected, or
    /// until the connect_timeout elapses. If the timeout elapses this function will return a
    /// `MonitoredSocketError::CouldNotConnect` error.
    ///
    /// The default value is `true`.
    pub block_on_first_connect: bool,

    /// `ZMQ_LINGER`: Set linger period for socket shutdown
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`: Set reconnection interval
    pub reconnect_ivl: i32,

    /// `ZMQ_RECONNECT_IVL_MAX`: Set maximum reconnection interval
    pub reconnect_ivl_max: i32,

    /// `ZMQ_CONNECT_TIMEOUT`: Set `connect()` timeout
    pub connect_timeout: i32,

    /// `ZMQ_RCVTIMEO`: Maximum time before a recv operation returns with `EAGAIN`
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`: Maximum time before a send operation returns with `EAGAIN`
    pub send_timeout: i32,

    /// `ZMQ_RCVHWM`: High water mark for inbound messages
    pub recv_hwm: i32,

    /// `ZMQ_SNDHWM`: High water mark for outbound messages
    pub send_hwm: i32,

    /// `ZMQ_HEARTBEAT_IVL`: Set interval between sending ZMTP heartbeats
    pub heartbeat_ivl: i32,

    /// `ZMQ_HEARTBEAT_TIMEOUT`: Set timeout for ZMTP heartbeats
    pub heartbeat_timeout: i32,

    /// `ZMQ_HEARTBEAT_TTL`: Set the TTL (time to live) value for ZMTP heartbeats
    pub heartbeat_ttl: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect the socket: {0:?}")]
    CouldNotConnect(Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a new monitored socket.
    ///
    /// ## Arguments
    /// - `ctx`: the zmq context which will be used to create the socket
    /// - `socket_type`: the type of zmq socket to create
    /// - `socket_options`: a [`SocketOptions`] struct specifying how to configure the socket
    /// - `endpoint`: a zmq endpoint string, such as `"tcp://localhost:4000"`
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        socket_options: SocketOptions,
        endpoint: &str,
    ) -> Result<Self, MonitoredSocketError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        let socket = ctx
            .socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );

        // Enable, create, and connect monitor
        socket
            .monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        let monitor = ctx
            .socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor
            .connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        socket_options.set(&socket)?;

        match socket_options.bind {
            false => socket.connect(endpoint),
            true => socket.bind(endpoint),
        }
        .map_err(|e| MonitoredSocketError::CouldNotConnect(Some(e)))?;

        // Wait for the monitor to signal connection if requested
        if socket_options.block_on_first_connect {
            loop {
                let event = read_event(&monitor).map_err(MonitoredSocketError::EventReadError)?;

                match event {
                    SocketEvent::CONNECTED => break,
                    SocketEvent::CONNECT_DELAYED => continue,
                    _ => return Err(MonitoredSocketError::CouldNotConnect(None)),
                }
            }

            connected.store(true, Ordering::Relaxed);
        }

        let shutdown_clone = shutdown.clone();
        let connected_clone = connected.clone();
        let monitor_endpoint_clone = monitor_endpoint.clone();

        let join_handle = thread::spawn(move || {
            monitor_socket(monitor, monitor_endpoint_clone, shutdown_clone, connected_clone)
        });

        Ok(Self {
            socket,
            join_handle: Some(join_handle),
            monitor_endpoint,
            shutdown,
            connected,
        })
    }

    /// Return if the socket is connected or not.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Receive one string frame without blocking.
    ///
    /// Returns `Ok(None)` if nothing is pending. Frames which are not valid UTF-8 are returned as
    /// `Ok(Some(Err(bytes)))` so the caller can decide how to report them.
    pub fn try_recv_string(&self) -> Result<Option<Result<String, Vec<u8>>>, zmq::Error> {
        match self.socket.recv_string(zmq::DONTWAIT) {
            Ok(s) => Ok(Some(s)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The monitor thread blocks on its next event so it is detached rather than joined.
        if self.join_handle.take().is_some() {
            debug!("Monitor {} detached", self.monitor_endpoint);
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl std::ops::DerefMut for MonitoredSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

impl SocketOptions {
    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        set_sockopts!(
            socket,
            (set_connect_timeout, self.connect_timeout),
            (set_heartbeat_ivl, self.heartbeat_ivl),
            (set_heartbeat_timeout, self.heartbeat_timeout),
            (set_heartbeat_ttl, self.heartbeat_ttl),
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
            (set_reconnect_ivl_max, self.reconnect_ivl_max),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout),
            (set_rcvhwm, self.recv_hwm),
            (set_sndhwm, self.send_hwm)
        );

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        // Defaults for sockopts taken from http://api.zeromq.org/4-2:zmq-setsockopt
        Self {
            bind: false,
            block_on_first_connect: true,
            connect_timeout: 0,
            heartbeat_ivl: 0,
            heartbeat_timeout: 0,
            heartbeat_ttl: 0,
            linger: 30_000,
            reconnect_ivl: 100,
            reconnect_ivl_max: 0,
            recv_timeout: -1,
            send_timeout: 0,
            recv_hwm: 1000,
            send_hwm: 1000,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read an event from a socket.
fn read_event(socket: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = socket.recv_msg(0)?;

    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    // Second frame is the address, which is ignored
    if socket.get_rcvmore()? {
        let _ = socket.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

fn monitor_socket(
    monitor: Socket,
    monitor_endpoint: String,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(e) => {
                error!("Error reading event from monitor {}: {}", monitor_endpoint, e);
                break;
            }
        };

        match event {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => {
                connected.store(true, Ordering::Relaxed)
            }
            SocketEvent::DISCONNECTED => connected.store(false, Ordering::Relaxed),
            _ => (),
        }
    }
}
