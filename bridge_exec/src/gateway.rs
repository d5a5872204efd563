//! # Message Gateway
//!
//! The gateway sits between the pub/sub transport and the rest of the bridge. Inbound frames from
//! the estimator are decoded, translated into the planner convention and written into the shared
//! [`StateSnapshot`]. Outbound trajectory bundles are encoded and published without waiting for
//! any acknowledgement.
//!
//! The transport itself is behind the [`Transport`] trait. [`ZmqTransport`] is the network
//! implementation used by the executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use log::{debug, warn};

use comms_if::{
    mpc::{self, C3StateMsg, FrameError, TimestampedSavedTraj},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};

use crate::{
    params::ChannelParams,
    snapshot::StateSnapshot,
    translate::{RobotState, TargetState, TranslateError},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum number of frames handled by a single pump, so a flooding publisher cannot stall the
/// control loop.
const MAX_FRAMES_PER_PUMP: usize = 1024;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A frame based pub/sub transport.
pub trait Transport {
    /// Receive the next pending frame without blocking, or `None` if nothing is pending.
    fn recv(&mut self) -> Result<Option<String>, GatewayError>;

    /// Send a frame. Delivery is not acknowledged.
    fn send(&mut self, frame: &str) -> Result<(), GatewayError>;

    /// True while the inbound side is connected to a peer.
    fn connected(&self) -> bool;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Transport over a zmq subscriber (estimator side) and publisher (tracker side).
pub struct ZmqTransport {
    sub: MonitoredSocket,
    publ: MonitoredSocket,
}

pub struct MessageGateway<T: Transport> {
    transport: T,
    channels: ChannelParams,
    snapshot: Arc<StateSnapshot>,
}

/// Summary of one pump of the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub num_states: usize,

    /// States dropped for being older than the one already held
    pub num_stale_states: usize,

    pub num_targets: usize,
    pub num_final_targets: usize,

    /// Frames which could not be decoded
    pub num_dropped: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not subscribe to channel {0}: {1}")]
    SubscribeError(String, zmq::Error),

    #[error("Could not receive a frame: {0}")]
    RecvError(zmq::Error),

    #[error("Could not send a frame: {0}")]
    SendError(zmq::Error),
}

/// Reasons an inbound frame is dropped.
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("Bad vector on channel {0}: {1}")]
    Translate(String, TranslateError),

    #[error("Frame on unknown channel {0}")]
    UnknownChannel(String),
}

/// Which inbound channel a frame was dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    State { stored: bool },
    Target,
    FinalTarget,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqTransport {
    /// Connect the subscriber to the estimator, subscribe to the inbound channels and bind the
    /// trajectory publisher.
    ///
    /// Neither socket blocks waiting for a peer.
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        channels: &ChannelParams,
    ) -> Result<Self, GatewayError> {
        let sub_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            ..Default::default()
        };

        let sub = MonitoredSocket::new(ctx, zmq::SUB, sub_options, &params.estimator_endpoint)
            .map_err(GatewayError::SocketError)?;

        for topic in [&channels.state, &channels.target, &channels.final_target].iter() {
            // The trailing space stops one channel matching another it prefixes
            sub.set_subscribe(format!("{} ", topic).as_bytes())
                .map_err(|e| GatewayError::SubscribeError(topic.to_string(), e))?;
        }

        let pub_options = SocketOptions {
            block_on_first_connect: false,
            bind: true,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            send_timeout: 10,
            ..Default::default()
        };

        let publ = MonitoredSocket::new(ctx, zmq::PUB, pub_options, &params.trajectory_endpoint)
            .map_err(GatewayError::SocketError)?;

        Ok(Self { sub, publ })
    }
}

impl Transport for ZmqTransport {
    fn recv(&mut self) -> Result<Option<String>, GatewayError> {
        match self.sub.try_recv_string().map_err(GatewayError::RecvError)? {
            Some(Ok(s)) => Ok(Some(s)),
            // Passed on so the frame gets counted as dropped when it fails to decode
            Some(Err(bytes)) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    fn send(&mut self, frame: &str) -> Result<(), GatewayError> {
        self.publ.send(frame, 0).map_err(GatewayError::SendError)
    }

    fn connected(&self) -> bool {
        self.sub.connected()
    }
}

impl<T: Transport> MessageGateway<T> {
    pub fn new(transport: T, channels: ChannelParams, snapshot: Arc<StateSnapshot>) -> Self {
        Self {
            transport,
            channels,
            snapshot,
        }
    }

    pub fn snapshot(&self) -> &Arc<StateSnapshot> {
        &self.snapshot
    }

    pub fn channels(&self) -> &ChannelParams {
        &self.channels
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// True while the transport is connected to the estimator.
    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    /// Handle every frame currently pending on the transport.
    ///
    /// Frames which cannot be decoded are logged and dropped. Only a failure of the transport
    /// itself is returned as an error.
    pub fn pump(&mut self) -> Result<PumpReport, GatewayError> {
        let mut report = PumpReport::default();

        for _ in 0..MAX_FRAMES_PER_PUMP {
            let frame = match self.transport.recv()? {
                Some(f) => f,
                None => break,
            };

            match self.dispatch(&frame) {
                Ok(Inbound::State { stored: true }) => report.num_states += 1,
                Ok(Inbound::State { stored: false }) => report.num_stale_states += 1,
                Ok(Inbound::Target) => report.num_targets += 1,
                Ok(Inbound::FinalTarget) => report.num_final_targets += 1,
                Err(e) => {
                    warn!("Dropping inbound frame: {}", e);
                    report.num_dropped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Publish a trajectory bundle on `channel`.
    ///
    /// Fire and forget: failures are logged and the bundle is not resent.
    pub fn publish(&mut self, channel: &str, msg: &TimestampedSavedTraj) {
        let frame = match mpc::encode_frame(channel, msg) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not encode {} bundle: {}", channel, e);
                return;
            }
        };

        match self.transport.send(&frame) {
            Ok(()) => debug!("Published {} (utime {})", channel, msg.utime),
            Err(e) => warn!("Could not publish {} bundle: {}", channel, e),
        }
    }

    fn dispatch(&self, frame: &str) -> Result<Inbound, InboundError> {
        let (channel, payload) = mpc::split_frame(frame)?;

        let translate_err = |e: TranslateError| InboundError::Translate(channel.to_string(), e);

        if channel == self.channels.state {
            let msg: C3StateMsg = mpc::decode_payload(channel, payload)?;
            let state = RobotState::from_msg(&msg).map_err(translate_err)?;
            Ok(Inbound::State {
                stored: self.snapshot.update_state(state),
            })
        } else if channel == self.channels.target {
            let msg: C3StateMsg = mpc::decode_payload(channel, payload)?;
            let target = TargetState::from_msg(&msg).map_err(translate_err)?;
            self.snapshot.update_target(target);
            Ok(Inbound::Target)
        } else if channel == self.channels.final_target {
            let msg: C3StateMsg = mpc::decode_payload(channel, payload)?;
            let target = TargetState::from_msg(&msg).map_err(translate_err)?;
            self.snapshot.update_final_target(target);
            Ok(Inbound::FinalTarget)
        } else {
            Err(InboundError::UnknownChannel(channel.to_string()))
        }
    }
}

impl PumpReport {
    /// Total number of frames handled, including dropped ones.
    pub fn num_frames(&self) -> usize {
        self.num_states
            + self.num_stale_states
            + self.num_targets
            + self.num_final_targets
            + self.num_dropped
    }
}

// ------------------------------------------------------------------------------------------------
// LOOPBACK
// ------------------------------------------------------------------------------------------------


// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::loopback::LoopbackTransport;
    use super::*;
    use comms_if::mpc::{SavedTraj, TrajectoryBlock};

    use crate::snapshot::TargetDefaults;

    fn gateway() -> MessageGateway<LoopbackTransport> {
        MessageGateway::new(
            LoopbackTransport::default(),
            ChannelParams::default(),
            Arc::new(StateSnapshot::new()),
        )
    }

    fn defaults() -> TargetDefaults {
        let t = TargetState {
            object_pose: [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
            actor_position: [0.0; 3],
        };
        TargetDefaults {
            target: t,
            final_target: t,
        }
    }

    fn state_msg(utime: i64, actor_x: f64) -> C3StateMsg {
        let mut state = vec![0.0; mpc::C3_STATE_LEN];
        state[0] = actor_x;
        state[3] = 1.0;
        C3StateMsg { utime, state }
    }

    #[test]
    fn test_pump_updates_snapshot() {
        let mut gw = gateway();
        let ch = ChannelParams::default();

        let target = C3StateMsg {
            utime: 5,
            state: vec![0.1, 0.2, 0.3, 1.0, 0.0, 0.0, 0.0, 0.4, 0.5, 0.6, 99.0],
        };

        gw.transport_mut().push(&ch.state, &state_msg(10, 0.25));
        gw.transport_mut().push(&ch.target, &target);

        let report = gw.pump().unwrap();
        assert_eq!(report.num_states, 1);
        assert_eq!(report.num_targets, 1);
        assert_eq!(report.num_frames(), 2);

        let view = gw.snapshot().view(&defaults()).unwrap();
        assert_eq!(view.state.utime, 10);
        assert_eq!(view.state.actor_position, [0.25, 0.0, 0.0]);
        assert_eq!(view.target.object_pose, [0.4, 0.5, 0.6, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(view.target.actor_position, [0.1, 0.2, 0.3]);
        assert_eq!(view.final_target, defaults().final_target);

        // Nothing pending
        assert_eq!(gw.pump().unwrap(), PumpReport::default());
    }

    #[test]
    fn test_last_message_wins() {
        let mut gw = gateway();
        let ch = ChannelParams::default();

        gw.transport_mut().push(&ch.state, &state_msg(1, 0.1));
        gw.transport_mut().push(&ch.state, &state_msg(2, 0.2));
        gw.transport_mut().push(&ch.state, &state_msg(3, 0.3));

        let report = gw.pump().unwrap();
        assert_eq!(report.num_states, 3);

        let view = gw.snapshot().view(&defaults()).unwrap();
        assert_eq!(view.state.utime, 3);
        assert_eq!(view.state.actor_position[0], 0.3);
    }

    #[test]
    fn test_stale_state_counted() {
        let mut gw = gateway();
        let ch = ChannelParams::default();

        gw.transport_mut().push(&ch.state, &state_msg(20, 0.2));
        gw.transport_mut().push(&ch.state, &state_msg(10, 0.1));

        let report = gw.pump().unwrap();
        assert_eq!(report.num_states, 1);
        assert_eq!(report.num_stale_states, 1);
        assert_eq!(gw.snapshot().view(&defaults()).unwrap().state.utime, 20);
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let mut gw = gateway();
        let ch = ChannelParams::default();

        gw.transport_mut().push_raw("no_payload");
        gw.transport_mut().push_raw("C3_ACTUAL {not json");
        gw.transport_mut().push(
            &ch.state,
            &C3StateMsg {
                utime: 1,
                state: vec![0.0; 5],
            },
        );
        gw.transport_mut().push(&ch.final_target, &C3StateMsg { utime: 1, state: vec![] });
        gw.transport_mut().push("SOMETHING_ELSE", &state_msg(1, 0.0));

        let report = gw.pump().unwrap();
        assert_eq!(report.num_dropped, 5);
        assert_eq!(report.num_frames(), 5);
        assert!(!gw.snapshot().has_state());
    }

    #[test]
    fn test_publish() {
        let mut gw = gateway();
        let bundle = TimestampedSavedTraj {
            utime: 42,
            saved_traj: SavedTraj::from_blocks(vec![TrajectoryBlock::zeroed("b", &["x"], 2)]),
        };

        gw.publish("TRACKING_TRAJECTORY_ACTOR", &bundle);
        assert_eq!(
            gw.transport_mut().sent_on("TRACKING_TRAJECTORY_ACTOR"),
            vec![bundle.clone()]
        );

        // A failed send is not an error for the caller and is not retried
        gw.transport_mut().fail_sends = true;
        gw.publish("TRACKING_TRAJECTORY_ACTOR", &bundle);
        gw.transport_mut().fail_sends = false;
        assert_eq!(gw.transport_mut().sent.len(), 1);
    }
}
