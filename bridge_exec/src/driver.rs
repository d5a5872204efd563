//! # Control Loop Driver
//!
//! The single control thread of the bridge. Each tick pumps the gateway, reads the snapshot and,
//! once a state has been received, runs one planning cycle and publishes both trajectory bundles.
//!
//! The loop starts in [`LoopPhase::AwaitingFirstMessage`] and moves to [`LoopPhase::Steady`] the
//! first time a state is available. Nothing is published while awaiting.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};

use crate::{
    gateway::{GatewayError, MessageGateway, Transport},
    params::LoopCtrlParams,
    plan_ctrl::{CycleReport, PlanCtrl, PlanCtrlError},
    planner::Planner,
    snapshot::TargetDefaults,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ControlLoop<T: Transport, P: Planner> {
    gateway: MessageGateway<T>,
    plan_ctrl: PlanCtrl<P>,
    defaults: TargetDefaults,
    params: LoopCtrlParams,

    phase: LoopPhase,

    /// Estimator connection as of the last tick
    estimator_connected: bool,

    num_consec_overruns: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    AwaitingFirstMessage,
    Steady,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// No state has been received yet, nothing was published
    AwaitingState,

    /// A planning cycle ran and both bundles were published
    Published(CycleReport),
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Planning cycle failed: {0}")]
    PlanCtrl(#[from] PlanCtrlError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T: Transport, P: Planner> ControlLoop<T, P> {
    pub fn new(
        gateway: MessageGateway<T>,
        plan_ctrl: PlanCtrl<P>,
        defaults: TargetDefaults,
        params: LoopCtrlParams,
    ) -> Self {
        Self {
            gateway,
            plan_ctrl,
            defaults,
            params,
            phase: LoopPhase::AwaitingFirstMessage,
            estimator_connected: false,
            num_consec_overruns: 0,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn estimator_connected(&self) -> bool {
        self.estimator_connected
    }

    pub fn gateway_mut(&mut self) -> &mut MessageGateway<T> {
        &mut self.gateway
    }

    pub fn plan_ctrl(&self) -> &PlanCtrl<P> {
        &self.plan_ctrl
    }

    /// Run one iteration of the loop.
    pub fn tick(&mut self) -> Result<TickOutcome, DriverError> {
        let pump = self.gateway.pump()?;
        if pump.num_frames() > 0 {
            trace!("Pumped {:?}", pump);
        }

        let connected = self.gateway.connected();
        if connected != self.estimator_connected {
            if connected {
                info!("Connected to the estimator");
            } else {
                warn!("Lost connection to the estimator");
            }
            self.estimator_connected = connected;
        }

        let view = match self.gateway.snapshot().view(&self.defaults) {
            Some(v) => v,
            None => return Ok(TickOutcome::AwaitingState),
        };

        if self.phase == LoopPhase::AwaitingFirstMessage {
            info!(
                "First state received (utime {}), starting to plan",
                view.state.utime
            );
            self.phase = LoopPhase::Steady;
        }

        let (packed, report) = self.plan_ctrl.step(&view)?;

        let channels = self.gateway.channels().clone();
        self.gateway.publish(&channels.actor_traj, &packed.actor);
        self.gateway.publish(&channels.object_traj, &packed.object);

        debug!(
            "Cycle {}: utime {}, solve {:.06} s, cost {}",
            report.cycle,
            report.utime,
            report.solve_time_s,
            report
                .best_cost
                .map_or_else(|| "n/a".to_string(), |c| format!("{:.06}", c))
        );

        Ok(TickOutcome::Published(report))
    }

    /// Run the loop until a tick fails.
    ///
    /// Only returns on error, which is always fatal for the bridge.
    pub fn run(&mut self) -> Result<(), DriverError> {
        info!("Control loop started, awaiting first state");

        loop {
            let cycle_start = Instant::now();

            let outcome = self.tick()?;

            // ---- CYCLE MANAGEMENT ----

            let cycle_dur = cycle_start.elapsed();

            match outcome {
                TickOutcome::AwaitingState => {
                    if let Some(d) = period(self.params.await_period_s) {
                        thread::sleep(d.checked_sub(cycle_dur).unwrap_or_default());
                    }
                }
                TickOutcome::Published(_) => self.manage_cycle(cycle_dur),
            }
        }
    }

    /// Sleep out the rest of the minimum period, or warn if the cycle overran it.
    fn manage_cycle(&mut self, cycle_dur: Duration) {
        let min_period = match period(self.params.min_period_s) {
            Some(p) => p,
            None => return,
        };

        match min_period.checked_sub(cycle_dur) {
            Some(d) => {
                self.num_consec_overruns = 0;
                thread::sleep(d);
            }
            None => {
                self.num_consec_overruns += 1;
                warn!(
                    "Cycle overran by {:.06} s ({} consecutive)",
                    cycle_dur.as_secs_f64() - min_period.as_secs_f64(),
                    self.num_consec_overruns
                );
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// A positive, finite period in seconds as a duration. Anything else disables the wait.
fn period(period_s: f64) -> Option<Duration> {
    if period_s.is_finite() && period_s > 0.0 {
        Some(Duration::from_secs_f64(period_s))
    } else {
        None
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        gateway::loopback::LoopbackTransport,
        packer::ACTOR_BLOCKS,
        params::{ChannelParams, PlannerParams},
        plan_ctrl::stub::StubPlanner,
        planner::WorkerPool,
        snapshot::StateSnapshot,
        translate::TargetState,
    };
    use comms_if::mpc::{C3StateMsg, C3_STATE_LEN};

    fn control_loop(stub: StubPlanner) -> ControlLoop<LoopbackTransport, StubPlanner> {
        let planner_params = PlannerParams {
            horizon_s: 0.05,
            timestep_s: 0.01,
            num_threads: 1,
            action_gain: 1.5,
            initial_action: [-0.1, 0.1, 0.0],
        };
        let t = TargetState {
            object_pose: [0.45, 0.1, 0.032, 1.0, 0.0, 0.0, 0.0],
            actor_position: [0.45, 0.0, 0.132],
        };

        ControlLoop::new(
            MessageGateway::new(
                LoopbackTransport::default(),
                ChannelParams::default(),
                Arc::new(StateSnapshot::new()),
            ),
            PlanCtrl::new(stub, WorkerPool::new(1), &planner_params),
            TargetDefaults {
                target: t,
                final_target: t,
            },
            LoopCtrlParams {
                min_period_s: 0.0,
                await_period_s: 0.0,
            },
        )
    }

    fn state_msg(utime: i64) -> C3StateMsg {
        let mut state = vec![0.0; C3_STATE_LEN];
        state[3] = 1.0;
        C3StateMsg { utime, state }
    }

    #[test]
    fn test_nothing_published_before_first_state() {
        let mut cl = control_loop(StubPlanner::new([1.0, 0.0, 0.0]));

        assert_eq!(cl.tick().unwrap(), TickOutcome::AwaitingState);

        // Targets alone do not start planning
        let target = C3StateMsg {
            utime: 1,
            state: vec![0.0, 0.0, 0.1, 1.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.0],
        };
        cl.gateway_mut().transport_mut().push("C3_TARGET", &target);
        assert_eq!(cl.tick().unwrap(), TickOutcome::AwaitingState);

        assert_eq!(cl.phase(), LoopPhase::AwaitingFirstMessage);
        assert!(cl.gateway_mut().transport_mut().sent.is_empty());
        assert!(cl.plan_ctrl().planner().states.is_empty());
    }

    #[test]
    fn test_publishes_after_first_state() {
        let mut cl = control_loop(StubPlanner::new([1.0, 2.0, 3.0]));
        cl.gateway_mut()
            .transport_mut()
            .push("C3_ACTUAL", &state_msg(1_700_000));

        let report = match cl.tick().unwrap() {
            TickOutcome::Published(r) => r,
            other => panic!("Expected a published cycle, got {:?}", other),
        };
        assert_eq!(report.utime, 1_700_000);
        assert_eq!(cl.phase(), LoopPhase::Steady);

        let transport = cl.gateway_mut().transport_mut();
        let actor = transport.sent_on("TRACKING_TRAJECTORY_ACTOR");
        let object = transport.sent_on("TRACKING_TRAJECTORY_OBJECT");
        assert_eq!(actor.len(), 1);
        assert_eq!(object.len(), 1);
        assert_eq!(actor[0].utime, 1_700_000);
        assert_eq!(object[0].utime, 1_700_000);

        let force = actor[0].saved_traj.block(ACTOR_BLOCKS[0].name).unwrap();
        assert_eq!(force.num_points, 6);
        assert_eq!(force.datapoints[2], vec![4.5; 6]);
    }

    #[test]
    fn test_keeps_planning_on_last_state() {
        let mut cl = control_loop(StubPlanner::new([0.0; 3]));
        cl.gateway_mut().transport_mut().push("C3_ACTUAL", &state_msg(10));

        cl.tick().unwrap();
        cl.tick().unwrap();
        cl.gateway_mut().transport_mut().push("C3_ACTUAL", &state_msg(20));
        cl.tick().unwrap();

        let utimes: Vec<i64> = cl
            .gateway_mut()
            .transport_mut()
            .sent_on("TRACKING_TRAJECTORY_OBJECT")
            .iter()
            .map(|m| m.utime)
            .collect();
        assert_eq!(utimes, vec![10, 10, 20]);
    }

    #[test]
    fn test_run_stops_on_missing_trajectory() {
        let mut stub = StubPlanner::new([0.0; 3]);
        stub.no_trajectory = true;

        let mut cl = control_loop(stub);
        cl.gateway_mut().transport_mut().push("C3_ACTUAL", &state_msg(5));

        assert!(matches!(
            cl.run(),
            Err(DriverError::PlanCtrl(PlanCtrlError::NoTrajectory))
        ));
        assert!(cl.gateway_mut().transport_mut().sent.is_empty());
    }

    #[test]
    fn test_tracks_estimator_connection() {
        let mut cl = control_loop(StubPlanner::new([0.0; 3]));
        assert!(!cl.estimator_connected());

        cl.gateway_mut().transport_mut().connected = true;
        assert_eq!(cl.tick().unwrap(), TickOutcome::AwaitingState);
        assert!(cl.estimator_connected());

        // Losing the estimator does not stop planning on the last state
        cl.gateway_mut().transport_mut().push("C3_ACTUAL", &state_msg(3));
        cl.gateway_mut().transport_mut().connected = false;
        assert!(matches!(cl.tick().unwrap(), TickOutcome::Published(_)));
        assert!(!cl.estimator_connected());
    }

    #[test]
    fn test_period() {
        assert_eq!(period(0.0), None);
        assert_eq!(period(-1.0), None);
        assert_eq!(period(f64::NAN), None);
        assert_eq!(period(0.5), Some(Duration::from_millis(500)));
    }
}
