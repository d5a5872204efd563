//! # Planning Control
//!
//! One planning cycle: assemble the planner state from a snapshot view, optimise, and pack the best
//! trajectory into the outbound bundles.
//!
//! The action handed to each solve is fed forward from the previous cycle, taken as the first point
//! of the force block last packed. Before the first solve the configured initial action is used.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use log::trace;
use serde::Serialize;

use crate::{
    packer::{PackError, PackedTrajectories, TrajectoryPacker},
    params::PlannerParams,
    planner::{
        Planner, PlannerError, PlannerState, WorkerPool, NU, QPOS_ACTOR_POS, QPOS_OBJECT_POS,
        QVEL_ACTOR_VEL,
    },
    snapshot::SnapshotView,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct PlanCtrl<P: Planner> {
    planner: P,
    pool: WorkerPool,
    packer: TrajectoryPacker,

    /// Number of points in each optimisation
    horizon: usize,

    /// Action given to the next solve
    feedforward: [f64; NU],

    num_cycles: u64,
}

/// Status report for one planning cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleReport {
    /// Index of the cycle, starting at 0
    pub cycle: u64,

    /// Timestamp of the state the cycle planned from, in microseconds
    pub utime: i64,

    /// Units: seconds
    pub solve_time_s: f64,

    /// Cost of the best trajectory if the planner exposes it
    pub best_cost: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PlanCtrlError {
    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("The planner did not produce a trajectory")]
    NoTrajectory,

    #[error("Could not pack the trajectory: {0}")]
    Pack(#[from] PackError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<P: Planner> PlanCtrl<P> {
    pub fn new(planner: P, pool: WorkerPool, params: &PlannerParams) -> Self {
        Self {
            planner,
            pool,
            packer: TrajectoryPacker::new(params.action_gain),
            horizon: params.horizon_steps(),
            feedforward: params.initial_action,
            num_cycles: 0,
        }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn feedforward(&self) -> [f64; NU] {
        self.feedforward
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    /// Run one planning cycle from `view`.
    ///
    /// Both bundles carry the utime of the view's state. Blocks for as long as the planner takes.
    pub fn step(
        &mut self,
        view: &SnapshotView,
    ) -> Result<(PackedTrajectories, CycleReport), PlanCtrlError> {
        let state = assemble_planner_state(view, &self.feedforward);
        trace!("Planner state: {:?}", state);

        self.planner.set_state(&state);

        let solve_start = Instant::now();
        self.planner.optimize_policy(self.horizon, &self.pool)?;
        let solve_time_s = solve_start.elapsed().as_secs_f64();

        let traj = self
            .planner
            .best_trajectory()
            .ok_or(PlanCtrlError::NoTrajectory)?;

        let packed = self.packer.pack(traj, view.state.utime)?;
        self.feedforward = packed.first_force();

        let report = CycleReport {
            cycle: self.num_cycles,
            utime: view.state.utime,
            solve_time_s,
            best_cost: self.planner.best_cost(),
        };
        self.num_cycles += 1;

        Ok((packed, report))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the planner state for a snapshot view.
///
/// Mocap bodies are, in order, the near-term object goal, the final object goal and the end
/// effector goal. The end effector goal orientation is always the identity.
pub fn assemble_planner_state(view: &SnapshotView, action: &[f64; NU]) -> PlannerState {
    let mut s = PlannerState::default();

    s.qpos[QPOS_OBJECT_POS..QPOS_ACTOR_POS].copy_from_slice(&view.state.object_pose);
    s.qpos[QPOS_ACTOR_POS..].copy_from_slice(&view.state.actor_position);

    s.qvel[..QVEL_ACTOR_VEL].copy_from_slice(&view.state.object_twist);
    s.qvel[QVEL_ACTOR_VEL..].copy_from_slice(&view.state.actor_velocity);

    s.action = *action;

    s.mocap_pos[0..3].copy_from_slice(&view.target.object_position());
    s.mocap_pos[3..6].copy_from_slice(&view.final_target.object_position());
    s.mocap_pos[6..9].copy_from_slice(&view.target.actor_position);

    s.mocap_quat[0..4].copy_from_slice(&view.target.object_quat());
    s.mocap_quat[4..8].copy_from_slice(&view.final_target.object_quat());
    s.mocap_quat[8..12].copy_from_slice(&[1.0, 0.0, 0.0, 0.0]);

    s.time = view.state.time_s();

    s
}

// ------------------------------------------------------------------------------------------------
// STUB PLANNER
// ------------------------------------------------------------------------------------------------

/// Planner returning a fixed action over the whole horizon, used by the tests.
#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use crate::planner::{Trajectory, DIM_STATE, NQ};

    #[derive(Debug, Default)]
    pub struct StubPlanner {
        pub action: [f64; NU],

        /// When set, optimisations succeed without producing a trajectory
        pub no_trajectory: bool,

        /// Every state the planner was given
        pub states: Vec<PlannerState>,

        best: Option<Trajectory>,
    }

    impl StubPlanner {
        pub fn new(action: [f64; NU]) -> Self {
            Self {
                action,
                ..Default::default()
            }
        }
    }

    impl Planner for StubPlanner {
        fn set_state(&mut self, state: &PlannerState) {
            self.states.push(*state);
        }

        fn optimize_policy(
            &mut self,
            horizon: usize,
            _pool: &WorkerPool,
        ) -> Result<(), PlannerError> {
            if self.no_trajectory {
                self.best = None;
                return Ok(());
            }

            let start = self.states.last().copied().unwrap_or_default();
            let mut traj = Trajectory::zeroed(horizon, DIM_STATE, NU);
            for k in 0..horizon {
                traj.times[k] = start.time + 0.01 * k as f64;
                traj.state_mut(k)[..NQ].copy_from_slice(&start.qpos);
                traj.state_mut(k)[NQ..].copy_from_slice(&start.qvel);
                traj.action_mut(k).copy_from_slice(&self.action);
            }
            self.best = Some(traj);

            Ok(())
        }

        fn best_trajectory(&self) -> Option<&Trajectory> {
            self.best.as_ref()
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::stub::StubPlanner;
    use super::*;
    use crate::{
        planner::{push_residual, SamplingParams, SamplingPlanner},
        translate::{RobotState, TargetState},
    };
    use comms_if::mpc::C3StateMsg;

    fn params(horizon_s: f64) -> PlannerParams {
        PlannerParams {
            horizon_s,
            timestep_s: 0.01,
            num_threads: 1,
            action_gain: 1.5,
            initial_action: [-0.1, 0.1, 0.0],
        }
    }

    fn target(pos: [f64; 3], actor: [f64; 3]) -> TargetState {
        TargetState {
            object_pose: [pos[0], pos[1], pos[2], 1.0, 0.0, 0.0, 0.0],
            actor_position: actor,
        }
    }

    fn example_view() -> SnapshotView {
        let mut state = vec![0.1, 0.2, 0.3, 1.0, 0.0, 0.0, 0.0, 0.4, 0.5, 0.6];
        state.extend_from_slice(&[0.0; 9]);

        SnapshotView {
            state: RobotState::from_msg(&C3StateMsg {
                utime: 2_500_000,
                state,
            })
            .unwrap(),
            target: target([0.45, 0.1, 0.032], [0.45, 0.0, 0.132]),
            final_target: target([0.45, 0.2, 0.032], [0.45, 0.0, 0.132]),
        }
    }

    #[test]
    fn test_assemble_example_state() {
        let s = assemble_planner_state(&example_view(), &[0.0; NU]);

        assert_eq!(s.qpos, [0.4, 0.5, 0.6, 1.0, 0.0, 0.0, 0.0, 0.1, 0.2, 0.3]);
        assert_eq!(s.qvel, [0.0; 9]);
        assert_eq!(s.time, 2.5);
    }

    #[test]
    fn test_assemble_velocities_and_mocap() {
        let mut view = example_view();
        view.state.object_twist = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        view.state.actor_velocity = [7.0, 8.0, 9.0];
        view.target.object_pose[3..].copy_from_slice(&[0.0, 1.0, 0.0, 0.0]);

        let s = assemble_planner_state(&view, &[0.3, 0.2, 0.1]);

        assert_eq!(s.qvel, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(s.action, [0.3, 0.2, 0.1]);
        assert_eq!(
            s.mocap_pos,
            [0.45, 0.1, 0.032, 0.45, 0.2, 0.032, 0.45, 0.0, 0.132]
        );
        assert_eq!(
            s.mocap_quat,
            [0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_force_scaled_horizon_one() {
        let stub = StubPlanner::new([1.0, 2.0, 3.0]);
        let mut ctrl = PlanCtrl::new(stub, WorkerPool::new(1), &params(0.0));
        assert_eq!(ctrl.horizon(), 1);

        let (packed, report) = ctrl.step(&example_view()).unwrap();
        let force = packed
            .actor
            .saved_traj
            .block("end_effector_force_target")
            .unwrap();

        assert_eq!(force.datapoints, vec![vec![1.5], vec![3.0], vec![4.5]]);
        assert_eq!(packed.actor.utime, 2_500_000);
        assert_eq!(packed.object.utime, 2_500_000);
        assert_eq!(report.cycle, 0);
        assert_eq!(report.utime, 2_500_000);
        assert_eq!(report.best_cost, None);
    }

    #[test]
    fn test_feedforward() {
        let stub = StubPlanner::new([0.2, 0.4, 0.6]);
        let mut ctrl = PlanCtrl::new(stub, WorkerPool::new(1), &params(0.05));
        assert_eq!(ctrl.feedforward(), [-0.1, 0.1, 0.0]);

        let view = example_view();
        ctrl.step(&view).unwrap();
        let (_, report) = ctrl.step(&view).unwrap();

        let states = &ctrl.planner().states;
        assert_eq!(states[0].action, [-0.1, 0.1, 0.0]);
        for (a, b) in states[1].action.iter().zip([0.3, 0.6, 0.9].iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(report.cycle, 1);
    }

    #[test]
    fn test_no_trajectory() {
        let mut stub = StubPlanner::new([0.0; NU]);
        stub.no_trajectory = true;
        let mut ctrl = PlanCtrl::new(stub, WorkerPool::new(1), &params(0.05));

        match ctrl.step(&example_view()) {
            Err(PlanCtrlError::NoTrajectory) => (),
            other => panic!("Expected NoTrajectory, got {:?}", other.map(|(_, r)| r)),
        }

        // Nothing was packed so the initial action is still fed forward
        assert_eq!(ctrl.feedforward(), [-0.1, 0.1, 0.0]);
    }

    #[test]
    fn test_planner_error_propagated() {
        let sampling = SamplingPlanner::new(SamplingParams {
            timestep_s: 0.01,
            num_samples: 4,
            noise_scale: 0.3,
            actor_mass_kg: 1.0,
            force_scale_n: 1.5,
            damping: 2.0,
            contact_radius_m: 0.06,
            weights: Default::default(),
        });
        let mut ctrl = PlanCtrl::new(sampling, WorkerPool::new(1), &params(0.05));

        // No residual registered
        assert!(matches!(
            ctrl.step(&example_view()),
            Err(PlanCtrlError::Planner(PlannerError::NoResidual))
        ));
    }

    #[test]
    fn test_sampling_planner_cycle() {
        let sp = SamplingParams {
            timestep_s: 0.01,
            num_samples: 8,
            noise_scale: 0.3,
            actor_mass_kg: 1.0,
            force_scale_n: 1.5,
            damping: 2.0,
            contact_radius_m: 0.06,
            weights: Default::default(),
        };
        let mut sampling = SamplingPlanner::new(sp.clone());
        sampling.register_residual(push_residual(&sp.weights));

        let mut ctrl = PlanCtrl::new(sampling, WorkerPool::new(2), &params(0.1));
        let (packed, report) = ctrl.step(&example_view()).unwrap();

        for block in packed.actor.saved_traj.trajectories.iter() {
            assert_eq!(block.num_points, 11);
            assert_eq!(block.time_vec.len(), 11);
            assert_eq!(block.time_vec[0], 2.5);
        }
        assert!(report.best_cost.map_or(false, f64::is_finite));
    }
}
