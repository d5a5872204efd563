//! # Bridge Executable Parameters
//!
//! This module provide parameters for the bridge executable, loaded from `bridge_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::{planner::SamplingParams, snapshot::TargetDefaults};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeExecParams {
    pub channels: ChannelParams,

    pub planner: PlannerParams,

    pub loop_ctrl: LoopCtrlParams,

    /// Targets used until the estimator publishes its own
    pub defaults: TargetDefaults,

    pub sampling: SamplingParams,
}

/// Names of the pub/sub channels.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelParams {
    /// Current state from the estimator
    pub state: String,

    /// Near-term target from the estimator
    pub target: String,

    /// Final target from the estimator
    pub final_target: String,

    /// Actor (end effector) trajectory to the tracker
    pub actor_traj: String,

    /// Object trajectory to the tracker
    pub object_traj: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannerParams {
    /// Length of the planning horizon.
    ///
    /// Units: seconds
    pub horizon_s: f64,

    /// Planner timestep.
    ///
    /// Units: seconds
    pub timestep_s: f64,

    /// Number of threads in the planning pool
    pub num_threads: usize,

    /// Gain converting the planner's normalised command range into force.
    ///
    /// Units: newtons
    pub action_gain: f64,

    /// Action fed to the first solve, before any trajectory has been produced
    pub initial_action: [f64; 3],
}

/// Control loop timing.
#[derive(Debug, Clone, Deserialize)]
pub struct LoopCtrlParams {
    /// Minimum period of one loop iteration, 0 to run as fast as the planner allows.
    ///
    /// Units: seconds
    pub min_period_s: f64,

    /// Time to wait between pumps while no state has been received.
    ///
    /// Units: seconds
    pub await_period_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Parameter combinations the bridge cannot run with.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("Planner timestep must be finite and positive, got {0} s")]
    InvalidTimestep(f64),

    #[error("Sampling timestep must be finite and positive, got {0} s")]
    InvalidSamplingTimestep(f64),

    #[error("Planner timestep ({planner} s) and sampling timestep ({sampling} s) differ")]
    TimestepMismatch { planner: f64, sampling: f64 },

    #[error("Horizon must be finite and not negative, got {0} s")]
    InvalidHorizon(f64),

    #[error("Horizon must span at least 2 points, got {0}")]
    ShortHorizon(usize),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            state: "C3_ACTUAL".into(),
            target: "C3_TARGET".into(),
            final_target: "C3_FINAL_TARGET".into(),
            actor_traj: "TRACKING_TRAJECTORY_ACTOR".into(),
            object_traj: "TRACKING_TRAJECTORY_OBJECT".into(),
        }
    }
}

impl BridgeExecParams {
    /// Check the parameters before anything is built from them.
    pub fn validate(&self) -> Result<(), ParamsError> {
        let planner_dt = self.planner.timestep_s;
        let sampling_dt = self.sampling.timestep_s;

        if !(planner_dt.is_finite() && planner_dt > 0.0) {
            return Err(ParamsError::InvalidTimestep(planner_dt));
        }
        if !(sampling_dt.is_finite() && sampling_dt > 0.0) {
            return Err(ParamsError::InvalidSamplingTimestep(sampling_dt));
        }

        // Horizon length comes from one, rollout times from the other
        if (planner_dt - sampling_dt).abs() > 1e-12 {
            return Err(ParamsError::TimestepMismatch {
                planner: planner_dt,
                sampling: sampling_dt,
            });
        }

        if !(self.planner.horizon_s.is_finite() && self.planner.horizon_s >= 0.0) {
            return Err(ParamsError::InvalidHorizon(self.planner.horizon_s));
        }

        let steps = self.planner.horizon_steps();
        if steps < 2 {
            return Err(ParamsError::ShortHorizon(steps));
        }

        Ok(())
    }
}

impl PlannerParams {
    /// Number of points in the horizon, counting both ends.
    pub fn horizon_steps(&self) -> usize {
        (self.horizon_s / self.timestep_s).round() as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &str = include_str!("../../params/bridge_exec.toml");

    #[test]
    fn test_shipped_params_parse() {
        let params: BridgeExecParams = util::params::from_str(PARAMS).unwrap();

        assert_eq!(params.channels.state, ChannelParams::default().state);
        assert_eq!(params.channels.object_traj, ChannelParams::default().object_traj);
        assert_eq!(params.planner.action_gain, 1.5);
        assert_eq!(params.planner.initial_action, [-0.1, 0.1, 0.0]);
        assert_eq!(params.sampling.timestep_s, params.planner.timestep_s);
        assert_eq!(
            params.defaults.final_target.object_pose,
            [0.45, 0.2, 0.032, 1.0, 0.0, 0.0, 0.0]
        );
    }

    fn shipped() -> BridgeExecParams {
        util::params::from_str(PARAMS).unwrap()
    }

    #[test]
    fn test_shipped_params_valid() {
        assert_eq!(shipped().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_bad_timestep() {
        for dt in [0.0, -0.01, f64::NAN, f64::INFINITY].iter() {
            let mut params = shipped();
            params.planner.timestep_s = *dt;
            params.sampling.timestep_s = *dt;

            match params.validate() {
                Err(ParamsError::InvalidTimestep(v)) => {
                    assert!(v == *dt || (v.is_nan() && dt.is_nan()))
                }
                other => panic!("Expected InvalidTimestep for {}, got {:?}", dt, other),
            }
        }

        let mut params = shipped();
        params.sampling.timestep_s = 0.0;
        assert_eq!(
            params.validate(),
            Err(ParamsError::InvalidSamplingTimestep(0.0))
        );
    }

    #[test]
    fn test_rejects_timestep_mismatch() {
        let mut params = shipped();
        params.sampling.timestep_s = 0.02;

        assert_eq!(
            params.validate(),
            Err(ParamsError::TimestepMismatch {
                planner: 0.01,
                sampling: 0.02
            })
        );
    }

    #[test]
    fn test_rejects_bad_horizon() {
        let mut params = shipped();
        params.planner.horizon_s = -0.5;
        assert_eq!(params.validate(), Err(ParamsError::InvalidHorizon(-0.5)));

        params.planner.horizon_s = f64::INFINITY;
        assert_eq!(
            params.validate(),
            Err(ParamsError::InvalidHorizon(f64::INFINITY))
        );

        // Less than half a timestep rounds down to a single point
        params.planner.horizon_s = 0.004;
        assert_eq!(params.validate(), Err(ParamsError::ShortHorizon(1)));

        params.planner.horizon_s = 0.01;
        assert_eq!(params.validate(), Ok(()));
    }

    #[test]
    fn test_horizon_steps() {
        let mut p = PlannerParams {
            horizon_s: 0.5,
            timestep_s: 0.01,
            num_threads: 1,
            action_gain: 1.5,
            initial_action: [0.0; 3],
        };
        assert_eq!(p.horizon_steps(), 51);

        p.horizon_s = 0.35;
        p.timestep_s = 0.05;
        assert_eq!(p.horizon_steps(), 8);
    }
}
