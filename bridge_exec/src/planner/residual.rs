//! Residual (cost term) callbacks evaluated along planner rollouts.
//!
//! Residuals are registered with a planner as closures rather than being reached through a global,
//! so each planner owns the cost it optimises.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use super::{PlannerState, NQ, NU, QPOS_ACTOR_POS, QPOS_OBJECT_POS, QPOS_OBJECT_QUAT};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// A residual callback.
///
/// Writes `num_residuals` values into `out` for one rollout point. The cost of the point is the
/// weighted sum of squares of those values.
pub type ResidualFn = Box<dyn Fn(&RolloutPoint<'_>, &mut [f64]) + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The data a residual sees at one point of a rollout.
#[derive(Debug, Clone, Copy)]
pub struct RolloutPoint<'a> {
    /// Configuration at this point, `[object pos, object quat, actor pos]`
    pub qpos: &'a [f64; NQ],

    /// Action applied from this point
    pub action: &'a [f64; NU],

    /// The state the optimisation started from, carrying the mocap goals
    pub start: &'a PlannerState,
}

/// A residual registered with a planner, along with its size and weights.
pub struct RegisteredResidual {
    pub func: ResidualFn,

    /// One weight per residual value
    pub weights: Vec<f64>,
}

/// Weights of the default push residual.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PushWeights {
    /// Object position to near-term object target
    pub object_position: f64,

    /// Object orientation to near-term object target orientation
    pub object_orientation: f64,

    /// Actor position to actor target
    pub actor_position: f64,

    /// Actor position to object position
    pub actor_reach: f64,

    pub effort: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RegisteredResidual {
    pub fn num_residuals(&self) -> usize {
        self.weights.len()
    }

    /// Weighted sum of squares of the residual at one point. `scratch` must be
    /// `num_residuals` long.
    pub fn cost(&self, point: &RolloutPoint<'_>, scratch: &mut [f64]) -> f64 {
        (self.func)(point, scratch);

        scratch
            .iter()
            .zip(self.weights.iter())
            .map(|(r, w)| w * r * r)
            .sum()
    }
}

impl Default for PushWeights {
    fn default() -> Self {
        Self {
            object_position: 10.0,
            object_orientation: 1.0,
            actor_position: 0.1,
            actor_reach: 1.0,
            effort: 0.01,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Number of values written by [`push_residual`].
pub const PUSH_RESIDUAL_LEN: usize = 3 + 1 + 3 + 3 + NU;

/// The default residual for pushing the object to its near-term goal.
///
/// Layout of the residual vector:
/// - object position minus near-term goal position (3)
/// - orientation misalignment `1 - |<q, q_goal>|` (1)
/// - actor position minus actor goal (3)
/// - actor position minus object position (3)
/// - action (3)
pub fn push_residual(weights: &PushWeights) -> RegisteredResidual {
    let mut w = Vec::with_capacity(PUSH_RESIDUAL_LEN);
    w.extend_from_slice(&[weights.object_position; 3]);
    w.push(weights.object_orientation);
    w.extend_from_slice(&[weights.actor_position; 3]);
    w.extend_from_slice(&[weights.actor_reach; 3]);
    w.extend_from_slice(&[weights.effort; NU]);

    RegisteredResidual {
        func: Box::new(|p: &RolloutPoint<'_>, out: &mut [f64]| {
            let obj_pos = &p.qpos[QPOS_OBJECT_POS..QPOS_OBJECT_POS + 3];
            let obj_quat = &p.qpos[QPOS_OBJECT_QUAT..QPOS_OBJECT_QUAT + 4];
            let actor_pos = &p.qpos[QPOS_ACTOR_POS..QPOS_ACTOR_POS + 3];

            // Mocap body 0 is the near-term goal, body 2 the end effector goal
            let goal_pos = p.start.mocap_position(0);
            let goal_quat = p.start.mocap_orientation(0);
            let actor_goal = p.start.mocap_position(2);

            for i in 0..3 {
                out[i] = obj_pos[i] - goal_pos[i];
                out[4 + i] = actor_pos[i] - actor_goal[i];
                out[7 + i] = actor_pos[i] - obj_pos[i];
            }

            let dot: f64 = obj_quat.iter().zip(goal_quat.iter()).map(|(a, b)| a * b).sum();
            out[3] = 1.0 - dot.abs();

            out[10..10 + NU].copy_from_slice(p.action);
        }),
        weights: w,
    }
}
