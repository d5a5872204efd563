//! Planner input state and output trajectory.

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Size of the generalised configuration: object pose 7 + actor position 3.
pub const NQ: usize = 10;

/// Size of the generalised velocity: object twist 6 + actor velocity 3.
pub const NV: usize = 9;

/// Size of the action vector (end effector force command).
pub const NU: usize = 3;

/// Number of mocap bodies: intermediate goal, final goal, end effector goal.
pub const NMOCAP: usize = 3;

/// Offset of the object position in the configuration.
pub const QPOS_OBJECT_POS: usize = 0;

/// Offset of the object quaternion in the configuration.
pub const QPOS_OBJECT_QUAT: usize = 3;

/// Offset of the actor position in the configuration.
pub const QPOS_ACTOR_POS: usize = 7;

/// Offset of the actor velocity in the generalised velocity.
pub const QVEL_ACTOR_VEL: usize = 6;

/// Size of one trajectory state, `[qpos, qvel]`.
pub const DIM_STATE: usize = NQ + NV;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The full state handed to the planner at the start of an optimisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerState {
    /// `[object pos, object quat, actor pos]`
    pub qpos: [f64; NQ],

    /// `[object linear vel, object angular vel, actor vel]`
    pub qvel: [f64; NV],

    pub action: [f64; NU],

    /// Mocap positions, one 3-vector per body
    pub mocap_pos: [f64; 3 * NMOCAP],

    /// Mocap orientations, one scalar-first quaternion per body
    pub mocap_quat: [f64; 4 * NMOCAP],

    /// Time in seconds
    pub time: f64,
}

/// A fixed horizon trajectory produced by one optimisation.
///
/// States and actions are stored flat, point `k` of the states being
/// `states[k * dim_state..(k + 1) * dim_state]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub horizon: usize,
    pub dim_state: usize,
    pub dim_action: usize,

    /// Time of each point in seconds
    pub times: Vec<f64>,

    pub states: Vec<f64>,
    pub actions: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PlannerState {
    fn default() -> Self {
        let mut s = Self {
            qpos: [0.0; NQ],
            qvel: [0.0; NV],
            action: [0.0; NU],
            mocap_pos: [0.0; 3 * NMOCAP],
            mocap_quat: [0.0; 4 * NMOCAP],
            time: 0.0,
        };
        s.qpos[QPOS_OBJECT_QUAT] = 1.0;
        for b in 0..NMOCAP {
            s.mocap_quat[4 * b] = 1.0;
        }
        s
    }
}

impl PlannerState {
    /// Position of the given mocap body.
    pub fn mocap_position(&self, body: usize) -> &[f64] {
        &self.mocap_pos[3 * body..3 * body + 3]
    }

    /// Orientation of the given mocap body.
    pub fn mocap_orientation(&self, body: usize) -> &[f64] {
        &self.mocap_quat[4 * body..4 * body + 4]
    }
}

impl Trajectory {
    /// A zeroed trajectory of the given shape.
    pub fn zeroed(horizon: usize, dim_state: usize, dim_action: usize) -> Self {
        Self {
            horizon,
            dim_state,
            dim_action,
            times: vec![0.0; horizon],
            states: vec![0.0; horizon * dim_state],
            actions: vec![0.0; horizon * dim_action],
        }
    }

    pub fn state(&self, k: usize) -> &[f64] {
        &self.states[k * self.dim_state..(k + 1) * self.dim_state]
    }

    pub fn state_mut(&mut self, k: usize) -> &mut [f64] {
        &mut self.states[k * self.dim_state..(k + 1) * self.dim_state]
    }

    pub fn action(&self, k: usize) -> &[f64] {
        &self.actions[k * self.dim_action..(k + 1) * self.dim_action]
    }

    pub fn action_mut(&mut self, k: usize) -> &mut [f64] {
        &mut self.actions[k * self.dim_action..(k + 1) * self.dim_action]
    }

    /// True if the flat buffers match the declared shape.
    pub fn is_consistent(&self) -> bool {
        self.times.len() == self.horizon
            && self.states.len() == self.horizon * self.dim_state
            && self.actions.len() == self.horizon * self.dim_action
    }
}
