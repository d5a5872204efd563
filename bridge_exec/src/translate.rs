//! # State Translator
//!
//! Maps states and targets between the estimator's convention and the planner's convention.
//!
//! The estimator lays poses out orientation-then-position and twists angular-then-linear, the
//! planner expects position-then-orientation and linear-then-angular. Every mapping here is a pure
//! index remap described by an explicit table. Values are copied verbatim, quaternions are never
//! renormalised.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::ops::Range;

use comms_if::mpc::{C3StateMsg, C3_STATE_LEN, C3_TARGET_LEN};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of elements in a pose (position 3 + scalar-first quaternion 4).
pub const POSE_LEN: usize = 7;

/// Number of elements in a twist (two 3-vectors).
pub const TWIST_LEN: usize = 6;

/// Planner pose element `i` is external pose element `POSE_TO_PLANNER[i]`.
///
/// | planner  | x | y | z | qw | qx | qy | qz |
/// |----------|---|---|---|----|----|----|----|
/// | external | 4 | 5 | 6 | 0  | 1  | 2  | 3  |
pub const POSE_TO_PLANNER: [usize; POSE_LEN] = [4, 5, 6, 0, 1, 2, 3];

/// External pose element `i` is planner pose element `POSE_TO_EXTERNAL[i]`.
///
/// | external | qw | qx | qy | qz | x | y | z |
/// |----------|----|----|----|----|---|---|---|
/// | planner  | 3  | 4  | 5  | 6  | 0 | 1 | 2 |
pub const POSE_TO_EXTERNAL: [usize; POSE_LEN] = [3, 4, 5, 6, 0, 1, 2];

/// Swaps the two halves of a twist. The table is its own inverse.
///
/// | out | 0 | 1 | 2 | 3 | 4 | 5 |
/// |-----|---|---|---|---|---|---|
/// | in  | 3 | 4 | 5 | 0 | 1 | 2 |
pub const TWIST_SWAP: [usize; TWIST_LEN] = [3, 4, 5, 0, 1, 2];

/// Offsets of each field in an estimator state or target vector.
pub mod layout {
    use std::ops::Range;

    pub const ACTOR_POS: Range<usize> = 0..3;
    pub const OBJECT_QUAT: Range<usize> = 3..7;
    pub const OBJECT_POS: Range<usize> = 7..10;
    /// Object pose block, `[quat, pos]`
    pub const OBJECT_POSE: Range<usize> = 3..10;
    pub const ACTOR_VEL: Range<usize> = 10..13;
    pub const OBJECT_ANG_VEL: Range<usize> = 13..16;
    pub const OBJECT_LIN_VEL: Range<usize> = 16..19;
    /// Object twist block, `[angular, linear]`
    pub const OBJECT_TWIST: Range<usize> = 13..19;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A state vector in the estimator's layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalState {
    pub actor_position: [f64; 3],

    /// `[qw, qx, qy, qz, x, y, z]`
    pub object_pose: [f64; POSE_LEN],

    pub actor_velocity: [f64; 3],

    /// `[wx, wy, wz, vx, vy, vz]`
    pub object_twist: [f64; TWIST_LEN],
}

/// A target vector in the estimator's layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalTarget {
    pub actor_position: [f64; 3],

    /// `[qw, qx, qy, qz, x, y, z]`
    pub object_pose: [f64; POSE_LEN],
}

/// The estimated state of the actor and object, in the planner's convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotState {
    /// Timestamp of the estimate in microseconds
    pub utime: i64,

    pub actor_position: [f64; 3],
    pub actor_velocity: [f64; 3],

    /// `[x, y, z, qw, qx, qy, qz]`
    pub object_pose: [f64; POSE_LEN],

    /// `[vx, vy, vz, wx, wy, wz]`
    pub object_twist: [f64; TWIST_LEN],
}

/// A goal for the object pose and actor position, in the planner's convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    /// `[x, y, z, qw, qx, qy, qz]`
    pub object_pose: [f64; POSE_LEN],

    pub actor_position: [f64; 3],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TranslateError {
    #[error("Expected a vector of at least {expected} elements, found {found}")]
    TooShort { expected: usize, found: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ExternalState {
    /// Read a state from the estimator's flat vector.
    pub fn from_slice(state: &[f64]) -> Result<Self, TranslateError> {
        check_len(state, C3_STATE_LEN)?;

        Ok(Self {
            actor_position: take(state, layout::ACTOR_POS),
            object_pose: take(state, layout::OBJECT_POSE),
            actor_velocity: take(state, layout::ACTOR_VEL),
            object_twist: take(state, layout::OBJECT_TWIST),
        })
    }

    /// Write the state back into the estimator's flat vector.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut state = vec![0.0; C3_STATE_LEN];
        state[layout::ACTOR_POS].copy_from_slice(&self.actor_position);
        state[layout::OBJECT_POSE].copy_from_slice(&self.object_pose);
        state[layout::ACTOR_VEL].copy_from_slice(&self.actor_velocity);
        state[layout::OBJECT_TWIST].copy_from_slice(&self.object_twist);
        state
    }
}

impl ExternalTarget {
    /// Read a target from the estimator's flat vector. Elements past the object pose are ignored.
    pub fn from_slice(target: &[f64]) -> Result<Self, TranslateError> {
        check_len(target, C3_TARGET_LEN)?;

        Ok(Self {
            actor_position: take(target, layout::ACTOR_POS),
            object_pose: take(target, layout::OBJECT_POSE),
        })
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let mut target = vec![0.0; C3_TARGET_LEN];
        target[layout::ACTOR_POS].copy_from_slice(&self.actor_position);
        target[layout::OBJECT_POSE].copy_from_slice(&self.object_pose);
        target
    }
}

impl RobotState {
    /// Build the planner-side state from an estimator state taken at `utime`.
    pub fn from_external(utime: i64, ext: &ExternalState) -> Self {
        Self {
            utime,
            actor_position: ext.actor_position,
            actor_velocity: ext.actor_velocity,
            object_pose: pose_to_planner(&ext.object_pose),
            object_twist: twist_to_planner(&ext.object_twist),
        }
    }

    /// Decode and translate a state message.
    pub fn from_msg(msg: &C3StateMsg) -> Result<Self, TranslateError> {
        Ok(Self::from_external(
            msg.utime,
            &ExternalState::from_slice(&msg.state)?,
        ))
    }

    pub fn to_external(&self) -> ExternalState {
        ExternalState {
            actor_position: self.actor_position,
            object_pose: pose_to_external(&self.object_pose),
            actor_velocity: self.actor_velocity,
            object_twist: twist_to_external(&self.object_twist),
        }
    }

    /// Timestamp of the state in seconds.
    pub fn time_s(&self) -> f64 {
        util::time::utime_to_seconds(self.utime)
    }
}

impl TargetState {
    /// Decode and translate a target message.
    pub fn from_msg(msg: &C3StateMsg) -> Result<Self, TranslateError> {
        Ok(Self::from(&ExternalTarget::from_slice(&msg.state)?))
    }

    pub fn object_position(&self) -> [f64; 3] {
        take(&self.object_pose, 0..3)
    }

    pub fn object_quat(&self) -> [f64; 4] {
        take(&self.object_pose, 3..7)
    }
}

impl From<&ExternalTarget> for TargetState {
    fn from(ext: &ExternalTarget) -> Self {
        Self {
            object_pose: pose_to_planner(&ext.object_pose),
            actor_position: ext.actor_position,
        }
    }
}

impl From<&TargetState> for ExternalTarget {
    fn from(target: &TargetState) -> Self {
        Self {
            actor_position: target.actor_position,
            object_pose: pose_to_external(&target.object_pose),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// `[quat, pos]` to `[pos, quat]`.
pub fn pose_to_planner(pose: &[f64; POSE_LEN]) -> [f64; POSE_LEN] {
    remap(pose, &POSE_TO_PLANNER)
}

/// `[pos, quat]` to `[quat, pos]`.
pub fn pose_to_external(pose: &[f64; POSE_LEN]) -> [f64; POSE_LEN] {
    remap(pose, &POSE_TO_EXTERNAL)
}

/// `[angular, linear]` to `[linear, angular]`.
pub fn twist_to_planner(twist: &[f64; TWIST_LEN]) -> [f64; TWIST_LEN] {
    remap(twist, &TWIST_SWAP)
}

/// `[linear, angular]` to `[angular, linear]`.
pub fn twist_to_external(twist: &[f64; TWIST_LEN]) -> [f64; TWIST_LEN] {
    remap(twist, &TWIST_SWAP)
}

fn remap<const N: usize>(src: &[f64; N], table: &[usize; N]) -> [f64; N] {
    let mut out = [0.0; N];
    for (o, &i) in out.iter_mut().zip(table.iter()) {
        *o = src[i];
    }
    out
}

/// Copy a range of a slice into a fixed size array. The range length must equal `N`.
pub(crate) fn take<const N: usize>(src: &[f64], range: Range<usize>) -> [f64; N] {
    let mut out = [0.0; N];
    out.copy_from_slice(&src[range]);
    out
}

fn check_len(vec: &[f64], expected: usize) -> Result<(), TranslateError> {
    if vec.len() < expected {
        return Err(TranslateError::TooShort {
            expected,
            found: vec.len(),
        });
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
