//! # Trajectory Packer
//!
//! Slices the planner's flat trajectory into the named blocks the trajectory consumer expects. The
//! blocks and where each one is read from are listed in [`ACTOR_BLOCKS`] and [`OBJECT_BLOCKS`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::mpc::{SavedTraj, TimestampedSavedTraj, TrajectoryBlock};

use crate::planner::{Trajectory, NQ, NU, QPOS_ACTOR_POS, QPOS_OBJECT_POS, QPOS_OBJECT_QUAT};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Blocks of the actor bundle.
pub const ACTOR_BLOCKS: [BlockSpec; 2] = [
    BlockSpec {
        name: "end_effector_force_target",
        source: BlockSource::Action { offset: 0 },
        labels: &["fx", "fy", "fz"],
    },
    BlockSpec {
        name: "end_effector_position_target",
        source: BlockSource::State {
            offset: QPOS_ACTOR_POS,
        },
        labels: &["x", "y", "z"],
    },
];

/// Blocks of the object bundle.
pub const OBJECT_BLOCKS: [BlockSpec; 2] = [
    BlockSpec {
        name: "object_position_target",
        source: BlockSource::State {
            offset: QPOS_OBJECT_POS,
        },
        labels: &["x", "y", "z"],
    },
    BlockSpec {
        name: "object_orientation_target",
        source: BlockSource::State {
            offset: QPOS_OBJECT_QUAT,
        },
        labels: &["qw", "qx", "qy", "qz"],
    },
];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Description of one output block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockSpec {
    pub name: &'static str,
    pub source: BlockSource,

    /// One label per dimension
    pub labels: &'static [&'static str],
}

/// Packs trajectories into the actor and object bundles.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryPacker {
    /// Gain converting normalised commands into force
    action_gain: f64,
}

/// The two bundles built from one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedTrajectories {
    pub actor: TimestampedSavedTraj,
    pub object: TimestampedSavedTraj,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Where a block's data comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockSource {
    /// Actions, starting at `offset`, scaled by the action gain
    Action { offset: usize },

    /// States, starting at `offset`, copied verbatim
    State { offset: usize },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PackError {
    #[error("Trajectory buffers do not match its declared shape")]
    InconsistentShape,

    #[error("Trajectory state dimension {0} is smaller than the configuration size")]
    StateTooSmall(usize),

    #[error("Trajectory action dimension {0} is smaller than the command size")]
    ActionTooSmall(usize),

    #[error("Non-finite value in block {block} at point {point}")]
    NonFinite { block: &'static str, point: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajectoryPacker {
    pub fn new(action_gain: f64) -> Self {
        Self { action_gain }
    }

    /// Build the actor and object bundles, both stamped with `utime`.
    ///
    /// A trajectory holding any NaN or infinite time or value is rejected, the consumer could not
    /// decode its bundle.
    pub fn pack(&self, traj: &Trajectory, utime: i64) -> Result<PackedTrajectories, PackError> {
        if !traj.is_consistent() {
            return Err(PackError::InconsistentShape);
        }
        if traj.dim_state < NQ {
            return Err(PackError::StateTooSmall(traj.dim_state));
        }
        if traj.dim_action < NU {
            return Err(PackError::ActionTooSmall(traj.dim_action));
        }

        Ok(PackedTrajectories {
            actor: self.bundle(&ACTOR_BLOCKS, traj, utime)?,
            object: self.bundle(&OBJECT_BLOCKS, traj, utime)?,
        })
    }

    fn bundle(
        &self,
        specs: &[BlockSpec],
        traj: &Trajectory,
        utime: i64,
    ) -> Result<TimestampedSavedTraj, PackError> {
        let blocks = specs
            .iter()
            .map(|s| self.block(s, traj))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TimestampedSavedTraj {
            utime,
            saved_traj: SavedTraj::from_blocks(blocks),
        })
    }

    fn block(&self, spec: &BlockSpec, traj: &Trajectory) -> Result<TrajectoryBlock, PackError> {
        let mut block = TrajectoryBlock::zeroed(spec.name, spec.labels, traj.horizon);
        block.time_vec.copy_from_slice(&traj.times);

        for k in 0..traj.horizon {
            let mut finite = block.time_vec[k].is_finite();

            for (n, data) in block.datapoints.iter_mut().enumerate() {
                data[k] = match spec.source {
                    BlockSource::Action { offset } => {
                        self.action_gain * traj.action(k)[offset + n]
                    }
                    BlockSource::State { offset } => traj.state(k)[offset + n],
                };
                finite &= data[k].is_finite();
            }

            if !finite {
                return Err(PackError::NonFinite {
                    block: spec.name,
                    point: k,
                });
            }
        }

        Ok(block)
    }
}

impl PackedTrajectories {
    /// First point of the force block, fed forward as the next solve's action.
    pub fn first_force(&self) -> [f64; NU] {
        let mut force = [0.0; NU];
        if let Some(block) = self.actor.saved_traj.block(ACTOR_BLOCKS[0].name) {
            for (f, data) in force.iter_mut().zip(block.datapoints.iter()) {
                *f = data.first().copied().unwrap_or(0.0);
            }
        }
        force
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
