//! # Planner
//!
//! The trajectory optimiser is an external collaborator. The control loop only needs to hand it a
//! state, ask for one optimisation over a horizon and read back the best trajectory, which is what
//! the [`Planner`] trait captures.
//!
//! [`SamplingPlanner`] is the planner the executable runs by default.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod pool;
mod residual;
mod sampling;
mod trajectory;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use pool::*;
pub use residual::*;
pub use sampling::*;
pub use trajectory::*;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A fixed horizon trajectory optimiser.
pub trait Planner {
    /// Set the state the next optimisation starts from.
    fn set_state(&mut self, state: &PlannerState);

    /// Run one optimisation over `horizon` points. Blocks until complete.
    fn optimize_policy(&mut self, horizon: usize, pool: &WorkerPool) -> Result<(), PlannerError>;

    /// The best trajectory found by the last optimisation, if any.
    fn best_trajectory(&self) -> Option<&Trajectory>;

    /// Cost of the best trajectory, for planners which expose it.
    fn best_cost(&self) -> Option<f64> {
        None
    }
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("No residual function has been registered with the planner")]
    NoResidual,

    #[error("Cannot optimise over a horizon of fewer than 2 points (got {0})")]
    EmptyHorizon(usize),

    #[error("Every candidate trajectory had a non-finite cost")]
    NonFiniteCost,

    #[error("The planner timestep must be positive and finite (got {0})")]
    InvalidTimestep(f64),
}
