//! # Bridge library.
//!
//! This library allows other crates in the workspace, and the tests, to access the items which make
//! up the MPC bridge executable.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Control loop driver - pumps messages, plans and publishes, once per tick
pub mod driver;

/// Message gateway - subscribes to the estimator channels and publishes trajectories
pub mod gateway;

/// Trajectory packer - slices planner trajectories into named blocks
pub mod packer;

/// Executable parameters
pub mod params;

/// Planning control - assembles the planner state and runs one planning cycle
pub mod plan_ctrl;

/// Planner interface and the sampling planner
pub mod planner;

/// State snapshot - latest state and targets shared with the control loop
pub mod snapshot;

/// State translation between the estimator and planner conventions
pub mod translate;
