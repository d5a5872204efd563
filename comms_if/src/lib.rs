//! # Communications interface crate.
//!
//! Provides the wire messages exchanged with the state estimator and the trajectory consumer, and
//! the networking layer they travel over.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// State, target and trajectory message definitions
pub mod mpc;

/// Network module
pub mod net;
