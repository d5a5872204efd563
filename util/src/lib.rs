//! Utility library for the MPC bridge software

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod host;
pub mod logger;
pub mod params;
pub mod session;
pub mod time;
