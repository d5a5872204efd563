//! Host platform utility functions

use std::{env, path::PathBuf};

/// Name of the environment variable pointing at the software root directory.
pub const SW_ROOT_ENV_VAR: &str = "MPC_BRIDGE_ROOT";

/// Get the software root directory, which holds the `params` and `sessions` directories.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}
