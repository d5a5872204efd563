//! # State Snapshot
//!
//! Latest known state, near-term target and final target. Each field group is written by the
//! gateway as messages arrive and read by the control loop. There is no queueing: a new message on
//! a channel overwrites the previous value.
//!
//! Each field group sits behind its own lock, so a reader always sees a complete group even if
//! writers run on another thread. Groups are not read atomically with respect to each other, which
//! matches the lack of ordering between channels.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use serde::Deserialize;

use crate::translate::{RobotState, TargetState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shared latest-value store for the inbound channels.
#[derive(Debug, Default)]
pub struct StateSnapshot {
    state: Mutex<Option<RobotState>>,
    target: Mutex<Option<TargetState>>,
    final_target: Mutex<Option<TargetState>>,
}

/// Targets used until the first target messages arrive.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TargetDefaults {
    pub target: TargetState,
    pub final_target: TargetState,
}

/// A copy of the snapshot taken at the start of a loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotView {
    pub state: RobotState,
    pub target: TargetState,
    pub final_target: TargetState,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current state.
    ///
    /// A state older than the one already held is dropped so the state time never goes backwards.
    /// Returns `true` if the state was stored.
    pub fn update_state(&self, state: RobotState) -> bool {
        let mut current = lock(&self.state);

        if let Some(ref c) = *current {
            if state.utime < c.utime {
                debug!(
                    "Dropping out of order state (utime {} < {})",
                    state.utime, c.utime
                );
                return false;
            }
        }

        *current = Some(state);
        true
    }

    /// Overwrite the near-term target.
    pub fn update_target(&self, target: TargetState) {
        *lock(&self.target) = Some(target);
    }

    /// Overwrite the final target.
    pub fn update_final_target(&self, target: TargetState) {
        *lock(&self.final_target) = Some(target);
    }

    /// True once at least one state message has been stored.
    pub fn has_state(&self) -> bool {
        lock(&self.state).is_some()
    }

    /// Take a copy of the snapshot.
    ///
    /// Returns `None` until a state has been received. Targets which have not been received yet
    /// are taken from `defaults`.
    pub fn view(&self, defaults: &TargetDefaults) -> Option<SnapshotView> {
        let state = (*lock(&self.state))?;

        Some(SnapshotView {
            state,
            target: lock(&self.target).unwrap_or(defaults.target),
            final_target: lock(&self.final_target).unwrap_or(defaults.final_target),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Lock a field group. A writer panicking mid-update cannot leave a group half written since each
/// group is replaced whole, so a poisoned lock is still safe to read.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
