//! # MPC Messages
//!
//! Messages exchanged between the bridge, the state estimator (the C3 controller side) and the
//! downstream trajectory tracker. All frames on the wire take the form `"<CHANNEL> <json>"`, the
//! channel acting as the zmq subscription topic.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize, de::DeserializeOwned};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of elements in a full C3 state vector (state channel).
pub const C3_STATE_LEN: usize = 19;

/// Minimum number of elements in a C3 target vector (target and final target channels).
pub const C3_TARGET_LEN: usize = 10;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A timestamped C3 state vector, as published by the estimator on the state and target channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct C3StateMsg {
    /// Timestamp of the state in microseconds
    pub utime: i64,

    /// Flat state vector in the estimator's ordering
    pub state: Vec<f64>,
}

/// One named, fixed-dimension time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryBlock {
    pub trajectory_name: String,

    /// Number of points in the series, equal to the planner horizon
    pub num_points: usize,

    /// Number of data dimensions
    pub num_datatypes: usize,

    /// Timestamp of each point in seconds
    pub time_vec: Vec<f64>,

    /// Data indexed as `datapoints[dimension][point]`
    pub datapoints: Vec<Vec<f64>>,

    /// Label of each data dimension
    pub datatypes: Vec<String>,
}

/// A bundle of trajectory blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTraj {
    pub num_trajectories: usize,
    pub trajectory_names: Vec<String>,
    pub trajectories: Vec<TrajectoryBlock>,
}

/// A timestamped bundle of trajectory blocks, published on the trajectory channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedSavedTraj {
    /// Timestamp in microseconds, same convention as [`C3StateMsg::utime`]
    pub utime: i64,

    pub saved_traj: SavedTraj,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("The frame has no channel prefix")]
    MissingChannel,

    #[error("Could not serialize the message: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the message on channel {0}: {1}")]
    DeserializeError(String, serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajectoryBlock {
    /// Create a zeroed block for the given labels and number of points.
    pub fn zeroed(name: &str, labels: &[&str], num_points: usize) -> Self {
        Self {
            trajectory_name: name.into(),
            num_points,
            num_datatypes: labels.len(),
            time_vec: vec![0.0; num_points],
            datapoints: vec![vec![0.0; num_points]; labels.len()],
            datatypes: labels.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl SavedTraj {
    /// Bundle the given blocks, keeping the name list in step with the blocks.
    pub fn from_blocks(trajectories: Vec<TrajectoryBlock>) -> Self {
        Self {
            num_trajectories: trajectories.len(),
            trajectory_names: trajectories
                .iter()
                .map(|t| t.trajectory_name.clone())
                .collect(),
            trajectories,
        }
    }

    /// Get a block by name.
    pub fn block(&self, name: &str) -> Option<&TrajectoryBlock> {
        self.trajectories.iter().find(|t| t.trajectory_name == name)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Encode a message as a `"<CHANNEL> <json>"` frame.
pub fn encode_frame<T: Serialize>(channel: &str, msg: &T) -> Result<String, FrameError> {
    let json = serde_json::to_string(msg).map_err(FrameError::SerializationError)?;

    Ok(format!("{} {}", channel, json))
}

/// Split a frame into its channel and JSON payload.
pub fn split_frame(frame: &str) -> Result<(&str, &str), FrameError> {
    match frame.split_once(' ') {
        Some((channel, payload)) if !channel.is_empty() => Ok((channel, payload)),
        _ => Err(FrameError::MissingChannel),
    }
}

/// Decode the JSON payload of a frame received on `channel`.
pub fn decode_payload<T: DeserializeOwned>(channel: &str, payload: &str) -> Result<T, FrameError> {
    serde_json::from_str(payload).map_err(|e| FrameError::DeserializeError(channel.into(), e))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_split() {
        let msg = C3StateMsg {
            utime: 1_500_000,
            state: vec![0.5; C3_STATE_LEN],
        };

        let frame = encode_frame("C3_ACTUAL", &msg).unwrap();
        assert!(frame.starts_with("C3_ACTUAL {"));

        let (channel, payload) = split_frame(&frame).unwrap();
        assert_eq!(channel, "C3_ACTUAL");

        let decoded: C3StateMsg = decode_payload(channel, payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_frame_without_channel() {
        assert!(matches!(split_frame("{}"), Err(FrameError::MissingChannel)));
        assert!(matches!(split_frame(" {}"), Err(FrameError::MissingChannel)));
    }

    #[test]
    fn test_bad_payload_names_channel() {
        let err = decode_payload::<C3StateMsg>("C3_TARGET", "{\"utime\": 1}").unwrap_err();
        assert!(err.to_string().contains("C3_TARGET"));
    }

    #[test]
    fn test_saved_traj_names_follow_blocks() {
        let traj = SavedTraj::from_blocks(vec![
            TrajectoryBlock::zeroed("a", &["x", "y", "z"], 4),
            TrajectoryBlock::zeroed("b", &["qw", "qx", "qy", "qz"], 4),
        ]);

        assert_eq!(traj.num_trajectories, 2);
        assert_eq!(traj.trajectory_names, vec!["a", "b"]);
        assert_eq!(traj.block("b").unwrap().num_datatypes, 4);
        assert_eq!(traj.block("b").unwrap().datapoints[3].len(), 4);
        assert!(traj.block("c").is_none());
    }
}
