//! Topic naming convention.
//!
//! Producers and consumers find each other only through these names, so the
//! exact shape `model_server.<name>.<major>.<minor>.<direction>` must not change.

use serde::{Deserialize, Serialize};

use crate::ModelIdentity;

/// Leading component of every topic name.
pub const TOPIC_PREFIX: &str = "model_server";

/// Direction of a model topic, relative to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Data flowing into the model
    Inputs,
    /// Predictions flowing out of the model
    Outputs,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inputs => write!(f, "inputs"),
            Direction::Outputs => write!(f, "outputs"),
        }
    }
}

/// Name of a single topic for `identity` in the given direction.
pub fn topic_name(identity: &ModelIdentity, direction: Direction) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        TOPIC_PREFIX, identity.name, identity.major_version, identity.minor_version, direction
    )
}

/// Input and output topics for a model, in that order.
pub fn topics_for(identity: &ModelIdentity) -> (String, String) {
    (
        topic_name(identity, Direction::Inputs),
        topic_name(identity, Direction::Outputs),
    )
}
