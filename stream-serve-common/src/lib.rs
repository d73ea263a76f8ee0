//! Stream Serve Common Types
//!
//! Shared types used by both the model-server and the stream-tools CLI.

pub mod identity;
pub mod message;
pub mod topic;

pub use identity::ModelIdentity;
pub use topic::{topic_name, topics_for, Direction, TOPIC_PREFIX};
