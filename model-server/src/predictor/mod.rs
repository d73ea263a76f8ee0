//! Predictor interface.
//!
//! Model implementations live outside this crate; the server only needs their
//! identity and a synchronous prediction function.

mod registry;

pub use registry::{PredictorFactory, PredictorRegistry};

use serde_json::Value;
use stream_serve_common::ModelIdentity;

/// Failure raised by a predictor for a single input.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct PredictionError(pub String);

impl PredictionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A loaded model.
///
/// Prediction is synchronous and runs on the serving task, so a slow model
/// delays its own pipeline's next pull.
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    fn major_version(&self) -> u32;

    fn minor_version(&self) -> u32;

    /// Map a decoded input message to a prediction.
    fn predict(&self, input: &Value) -> Result<Value, PredictionError>;

    fn identity(&self) -> ModelIdentity {
        ModelIdentity::new(self.name(), self.major_version(), self.minor_version())
    }
}

/// Built-in predictor that returns its input unchanged.
pub struct EchoPredictor;

impl Predictor for EchoPredictor {
    fn name(&self) -> &str {
        "echo"
    }

    fn major_version(&self) -> u32 {
        0
    }

    fn minor_version(&self) -> u32 {
        1
    }

    fn predict(&self, input: &Value) -> Result<Value, PredictionError> {
        Ok(input.clone())
    }
}
