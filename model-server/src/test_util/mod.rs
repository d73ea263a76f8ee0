//! In-process backends and predictors for exercising the serving pipeline
//! without a running broker.

mod memory_log;

pub use memory_log::MemoryLog;

use serde_json::Value;
use stream_serve_common::ModelIdentity;

use crate::broker::{Broker, LogBroker};
use crate::predictor::{PredictionError, Predictor};

/// A fresh log broker over `log`, with no handles.
pub fn memory_broker(log: &MemoryLog) -> Box<dyn Broker> {
    Box::new(LogBroker::new(log.clone()))
}

type PredictFn = dyn Fn(&Value) -> Result<Value, PredictionError> + Send + Sync;

/// Predictor backed by a closure.
pub struct FnPredictor {
    identity: ModelIdentity,
    predict: Box<PredictFn>,
}

impl FnPredictor {
    pub fn new<F>(identity: ModelIdentity, predict: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, PredictionError> + Send + Sync + 'static,
    {
        Self {
            identity,
            predict: Box::new(predict),
        }
    }
}

impl Predictor for FnPredictor {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn major_version(&self) -> u32 {
        self.identity.major_version
    }

    fn minor_version(&self) -> u32 {
        self.identity.minor_version
    }

    fn predict(&self, input: &Value) -> Result<Value, PredictionError> {
        (self.predict)(input)
    }
}

/// `f(x) = x["label"] + 1`, failing when the label is missing.
pub fn label_increment(input: &Value) -> Result<Value, PredictionError> {
    input
        .get("label")
        .and_then(Value::as_i64)
        .map(|label| Value::from(label + 1))
        .ok_or_else(|| PredictionError::new("input has no integer label"))
}
