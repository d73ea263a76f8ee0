//! Predictor registry for loading models by name.

use std::collections::HashMap;

use super::{EchoPredictor, Predictor};
use crate::error::{Error, Result};

/// Constructs a fresh predictor instance.
pub type PredictorFactory = Box<dyn Fn() -> Box<dyn Predictor> + Send + Sync>;

/// Registry of known predictors.
///
/// Every `load` builds a new instance, so pipelines never share a predictor.
pub struct PredictorRegistry {
    factories: HashMap<String, PredictorFactory>,
}

impl PredictorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in predictors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", || Box::new(EchoPredictor));
        registry
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Predictor> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Load the predictor registered under `name`.
    pub fn load(&self, name: &str) -> Result<Box<dyn Predictor>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))?;
        Ok(factory())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PredictorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
