//! Model Server - serves predictors as long-lived consumers of a stream broker.
//!
//! Each configured model gets a [`ModelServer`] that pulls inputs from
//! `model_server.<name>.<major>.<minor>.inputs` and publishes predictions to
//! the matching `outputs` topic, through any [`Broker`] implementation.

pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod predictor;
pub mod server;
pub mod shutdown;
pub mod test_util;

pub use broker::{handler_fn, Broker, MessageHandler, ProvisionReport};
pub use config::{BrokerKind, Config};
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use predictor::{PredictionError, Predictor, PredictorRegistry};
pub use server::{ModelServer, ServerState};
