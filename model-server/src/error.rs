//! Error types for the model server.

use crate::server::ServerState;

/// Error types for broker and serving operations.
///
/// Topic provisioning conflicts are deliberately absent: they are reported in
/// a [`ProvisionReport`](crate::broker::ProvisionReport) instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} has not been started yet")]
    HandleNotReady(&'static str),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Failed to decode message: {0}")]
    Decode(serde_json::Error),

    #[error("Failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("Prediction failed for {model}: {message}")]
    Prediction { model: String, message: String },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid credentials: {0}")]
    Credentials(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{model} cannot {action} while {state}")]
    InvalidState {
        model: String,
        action: &'static str,
        state: ServerState,
    },
}

impl Error {
    /// Map an HTTP transport failure, treating connection errors as unavailability.
    pub(crate) fn transport(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Error::BackendUnavailable(e.to_string())
        } else {
            Error::Backend(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
