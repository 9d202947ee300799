use neuron_core::NeuronCoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NeuronSdkError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC {method} failed with code {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Malformed RPC response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] NeuronCoreError),

    #[error("Unknown network {0}")]
    UnknownNetwork(String),

    #[error("Invalid networks file: {0}")]
    InvalidNetworksFile(String),

    #[error("Invalid transaction file: {0}")]
    InvalidTransactionFile(String),
}

impl NeuronSdkError {
    /// Errors that go away once the node is reachable again.
    pub fn is_connectivity(&self) -> bool {
        match self {
            NeuronSdkError::Transport(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NeuronSdkError>;
