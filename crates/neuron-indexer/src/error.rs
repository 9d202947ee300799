use neuron_core::NeuronCoreError;
use neuron_sdk::NeuronSdkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Database error: {0}")]
    Database(tokio_rusqlite::Error),

    #[error(transparent)]
    Sdk(#[from] NeuronSdkError),

    #[error(transparent)]
    Core(#[from] NeuronCoreError),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("Checkpoint cannot move back from {current} to {requested} without a reset")]
    CheckpointRegression { current: u64, requested: u64 },

    #[error("Chain info unavailable: {0}")]
    ChainInfoUnavailable(String),

    #[error("Block {0} not found on the node")]
    MissingBlock(u64),
}

impl IndexerError {
    /// Whether the sync loop should wait and retry instead of stopping.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexerError::Database(_) | IndexerError::MissingBlock(_) => true,
            IndexerError::Sdk(e) => {
                e.is_connectivity() || matches!(e, NeuronSdkError::Rpc { .. })
            }
            _ => false,
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, IndexerError::Sdk(e) if e.is_connectivity())
    }

    /// Wraps an error so it can leave a `Connection::call` closure and be recovered intact.
    pub(crate) fn into_db(self) -> tokio_rusqlite::Error {
        tokio_rusqlite::Error::Other(Box::new(self))
    }
}

impl From<tokio_rusqlite::Error> for IndexerError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Other(inner) => match inner.downcast::<IndexerError>() {
                Ok(indexer_error) => *indexer_error,
                Err(other) => IndexerError::Database(tokio_rusqlite::Error::Other(other)),
            },
            other => IndexerError::Database(other),
        }
    }
}

impl From<rusqlite::Error> for IndexerError {
    fn from(err: rusqlite::Error) -> Self {
        IndexerError::Database(err.into())
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Failures answered to a worker caller as an error response.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Sync has not been started")]
    NotStarted,

    #[error("Unknown channel {0:?}")]
    UnknownChannel(String),

    #[error("Invalid {channel} message: {reason}")]
    InvalidMessage { channel: String, reason: String },

    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error("Could not encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl WorkerError {
    /// Stable code for the `content.code` field of error responses.
    pub fn code(&self) -> &'static str {
        match self {
            WorkerError::NotStarted => "not_started",
            WorkerError::UnknownChannel(_) => "unknown_channel",
            WorkerError::InvalidMessage { .. } => "invalid_message",
            WorkerError::Indexer(e) if e.is_connectivity() => "node_unreachable",
            WorkerError::Indexer(_) => "sync_error",
            WorkerError::Encode(_) => "internal",
        }
    }
}

impl From<NeuronSdkError> for WorkerError {
    fn from(err: NeuronSdkError) -> Self {
        WorkerError::Indexer(err.into())
    }
}

impl From<NeuronCoreError> for WorkerError {
    fn from(err: NeuronCoreError) -> Self {
        WorkerError::Indexer(err.into())
    }
}
