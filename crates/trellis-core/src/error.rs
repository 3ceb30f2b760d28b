use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrellisError {
    #[error("Parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict writing key {key}: stale context")]
    Conflict { key: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock acquisition timed out after {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Subscription {subscription_id} was not fully recorded: {source}")]
    IncompleteSubscribe {
        subscription_id: String,
        #[source]
        source: Box<TrellisError>,
    },

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl TrellisError {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        TrellisError::Parse {
            position,
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the same operation.
    ///
    /// The core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrellisError::Conflict { .. }
            | TrellisError::Store(_)
            | TrellisError::LockTimeout { .. } => true,
            TrellisError::IncompleteSubscribe { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TrellisError {
    fn from(err: serde_json::Error) -> Self {
        TrellisError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrellisError>;
