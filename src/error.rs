use thiserror::Error;

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} is {current}; cannot {action}")]
    InvalidState {
        entity: &'static str,
        id: String,
        current: String,
        action: &'static str,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl EscrowError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        current: impl ToString,
        action: &'static str,
    ) -> Self {
        Self::InvalidState {
            entity,
            id: id.to_string(),
            current: current.to_string(),
            action,
        }
    }
}

pub type Result<T> = std::result::Result<T, EscrowError>;
