use thiserror::Error;

/// Failure reported by a host capability.
///
/// The cache treats `Network` as "no connectivity" and everything else as a
/// storage fault; the sync queue counts any error as a failed attempt.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether this error came from the transport layer (connection refused,
    /// DNS failure, timeout) rather than from local storage.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
