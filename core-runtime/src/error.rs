use thiserror::Error;

/// Errors raised while assembling the runtime, before either component runs.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or out-of-range setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// No host bridge and no desktop default for it
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A global `tracing` subscriber is already installed
    #[error("Logging already initialized: {0}")]
    LoggingInitialized(String),
}

pub type Result<T> = std::result::Result<T, Error>;
