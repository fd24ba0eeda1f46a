//! Error types for the Tumblr exporter

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP transport unavailable: {0}")]
    CapabilityMissing(String),

    #[error("Unable to create secure session lock: {0}")]
    SecureStorage(String),

    #[error("Session is locked by another export")]
    SessionLocked,

    #[error("Unexpected page layout: {0}")]
    ProtocolShape(String),

    #[error("Invalid JSON response: {0}")]
    ProtocolResponse(String),

    #[error("Login failed: {0}")]
    AuthRejected(String),

    #[error("Maximum login attempts exceeded ({0})")]
    AuthExhausted(u32),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Could not write to {}: {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
