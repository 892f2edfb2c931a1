//! Stellarium error types

use pushto_core::CoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors from the telescope-control link and the remote-control client
#[derive(Debug, Error)]
pub enum StellariumError {
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("Timestamp out of range: {0}")]
    BadTimestamp(String),

    #[error("No connection from Stellarium within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Handshake with Stellarium failed: {0}")]
    HandshakeFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("Connection refused: {url} - {cause}")]
    ConnectionRefused { url: String, cause: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for Stellarium operations
pub type StellariumResult<T> = Result<T, StellariumError>;

impl From<reqwest::Error> for StellariumError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            let url = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            StellariumError::ConnectionRefused {
                url,
                cause: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            StellariumError::HttpError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            StellariumError::RequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StellariumError {
    fn from(err: serde_json::Error) -> Self {
        StellariumError::ParseError(err.to_string())
    }
}
