//! Core error types

use thiserror::Error;

/// Errors raised by the push-to core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Encoder configuration cannot produce angles
    #[error("Invalid encoder configuration: {0}")]
    InvalidEncoderConfig(String),

    /// Pointing model inversion did not reach the target
    #[error(
        "Pointing model inversion did not converge for azi={azimuth:.6}, alt={altitude:.6} after {iterations} iterations (residual {residual:e} deg)"
    )]
    PointingModelNotConverged {
        azimuth: f64,
        altitude: f64,
        iterations: u32,
        residual: f64,
    },

    /// Message could not be encoded or decoded
    #[error("Message codec error: {0}")]
    MessageCodec(#[from] serde_json::Error),

    /// Encoded message has no `type` discriminator
    #[error("Message has no type field: {0}")]
    MissingMessageType(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
