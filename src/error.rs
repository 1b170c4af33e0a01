//! Error types for camera lifecycle and pipeline operations

use thiserror::Error;

/// Result type for camera operations
pub type Result<T> = std::result::Result<T, CameraError>;

/// Error type for the camera session and its collaborators
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device enumeration was empty or the identifier could not be resolved
    #[error("no matching device: {0}")]
    NotFound(String),

    /// An underlying driver call failed, carries the vendor error code
    #[error("{op} failed! ErrorCode[{code}]")]
    Driver { op: &'static str, code: i32 },

    /// One or more feature writes were rejected during a best-effort
    /// configure pass; every remaining feature was still attempted
    #[error("feature writes rejected: {0:?}")]
    FeatureRejected(Vec<String>),

    /// Lite reset requested while the configuration source is a profile file
    #[error("lite reset requires inline parameters, not a profile file")]
    UnsupportedSource,

    /// Operation issued on a terminated session
    #[error("session is terminated")]
    SessionClosed,

    /// The reconnect retry budget is used up; the session is dead
    #[error("device did not come back after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Operation requires an open device handle
    #[error("no open device handle")]
    NotOpen,

    /// Configuration file could not be read
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("config parse failed: {0}")]
    Config(#[from] toml::de::Error),
}
