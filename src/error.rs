use thiserror::Error;

/// Failures that abort one unit of work: a playlist extraction, or the
/// transformation of one pending raw object.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("token exchange failed: {0}")]
    Auth(String),

    #[error("invalid playlist identifier: {0}")]
    InvalidIdentifier(String),

    /// A trigger payload that does not decode.
    #[error("invalid trigger payload: {0}")]
    InvalidEvent(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("storage operation failed on {key}: {message}")]
    Persistence { key: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// A pending object that does not decode as a raw extraction.
    #[error("malformed raw object {key}: {message}")]
    MalformedRaw { key: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl EtlError {
    pub fn persistence(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        EtlError::Persistence {
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// Stable identifier used in error records and handler responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::Auth(_) => "AUTH_ERROR",
            EtlError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            EtlError::InvalidEvent(_) => "INVALID_EVENT",
            EtlError::Extraction(_) => "EXTRACTION_ERROR",
            EtlError::Persistence { .. } => "PERSISTENCE_ERROR",
            EtlError::Config(_) => "CONFIG_ERROR",
            EtlError::MalformedRaw { .. } => "MALFORMED_RAW",
            EtlError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Everything except `Internal` is a recognized pipeline failure.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, EtlError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
