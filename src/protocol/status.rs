//! Text-protocol status tokens, sentinel lines, and the shared error taxonomy.

use thiserror::Error;

// --- Status tokens (text protocol) ---

pub const OK_200: &str = "OK_200";
pub const OK_201: &str = "OK_201";
pub const ERR_400: &str = "ERR_400";
pub const ERR_403: &str = "ERR_403";
pub const ERR_404: &str = "ERR_404";
pub const ERR_409: &str = "ERR_409";
pub const ERR_500: &str = "ERR_500";

// --- Sentinel lines terminating multi-line responses ---

pub const END_OF_FILE: &str = "END_OF_FILE";
pub const END_OF_CHECKPOINT: &str = "END_OF_CHECKPOINT";
pub const END_OF_LIST: &str = "END_OF_LIST";
pub const END_OF_REQUESTS: &str = "END_OF_REQUESTS";
pub const STREAM_COMPLETE: &str = "STREAM_COMPLETE";
pub const STREAM_STOPPED: &str = "STREAM_STOPPED";
pub const STREAM_PAUSED: &str = "STREAM_PAUSED";
pub const STREAM_RESUMED: &str = "STREAM_RESUMED";

/// Protocol-level failure, carrying the operator-facing message.
///
/// The same taxonomy renders on both protocol surfaces: as an `ERROR` frame
/// with the message in the name field on the binary link, and as an
/// `ERR_4xx`/`ERR_5xx` line on the text link.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed frame, missing argument, invalid payload.
    #[error("{0}")]
    BadRequest(String),
    /// ACL denies the operation or the caller is not the owner.
    #[error("{0}")]
    Unauthorized(String),
    /// File, checkpoint, or access request absent.
    #[error("{0}")]
    NotFound(String),
    /// Sentence locked, duplicate tag, duplicate pending request.
    #[error("{0}")]
    Conflict(String),
    /// Allocation or I/O failure on the serving side.
    #[error("{0}")]
    Internal(String),
}

impl StoreError {
    pub fn text_code(&self) -> &'static str {
        match self {
            StoreError::BadRequest(_) => ERR_400,
            StoreError::Unauthorized(_) => ERR_403,
            StoreError::NotFound(_) => ERR_404,
            StoreError::Conflict(_) => ERR_409,
            StoreError::Internal(_) => ERR_500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StoreError::BadRequest(m)
            | StoreError::Unauthorized(m)
            | StoreError::NotFound(m)
            | StoreError::Conflict(m)
            | StoreError::Internal(m) => m,
        }
    }

    /// Renders the error as a single text-protocol reply line.
    pub fn text_line(&self) -> String {
        format!("{} {}", self.text_code(), self.message())
    }
}
