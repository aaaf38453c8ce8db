//! Error types for the OneDrive client.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the transport layer, before any payload is inspected.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("socket failure: {0}")]
    Socket(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response is not JSON: {0}")]
    InvalidBody(String),
}

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Socket(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("API error {code} for {path}: {message}")]
    Api {
        path: String,
        code: String,
        message: String,
    },

    #[error("unexpected payload for {path}: expected {expected}")]
    UnexpectedPayload { path: String, expected: &'static str },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("filesystem error: {0}")]
    Fs(#[from] onedrive_fs::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid remote path: {0:?}")]
    InvalidPath(String),

    #[error("upload session unavailable after {attempts} attempts: {reason}")]
    SessionUnavailable { attempts: u32, reason: String },

    #[error("upload did not converge after {count} restarts")]
    MaxRestartsExceeded { count: u32 },

    #[error("no download URL for item {0}")]
    MissingDownloadUrl(String),
}

impl Error {
    /// Whether this is the API's `itemNotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { code, .. } if code == crate::data::ITEM_NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
