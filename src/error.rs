//! Error types for house-photo-dl
//!
//! This module provides the error taxonomy shared by the service client and the
//! download pipeline:
//! - [`Error`] - what went wrong in a single operation (HTTP, decoding, disk I/O)
//! - [`Failure`] - an [`Error`] tagged with the pipeline stage and the unit of
//!   work that produced it, as reported to the coordinator

use thiserror::Error;

/// Result type alias for house-photo-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for house-photo-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "NUM_PAGES")
        key: Option<String>,
    },

    /// The remote service answered with a non-200 status code
    #[error("non-200 return status code: {code}")]
    RemoteStatus {
        /// HTTP status code of the (last) response
        code: u16,
    },

    /// Connection-level failure (DNS, refused, reset, timeout)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The page response body was not the expected JSON document
    #[error("error decoding response body: {0}")]
    Decoding(#[from] serde_json::Error),

    /// I/O error while reading a response body or writing a photo file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The batch channel was closed before a fetched page could be forwarded
    #[error("record batch channel closed")]
    ChannelClosed,

    /// A spawned task panicked or was aborted
    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// HTTP status code carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::RemoteStatus { code } => Some(*code),
            Error::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::TaskPanicked(e.to_string())
    }
}

/// Pipeline stage that produced a [`Failure`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Retrieving a page of house records
    Fetch,
    /// Retrieving and storing a house photo
    Download,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Download => write!(f, "download"),
        }
    }
}

/// An error reported by a pipeline task, tagged with where it happened
#[derive(Debug, Error)]
#[error("{stage} failed ({context}): {error}")]
pub struct Failure {
    /// Stage that produced the error
    pub stage: Stage,
    /// Unit of work, e.g. "page 3" or "house 17"
    pub context: String,
    /// The underlying error
    #[source]
    pub error: Error,
}

impl Failure {
    /// Failure of the fetch task for `page`
    pub fn fetch(page: u32, error: Error) -> Self {
        Self {
            stage: Stage::Fetch,
            context: format!("page {page}"),
            error,
        }
    }

    /// Failure of the download task for house `id`
    pub fn download(id: i64, error: Error) -> Self {
        Self {
            stage: Stage::Download,
            context: format!("house {id}"),
            error,
        }
    }
}
