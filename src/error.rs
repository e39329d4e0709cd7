use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors returned by the pool API itself. Failures of single page requests
/// never show up here, they travel through the result stream as [`RemoteError`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("The work queue is closed, no more pages can be submitted.")]
    QueueClosed,
    #[error("The work queue is full (max depth: {max}).")]
    QueueFull { max: usize },
    #[error("The pool is already running, a pool can only be run once.")]
    PoolAlreadyRunning,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("Url Error: {0}")]
    Url(#[from] url::ParseError),
}

/// Why a single page request failed.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote answered with status {0}")]
    Status(StatusCode),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("couldn't decode the page: {0}")]
    Decode(String),
    #[error("the page source panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    pub fn other(msg: impl Into<String>) -> Self {
        RemoteError::Other(msg.into())
    }
}
