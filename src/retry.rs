//! Retries as a decorator around a [`PageSource`]. The pool itself never
//! retries, wrap the source when failed pages should be attempted again.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::source::{PageRequest, PageSource};
use crate::{warn_time, RemoteError};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Decides whether a failure is worth another attempt.
pub trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for StatusCode {
    fn should_retry(&self) -> bool {
        self.is_server_error()
            || *self == StatusCode::REQUEST_TIMEOUT
            || *self == StatusCode::TOO_MANY_REQUESTS
    }
}

impl RetryExt for reqwest::Error {
    fn should_retry(&self) -> bool {
        if self.is_timeout() {
            true
        } else if self.is_connect()
            || self.is_body()
            || self.is_decode()
            || self.is_builder()
            || self.is_redirect()
        {
            false
        } else if let Some(status) = self.status() {
            status.should_retry()
        } else {
            source_error::<io::Error>(self).is_some_and(should_retry_io)
        }
    }
}

impl RetryExt for RemoteError {
    fn should_retry(&self) -> bool {
        match self {
            RemoteError::Status(status) => status.should_retry(),
            RemoteError::Transport(e) => e.should_retry(),
            RemoteError::Timeout(_) => true,
            RemoteError::Decode(_) | RemoteError::Panicked(_) | RemoteError::Other(_) => false,
        }
    }
}

fn should_retry_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::TimedOut
    )
}

/// Walks the source chain looking for an error of type `T`.
fn source_error<T: std::error::Error + 'static>(err: &dyn std::error::Error) -> Option<&T> {
    let mut source = err.source();
    while let Some(err) = source {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }
        source = err.source();
    }
    None
}

/// Re-fetches retryable failures with exponential backoff:
/// `base_delay`, `2 * base_delay`, `4 * base_delay`, ...
#[derive(Debug, Clone)]
pub struct Retry<S> {
    inner: S,
    max_retries: u32,
    base_delay: Duration,
}

impl<S: PageSource> Retry<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[async_trait]
impl<S: PageSource> PageSource for Retry<S> {
    type Item = S::Item;

    async fn fetch(&self, request: PageRequest) -> Result<Vec<Self::Item>, RemoteError> {
        let mut attempt = 0;
        loop {
            match self.inner.fetch(request).await {
                Err(e) if attempt < self.max_retries && e.should_retry() => {
                    let delay = self.delay_for(attempt);
                    warn_time!(
                        "Retrying {} in {:?} (attempt {}/{}): {}",
                        request,
                        delay,
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                res => return res,
            }
        }
    }
}
