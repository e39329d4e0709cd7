//! Pool configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::{
    Error, Result, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_PAGE_LIMIT, DEFAULT_RESULT_CAPACITY,
};

/// Configuration of a single [`FetchPool`](crate::FetchPool) run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers, which is also the ceiling on in-flight requests.
    pub concurrency_limit: usize,

    /// Page size attached to offsets submitted through [`FetchPool::submit`](crate::FetchPool::submit).
    pub page_limit: usize,

    /// Maximum number of pending requests. `None` means unbounded.
    pub max_queue_depth: Option<usize>,

    /// Deadline applied to every single fetch. `None` leaves timeouts to the source.
    #[serde(with = "humantime_serde")]
    pub per_request_timeout: Option<Duration>,

    /// Discovery gives up after this many failed pages in a row.
    pub max_consecutive_failures: usize,

    /// Capacity of the result channel. Workers suspend on publish when it is full.
    pub result_capacity: usize,

    /// Silences the per-request log lines.
    pub quiet: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            page_limit: DEFAULT_PAGE_LIMIT,
            max_queue_depth: None,
            per_request_timeout: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            result_capacity: DEFAULT_RESULT_CAPACITY,
            quiet: false,
        }
    }
}

impl PoolConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    pub fn with_per_request_timeout(mut self, timeout: Duration) -> Self {
        self.per_request_timeout = Some(timeout);
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: usize) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    pub fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Builds a config from the defaults overridden by `FETCHPOOL_*` env variables.
    ///
    /// Errors with [`Error::InvalidConfig`] when a variable is set but doesn't parse.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str| -> Result<Option<usize>> {
            var(key)
                .map(|val| {
                    val.trim().parse::<usize>().map_err(|_| {
                        Error::InvalidConfig(format!("{key}={val:?} is not a whole number"))
                    })
                })
                .transpose()
        };
        let mut config = Self::default();

        if let Some(n) = number("FETCHPOOL_CONCURRENCY")? {
            config.concurrency_limit = n;
        }
        if let Some(n) = number("FETCHPOOL_PAGE_LIMIT")? {
            config.page_limit = n;
        }
        if let Some(n) = number("FETCHPOOL_MAX_QUEUE_DEPTH")? {
            config.max_queue_depth = Some(n);
        }
        if let Some(ms) = number("FETCHPOOL_TIMEOUT_MS")? {
            config.per_request_timeout = Some(Duration::from_millis(ms as u64));
        }
        if let Some(n) = number("FETCHPOOL_MAX_CONSECUTIVE_FAILURES")? {
            config.max_consecutive_failures = n;
        }
        if let Some(n) = number("FETCHPOOL_RESULT_CAPACITY")? {
            config.result_capacity = n;
        }
        if let Some(val) = var("FETCHPOOL_QUIET") {
            config.quiet = match val.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(Error::InvalidConfig(format!(
                        "FETCHPOOL_QUIET={val:?} is not a bool"
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(Error::InvalidConfig(
                "concurrency_limit must be at least 1".into(),
            ));
        }
        if self.page_limit == 0 {
            return Err(Error::InvalidConfig("page_limit must be at least 1".into()));
        }
        if self.max_queue_depth == Some(0) {
            return Err(Error::InvalidConfig(
                "max_queue_depth must be at least 1, leave it unset for an unbounded queue".into(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::InvalidConfig(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        if self.result_capacity == 0 {
            return Err(Error::InvalidConfig(
                "result_capacity must be at least 1".into(),
            ));
        }
        if self.per_request_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "per_request_timeout must be longer than zero".into(),
            ));
        }
        Ok(())
    }
}
