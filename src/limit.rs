//! Request-rate limiting as a [`PageSource`] decorator.
//!
//! The pool caps how many requests run at once, this caps how many start per
//! time period. Both can be combined.

use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::source::{PageRequest, PageSource};
use crate::{Error, RemoteError, Result};

/// At most `max_rate` requests per `time_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_rate: NonZeroU32,
    pub time_period: Duration,
}

impl RateLimit {
    pub fn new(max_rate: u32, time_period: Duration) -> Result<Self> {
        let max_rate = NonZeroU32::new(max_rate).ok_or_else(|| {
            Error::InvalidConfig("rate limit must allow at least 1 request".into())
        })?;
        if time_period.is_zero() {
            return Err(Error::InvalidConfig(
                "rate limit period must be longer than zero".into(),
            ));
        }
        Ok(Self {
            max_rate,
            time_period,
        })
    }

    /// Token bucket holding `max_rate` tokens, refilled one every `time_period / max_rate`.
    fn quota(&self) -> Result<Quota> {
        let replenish = self.time_period / self.max_rate.get();
        Quota::with_period(replenish)
            .map(|quota| quota.allow_burst(self.max_rate))
            .ok_or_else(|| Error::InvalidConfig("rate limit period is too short".into()))
    }
}

/// Parses `"<max_rate>/<period in ms>"`, e.g. `100/60000`.
impl FromStr for RateLimit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfig(format!("expected <max_rate>/<period_ms>, got {s:?}"));
        let (rate, period) = s.split_once('/').ok_or_else(invalid)?;
        let rate = rate.trim().parse().map_err(|_| invalid())?;
        let period_ms = period.trim().parse().map_err(|_| invalid())?;
        RateLimit::new(rate, Duration::from_millis(period_ms))
    }
}

/// Waits for a free slot in the rate limit before every fetch.
#[derive(Debug)]
pub struct RateLimited<S> {
    inner: S,
    limiter: DefaultDirectRateLimiter,
}

impl<S: PageSource> RateLimited<S> {
    pub fn new(inner: S, limit: RateLimit) -> Result<Self> {
        Ok(Self {
            inner,
            limiter: RateLimiter::direct(limit.quota()?),
        })
    }
}

#[async_trait]
impl<S: PageSource> PageSource for RateLimited<S> {
    type Item = S::Item;

    async fn fetch(
        &self,
        request: PageRequest,
    ) -> core::result::Result<Vec<Self::Item>, RemoteError> {
        self.limiter.until_ready().await;
        self.inner.fetch(request).await
    }
}
