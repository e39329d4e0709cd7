use std::collections::BTreeSet;
use std::ops::Range;

use async_stream::stream;
use chrono::Local;
use futures::{Stream, StreamExt};

use crate::config::PoolConfig;
use crate::pool::{FetchPool, PageResult, PageStream};
use crate::source::PageSource;
use crate::{info_time, warn_time, Error, Result};

/// Where pagination starts. Page `n` lives at `start + n * config.page_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub start: usize,
}

/// When a paginated run stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The number of pages is known, all of them are submitted up front.
    Known { pages: usize },
    /// The number of pages is unknown, the first empty page ends submission.
    Discover,
}

/// Fetches pages from `source` until `termination` says to stop and yields
/// every result as soon as it completes.
pub fn paginate<S: PageSource>(
    source: S,
    config: PoolConfig,
    pagination: Pagination,
    termination: Termination,
) -> Result<impl Stream<Item = PageResult<S::Item>>> {
    let stream = match termination {
        Termination::Known { pages } => {
            fetch_known(source, config, pagination, pages)?.left_stream()
        }
        Termination::Discover => fetch_discover(source, config, pagination)?.right_stream(),
    };
    Ok(stream)
}

/// Submits `pages` requests, closes the pool and drains it.
pub fn fetch_known<S: PageSource>(
    source: S,
    config: PoolConfig,
    pagination: Pagination,
    pages: usize,
) -> Result<PageStream<S::Item>> {
    let pool = FetchPool::new(config)?;
    let page_limit = pool.config().page_limit;
    for page in 0..pages {
        match pool.submit(pagination.start + page * page_limit) {
            Ok(()) => {}
            // A bounded queue takes the rest while the workers run.
            Err(Error::QueueFull { .. }) => {
                return feed_known(pool, source, pagination, page..pages);
            }
            Err(e) => return Err(e),
        }
    }
    info_time!("Submitted all {} pages", pages);
    pool.close();

    pool.run(source)
}

fn feed_known<S: PageSource>(
    pool: FetchPool,
    source: S,
    pagination: Pagination,
    remaining: Range<usize>,
) -> Result<PageStream<S::Item>> {
    let results = pool.run(source)?;

    tokio::spawn(async move {
        let pages = remaining.end;
        // Pages below `remaining` went in before the pool started.
        let submitted = remaining.start + submit_pages(&pool, pagination, remaining).await;
        if submitted == pages {
            info_time!("Submitted all {} pages", pages);
        } else {
            warn_time!("Submitted {} of {} pages", submitted, pages);
        }
        pool.close();
    });

    Ok(results)
}

/// Waits for room for every page in `pages` and returns how many went in.
async fn submit_pages(pool: &FetchPool, pagination: Pagination, pages: Range<usize>) -> usize {
    let page_limit = pool.config().page_limit;
    let mut submitted = 0;
    for page in pages {
        if let Err(e) = pool.submit_wait(pagination.start + page * page_limit).await {
            warn_time!("Stopped feeding pages at page {}: {}", page, e);
            break;
        }
        submitted += 1;
    }
    submitted
}

/// Discovery mode: keeps `concurrency_limit` offsets outstanding and stops
/// submitting once any page comes back empty. Requests already submitted are
/// still drained.
///
/// A failed page does not count as empty, but `max_consecutive_failures`
/// failed results in a row also stop submission.
pub fn fetch_discover<S: PageSource>(
    source: S,
    config: PoolConfig,
    pagination: Pagination,
) -> Result<impl Stream<Item = PageResult<S::Item>>> {
    let window = match config.max_queue_depth {
        Some(depth) => depth.min(config.concurrency_limit),
        None => config.concurrency_limit,
    };
    let pool = FetchPool::new(config)?;
    let page_limit = pool.config().page_limit;
    let max_failures = pool.config().max_consecutive_failures;

    let mut next_offset = pagination.start;
    for _ in 0..window {
        pool.submit(next_offset)?;
        next_offset += page_limit;
    }
    let mut results = pool.run(source)?;

    Ok(stream! {
        let start_time = Local::now();
        // Offsets of empty pages, the lowest one is where the data ends.
        let mut empty_at = BTreeSet::new();
        // Failed results since the last successful one, in completion order.
        let mut failures_in_a_row = 0;

        while let Some(result) = results.next().await {
            if result.is_empty_page() {
                if empty_at.is_empty() {
                    info_time!(
                        "Found an EMPTY page at offset {}, stopping submission",
                        result.offset()
                    );
                    pool.close();
                }
                empty_at.insert(result.offset());
            }

            if result.is_err() {
                failures_in_a_row += 1;
                if failures_in_a_row == max_failures && !pool.is_closed() {
                    warn_time!(
                        "{} pages failed in a row, the last at offset {}, stopping submission",
                        failures_in_a_row,
                        result.offset()
                    );
                    pool.close();
                }
            } else {
                failures_in_a_row = 0;
            }

            // One new request per answered one keeps `window` requests outstanding.
            if !pool.is_closed() {
                if let Err(e) = pool.submit(next_offset) {
                    warn_time!("Couldn't submit offset {}: {}", next_offset, e);
                    pool.close();
                }
                next_offset += page_limit;
            }

            yield result;
        }

        info_time!(
            start_time,
            "Discovery finished after {} pages, data ends at offset {:?}",
            results.stats().completed(),
            empty_at.first()
        );
    })
}
