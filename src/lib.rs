//! Bounded-concurrency paginated fetching.
//!
//! A [`FetchPool`] runs a fixed number of workers over a shared queue of page
//! requests and streams the results back as they complete. [`paginate`] drives
//! a pool until a known number of pages is fetched or the source runs dry.
//!
//! ```ignore
//! let source = Retry::new(HttpSource::new("https://pokeapi.co/api/v2/pokemon")?);
//! let mut pages = paginate(source, PoolConfig::default(), Pagination::default(), Termination::Discover)?;
//! while let Some(page) = pages.next().await {
//!     match page.outcome {
//!         Ok(items) => println!("{}: {} items", page.request, items.len()),
//!         Err(e) => eprintln!("{}: {e}", page.request),
//!     }
//! }
//! ```

mod config;
mod error;
mod limit;
#[doc(hidden)]
pub mod macros;
mod pool;
pub mod process;
mod queue;
mod request;
mod retry;
mod source;

pub use config::PoolConfig;
pub use error::{Error, RemoteError, Result};
pub use limit::{RateLimit, RateLimited};
pub use pool::{FetchPool, PageResult, PageStream, PoolStats};
pub use process::{paginate, Pagination, Termination};
pub use request::HttpSource;
pub use retry::{Retry, RetryExt};
pub use source::{from_fn, FnSource, PageRequest, PageSource};

const DEFAULT_CONCURRENCY_LIMIT: usize = 5;
const DEFAULT_PAGE_LIMIT: usize = 50;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;
/// Results buffered before workers have to wait for the consumer.
const DEFAULT_RESULT_CAPACITY: usize = 256;
