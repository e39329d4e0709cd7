use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use fetchpool::{
    info_time, paginate, warn_time, HttpSource, PageSource, Pagination, PoolConfig, RateLimit,
    RateLimited, Result, Retry, Termination,
};
use futures::StreamExt;
use serde_json::Value;

/// Fetch every page of a JSON API paginated with `limit` and `offset`.
#[derive(Parser, Debug)]
#[command(name = "fetchpool", version)]
struct Args {
    /// Endpoint of the paginated API
    url: String,

    /// Items per page
    #[arg(short, long, env = "FETCHPOOL_PAGE_LIMIT")]
    limit: Option<usize>,

    /// Number of pages to fetch. Without it pages are fetched until one comes back empty
    #[arg(short, long)]
    pages: Option<usize>,

    /// Offset of the first page
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Maximum number of requests in flight
    #[arg(short, long, env = "FETCHPOOL_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Maximum number of queued requests
    #[arg(long, env = "FETCHPOOL_MAX_QUEUE_DEPTH")]
    max_queue_depth: Option<usize>,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "FETCHPOOL_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Stop discovering pages after this many failures in a row
    #[arg(long, env = "FETCHPOOL_MAX_CONSECUTIVE_FAILURES")]
    max_failures: Option<usize>,

    /// Retries for failed pages that may succeed on another attempt
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Rate limit as <max_rate>/<period_ms>, e.g. 100/60000
    #[arg(long)]
    rate: Option<RateLimit>,

    /// JSON field holding the items of a page
    #[arg(long, default_value = "results")]
    key: String,

    /// Don't log every single page
    #[arg(short, long, env = "FETCHPOOL_QUIET")]
    quiet: bool,
}

impl Args {
    fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::default().quiet(self.quiet);
        if let Some(limit) = self.limit {
            config = config.with_page_limit(limit);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency_limit(concurrency);
        }
        if let Some(depth) = self.max_queue_depth {
            config = config.with_max_queue_depth(depth);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_per_request_timeout(Duration::from_millis(ms));
        }
        if let Some(failures) = self.max_failures {
            config = config.with_max_consecutive_failures(failures);
        }
        config
    }

    fn termination(&self) -> Termination {
        match self.pages {
            Some(pages) => Termination::Known { pages },
            None => Termination::Discover,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Local::now();
    let args = Args::parse();

    let mut source: Arc<dyn PageSource<Item = Value>> =
        Arc::new(HttpSource::new(&args.url)?.items_key(args.key.as_str()));
    if args.retries > 0 {
        source = Arc::new(Retry::new(source).max_retries(args.retries));
    }
    if let Some(rate) = args.rate {
        source = Arc::new(RateLimited::new(source, rate)?);
    }

    info_time!("Started fetching {}", args.url);
    let mut pages = Box::pin(paginate(
        source,
        args.pool_config(),
        Pagination { start: args.start },
        args.termination(),
    )?);

    let mut total_items = 0;
    let mut failed_offsets = Vec::new();
    while let Some(page) = pages.next().await {
        match page.items() {
            Some(items) => total_items += items.len(),
            None => failed_offsets.push(page.offset()),
        }
    }

    if !failed_offsets.is_empty() {
        failed_offsets.sort_unstable();
        warn_time!(
            "{} pages failed, offsets: {:?}",
            failed_offsets.len(),
            failed_offsets
        );
    }
    info_time!(start_time, "Full program time: {} items", total_items);

    Ok(())
}
