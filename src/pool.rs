use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Local;
use futures::{FutureExt, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::PoolConfig;
use crate::queue::WorkQueue;
use crate::source::{PageRequest, PageSource};
use crate::{info_time, warn_time, Error, RemoteError, Result};

/// The outcome of one submitted request, tagged with the request it answers.
#[derive(Debug)]
pub struct PageResult<T> {
    pub request: PageRequest,
    pub outcome: core::result::Result<Vec<T>, RemoteError>,
}

impl<T> PageResult<T> {
    pub fn offset(&self) -> usize {
        self.request.offset
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_err(&self) -> bool {
        self.outcome.is_err()
    }

    /// A successful page without items, the end marker in discovery mode.
    pub fn is_empty_page(&self) -> bool {
        matches!(&self.outcome, Ok(items) if items.is_empty())
    }

    pub fn items(&self) -> Option<&[T]> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<&RemoteError> {
        self.outcome.as_ref().err()
    }
}

/// Counters of a single run. Readable while the run is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub empty_pages: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl PoolStats {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Default)]
struct StatsCounter {
    submitted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    empty_pages: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StatsCounter {
    /// Takes back a submission the queue rejected.
    fn unsubmit(&self) {
        self.submitted.fetch_sub(1, Ordering::SeqCst);
    }

    fn fetch_started(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn fetch_finished<T>(&self, outcome: &core::result::Result<Vec<T>, RemoteError>) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match outcome {
            Ok(items) => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
                if items.is_empty() {
                    self.empty_pages.fetch_add(1, Ordering::SeqCst);
                }
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            empty_pages: self.empty_pages.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// A worker pool that fetches submitted pages with at most
/// `concurrency_limit` requests in flight.
///
/// A pool is single use: requests can be submitted before and during
/// [`FetchPool::run`], and [`FetchPool::close`] lets the workers exit once the
/// queue is drained. Dropping the pool closes it.
#[derive(Debug)]
pub struct FetchPool {
    queue: Arc<WorkQueue>,
    config: PoolConfig,
    started: AtomicBool,
    stats: Arc<StatsCounter>,
}

impl FetchPool {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            queue: Arc::new(WorkQueue::new(config.max_queue_depth)),
            config,
            started: AtomicBool::new(false),
            stats: Arc::new(StatsCounter::default()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Enqueues the page starting at `offset`, sized by the configured page limit.
    pub fn submit(&self, offset: usize) -> Result<()> {
        self.submit_request(PageRequest::new(offset, self.config.page_limit))
    }

    /// Enqueues an explicit request.
    ///
    /// Errors with [`Error::QueueClosed`] after [`FetchPool::close`] and with
    /// [`Error::QueueFull`] when a bounded queue has no room.
    pub fn submit_request(&self, request: PageRequest) -> Result<()> {
        // Counted before a worker can see it, so `completed() <= submitted` holds.
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        self.queue.push(request).inspect_err(|_| self.stats.unsubmit())
    }

    /// Like [`FetchPool::submit`] but waits for room in a bounded queue.
    pub async fn submit_wait(&self, offset: usize) -> Result<()> {
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        self.queue
            .push_wait(PageRequest::new(offset, self.config.page_limit))
            .await
            .inspect_err(|_| self.stats.unsubmit())
    }

    /// No more submissions. Workers exit after draining what is queued.
    pub fn close(&self) {
        if !self.queue.is_closed() {
            info_time!("Closing the pool, {} requests still queued", self.queue.len());
        }
        self.queue.close();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Starts `concurrency_limit` workers fetching from `source` and returns
    /// the results in completion order. The stream ends once the pool is
    /// closed and every queued request has been answered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run<S: PageSource>(&self, source: S) -> Result<PageStream<S::Item>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::PoolAlreadyRunning);
        }

        let start_time = Local::now();
        let source = Arc::new(source);
        let (res_tx, res_rx) = mpsc::channel(self.config.result_capacity);
        info_time!(
            "Starting pool: {} workers, {} requests queued",
            self.config.concurrency_limit,
            self.queue.len()
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.concurrency_limit {
            workers.spawn(worker(
                worker_id,
                WorkerCtx {
                    queue: self.queue.clone(),
                    source: source.clone(),
                    results: res_tx.clone(),
                    stats: self.stats.clone(),
                    timeout: self.config.per_request_timeout,
                    quiet: self.config.quiet,
                },
            ));
        }
        // Only the workers hold senders now, the stream ends when the last one exits.
        drop(res_tx);

        tokio::spawn({
            let stats = self.stats.clone();
            async move {
                while let Some(joined) = workers.join_next().await {
                    if let Err(e) = joined {
                        warn_time!("A worker stopped abnormally: {}", e);
                    }
                }
                let stats = stats.snapshot();
                info_time!(
                    start_time,
                    "Pool drained: {} ok, {} failed, {} empty",
                    stats.succeeded,
                    stats.failed,
                    stats.empty_pages
                );
            }
        });

        Ok(PageStream {
            inner: ReceiverStream::new(res_rx),
            stats: self.stats.clone(),
        })
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// Results of a [`FetchPool`] run, in completion order.
#[derive(Debug)]
pub struct PageStream<T> {
    inner: ReceiverStream<PageResult<T>>,
    stats: Arc<StatsCounter>,
}

impl<T> PageStream<T> {
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }
}

impl<T> Stream for PageStream<T> {
    type Item = PageResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

struct WorkerCtx<S: PageSource> {
    queue: Arc<WorkQueue>,
    source: Arc<S>,
    results: mpsc::Sender<PageResult<S::Item>>,
    stats: Arc<StatsCounter>,
    timeout: Option<Duration>,
    quiet: bool,
}

/// Dequeue, fetch, publish. Suspends only at those three points.
async fn worker<S: PageSource>(worker_id: usize, ctx: WorkerCtx<S>) {
    while let Some(request) = ctx.queue.pop().await {
        let start_time = Local::now();
        ctx.stats.fetch_started();
        let outcome = fetch_page(ctx.source.as_ref(), request, ctx.timeout).await;
        ctx.stats.fetch_finished(&outcome);

        match &outcome {
            Ok(items) if !ctx.quiet => {
                info_time!(
                    start_time,
                    "Worker {} fetched {}: {} items",
                    worker_id,
                    request,
                    items.len()
                );
            }
            Ok(_) => {}
            Err(e) => warn_time!("Worker {} failed {}: {}", worker_id, request, e),
        }

        if ctx.results.send(PageResult { request, outcome }).await.is_err() {
            // Nobody is reading the results anymore, stop taking submissions too.
            ctx.queue.close();
            break;
        }
    }
}

async fn fetch_page<S: PageSource>(
    source: &S,
    request: PageRequest,
    timeout: Option<Duration>,
) -> core::result::Result<Vec<S::Item>, RemoteError> {
    let call = AssertUnwindSafe(source.fetch(request)).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(caught) => caught,
            Err(_) => return Err(RemoteError::Timeout(limit)),
        },
        None => call.await,
    };
    caught.unwrap_or_else(|panic| Err(RemoteError::Panicked(panic_message(panic))))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
