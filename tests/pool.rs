use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetchpool::{
    from_fn, paginate, Error, FetchPool, PageRequest, PageSource, Pagination, PoolConfig,
    RemoteError, Termination,
};
use futures::StreamExt;
use pretty_assertions::assert_eq;

/// Tracks how many fetches run at the same time.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn gauged_source(
    gauge: Arc<Gauge>,
    delay: Duration,
    page: fn(usize) -> Result<Vec<usize>, RemoteError>,
) -> impl PageSource<Item = usize> {
    from_fn(move |req: PageRequest| {
        let gauge = gauge.clone();
        async move {
            gauge.enter();
            tokio::time::sleep(delay).await;
            gauge.leave();
            page(req.offset)
        }
    })
}

fn quiet(limit: usize) -> PoolConfig {
    PoolConfig::default()
        .with_concurrency_limit(limit)
        .quiet(true)
}

#[tokio::test]
async fn every_request_yields_exactly_one_result() {
    let gauge = Arc::new(Gauge::default());
    let pool = FetchPool::new(quiet(4)).unwrap();
    let offsets: Vec<usize> = (0..40).map(|n| n * 50).collect();
    for &offset in &offsets {
        pool.submit(offset).unwrap();
    }
    pool.close();

    let source = gauged_source(gauge, Duration::from_millis(2), |offset| Ok(vec![offset]));
    let results: Vec<_> = pool.run(source).unwrap().collect().await;

    assert_eq!(results.len(), offsets.len());
    let seen: HashSet<usize> = results.iter().map(|r| r.offset()).collect();
    assert_eq!(seen, offsets.iter().copied().collect::<HashSet<_>>());
    for result in &results {
        assert_eq!(result.items(), Some(&[result.offset()][..]));
    }
}

#[tokio::test]
async fn in_flight_never_exceeds_concurrency_limit() {
    let gauge = Arc::new(Gauge::default());
    let pool = FetchPool::new(quiet(3)).unwrap();
    for offset in 0..20 {
        pool.submit(offset).unwrap();
    }
    pool.close();

    let source = gauged_source(gauge.clone(), Duration::from_millis(10), |o| Ok(vec![o]));
    let mut stream = pool.run(source).unwrap();
    let mut count = 0;
    while stream.next().await.is_some() {
        count += 1;
    }

    assert_eq!(count, 20);
    assert!(gauge.peak() <= 3, "peak was {}", gauge.peak());
    assert!(stream.stats().peak_in_flight <= 3);
}

#[tokio::test]
async fn failure_is_reported_and_siblings_continue() {
    let pool = FetchPool::new(quiet(2)).unwrap();
    for offset in [0, 50, 100, 150] {
        pool.submit(offset).unwrap();
    }
    pool.close();

    let source = from_fn(|req: PageRequest| async move {
        if req.offset == 50 {
            Err(RemoteError::other("connection reset"))
        } else {
            Ok(vec![req.offset])
        }
    });
    let results: Vec<_> = pool.run(source).unwrap().collect().await;

    assert_eq!(results.len(), 4);
    let failed: Vec<_> = results.iter().filter(|r| r.is_err()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].offset(), 50);
    assert!(results.iter().filter(|r| r.offset() != 50).all(|r| r.is_ok()));
}

#[tokio::test]
async fn two_workers_three_pages_last_one_empty() {
    let gauge = Arc::new(Gauge::default());
    let pool = FetchPool::new(quiet(2)).unwrap();
    for offset in [0, 50, 100] {
        pool.submit(offset).unwrap();
    }
    pool.close();

    let source = gauged_source(gauge.clone(), Duration::from_millis(10), |offset| {
        Ok(match offset {
            0 => vec![0],
            50 => vec![50],
            _ => Vec::new(),
        })
    });
    let results: Vec<_> = pool.run(source).unwrap().collect().await;

    assert_eq!(results.len(), 3);
    let last = results.iter().find(|r| r.offset() == 100).unwrap();
    assert!(last.is_empty_page());
    assert!(gauge.peak() <= 2);
}

#[tokio::test]
async fn close_twice_is_the_same_as_once() {
    let pool = FetchPool::new(quiet(2)).unwrap();
    pool.submit(0).unwrap();
    pool.close();
    pool.close();
    assert!(pool.is_closed());
    assert!(matches!(pool.submit(50), Err(Error::QueueClosed)));

    let results: Vec<_> = pool
        .run(from_fn(|req: PageRequest| async move {
            Ok::<_, RemoteError>(vec![req.offset])
        }))
        .unwrap()
        .collect()
        .await;
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn submissions_while_running_are_fetched() {
    let pool = FetchPool::new(quiet(2)).unwrap();
    let mut stream = pool
        .run(from_fn(|req: PageRequest| async move {
            Ok::<_, RemoteError>(vec![req.offset])
        }))
        .unwrap();

    pool.submit(0).unwrap();
    let first = stream.next().await.unwrap();
    assert_eq!(first.offset(), 0);

    pool.submit(50).unwrap();
    pool.close();
    let rest: Vec<_> = stream.collect().await;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].offset(), 50);
}

#[tokio::test]
async fn slow_requests_time_out_as_errors() {
    let config = quiet(2).with_per_request_timeout(Duration::from_millis(20));
    let pool = FetchPool::new(config).unwrap();
    pool.submit(0).unwrap();
    pool.submit(50).unwrap();
    pool.close();

    let source = from_fn(|req: PageRequest| async move {
        if req.offset == 50 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok::<_, RemoteError>(vec![req.offset])
    });
    let results: Vec<_> = pool.run(source).unwrap().collect().await;

    assert_eq!(results.len(), 2);
    let slow = results.iter().find(|r| r.offset() == 50).unwrap();
    assert!(matches!(slow.error(), Some(RemoteError::Timeout(d)) if *d == Duration::from_millis(20)));
    let fast = results.iter().find(|r| r.offset() == 0).unwrap();
    assert!(fast.is_ok());
}

#[tokio::test]
async fn bounded_queue_applies_backpressure() {
    let pool = FetchPool::new(quiet(1).with_max_queue_depth(2)).unwrap();
    pool.submit(0).unwrap();
    pool.submit(50).unwrap();
    assert!(matches!(pool.submit(100), Err(Error::QueueFull { max: 2 })));
    assert_eq!(pool.pending(), 2);

    let mut stream = pool
        .run(from_fn(|req: PageRequest| async move {
            Ok::<_, RemoteError>(vec![req.offset])
        }))
        .unwrap();

    // Waits until a worker takes something off the queue.
    pool.submit_wait(100).await.unwrap();
    pool.close();

    let mut offsets = Vec::new();
    while let Some(result) = stream.next().await {
        offsets.push(result.offset());
    }
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0, 50, 100]);
}

#[tokio::test]
async fn dropping_the_pool_lets_the_stream_finish() {
    let pool = FetchPool::new(quiet(2)).unwrap();
    pool.submit(0).unwrap();
    let stream = pool
        .run(from_fn(|req: PageRequest| async move {
            Ok::<_, RemoteError>(vec![req.offset])
        }))
        .unwrap();
    drop(pool);

    let results: Vec<_> = tokio::time::timeout(Duration::from_secs(2), stream.collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn discovery_drains_requests_past_the_end() {
    let calls = Arc::new(AtomicUsize::new(0));
    let source = from_fn({
        let calls = calls.clone();
        move |req: PageRequest| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                // Shrinking pages down to an empty one at offset 3 * 10.
                let items: Vec<usize> = match req.offset {
                    0 => (0..10).collect(),
                    10 => (0..6).collect(),
                    20 => (0..2).collect(),
                    _ => Vec::new(),
                };
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, RemoteError>(items)
            }
        }
    });

    let config = quiet(4).with_page_limit(10);
    let results: Vec<_> = paginate(source, config, Pagination::default(), Termination::Discover)
        .unwrap()
        .collect()
        .await;

    let offsets: HashSet<usize> = results.iter().map(|r| r.offset()).collect();
    for expected in [0, 10, 20, 30] {
        assert!(offsets.contains(&expected));
    }
    // Everything that was submitted came back, including pages beyond the end.
    assert_eq!(results.len(), calls.load(Ordering::SeqCst));
    assert!(results.len() <= 4 + 4);
    let items: usize = results.iter().filter_map(|r| r.items()).map(<[usize]>::len).sum();
    assert_eq!(items, 18);
}
