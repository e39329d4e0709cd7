//! The shared FIFO the workers pull from.
//!
//! Shutdown is an explicit flag next to the pending requests instead of marker
//! values pushed through the queue, so the number of workers never has to be
//! known by whoever closes it.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::source::PageRequest;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<PageRequest>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    /// Signalled when a request is pushed or the queue closes.
    item_ready: Notify,
    /// Signalled when a request is popped or the queue closes.
    space_ready: Notify,
    max_depth: Option<usize>,
}

impl WorkQueue {
    pub(crate) fn new(max_depth: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            max_depth,
        }
    }

    /// Pushes without waiting. A full bounded queue answers with `QueueFull`.
    pub(crate) fn push(&self, request: PageRequest) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::QueueClosed);
        }
        if let Some(max) = self.max_depth {
            if state.pending.len() >= max {
                return Err(Error::QueueFull { max });
            }
        }
        state.pending.push_back(request);
        drop(state);

        self.item_ready.notify_one();
        Ok(())
    }

    /// Pushes, suspending while a bounded queue is full.
    pub(crate) async fn push_wait(&self, request: PageRequest) -> Result<()> {
        loop {
            // Register interest before checking, so a pop between the check and
            // the await isn't missed.
            let space = self.space_ready.notified();
            match self.push(request) {
                Err(Error::QueueFull { .. }) => space.await,
                res => return res,
            }
        }
    }

    /// Takes the oldest request. Returns `None` once the queue is closed and drained.
    pub(crate) async fn pop(&self) -> Option<PageRequest> {
        loop {
            let item = self.item_ready.notified();
            {
                let mut state = self.state.lock();
                if let Some(request) = state.pending.pop_front() {
                    let more_pending = !state.pending.is_empty();
                    drop(state);
                    self.space_ready.notify_one();
                    // Hand the wakeup on, a single notify may have covered several pushes.
                    if more_pending {
                        self.item_ready.notify_one();
                    }
                    return Some(request);
                }
                if state.closed {
                    return None;
                }
            }
            item.await;
        }
    }

    /// Idempotent.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);

        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn req(offset: usize) -> PageRequest {
        PageRequest::new(offset, 50)
    }

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let queue = WorkQueue::new(None);
        for offset in [0, 50, 100] {
            queue.push(req(offset)).unwrap();
        }
        queue.close();

        let mut offsets = Vec::new();
        while let Some(request) = queue.pop().await {
            offsets.push(request.offset);
        }
        assert_eq!(offsets, vec![0, 50, 100]);
    }

    #[tokio::test]
    async fn push_after_close_is_rejected() {
        let queue = WorkQueue::new(None);
        queue.close();
        queue.close();
        assert!(matches!(queue.push(req(0)), Err(Error::QueueClosed)));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn bounded_queue_reports_full() {
        let queue = WorkQueue::new(Some(1));
        queue.push(req(0)).unwrap();
        assert!(matches!(
            queue.push(req(50)),
            Err(Error::QueueFull { max: 1 })
        ));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn push_wait_resumes_after_pop() {
        let queue = Arc::new(WorkQueue::new(Some(1)));
        queue.push(req(0)).unwrap();

        let pusher = tokio::spawn({
            let queue = queue.clone();
            async move { queue.push_wait(req(50)).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());

        assert_eq!(queue.pop().await.map(|r| r.offset), Some(0));
        pusher.await.unwrap().unwrap();
        assert_eq!(queue.pop().await.map(|r| r.offset), Some(50));
    }

    #[tokio::test]
    async fn close_wakes_idle_poppers() {
        let queue = Arc::new(WorkQueue::new(None));
        let poppers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.pop().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        for popper in poppers {
            assert!(popper.await.unwrap().is_none());
        }
    }
}
