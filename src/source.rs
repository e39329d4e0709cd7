//! What the pool fetches from.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::RemoteError;

/// One page to fetch: where it starts and how many items it holds at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl fmt::Display for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset={} limit={}", self.offset, self.limit)
    }
}

/// A paginated remote. Implementations are shared read-only by every worker,
/// so any connection pooling belongs inside the source.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    type Item: Send + 'static;

    async fn fetch(&self, request: PageRequest) -> Result<Vec<Self::Item>, RemoteError>;
}

/// Adapts a closure returning a future into a [`PageSource`].
pub struct FnSource<F, T> {
    f: F,
    _item: PhantomData<fn() -> T>,
}

/// ```ignore
/// let source = from_fn(|req: PageRequest| async move { Ok::<_, RemoteError>(vec![req.offset]) });
/// ```
pub fn from_fn<F, Fut, T>(f: F) -> FnSource<F, T>
where
    F: Fn(PageRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, RemoteError>> + Send + 'static,
    T: Send + 'static,
{
    FnSource {
        f,
        _item: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> PageSource for FnSource<F, T>
where
    F: Fn(PageRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, RemoteError>> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    async fn fetch(&self, request: PageRequest) -> Result<Vec<T>, RemoteError> {
        (self.f)(request).await
    }
}

#[async_trait]
impl<S: PageSource + ?Sized> PageSource for std::sync::Arc<S> {
    type Item = S::Item;

    async fn fetch(&self, request: PageRequest) -> Result<Vec<Self::Item>, RemoteError> {
        (**self).fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_source_forwards_request() {
        let source = from_fn(|req: PageRequest| async move {
            if req.offset >= 100 {
                Ok::<_, RemoteError>(Vec::new())
            } else {
                Ok(vec![req.offset, req.offset + 1])
            }
        });

        assert_eq!(source.fetch(PageRequest::new(50, 2)).await.unwrap(), vec![50, 51]);
        assert!(source.fetch(PageRequest::new(100, 2)).await.unwrap().is_empty());
    }

    #[test]
    fn request_displays_offset_and_limit() {
        assert_eq!(PageRequest::new(100, 50).to_string(), "offset=100 limit=50");
    }
}
