//! # Paginated Fetcher
//!
//! Pulls a remote listing page by page and writes every page through a
//! [`PersistenceGateway`] as soon as it arrives.
//!
//! ## Paging rules
//!
//! - Pages are requested strictly in sequence, starting at page 1.
//! - A page shorter than the page size is the last one. The server never says
//!   how many items exist, so a listing whose size is an exact multiple of the
//!   page size costs one more request that returns an empty page.
//! - An empty page ends the run successfully without a write or a status.
//! - A failed request ends the run with that error. Pages already written stay
//!   written; there is no retry here.
//! - Cancellation is checked before each request, never while a page is being
//!   written.

use crate::cursor::{RemotePage, SyncCursor};
use crate::error::{Result, SyncError};
use crate::status::{StatusEmitter, SyncStatus};
use async_trait::async_trait;
use core_data::PersistenceGateway;
use futures::stream::{self, BoxStream, TryStreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Remote list operation addressed by a cursor.
#[async_trait]
pub trait PageSource<R>: Send + Sync {
    async fn fetch_page(&self, cursor: SyncCursor) -> Result<Vec<R>>;
}

#[async_trait]
impl<R, F, Fut> PageSource<R> for F
where
    R: Send + 'static,
    F: Fn(SyncCursor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<R>>> + Send,
{
    async fn fetch_page(&self, cursor: SyncCursor) -> Result<Vec<R>> {
        (self)(cursor).await
    }
}

struct PageState<'a, S> {
    source: &'a S,
    cursor: SyncCursor,
    cancel: CancellationToken,
    done: bool,
}

/// Sequential page-by-page fetcher.
#[derive(Debug, Clone)]
pub struct PaginatedFetcher {
    page_size: u32,
    cancel: CancellationToken,
}

impl PaginatedFetcher {
    pub fn new(page_size: u32, cancel: CancellationToken) -> Result<Self> {
        // Validates the page size once for every cursor this fetcher creates
        SyncCursor::new(page_size)?;
        Ok(Self { page_size, cancel })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Lazy sequence of pages. The stream ends after the first short page and
    /// yields [`SyncError::Cancelled`] if the token fires between pages.
    pub fn pages<'a, R, S>(&self, source: &'a S) -> Result<BoxStream<'a, Result<RemotePage<R>>>>
    where
        R: Send + 'static,
        S: PageSource<R> + 'a,
    {
        let state = PageState {
            source,
            cursor: SyncCursor::new(self.page_size)?,
            cancel: self.cancel.clone(),
            done: false,
        };

        let stream = stream::try_unfold(state, |mut state| async move {
            if state.done {
                return Ok(None);
            }

            if state.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let cursor = state.cursor;
            debug!(
                page = cursor.page_number(),
                offset = cursor.offset(),
                "Fetching page"
            );

            let items = state.source.fetch_page(cursor).await?;
            let page = RemotePage::new(items, cursor.page_size());
            state.cursor.advance();
            state.done = page.is_last;

            Ok(Some((page, state)))
        });

        Ok(Box::pin(stream))
    }

    /// Fetches every page, transforms the raw items and persists each batch.
    ///
    /// Emits one `Running` status per written page with the running total and
    /// returns that total. Raw items the transform rejects are dropped.
    #[instrument(skip_all, fields(task = %emitter.task(), page_size = self.page_size))]
    pub async fn run<R, L, S, F>(
        &self,
        source: &S,
        transform: F,
        gateway: &dyn PersistenceGateway<L>,
        emitter: &mut StatusEmitter,
    ) -> Result<u64>
    where
        R: Send + 'static,
        L: Send + Sync + 'static,
        S: PageSource<R>,
        F: Fn(R) -> Option<L> + Send + Sync,
    {
        let mut pages = self.pages(source)?;
        let mut total = 0u64;

        while let Some(page) = pages.try_next().await? {
            if page.is_empty() {
                break;
            }

            let batch: Vec<L> = page.items.into_iter().filter_map(&transform).collect();
            gateway.insert_all(&batch).await?;

            total += batch.len() as u64;
            emitter.progress(batch.len() as u64);
        }

        debug!(total, "Pagination complete");
        Ok(total)
    }

    /// [`run`](Self::run) followed by the terminal status.
    pub async fn sync_all<R, L, S, F>(
        &self,
        source: &S,
        transform: F,
        gateway: &dyn PersistenceGateway<L>,
        mut emitter: StatusEmitter,
    ) -> SyncStatus
    where
        R: Send + 'static,
        L: Send + Sync + 'static,
        S: PageSource<R>,
        F: Fn(R) -> Option<L> + Send + Sync,
    {
        let outcome = self.run(source, transform, gateway, &mut emitter).await;
        emitter.finish(outcome.map(|_| None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{RecordingSink, SyncState};
    use core_data::Result as DataResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct VecGateway {
        batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl PersistenceGateway<String> for VecGateway {
        async fn insert_all(&self, items: &[String]) -> DataResult<u64> {
            self.batches.lock().unwrap().push(items.to_vec());
            Ok(items.len() as u64)
        }

        async fn replace_all(&self, items: &[String]) -> DataResult<u64> {
            *self.batches.lock().unwrap() = vec![items.to_vec()];
            Ok(items.len() as u64)
        }

        async fn delete_all(&self) -> DataResult<u64> {
            let mut batches = self.batches.lock().unwrap();
            let removed = batches.iter().map(Vec::len).sum::<usize>();
            batches.clear();
            Ok(removed as u64)
        }

        async fn count(&self) -> DataResult<i64> {
            Ok(self.batches.lock().unwrap().iter().map(Vec::len).sum::<usize>() as i64)
        }
    }

    fn slice_source(
        items: Vec<&'static str>,
        calls: Arc<AtomicUsize>,
    ) -> impl PageSource<String> {
        move |cursor: SyncCursor| {
            let items = items.clone();
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let start = cursor.offset() as usize;
                let end = (start + cursor.page_size() as usize).min(items.len());
                Ok(items
                    .get(start..end)
                    .unwrap_or_default()
                    .iter()
                    .map(|s| s.to_string())
                    .collect())
            }
        }
    }

    #[tokio::test]
    async fn test_pages_stop_after_short_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = slice_source(vec!["a", "b", "c", "d", "e"], calls.clone());
        let fetcher = PaginatedFetcher::new(2, CancellationToken::new()).unwrap();

        let pages: Vec<RemotePage<String>> =
            fetcher.pages(&source).unwrap().try_collect().await.unwrap();

        let sizes: Vec<usize> = pages.iter().map(RemotePage::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exact_multiple_costs_one_empty_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = slice_source(vec!["a", "b", "c", "d"], calls.clone());
        let fetcher = PaginatedFetcher::new(2, CancellationToken::new()).unwrap();
        let gateway = VecGateway::default();
        let sink = Arc::new(RecordingSink::new());

        let status = fetcher
            .sync_all(&source, Some, &gateway, StatusEmitter::new("observers", sink.clone()))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(status.state, SyncState::Succeeded);
        assert_eq!(status.items_processed, 4);
        // The empty page produces neither a write nor a status
        assert_eq!(gateway.batches.lock().unwrap().len(), 2);
        assert_eq!(sink.statuses().len(), 3);
    }

    #[tokio::test]
    async fn test_transform_drops_rejected_items() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = slice_source(vec!["keep", "", "keep"], calls);
        let fetcher = PaginatedFetcher::new(10, CancellationToken::new()).unwrap();
        let gateway = VecGateway::default();
        let mut emitter = StatusEmitter::new("taxa", Arc::new(RecordingSink::new()));

        let total = fetcher
            .run(
                &source,
                |raw: String| (!raw.is_empty()).then_some(raw),
                &gateway,
                &mut emitter,
            )
            .await
            .unwrap();

        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = slice_source(vec!["a"], calls.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fetcher = PaginatedFetcher::new(2, cancel).unwrap();
        let gateway = VecGateway::default();
        let sink = Arc::new(RecordingSink::new());

        let status = fetcher
            .sync_all(&source, Some, &gateway, StatusEmitter::new("taxa", sink))
            .await;

        assert_eq!(status.state, SyncState::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_written_pages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = move |cursor: SyncCursor| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if cursor.page_number() == 1 {
                    Ok(vec!["a".to_string(), "b".to_string()])
                } else {
                    Err(SyncError::Network("connection reset".to_string()))
                }
            }
        };
        let fetcher = PaginatedFetcher::new(2, CancellationToken::new()).unwrap();
        let gateway = VecGateway::default();
        let sink = Arc::new(RecordingSink::new());

        let status = fetcher
            .sync_all(&source, Some, &gateway, StatusEmitter::new("taxa", sink))
            .await;

        assert_eq!(status.state, SyncState::Failed);
        assert_eq!(status.items_processed, 2);
        assert_eq!(gateway.count().await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
