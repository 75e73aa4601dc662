//! Product feed state machine: paginated listing, debounced search, sort
//! toggles, infinite scroll and user-initiated retry behind one view model.
//!
//! Every reset (initial load, refresh, query change, retry) bumps the request
//! epoch. Responses carry the epoch they were issued under and are dropped on
//! arrival when it is no longer current, so a slow superseded request can
//! never overwrite newer results. In-flight requests are not cancelled.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{Pagination, Product, SortField, SortOrder},
    protocol::{ListProductsQuery, SearchProductsQuery},
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    catalog::{ProductCatalogApi, ProductPage},
    error::{CatalogError, FeedFailure},
    session::SessionStore,
    store::Store,
};

pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub page_size: u32,
    pub search_debounce: Duration,
    pub sort_field: SortField,
    /// Keep the current items when a query reset fails instead of clearing them.
    pub preserve_items_on_initial_failure: bool,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            search_debounce: DEFAULT_SEARCH_DEBOUNCE,
            sort_field: SortField::Price,
            preserve_items_on_initial_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedStatus {
    #[default]
    Idle,
    LoadingInitial,
    LoadingMore,
    Refreshing,
    Loaded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    /// Raw input, echoed back to the view on every keystroke.
    pub search_term: String,
    /// Debounced value that actually drives fetches.
    pub committed_search_term: String,
    pub sort_order: SortOrder,
    pub page: u32,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            search_term: String::new(),
            committed_search_term: String::new(),
            sort_order: SortOrder::Ascending,
            page: 1,
        }
    }
}

impl FeedQuery {
    pub fn is_search(&self) -> bool {
        !self.committed_search_term.trim().is_empty()
    }
}

/// Terms that differ only in surrounding whitespace issue the same request.
fn same_search_term(committed: &str, candidate: &str) -> bool {
    committed.trim() == candidate.trim()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub items: Vec<Product>,
    pub pagination: Pagination,
    pub status: FeedStatus,
    pub error: Option<FeedFailure>,
    pub load_more_error: Option<FeedFailure>,
    pub query: FeedQuery,
    pub request_epoch: u64,
}

impl FeedState {
    pub fn can_load_more(&self) -> bool {
        self.status == FeedStatus::Loaded && self.pagination.has_next_page
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    List(ListProductsQuery),
    Search(SearchProductsQuery),
}

impl FeedRequest {
    fn for_page(query: &FeedQuery, page: u32, options: &FeedOptions) -> Self {
        let term = query.committed_search_term.trim();
        if term.is_empty() {
            FeedRequest::List(ListProductsQuery {
                page,
                limit: options.page_size,
                sort_by: options.sort_field,
                order: query.sort_order,
            })
        } else {
            FeedRequest::Search(SearchProductsQuery {
                query: term.to_string(),
                sort_by: options.sort_field,
                order: query.sort_order,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetKind {
    Initial,
    Refresh,
}

impl ResetKind {
    fn status(self) -> FeedStatus {
        match self {
            ResetKind::Initial => FeedStatus::LoadingInitial,
            ResetKind::Refresh => FeedStatus::Refreshing,
        }
    }
}

#[derive(Default)]
struct FeedInner {
    epoch: u64,
    last_reset: Option<(FeedRequest, ResetKind)>,
    search_generation: u64,
    pending_commit: Option<JoinHandle<()>>,
}

pub struct ProductFeedController {
    api: Arc<dyn ProductCatalogApi>,
    session: Arc<SessionStore>,
    options: FeedOptions,
    store: Store<FeedState>,
    inner: Mutex<FeedInner>,
}

impl ProductFeedController {
    pub fn new(
        api: Arc<dyn ProductCatalogApi>,
        session: Arc<SessionStore>,
        options: FeedOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            session,
            options,
            store: Store::default(),
            inner: Mutex::new(FeedInner::default()),
        })
    }

    pub fn snapshot(&self) -> FeedState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedState> {
        self.store.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<FeedState> {
        self.store.watch()
    }

    pub async fn load_initial(&self) {
        self.reset_query(ResetKind::Initial).await;
    }

    /// Pull-to-refresh: same as a reset but reported as `Refreshing`, and a
    /// failure keeps the items already on screen.
    pub async fn refresh(&self) {
        self.reset_query(ResetKind::Refresh).await;
    }

    /// Echoes `text` immediately and commits it once typing pauses for the
    /// debounce delay. Each keystroke replaces the pending commit.
    pub async fn set_search_input(self: &Arc<Self>, text: impl Into<String>) {
        let text = text.into();
        let mut inner = self.inner.lock().await;
        self.store
            .update(|state| state.query.search_term = text.clone());

        if let Some(pending) = inner.pending_commit.take() {
            pending.abort();
        }
        inner.search_generation += 1;
        let generation = inner.search_generation;
        let delay = self.options.search_debounce;
        let controller = Arc::clone(self);
        inner.pending_commit = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.commit_search(generation, text).await;
        }));
    }

    /// Commits `text` right away, as when the search field is submitted.
    pub async fn submit_search(&self, text: impl Into<String>) {
        let order = self.store.snapshot().query.sort_order;
        self.submit_query(text, order).await;
    }

    /// Commits a search term and sort order together under a single reset.
    /// Nothing is fetched when both already match the committed query,
    /// unless the feed has never loaded.
    pub async fn submit_query(&self, text: impl Into<String>, order: SortOrder) {
        let text = text.into();
        {
            let mut inner = self.inner.lock().await;
            if let Some(pending) = inner.pending_commit.take() {
                pending.abort();
            }
            inner.search_generation += 1;
            let state = self.store.snapshot();
            let unchanged = same_search_term(&state.query.committed_search_term, &text)
                && state.query.sort_order == order
                && state.status != FeedStatus::Idle;
            self.store.update(|state| {
                state.query.search_term = text.clone();
                if !unchanged {
                    state.query.committed_search_term = text.clone();
                    state.query.sort_order = order;
                }
            });
            if unchanged {
                return;
            }
            debug!(term = %text, ?order, "feed: query submitted");
        }
        self.reset_query(ResetKind::Initial).await;
    }

    async fn commit_search(&self, generation: u64, text: String) {
        {
            let mut inner = self.inner.lock().await;
            if inner.search_generation != generation {
                debug!(generation, "feed: superseded search commit skipped");
                return;
            }
            // Detach so a later keystroke cannot abort the fetch below.
            inner.pending_commit = None;
            if same_search_term(&self.store.snapshot().query.committed_search_term, &text) {
                return;
            }
            self.store
                .update(|state| state.query.committed_search_term = text.clone());
            debug!(term = %text, "feed: search term committed");
        }
        self.reset_query(ResetKind::Initial).await;
    }

    pub async fn set_sort_order(&self, order: SortOrder) {
        {
            let _inner = self.inner.lock().await;
            if self.store.snapshot().query.sort_order == order {
                return;
            }
            self.store.update(|state| state.query.sort_order = order);
        }
        self.reset_query(ResetKind::Initial).await;
    }

    pub async fn toggle_sort_order(&self) {
        let next = self.store.snapshot().query.sort_order.toggled();
        self.set_sort_order(next).await;
    }

    /// Appends the next page. Dropped unless the feed is `Loaded` with more
    /// pages, which also rejects a second call while one is in flight.
    pub async fn load_more(&self) {
        let (epoch, request) = {
            let inner = self.inner.lock().await;
            let state = self.store.snapshot();
            if !state.can_load_more() || state.query.is_search() {
                debug!(status = ?state.status, "feed: load more skipped");
                return;
            }
            let next_page = state.pagination.current_page + 1;
            let request = FeedRequest::for_page(&state.query, next_page, &self.options);
            self.store
                .update(|state| state.status = FeedStatus::LoadingMore);
            (inner.epoch, request)
        };

        let outcome = self.fetch(&request).await;

        let inner = self.inner.lock().await;
        if inner.epoch != epoch {
            debug!(
                issued_epoch = epoch,
                current_epoch = inner.epoch,
                "feed: discarding stale load more response"
            );
            return;
        }
        match outcome {
            Ok(page) => {
                self.store.update(|state| {
                    state.items.extend(page.items);
                    state.pagination = page.pagination;
                    state.query.page = page.pagination.current_page.max(1);
                    state.status = FeedStatus::Loaded;
                    state.load_more_error = None;
                });
            }
            Err(err) => {
                warn!(epoch, "feed: load more failed: {err}");
                let failure = FeedFailure::from(&err);
                self.store.update(|state| {
                    state.status = FeedStatus::Loaded;
                    state.load_more_error = Some(failure);
                });
            }
        }
    }

    /// Re-issues the last failed reset unchanged. Only valid in `Error`.
    pub async fn retry(&self) {
        let (epoch, request, kind) = {
            let mut inner = self.inner.lock().await;
            if self.store.snapshot().status != FeedStatus::Error {
                debug!("feed: retry ignored outside error state");
                return;
            }
            let Some((request, kind)) = inner.last_reset.clone() else {
                return;
            };
            let epoch = self.begin_reset(&mut inner, &request, kind);
            (epoch, request, kind)
        };
        self.run_reset(epoch, request, kind).await;
    }

    /// Cancels a pending debounced commit. In-flight fetches are left to the
    /// epoch fence.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.search_generation += 1;
        if let Some(pending) = inner.pending_commit.take() {
            pending.abort();
        }
    }

    async fn reset_query(&self, kind: ResetKind) {
        let (epoch, request) = {
            let mut inner = self.inner.lock().await;
            let query = self.store.snapshot().query;
            let request = FeedRequest::for_page(&query, 1, &self.options);
            let epoch = self.begin_reset(&mut inner, &request, kind);
            (epoch, request)
        };
        self.run_reset(epoch, request, kind).await;
    }

    fn begin_reset(&self, inner: &mut FeedInner, request: &FeedRequest, kind: ResetKind) -> u64 {
        inner.epoch += 1;
        inner.last_reset = Some((request.clone(), kind));
        let epoch = inner.epoch;
        self.store.update(|state| {
            state.request_epoch = epoch;
            state.status = kind.status();
            state.error = None;
        });
        info!(epoch, ?kind, ?request, "feed: query reset issued");
        epoch
    }

    async fn run_reset(&self, epoch: u64, request: FeedRequest, kind: ResetKind) {
        let outcome = self.fetch(&request).await;

        let inner = self.inner.lock().await;
        if inner.epoch != epoch {
            debug!(
                issued_epoch = epoch,
                current_epoch = inner.epoch,
                "feed: discarding stale response"
            );
            return;
        }
        match outcome {
            Ok(page) => {
                info!(
                    epoch,
                    items = page.items.len(),
                    has_next_page = page.pagination.has_next_page,
                    "feed: page loaded"
                );
                self.store.update(|state| {
                    state.items = page.items;
                    state.pagination = page.pagination;
                    state.query.page = page.pagination.current_page.max(1);
                    state.status = FeedStatus::Loaded;
                    state.error = None;
                    state.load_more_error = None;
                });
            }
            Err(err) => {
                warn!(epoch, ?kind, "feed: fetch failed: {err}");
                let failure = FeedFailure::from(&err);
                let clear_items =
                    kind == ResetKind::Initial && !self.options.preserve_items_on_initial_failure;
                self.store.update(|state| {
                    state.status = FeedStatus::Error;
                    state.error = Some(failure);
                    if clear_items {
                        state.items.clear();
                        state.pagination = Pagination::default();
                    }
                });
            }
        }
    }

    /// The bearer token is read per call; a missing one fails before any
    /// network traffic.
    async fn fetch(&self, request: &FeedRequest) -> Result<ProductPage, CatalogError> {
        let token = self
            .session
            .access_token()
            .ok_or_else(CatalogError::missing_credential)?;
        match request {
            FeedRequest::List(query) => self.api.list(&token, query).await,
            FeedRequest::Search(query) => {
                let items = self.api.search(&token, query).await?;
                let pagination = Pagination::single_page(items.len());
                Ok(ProductPage { items, pagination })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
