use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, Stream};
use tokio::sync::watch;

use super::error::LoadError;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 5;

// ============================================================================
// Load Requests and Results
// ============================================================================

/// Which edge of the loaded window a load extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadType {
    /// Restart the session from a single page
    Refresh,
    /// Load before the first page
    Prepend,
    /// Load after the last page
    Append,
}

/// Arguments of one page load. Retrying a failed load reuses them unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParams {
    pub load_type: LoadType,
    /// 1-based page key, `None` meaning the first page
    pub key: Option<u32>,
    pub load_size: u32,
}

/// One loaded page with the keys of its neighbours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub prev_key: Option<u32>,
    pub next_key: Option<u32>,
}

impl<T> Page<T> {
    /// Terminal page without neighbours.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            prev_key: None,
            next_key: None,
        }
    }
}

/// Outcome of a mediator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediatorResult {
    pub end_of_pagination: bool,
}

/// Read-only view of a session handed to loaders and mediators.
#[derive(Debug)]
pub struct PagingState<'a, T> {
    pub pages: &'a [Page<T>],
    /// Index of the item the caller last looked at, if any
    pub anchor_position: Option<usize>,
    pub page_size: u32,
}

impl<'a, T> PagingState<'a, T> {
    /// Page containing `position`, clamped to the last loaded page.
    pub fn closest_page_to_position(&self, position: usize) -> Option<&'a Page<T>> {
        let mut start = 0usize;
        for page in self.pages {
            let end = start + page.items.len();
            if position < end {
                return Some(page);
            }
            start = end;
        }
        self.pages.last()
    }

    /// Key to restart from so the anchored item stays in the first page.
    ///
    /// Uses `prev_key + 1`, falling back to `next_key - 1`. `None` restarts
    /// from the first page.
    pub fn anchor_refresh_key(&self) -> Option<u32> {
        let page = self.closest_page_to_position(self.anchor_position?)?;
        page.prev_key
            .and_then(|k| k.checked_add(1))
            .or_else(|| page.next_key.map(|k| k.saturating_sub(1)))
            .filter(|k| *k >= 1)
    }

    /// Last item of the last non-empty page.
    pub fn last_item(&self) -> Option<&'a T> {
        self.pages
            .iter()
            .rev()
            .find(|p| !p.items.is_empty())
            .and_then(|p| p.items.last())
    }
}

// ============================================================================
// Loader Capability
// ============================================================================

/// A source of pages driven by a [`Pager`].
///
/// A mediated loader serves pages from a local store and relies on
/// [`PageLoader::mediate`] to pull remote pages into that store.
pub trait PageLoader: Send + Sync {
    type Item: Send + Sync;

    fn load(
        &self,
        params: LoadParams,
    ) -> impl Future<Output = Result<Page<Self::Item>, LoadError>> + Send;

    /// Key a refresh should start from.
    fn refresh_key(&self, state: &PagingState<'_, Self::Item>) -> Option<u32> {
        state.anchor_refresh_key()
    }

    fn is_mediated(&self) -> bool {
        false
    }

    /// Pull remote data into the local store ahead of a local load.
    fn mediate(
        &self,
        _load_type: LoadType,
        _state: &PagingState<'_, Self::Item>,
    ) -> impl Future<Output = Result<MediatorResult, LoadError>> + Send {
        async {
            Ok(MediatorResult {
                end_of_pagination: true,
            })
        }
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Load state of one edge of a session.
#[derive(Debug, Clone)]
pub enum LoadState {
    Loading,
    NotLoading { end_of_pagination: bool },
    Error(Arc<LoadError>),
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn end_of_pagination(&self) -> bool {
        matches!(
            self,
            LoadState::NotLoading {
                end_of_pagination: true
            }
        )
    }

    pub fn error(&self) -> Option<&Arc<LoadError>> {
        match self {
            LoadState::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl Default for LoadState {
    fn default() -> Self {
        LoadState::NotLoading {
            end_of_pagination: false,
        }
    }
}

/// Independent load states of the refresh, prepend and append edges.
#[derive(Debug, Clone, Default)]
pub struct LoadStates {
    pub refresh: LoadState,
    pub prepend: LoadState,
    pub append: LoadState,
}

/// Lifecycle of a paging session. Never returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading(LoadType),
    Loaded,
    Error,
}

/// Snapshot published to subscribers after every state change.
#[derive(Debug, Clone)]
pub struct PagerStatus {
    pub session: SessionState,
    pub load_states: LoadStates,
    pub item_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    pub page_size: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// The load to replay on retry.
#[derive(Debug, Clone, Copy)]
enum FailedLoad {
    Refresh(LoadParams),
    Append(LoadParams),
    MediatedAppend,
}

#[derive(Debug)]
enum StreamPhase {
    Start,
    Running,
    /// Items were yielded, the edge error is still owed to the caller
    Failed(Arc<LoadError>),
    Done,
}

/// Consecutive appends that add nothing before a page stream gives up.
const MAX_IDLE_APPENDS: usize = 3;

// ============================================================================
// Pager
// ============================================================================

/// One paging session over a [`PageLoader`].
///
/// Loads are sequential: every load takes `&mut self`, so a second load can
/// only start once the previous one resolved or was dropped. A failed load
/// keeps the pages already loaded and can be replayed with [`Pager::retry`].
pub struct Pager<L: PageLoader> {
    loader: L,
    config: PagingConfig,
    pages: Vec<Page<L::Item>>,
    anchor_position: Option<usize>,
    load_states: LoadStates,
    session: SessionState,
    failed: Option<FailedLoad>,
    /// Mediator reported the remote exhausted; cleared by the next refresh
    remote_end: bool,
    status_tx: watch::Sender<PagerStatus>,
}

impl<L: PageLoader> Pager<L> {
    pub fn new(loader: L, config: PagingConfig) -> Self {
        let load_states = LoadStates::default();
        let (status_tx, _) = watch::channel(PagerStatus {
            session: SessionState::Idle,
            load_states: load_states.clone(),
            item_count: 0,
        });

        Self {
            loader,
            config,
            pages: Vec::new(),
            anchor_position: None,
            load_states,
            session: SessionState::Idle,
            failed: None,
            remote_end: false,
            status_tx,
        }
    }

    /// Receive a [`PagerStatus`] after every state change.
    pub fn subscribe(&self) -> watch::Receiver<PagerStatus> {
        self.status_tx.subscribe()
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn load_states(&self) -> &LoadStates {
        &self.load_states
    }

    pub fn pages(&self) -> &[Page<L::Item>] {
        &self.pages
    }

    pub fn items(&self) -> impl Iterator<Item = &L::Item> {
        self.pages.iter().flat_map(|p| p.items.iter())
    }

    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|p| p.items.len()).sum()
    }

    pub fn is_end_of_pagination(&self) -> bool {
        self.load_states.append.end_of_pagination()
    }

    /// Record the item position the caller is looking at.
    pub fn set_anchor(&mut self, position: usize) {
        self.anchor_position = Some(position);
    }

    fn paging_state(&self) -> PagingState<'_, L::Item> {
        PagingState {
            pages: &self.pages,
            anchor_position: self.anchor_position,
            page_size: self.config.page_size,
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(PagerStatus {
            session: self.session,
            load_states: self.load_states.clone(),
            item_count: self.item_count(),
        });
    }

    fn edge_mut(&mut self, load_type: LoadType) -> &mut LoadState {
        match load_type {
            LoadType::Refresh => &mut self.load_states.refresh,
            LoadType::Prepend => &mut self.load_states.prepend,
            LoadType::Append => &mut self.load_states.append,
        }
    }

    fn begin(&mut self, load_type: LoadType) {
        *self.edge_mut(load_type) = LoadState::Loading;
        self.session = SessionState::Loading(load_type);
        self.failed = None;
        self.publish();
    }

    fn finish(&mut self, load_type: LoadType, end_of_pagination: bool) {
        *self.edge_mut(load_type) = LoadState::NotLoading { end_of_pagination };
        self.session = SessionState::Loaded;
        self.publish();
    }

    fn fail(&mut self, load_type: LoadType, err: LoadError, retry: FailedLoad) {
        tracing::warn!(
            load_type = ?load_type,
            kind = err.kind(),
            error = %err,
            "Page load failed"
        );
        *self.edge_mut(load_type) = LoadState::Error(Arc::new(err));
        self.session = SessionState::Error;
        self.failed = Some(retry);
        self.publish();
    }

    /// Restart the session.
    ///
    /// Mediated loaders pull the first remote page first; the local page is
    /// loaded whatever the mediator reported, so cached items stay visible
    /// while the refresh edge shows the mediator's error.
    pub async fn refresh(&mut self) {
        let key = self.loader.refresh_key(&self.paging_state());
        let params = LoadParams {
            load_type: LoadType::Refresh,
            key,
            load_size: self.config.page_size,
        };
        self.run_refresh(params).await;
    }

    async fn run_refresh(&mut self, params: LoadParams) {
        self.begin(LoadType::Refresh);

        let mut mediator_error = None;
        if self.loader.is_mediated() {
            let state = self.paging_state();
            let result = self.loader.mediate(LoadType::Refresh, &state).await;
            match result {
                Ok(MediatorResult { end_of_pagination }) => self.remote_end = end_of_pagination,
                Err(err) => {
                    self.remote_end = false;
                    mediator_error = Some(err);
                }
            }
        }

        match self.loader.load(params).await {
            Ok(page) => {
                let end = page.next_key.is_none() && self.remote_exhausted();
                self.pages = vec![page];
                self.load_states.prepend = LoadState::NotLoading {
                    end_of_pagination: true,
                };
                self.load_states.append = LoadState::NotLoading {
                    end_of_pagination: end,
                };
                match mediator_error {
                    Some(err) => self.fail(LoadType::Refresh, err, FailedLoad::Refresh(params)),
                    None => self.finish(LoadType::Refresh, false),
                }
            }
            Err(err) => self.fail(LoadType::Refresh, err, FailedLoad::Refresh(params)),
        }
    }

    /// Prepending is never supported; the edge reports end of pagination.
    pub fn prepend(&mut self) {
        self.load_states.prepend = LoadState::NotLoading {
            end_of_pagination: true,
        };
        self.publish();
    }

    /// Load the page after the last one.
    ///
    /// A no-op before the first successful refresh and after end of
    /// pagination. Mediated loaders exhaust the local store before asking
    /// the mediator for more.
    pub async fn append(&mut self) {
        if self.pages.is_empty() || self.is_end_of_pagination() {
            return;
        }

        match self.pages.last().and_then(|p| p.next_key) {
            Some(key) => {
                let params = LoadParams {
                    load_type: LoadType::Append,
                    key: Some(key),
                    load_size: self.config.page_size,
                };
                self.run_append(params).await;
            }
            None if !self.remote_exhausted() => self.run_mediated_append().await,
            None => {
                self.load_states.append = LoadState::NotLoading {
                    end_of_pagination: true,
                };
                self.publish();
            }
        }
    }

    async fn run_append(&mut self, params: LoadParams) {
        self.begin(LoadType::Append);

        match self.loader.load(params).await {
            Ok(page) => {
                let end = page.next_key.is_none() && self.remote_exhausted();
                self.pages.push(page);
                self.finish(LoadType::Append, end);
            }
            Err(err) => self.fail(LoadType::Append, err, FailedLoad::Append(params)),
        }
    }

    async fn run_mediated_append(&mut self) {
        self.begin(LoadType::Append);

        let state = self.paging_state();
        let result = self.loader.mediate(LoadType::Append, &state).await;

        match result {
            Ok(MediatorResult {
                end_of_pagination: true,
            }) => {
                self.remote_end = true;
                self.finish(LoadType::Append, true);
            }
            Ok(_) => match self.reload_local(self.pages.len() + 1).await {
                Ok(pages) => {
                    self.pages = pages;
                    self.finish(LoadType::Append, false);
                }
                Err(err) => self.fail(LoadType::Append, err, FailedLoad::MediatedAppend),
            },
            Err(err) => self.fail(LoadType::Append, err, FailedLoad::MediatedAppend),
        }
    }

    /// Whether no more items can come from beyond the local store.
    fn remote_exhausted(&self) -> bool {
        !self.loader.is_mediated() || self.remote_end
    }

    /// Re-read up to `page_count` local pages from the first one.
    async fn reload_local(&self, page_count: usize) -> Result<Vec<Page<L::Item>>, LoadError> {
        let mut pages = Vec::with_capacity(page_count);
        let mut key = Some(1);

        while pages.len() < page_count {
            let Some(k) = key else { break };
            let load_type = if pages.is_empty() {
                LoadType::Refresh
            } else {
                LoadType::Append
            };
            let page = self
                .loader
                .load(LoadParams {
                    load_type,
                    key: Some(k),
                    load_size: self.config.page_size,
                })
                .await?;
            key = page.next_key;
            pages.push(page);
        }

        Ok(pages)
    }

    /// Replay the last failed load with identical parameters.
    pub async fn retry(&mut self) {
        match self.failed.take() {
            Some(FailedLoad::Refresh(params)) => self.run_refresh(params).await,
            Some(FailedLoad::Append(params)) => self.run_append(params).await,
            Some(FailedLoad::MediatedAppend) => self.run_mediated_append().await,
            None => {}
        }
    }

    /// Drive the session as a lazy stream of item batches.
    ///
    /// The first poll refreshes; each later poll appends until some items
    /// become visible and yields them. A failed load whose edge still showed
    /// items (a mediated refresh over a warm cache) yields those items first
    /// and its error on the next poll. The stream ends at end of pagination,
    /// after yielding an error, or after `MAX_IDLE_APPENDS` consecutive
    /// appends that made nothing new visible. `Pager::append` has no such
    /// limit.
    pub fn into_page_stream(self) -> impl Stream<Item = Result<Vec<L::Item>, Arc<LoadError>>>
    where
        L::Item: Clone,
    {
        stream::unfold(
            (self, 0usize, StreamPhase::Start),
            |(mut pager, emitted, phase)| async move {
                let mut edge = match phase {
                    StreamPhase::Done => return None,
                    StreamPhase::Failed(err) => {
                        return Some((Err(err), (pager, emitted, StreamPhase::Done)));
                    }
                    StreamPhase::Start => {
                        pager.refresh().await;
                        LoadType::Refresh
                    }
                    StreamPhase::Running => LoadType::Append,
                };
                let mut idle = 0;

                loop {
                    if edge == LoadType::Append {
                        if pager.is_end_of_pagination() {
                            return None;
                        }
                        pager.append().await;
                    }

                    let error = match edge {
                        LoadType::Append => pager.load_states.append.error().cloned(),
                        _ => pager.load_states.refresh.error().cloned(),
                    };
                    let fresh: Vec<L::Item> = pager.items().skip(emitted).cloned().collect();

                    if !fresh.is_empty() {
                        let next = match error {
                            Some(err) => StreamPhase::Failed(err),
                            None => StreamPhase::Running,
                        };
                        let emitted = emitted + fresh.len();
                        return Some((Ok(fresh), (pager, emitted, next)));
                    }
                    if let Some(err) = error {
                        return Some((Err(err), (pager, emitted, StreamPhase::Done)));
                    }

                    if edge == LoadType::Append {
                        idle += 1;
                        if idle >= MAX_IDLE_APPENDS {
                            tracing::debug!(idle, "Page stream stopped after idle appends");
                            return None;
                        }
                    }
                    edge = LoadType::Append;
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::FetchError;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Serves the integers `0..total` in pages keyed from 1.
    #[derive(Default)]
    struct ScriptedLoader {
        total: AtomicU32,
        fail_loads: AtomicU32,
        calls: Mutex<Vec<LoadParams>>,
        mediated: bool,
        mediator_calls: Mutex<Vec<LoadType>>,
        fail_mediations: AtomicU32,
        /// Items each successful mediated append adds to the store
        remote_growth: u32,
        /// Mediated appends that report more pages without adding items
        idle_appends: AtomicU32,
        /// Refresh mediation finds nothing upstream
        remote_empty: bool,
    }

    impl ScriptedLoader {
        fn local(total: u32) -> Self {
            Self {
                total: AtomicU32::new(total),
                ..Self::default()
            }
        }

        fn mediated(total: u32, remote_growth: u32) -> Self {
            Self {
                total: AtomicU32::new(total),
                mediated: true,
                remote_growth,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<LoadParams> {
            self.calls.lock().unwrap().clone()
        }

        fn mediator_calls(&self) -> Vec<LoadType> {
            self.mediator_calls.lock().unwrap().clone()
        }

        fn take_failure(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl PageLoader for ScriptedLoader {
        type Item = u32;

        async fn load(&self, params: LoadParams) -> Result<Page<u32>, LoadError> {
            self.calls.lock().unwrap().push(params);
            if Self::take_failure(&self.fail_loads) {
                return Err(FetchError::Timeout.into());
            }

            let key = params.key.unwrap_or(1);
            let total = self.total.load(Ordering::SeqCst);
            let start = (key - 1) * params.load_size;
            let end = (start + params.load_size).min(total);
            Ok(Page {
                items: (start.min(end)..end).collect(),
                prev_key: if key > 1 { Some(key - 1) } else { None },
                next_key: if end < total { Some(key + 1) } else { None },
            })
        }

        fn is_mediated(&self) -> bool {
            self.mediated
        }

        async fn mediate(
            &self,
            load_type: LoadType,
            _state: &PagingState<'_, u32>,
        ) -> Result<MediatorResult, LoadError> {
            self.mediator_calls.lock().unwrap().push(load_type);
            if Self::take_failure(&self.fail_mediations) {
                return Err(FetchError::HttpStatus(503).into());
            }
            if load_type == LoadType::Refresh {
                return Ok(MediatorResult {
                    end_of_pagination: self.remote_empty,
                });
            }
            if load_type == LoadType::Append {
                if Self::take_failure(&self.idle_appends) {
                    return Ok(MediatorResult {
                        end_of_pagination: false,
                    });
                }
                if self.remote_growth == 0 {
                    return Ok(MediatorResult {
                        end_of_pagination: true,
                    });
                }
                self.total.fetch_add(self.remote_growth, Ordering::SeqCst);
            }
            Ok(MediatorResult {
                end_of_pagination: false,
            })
        }
    }

    fn pager(loader: ScriptedLoader) -> Pager<ScriptedLoader> {
        Pager::new(loader, PagingConfig { page_size: 5 })
    }

    fn items(pager: &Pager<ScriptedLoader>) -> Vec<u32> {
        pager.items().copied().collect()
    }

    #[tokio::test]
    async fn test_refresh_loads_first_page() {
        let mut pager = pager(ScriptedLoader::local(12));
        assert_eq!(pager.session(), SessionState::Idle);

        pager.refresh().await;

        assert_eq!(items(&pager), vec![0, 1, 2, 3, 4]);
        assert_eq!(pager.session(), SessionState::Loaded);
        assert!(pager.load_states().prepend.end_of_pagination());
        assert!(!pager.is_end_of_pagination());
        assert_eq!(
            pager.loader().calls(),
            vec![LoadParams {
                load_type: LoadType::Refresh,
                key: None,
                load_size: 5
            }]
        );
    }

    #[tokio::test]
    async fn test_append_until_end_then_no_op() {
        let mut pager = pager(ScriptedLoader::local(12));
        pager.refresh().await;
        pager.append().await;
        pager.append().await;

        assert_eq!(items(&pager), (0..12).collect::<Vec<_>>());
        assert!(pager.is_end_of_pagination());

        let calls = pager.loader().calls().len();
        pager.append().await;
        assert_eq!(pager.loader().calls().len(), calls);
    }

    #[tokio::test]
    async fn test_append_before_refresh_is_no_op() {
        let mut pager = pager(ScriptedLoader::local(12));
        pager.append().await;
        assert!(pager.loader().calls().is_empty());
        assert_eq!(pager.session(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_append_keeps_pages_and_retry_replays_params() {
        let mut pager = pager(ScriptedLoader::local(12));
        pager.refresh().await;

        pager.loader().fail_loads.store(1, Ordering::SeqCst);
        pager.append().await;

        assert_eq!(pager.session(), SessionState::Error);
        assert!(pager.load_states().append.error().is_some());
        assert_eq!(items(&pager), vec![0, 1, 2, 3, 4]);

        pager.retry().await;

        assert_eq!(pager.session(), SessionState::Loaded);
        assert_eq!(pager.item_count(), 10);
        let calls = pager.loader().calls();
        assert_eq!(calls[1], calls[2]);
        assert_eq!(calls[2].key, Some(2));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_pages() {
        let mut pager = pager(ScriptedLoader::local(12));
        pager.refresh().await;
        pager.append().await;

        pager.loader().fail_loads.store(1, Ordering::SeqCst);
        pager.refresh().await;

        assert!(pager.load_states().refresh.error().is_some());
        assert_eq!(pager.item_count(), 10);
    }

    #[tokio::test]
    async fn test_retry_without_failure_is_no_op() {
        let mut pager = pager(ScriptedLoader::local(3));
        pager.refresh().await;
        pager.retry().await;
        assert_eq!(pager.loader().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_resumes_from_anchor() {
        let mut pager = pager(ScriptedLoader::local(20));
        pager.refresh().await;
        pager.append().await;
        pager.append().await;

        // Item 7 lives on page 2
        pager.set_anchor(7);
        pager.refresh().await;

        let last = pager.loader().calls().last().copied().unwrap();
        assert_eq!(last.key, Some(2));
        assert_eq!(items(&pager), vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_anchor_refresh_key() {
        let pages = vec![
            Page {
                items: vec![0, 1],
                prev_key: None,
                next_key: Some(2),
            },
            Page {
                items: vec![2, 3],
                prev_key: Some(1),
                next_key: None,
            },
        ];
        let mut state = PagingState {
            pages: &pages,
            anchor_position: None,
            page_size: 2,
        };
        assert_eq!(state.anchor_refresh_key(), None);

        state.anchor_position = Some(0);
        assert_eq!(state.anchor_refresh_key(), Some(1));

        state.anchor_position = Some(3);
        assert_eq!(state.anchor_refresh_key(), Some(2));

        // Past the loaded window clamps to the last page
        state.anchor_position = Some(99);
        assert_eq!(state.anchor_refresh_key(), Some(2));
        assert_eq!(state.last_item(), Some(&3));
    }

    #[tokio::test]
    async fn test_prepend_reports_end() {
        let mut pager = pager(ScriptedLoader::local(3));
        pager.prepend();
        assert!(pager.load_states().prepend.end_of_pagination());
        assert!(pager.loader().calls().is_empty());
    }

    #[tokio::test]
    async fn test_mediated_append_after_local_exhausted() {
        let mut pager = pager(ScriptedLoader::mediated(5, 5));
        pager.refresh().await;
        assert_eq!(pager.item_count(), 5);
        assert!(!pager.is_end_of_pagination());

        pager.append().await;

        assert_eq!(
            pager.loader().mediator_calls(),
            vec![LoadType::Refresh, LoadType::Append]
        );
        assert_eq!(items(&pager), (0..10).collect::<Vec<_>>());
        assert_eq!(pager.pages().len(), 2);
        assert_eq!(pager.session(), SessionState::Loaded);
    }

    #[tokio::test]
    async fn test_mediated_end_of_pagination() {
        let mut pager = pager(ScriptedLoader::mediated(3, 0));
        pager.refresh().await;
        pager.append().await;

        assert!(pager.is_end_of_pagination());
        assert_eq!(pager.item_count(), 3);
    }

    #[tokio::test]
    async fn test_mediated_refresh_end_completes_append_edge() {
        let loader = ScriptedLoader {
            remote_empty: true,
            ..ScriptedLoader::mediated(0, 5)
        };
        let mut pager = pager(loader);

        pager.refresh().await;
        assert!(pager.is_end_of_pagination());
        assert_eq!(pager.item_count(), 0);

        pager.append().await;
        pager.append().await;
        assert_eq!(pager.loader().mediator_calls(), vec![LoadType::Refresh]);
        assert_eq!(pager.loader().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_mediated_refresh_end_still_drains_local_pages() {
        // Remote is exhausted but the store holds more than one page
        let loader = ScriptedLoader {
            remote_empty: true,
            ..ScriptedLoader::mediated(8, 5)
        };
        let mut pager = pager(loader);

        pager.refresh().await;
        assert!(!pager.is_end_of_pagination());

        pager.append().await;
        assert_eq!(items(&pager), (0..8).collect::<Vec<_>>());
        assert!(pager.is_end_of_pagination());
        assert_eq!(pager.loader().mediator_calls(), vec![LoadType::Refresh]);
    }

    #[tokio::test]
    async fn test_mediated_refresh_error_shows_cached_items() {
        let loader = ScriptedLoader::mediated(3, 0);
        loader.fail_mediations.store(1, Ordering::SeqCst);
        let mut pager = pager(loader);

        pager.refresh().await;

        assert_eq!(items(&pager), vec![0, 1, 2]);
        assert_eq!(pager.session(), SessionState::Error);
        assert!(pager.load_states().refresh.error().is_some());

        pager.retry().await;
        assert_eq!(pager.session(), SessionState::Loaded);
        assert_eq!(pager.loader().mediator_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mediated_append_error_then_retry() {
        let mut pager = pager(ScriptedLoader::mediated(5, 2));
        pager.refresh().await;

        pager.loader().fail_mediations.store(1, Ordering::SeqCst);
        pager.append().await;
        assert!(pager.load_states().append.error().is_some());
        assert_eq!(pager.item_count(), 5);

        pager.retry().await;
        assert_eq!(pager.item_count(), 7);
        assert!(!pager.is_end_of_pagination());
    }

    #[tokio::test]
    async fn test_subscriber_sees_state_changes() {
        let mut pager = pager(ScriptedLoader::local(3));
        let mut rx = pager.subscribe();

        pager.refresh().await;

        assert!(rx.has_changed().unwrap());
        let status = rx.borrow_and_update().clone();
        assert_eq!(status.session, SessionState::Loaded);
        assert_eq!(status.item_count, 3);
        assert!(status.load_states.append.end_of_pagination());
    }

    #[tokio::test]
    async fn test_page_stream_yields_every_item() {
        let pager = pager(ScriptedLoader::local(12));
        let batches: Vec<_> = pager.into_page_stream().collect().await;

        assert_eq!(batches.len(), 3);
        let all: Vec<u32> = batches.into_iter().flat_map(|b| b.unwrap()).collect();
        assert_eq!(all, (0..12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_page_stream_stops_after_error() {
        let loader = ScriptedLoader::local(12);
        loader.fail_loads.store(1, Ordering::SeqCst);
        let batches: Vec<_> = pager(loader).into_page_stream().collect().await;

        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_err());
    }

    #[tokio::test]
    async fn test_page_stream_reports_refresh_error_after_cached_items() {
        let loader = ScriptedLoader::mediated(3, 0);
        loader.fail_mediations.store(1, Ordering::SeqCst);
        let batches: Vec<_> = pager(loader).into_page_stream().collect().await;

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].as_ref().unwrap(), &vec![0, 1, 2]);
        assert!(matches!(
            &**batches[1].as_ref().unwrap_err(),
            LoadError::Fetch(FetchError::HttpStatus(503))
        ));
    }

    #[tokio::test]
    async fn test_page_stream_continues_past_idle_appends() {
        let loader = ScriptedLoader::mediated(5, 5);
        loader.idle_appends.store(2, Ordering::SeqCst);
        let batches: Vec<_> = pager(loader).into_page_stream().take(2).collect().await;

        let all: Vec<u32> = batches.into_iter().flat_map(|b| b.unwrap()).collect();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_page_stream_gives_up_after_idle_appends() {
        let loader = ScriptedLoader::mediated(5, 5);
        loader.idle_appends.store(u32::MAX, Ordering::SeqCst);
        let mut stream = std::pin::pin!(pager(loader).into_page_stream());

        assert_eq!(stream.next().await.unwrap().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_page_stream_on_empty_source() {
        let batches: Vec<_> = pager(ScriptedLoader::local(0)).into_page_stream().collect().await;
        assert!(batches.is_empty());
    }
}
