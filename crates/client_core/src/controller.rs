use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use shared::{
    domain::{CategoryId, SortDirection, SortField, SubcategoryId},
    protocol::{clamp_page, Page, QuerySpec},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::error::CatalogError;

/// Boundary to the remote catalog service: one paged, filtered, sorted
/// collection per implementation. GET-style, idempotent, side-effect free.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page<T>, CatalogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Read-only projection handed to presentation code. Items are cloned out so
/// renderers can never mutate pagination state behind the controller's back.
#[derive(Debug, Clone)]
pub struct ListViewModel<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub total_pages: u32,
    pub total_elements: u64,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<String>,
}

/// Partial filter update. Fields left unset keep their current value;
/// `category`/`subcategory` take an `Option` so they can also be cleared.
#[derive(Debug, Clone, Default)]
pub struct FilterPatch {
    keyword: Option<String>,
    category_id: Option<Option<CategoryId>>,
    subcategory_id: Option<Option<SubcategoryId>>,
    extra_filters: Vec<(String, Option<String>)>,
}

impl FilterPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn category(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn subcategory(mut self, subcategory_id: Option<SubcategoryId>) -> Self {
        self.subcategory_id = Some(subcategory_id);
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_filters.push((name.into(), Some(value.into())));
        self
    }

    pub fn clear_extra(mut self, name: impl Into<String>) -> Self {
        self.extra_filters.push((name.into(), None));
        self
    }

    fn apply_to(&self, spec: &mut QuerySpec) {
        if let Some(keyword) = &self.keyword {
            spec.keyword = keyword.clone();
        }
        if let Some(category_id) = self.category_id {
            spec.category_id = category_id;
        }
        if let Some(subcategory_id) = self.subcategory_id {
            spec.subcategory_id = subcategory_id;
        }
        for (name, value) in &self.extra_filters {
            match value {
                Some(value) => {
                    spec.extra_filters.insert(name.clone(), value.clone());
                }
                None => {
                    spec.extra_filters.remove(name);
                }
            }
        }
    }
}

struct InFlight {
    token: u64,
    spec_digest: u64,
}

struct ControllerInner<T> {
    spec: QuerySpec,
    status: QueryStatus,
    result: Option<Page<T>>,
    error: Option<String>,
    last_applied_token: u64,
    latest_token: u64,
    in_flight: Option<InFlight>,
}

/// Owns filter/sort/page state for one list view, issues fetches against a
/// [`PageSource`], and guarantees the view model never shows results for a
/// superseded query.
///
/// Every intent mints a monotonic request token; a response is applied only
/// if its token is still the most recently issued one, so responses that
/// arrive out of order resolve last-request-wins. An identical spec already
/// in flight is not fetched twice. One controller instance per list view;
/// instances share nothing.
pub struct PagedQueryController<T> {
    source: Arc<dyn PageSource<T>>,
    inner: Mutex<ControllerInner<T>>,
    next_token: AtomicU64,
    cancelled: AtomicBool,
    changed: broadcast::Sender<()>,
}

impl<T: Clone + Send + 'static> PagedQueryController<T> {
    pub fn new(source: Arc<dyn PageSource<T>>, initial: QuerySpec) -> Arc<Self> {
        let (changed, _) = broadcast::channel(64);
        Arc::new(Self {
            source,
            inner: Mutex::new(ControllerInner {
                spec: initial,
                status: QueryStatus::Idle,
                result: None,
                error: None,
                last_applied_token: 0,
                latest_token: 0,
                in_flight: None,
            }),
            next_token: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            changed,
        })
    }

    /// Fires after every applied state transition. Consumers re-read
    /// [`view_model`](Self::view_model); the notification carries no data.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }

    /// Merge a partial filter update into the current spec. Changing filters
    /// invalidates the prior page context, so the page resets to zero.
    pub async fn set_filter(self: &Arc<Self>, patch: FilterPatch) {
        let spec = {
            let inner = self.inner.lock().await;
            let mut spec = inner.spec.clone();
            patch.apply_to(&mut spec);
            spec.page = 0;
            spec
        };
        self.issue(spec).await;
    }

    /// Change the sort key/direction and restart from the first page.
    pub async fn set_sort(self: &Arc<Self>, field: SortField, direction: SortDirection) {
        let spec = {
            let inner = self.inner.lock().await;
            let mut spec = inner.spec.clone();
            spec.sort_field = field;
            spec.sort_direction = direction;
            spec.page = 0;
            spec
        };
        self.issue(spec).await;
    }

    /// Navigate to a page. Clamped against the known page count; before the
    /// first result arrives the value is accepted optimistically and
    /// corrected once the real total is known. Filters are untouched.
    pub async fn set_page(self: &Arc<Self>, page: u32) {
        let spec = {
            let inner = self.inner.lock().await;
            let mut spec = inner.spec.clone();
            spec.page = match &inner.result {
                Some(result) => clamp_page(result.total_pages, page),
                None => page,
            };
            spec
        };
        self.issue(spec).await;
    }

    /// Re-issue the current spec unchanged. Callers invoke this after every
    /// mutation (create/update/delete/import) performed outside the
    /// controller; it is also the user-facing retry after an error.
    pub async fn refresh(self: &Arc<Self>) {
        let spec = { self.inner.lock().await.spec.clone() };
        self.issue(spec).await;
    }

    /// Pure read; never triggers a fetch. While an error is showing, the
    /// previous successful items are intentionally retained so the renderer
    /// can keep stale-but-valid rows next to the error indicator.
    pub async fn view_model(&self) -> ListViewModel<T> {
        let inner = self.inner.lock().await;
        let is_loading = inner.status == QueryStatus::Loading;
        let is_error = inner.status == QueryStatus::Error;
        match &inner.result {
            Some(result) => ListViewModel {
                items: result.content.clone(),
                page: result.page,
                total_pages: result.total_pages,
                total_elements: result.total_elements,
                is_loading,
                is_error,
                error: inner.error.clone(),
            },
            None => ListViewModel {
                items: Vec::new(),
                page: inner.spec.page,
                total_pages: 0,
                total_elements: 0,
                is_loading,
                is_error,
                error: inner.error.clone(),
            },
        }
    }

    /// Tear the controller down. In-flight responses resolve as no-ops and
    /// further intents are ignored.
    pub fn shutdown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Mint a token and record the request, unless an identical spec is
    /// already in flight. Caller holds the state lock.
    fn begin_request(&self, inner: &mut ControllerInner<T>, spec: &QuerySpec) -> Option<u64> {
        let digest = spec.digest();
        if inner
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.spec_digest == digest)
        {
            debug!(digest, "suppressing duplicate request for in-flight spec");
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        inner.latest_token = token;
        inner.spec = spec.clone();
        inner.status = QueryStatus::Loading;
        inner.in_flight = Some(InFlight {
            token,
            spec_digest: digest,
        });
        Some(token)
    }

    async fn issue(self: &Arc<Self>, spec: QuerySpec) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let token = {
            let mut inner = self.inner.lock().await;
            match self.begin_request(&mut inner, &spec) {
                Some(token) => token,
                None => return,
            }
        };
        let _ = self.changed.send(());
        tokio::spawn(Arc::clone(self).run_fetch(token, spec));
    }

    /// Fetch loop for one issued request. Runs the fetch, reconciles the
    /// response against the latest issued token, and keeps going in the same
    /// task when an out-of-range page needs a clamped re-fetch.
    async fn run_fetch(self: Arc<Self>, mut token: u64, mut spec: QuerySpec) {
        loop {
            let outcome = self.source.fetch_page(&spec).await;
            if self.cancelled.load(Ordering::SeqCst) {
                debug!(token, "dropping response after controller shutdown");
                return;
            }
            let next = {
                let mut inner = self.inner.lock().await;
                if token != inner.latest_token {
                    debug!(
                        token,
                        latest = inner.latest_token,
                        "discarding stale response"
                    );
                    return;
                }
                inner.in_flight = None;
                inner.last_applied_token = token;
                match outcome {
                    Ok(page) => {
                        // The requested page may have fallen out of range,
                        // either because it was accepted optimistically before
                        // any total was known or because a mutation shrank the
                        // collection. Clamp and re-fetch once.
                        let clamped = clamp_page(page.total_pages, inner.spec.page);
                        let needs_correction = clamped != inner.spec.page;
                        inner.status = QueryStatus::Success;
                        inner.error = None;
                        inner.result = Some(page);
                        if needs_correction {
                            let mut corrected = inner.spec.clone();
                            corrected.page = clamped;
                            self.begin_request(&mut inner, &corrected)
                                .map(|next_token| (next_token, corrected))
                        } else {
                            None
                        }
                    }
                    Err(err) => {
                        warn!(token, error = %err, "page fetch failed");
                        inner.status = QueryStatus::Error;
                        inner.error = Some(err.to_string());
                        None
                    }
                }
            };
            let _ = self.changed.send(());
            match next {
                Some((next_token, next_spec)) => {
                    token = next_token;
                    spec = next_spec;
                }
                None => return,
            }
        }
    }
}
