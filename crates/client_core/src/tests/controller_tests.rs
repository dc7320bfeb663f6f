use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::{
    domain::{CategoryId, SortDirection, SortField, SubcategoryId},
    protocol::{Page, QuerySpec},
};
use tokio::sync::{oneshot, Mutex};

use crate::{
    controller::{FilterPatch, ListViewModel, PageSource, PagedQueryController},
    error::CatalogError,
};

// Entity content is opaque to the controller; a bare label is enough.
type Row = &'static str;

struct Step {
    spec: QuerySpec,
    gate: Option<oneshot::Receiver<()>>,
    outcome: Result<Page<Row>, CatalogError>,
}

/// Scripted stand-in for the remote catalog: each expected request is keyed
/// by the exact spec the controller should issue, optionally held open until
/// the test releases its gate. An unexpected spec fails the test.
struct ScriptedSource {
    steps: Mutex<Vec<Step>>,
    calls: Mutex<Vec<QuerySpec>>,
}

impl ScriptedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    async fn on(&self, spec: &QuerySpec, outcome: Result<Page<Row>, CatalogError>) {
        self.steps.lock().await.push(Step {
            spec: spec.clone(),
            gate: None,
            outcome,
        });
    }

    async fn on_gated(
        &self,
        spec: &QuerySpec,
        outcome: Result<Page<Row>, CatalogError>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.steps.lock().await.push(Step {
            spec: spec.clone(),
            gate: Some(rx),
            outcome,
        });
        tx
    }

    async fn calls(&self) -> Vec<QuerySpec> {
        self.calls.lock().await.clone()
    }
}

fn controller_for(
    source: &Arc<ScriptedSource>,
    spec: QuerySpec,
) -> Arc<PagedQueryController<Row>> {
    let source: Arc<dyn PageSource<Row>> = source.clone();
    PagedQueryController::new(source, spec)
}

#[async_trait]
impl PageSource<Row> for ScriptedSource {
    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page<Row>, CatalogError> {
        self.calls.lock().await.push(spec.clone());
        let step = {
            let mut steps = self.steps.lock().await;
            let position = steps
                .iter()
                .position(|step| step.spec == *spec)
                .unwrap_or_else(|| panic!("unexpected fetch for spec {spec:?}"));
            steps.remove(position)
        };
        if let Some(gate) = step.gate {
            let _ = gate.await;
        }
        step.outcome
    }
}

fn page(items: &[Row], page_index: u32, size: u32, total_elements: u64) -> Page<Row> {
    let total_pages = if total_elements == 0 {
        0
    } else {
        ((total_elements + u64::from(size) - 1) / u64::from(size)) as u32
    };
    Page {
        content: items.to_vec(),
        page: page_index,
        size,
        total_pages,
        total_elements,
    }
}

async fn wait_for_view<P>(
    controller: &Arc<PagedQueryController<Row>>,
    description: &str,
    predicate: P,
) -> ListViewModel<Row>
where
    P: Fn(&ListViewModel<Row>) -> bool,
{
    for _ in 0..400 {
        let view = controller.view_model().await;
        if predicate(&view) {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {description}");
}

async fn wait_for_calls(source: &Arc<ScriptedSource>, count: usize) {
    for _ in 0..400 {
        if source.calls.lock().await.len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {count} fetches");
}

/// Let any released in-flight tasks run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn starts_idle_until_the_first_intent() {
    let source = ScriptedSource::new();
    let controller = controller_for(&source, QuerySpec::default());

    let view = controller.view_model().await;
    assert!(view.items.is_empty());
    assert!(!view.is_loading);
    assert!(!view.is_error);
    assert!(source.calls().await.is_empty());
}

#[tokio::test]
async fn refresh_loads_the_first_page() {
    let source = ScriptedSource::new();
    let spec = QuerySpec::default();
    source.on(&spec, Ok(page(&["a", "b"], 0, 12, 2))).await;

    let controller = controller_for(&source, spec);
    controller.refresh().await;

    let view = wait_for_view(&controller, "first page", |view| {
        !view.is_loading && !view.items.is_empty()
    })
    .await;
    assert_eq!(view.items, vec!["a", "b"]);
    assert_eq!(view.page, 0);
    assert_eq!(view.total_pages, 1);
    assert_eq!(view.total_elements, 2);
}

#[tokio::test]
async fn out_of_order_responses_resolve_to_the_latest_sort() {
    let source = ScriptedSource::new();
    let desc_spec = QuerySpec::default();
    let mut asc_spec = desc_spec.clone();
    asc_spec.sort_direction = SortDirection::Asc;

    let desc_gate = source
        .on_gated(&desc_spec, Ok(page(&["newest"], 0, 12, 1)))
        .await;
    let asc_gate = source
        .on_gated(&asc_spec, Ok(page(&["oldest"], 0, 12, 1)))
        .await;

    let controller = controller_for(&source, desc_spec);
    controller.set_sort(SortField::Year, SortDirection::Desc).await;
    controller.set_sort(SortField::Year, SortDirection::Asc).await;
    wait_for_calls(&source, 2).await;

    // The newer (ascending) request completes first and is applied.
    asc_gate.send(()).expect("release asc response");
    let view = wait_for_view(&controller, "ascending result", |view| {
        !view.is_loading && view.items == vec!["oldest"]
    })
    .await;
    assert!(!view.is_error);

    // The superseded descending response lands afterwards and is discarded.
    desc_gate.send(()).expect("release desc response");
    settle().await;
    let view = controller.view_model().await;
    assert_eq!(view.items, vec!["oldest"]);
    assert!(!view.is_error);
}

#[tokio::test]
async fn filter_change_resets_to_the_first_page() {
    let source = ScriptedSource::new();
    let page_two = QuerySpec::default().with_page(2);
    source.on(&page_two, Ok(page(&["x"], 2, 12, 100))).await;

    let mut filtered = QuerySpec::default();
    filtered.keyword = "toán".to_string();
    source.on(&filtered, Ok(page(&["y"], 0, 12, 1))).await;

    let controller = controller_for(&source, QuerySpec::default());
    controller.set_page(2).await;
    wait_for_view(&controller, "page two", |view| view.page == 2 && !view.is_loading).await;

    controller
        .set_filter(FilterPatch::new().keyword("toán"))
        .await;
    let view = wait_for_view(&controller, "filtered result", |view| {
        !view.is_loading && view.items == vec!["y"]
    })
    .await;
    assert_eq!(view.page, 0);

    let calls = source.calls().await;
    assert_eq!(calls[1].page, 0);
    assert_eq!(calls[1].keyword, "toán");
}

#[tokio::test]
async fn filter_patch_merges_and_clears_fields() {
    let source = ScriptedSource::new();
    let mut first = QuerySpec::default();
    first.keyword = "vật lý".to_string();
    first.category_id = Some(CategoryId(2));
    first
        .extra_filters
        .insert("publicationYear".to_string(), "2018".to_string());
    source.on(&first, Ok(page(&["a"], 0, 12, 1))).await;

    // Clearing the year must leave the untouched keyword and category alone.
    let mut second = first.clone();
    second.extra_filters.clear();
    source.on(&second, Ok(page(&["b"], 0, 12, 1))).await;

    let controller = controller_for(&source, QuerySpec::default());
    controller
        .set_filter(
            FilterPatch::new()
                .keyword("vật lý")
                .category(Some(CategoryId(2)))
                .extra("publicationYear", "2018"),
        )
        .await;
    wait_for_view(&controller, "first filter", |view| {
        !view.is_loading && view.items == vec!["a"]
    })
    .await;

    controller
        .set_filter(FilterPatch::new().clear_extra("publicationYear"))
        .await;
    wait_for_view(&controller, "cleared filter", |view| {
        !view.is_loading && view.items == vec!["b"]
    })
    .await;

    let calls = source.calls().await;
    assert_eq!(calls[1].keyword, "vật lý");
    assert_eq!(calls[1].category_id, Some(CategoryId(2)));
    assert!(calls[1].extra_filters.is_empty());
}

#[tokio::test]
async fn sort_change_resets_to_the_first_page() {
    let source = ScriptedSource::new();
    let page_three = QuerySpec::default().with_page(3);
    source.on(&page_three, Ok(page(&["x"], 3, 12, 60))).await;

    let mut sorted = QuerySpec::default();
    sorted.sort_field = SortField::Id;
    sorted.sort_direction = SortDirection::Asc;
    source.on(&sorted, Ok(page(&["first"], 0, 12, 60))).await;

    let controller = controller_for(&source, QuerySpec::default());
    controller.set_page(3).await;
    wait_for_view(&controller, "page three", |view| view.page == 3 && !view.is_loading).await;

    controller.set_sort(SortField::Id, SortDirection::Asc).await;
    wait_for_view(&controller, "re-sorted result", |view| {
        !view.is_loading && view.items == vec!["first"]
    })
    .await;

    let calls = source.calls().await;
    assert_eq!(calls[1].page, 0);
    assert_eq!(calls[1].sort_field, SortField::Id);
}

#[tokio::test]
async fn optimistic_page_is_corrected_once_totals_arrive() {
    let source = ScriptedSource::new();
    // pageSize 12, 30 elements: three pages. Page 5 is accepted before any
    // result exists, then clamped to the last real page.
    let optimistic = QuerySpec::default().with_page(5);
    source.on(&optimistic, Ok(page(&[], 5, 12, 30))).await;
    let clamped = QuerySpec::default().with_page(2);
    source.on(&clamped, Ok(page(&["tail"], 2, 12, 30))).await;

    let controller = controller_for(&source, QuerySpec::default());
    controller.set_page(5).await;

    let view = wait_for_view(&controller, "clamped page", |view| {
        !view.is_loading && view.page == 2
    })
    .await;
    assert_eq!(view.items, vec!["tail"]);

    let calls = source.calls().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].page, 5);
    assert_eq!(calls[1].page, 2);
}

#[tokio::test]
async fn set_page_clamps_against_known_totals() {
    let source = ScriptedSource::new();
    let first = QuerySpec::default();
    source.on(&first, Ok(page(&["a"], 0, 12, 30))).await;
    let last = QuerySpec::default().with_page(2);
    source.on(&last, Ok(page(&["z"], 2, 12, 30))).await;

    let controller = controller_for(&source, first);
    controller.refresh().await;
    wait_for_view(&controller, "first page", |view| !view.is_loading && !view.items.is_empty())
        .await;

    controller.set_page(99).await;
    let view = wait_for_view(&controller, "last page", |view| {
        !view.is_loading && view.page == 2
    })
    .await;
    assert_eq!(view.items, vec!["z"]);

    let calls = source.calls().await;
    assert_eq!(calls[1].page, 2);
}

#[tokio::test]
async fn empty_result_set_pins_the_page_to_zero() {
    let source = ScriptedSource::new();
    let spec = QuerySpec::default();
    source.on(&spec, Ok(page(&[], 0, 12, 0))).await;
    source.on(&spec, Ok(page(&[], 0, 12, 0))).await;

    let controller = controller_for(&source, spec);
    controller.refresh().await;
    wait_for_calls(&source, 1).await;
    wait_for_view(&controller, "empty result", |view| !view.is_loading).await;

    controller.set_page(7).await;
    wait_for_calls(&source, 2).await;
    wait_for_view(&controller, "still empty", |view| !view.is_loading).await;

    let calls = source.calls().await;
    assert_eq!(calls[1].page, 0);
}

#[tokio::test]
async fn duplicate_in_flight_spec_issues_one_fetch() {
    let source = ScriptedSource::new();
    let spec = QuerySpec::default();
    let gate = source.on_gated(&spec, Ok(page(&["a"], 0, 12, 1))).await;

    let controller = controller_for(&source, spec);
    controller.refresh().await;
    controller.refresh().await;

    gate.send(()).expect("release response");
    wait_for_view(&controller, "result", |view| !view.is_loading && !view.items.is_empty())
        .await;
    assert_eq!(source.calls().await.len(), 1);
}

#[tokio::test]
async fn refresh_reissues_an_identical_spec() {
    let source = ScriptedSource::new();
    let mut spec = QuerySpec::default();
    spec.keyword = "lịch sử".to_string();
    spec.subcategory_id = Some(SubcategoryId(3));
    spec.extra_filters
        .insert("publicationYear".to_string(), "2019".to_string());
    source.on(&spec, Ok(page(&["a"], 0, 12, 1))).await;
    source.on(&spec, Ok(page(&["a"], 0, 12, 1))).await;

    let controller = controller_for(&source, QuerySpec::default());
    controller
        .set_filter(
            FilterPatch::new()
                .keyword("lịch sử")
                .subcategory(Some(SubcategoryId(3)))
                .extra("publicationYear", "2019"),
        )
        .await;
    wait_for_view(&controller, "filtered result", |view| {
        !view.is_loading && !view.items.is_empty()
    })
    .await;

    controller.refresh().await;
    wait_for_calls(&source, 2).await;
    wait_for_view(&controller, "refreshed result", |view| !view.is_loading).await;

    let calls = source.calls().await;
    assert_eq!(calls[0], calls[1]);
}

#[tokio::test]
async fn refresh_clamps_when_the_last_page_disappears() {
    let source = ScriptedSource::new();
    let base = QuerySpec::default().with_page_size(1);
    // Two one-row pages; the view sits on the second.
    let second = base.clone().with_page(1);
    source.on(&second, Ok(page(&["b"], 1, 1, 2))).await;
    // After an external delete the refreshed result only has one page left,
    // so the controller clamps and re-fetches the first page.
    source.on(&second, Ok(page(&[], 1, 1, 1))).await;
    let first = base.clone();
    source.on(&first, Ok(page(&["a"], 0, 1, 1))).await;

    let controller = controller_for(&source, base);
    controller.set_page(1).await;
    wait_for_view(&controller, "second page", |view| {
        !view.is_loading && view.items == vec!["b"]
    })
    .await;

    controller.refresh().await;
    let view = wait_for_view(&controller, "clamped first page", |view| {
        !view.is_loading && view.items == vec!["a"]
    })
    .await;
    assert_eq!(view.page, 0);
    assert_eq!(view.total_pages, 1);

    let calls = source.calls().await;
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].page, 0);
}

#[tokio::test]
async fn stale_error_cannot_clobber_a_newer_success() {
    let source = ScriptedSource::new();
    let slow_spec = QuerySpec::default();
    let mut fresh_spec = QuerySpec::default();
    fresh_spec.keyword = "fresh".to_string();

    let error_gate = source
        .on_gated(
            &slow_spec,
            Err(CatalogError::Network("connection reset".to_string())),
        )
        .await;
    let success_gate = source
        .on_gated(&fresh_spec, Ok(page(&["fresh-item"], 0, 12, 1)))
        .await;

    let controller = controller_for(&source, slow_spec);
    controller.refresh().await;
    controller.set_filter(FilterPatch::new().keyword("fresh")).await;
    wait_for_calls(&source, 2).await;

    success_gate.send(()).expect("release success");
    wait_for_view(&controller, "fresh result", |view| {
        !view.is_loading && view.items == vec!["fresh-item"]
    })
    .await;

    error_gate.send(()).expect("release stale error");
    settle().await;
    let view = controller.view_model().await;
    assert!(!view.is_error);
    assert_eq!(view.items, vec!["fresh-item"]);
}

#[tokio::test]
async fn failed_refresh_keeps_the_previous_result() {
    let source = ScriptedSource::new();
    let spec = QuerySpec::default();
    source.on(&spec, Ok(page(&["keep"], 0, 12, 1))).await;
    source
        .on(
            &spec,
            Err(CatalogError::Server {
                status: 500,
                message: "database offline".to_string(),
            }),
        )
        .await;

    let controller = controller_for(&source, spec);
    controller.refresh().await;
    wait_for_view(&controller, "initial result", |view| {
        !view.is_loading && !view.items.is_empty()
    })
    .await;

    controller.refresh().await;
    let view = wait_for_view(&controller, "error state", |view| view.is_error).await;
    // Stale-but-valid rows stay visible next to the error indicator.
    assert_eq!(view.items, vec!["keep"]);
    assert!(view
        .error
        .as_deref()
        .is_some_and(|message| message.contains("database offline")));
}

#[tokio::test]
async fn shutdown_makes_late_responses_a_no_op() {
    let source = ScriptedSource::new();
    let spec = QuerySpec::default();
    let gate = source.on_gated(&spec, Ok(page(&["late"], 0, 12, 1))).await;

    let controller = controller_for(&source, spec);
    controller.refresh().await;
    wait_for_calls(&source, 1).await;

    controller.shutdown();
    gate.send(()).expect("release late response");
    settle().await;

    let view = controller.view_model().await;
    assert!(view.items.is_empty());
    assert!(!view.is_error);

    // Intents after shutdown are ignored entirely.
    controller.refresh().await;
    settle().await;
    assert_eq!(source.calls().await.len(), 1);
}
