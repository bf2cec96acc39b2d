//! Checkpointed pagination over one search endpoint
//!
//! The upstream search caps a query at 20 pages of 250 results. When a
//! query has more than 5000 matches, the iterator finishes those 20 pages and
//! starts a fresh query. That new query begins at page 1 with the watermark
//! moved to the last item seen. The upstream takes watermarks in US/Eastern
//! but reports dates in UTC; conversion happens here.

use crate::error::{ApiError, SearchError};
use crate::queue::normalize_timestamp;
use crate::search::SearchApi;

use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::US::Eastern;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Results per page
pub const PAGE_SIZE: u32 = 250;

/// Largest result set the upstream will page through
pub const MAX_RESULTS_PER_QUERY: u64 = 5000;

const QUERY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert a UTC timestamp (`T`/`Z` optional) into the Eastern query format
pub fn utc_to_eastern(value: &str) -> Result<String, SearchError> {
    let normalized = normalize_timestamp(value);
    let naive = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f").map_err(|e| {
        SearchError::InvalidWatermark {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;

    Ok(Utc
        .from_utc_datetime(&naive)
        .with_timezone(&Eastern)
        .format(QUERY_TIME_FORMAT)
        .to_string())
}

/// `meta` block of a search page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total_elements: u64,
    pub page_number: u32,
    pub total_pages: u32,
}

/// One page of raw search results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub data: Vec<Value>,
    /// `None` for the empty page yielded after a failed fetch
    pub meta: Option<PageMeta>,
}

impl SearchPage {
    /// The page handed out when a fetch failed
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Split a raw response into entities and meta
    pub fn from_json(json: Value) -> Result<Self, SearchError> {
        let Value::Object(mut map) = json else {
            return Err(SearchError::MalformedPage("response is not an object".into()));
        };

        let meta = map
            .remove("meta")
            .ok_or_else(|| SearchError::MalformedPage("missing 'meta'".into()))?;
        let meta: PageMeta = serde_json::from_value(meta)
            .map_err(|e| SearchError::MalformedPage(format!("bad 'meta': {}", e)))?;

        let data = match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(SearchError::MalformedPage("'data' is not an array".into())),
        };

        Ok(Self {
            data,
            meta: Some(meta),
        })
    }

    /// `attributes.lastModifiedDate` of the final entity
    pub fn last_modified(&self) -> Option<&str> {
        self.data
            .last()
            .and_then(|item| item.get("attributes"))
            .and_then(|a| a.get("lastModifiedDate"))
            .and_then(Value::as_str)
    }
}

/// Cursor over a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    /// Page to request next, starting at 1
    pub next_page: u32,
    /// Lower bound on `lastModifiedDate`, US/Eastern query format
    pub watermark: String,
    pub done: bool,
}

impl SearchState {
    /// Start a search at a UTC watermark
    pub fn new(watermark_utc: &str) -> Result<Self, SearchError> {
        Ok(Self {
            next_page: 1,
            watermark: utc_to_eastern(watermark_utc)?,
            done: false,
        })
    }

    /// State after a page with `meta` was fetched
    ///
    /// `last_modified` is the UTC `lastModifiedDate` of the page's final
    /// entity; it is only needed when the query has to be restarted.
    pub fn advance(&self, meta: &PageMeta, last_modified: Option<&str>) -> Result<Self, SearchError> {
        let mut next = self.clone();
        next.next_page += 1;

        // an empty result set reports zero pages
        if meta.total_pages > 0 && meta.page_number < meta.total_pages {
            return Ok(next);
        }

        if meta.total_elements <= MAX_RESULTS_PER_QUERY {
            next.done = true;
            return Ok(next);
        }

        let last = last_modified.ok_or_else(|| {
            SearchError::MalformedPage("final page of an oversized query has no items".into())
        })?;
        next.next_page = 1;
        next.watermark = utc_to_eastern(last)?;
        Ok(next)
    }
}

/// Lazy, finite sequence of result pages for one endpoint
pub struct SearchIterator {
    api: Arc<dyn SearchApi>,
    url: String,
    state: SearchState,
}

impl SearchIterator {
    /// Iterate `url` for everything modified at or after `watermark_utc`
    pub fn new(api: Arc<dyn SearchApi>, url: impl Into<String>, watermark_utc: &str) -> Result<Self, SearchError> {
        Ok(Self {
            api,
            url: url.into(),
            state: SearchState::new(watermark_utc)?,
        })
    }

    /// Current cursor
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![
            ("sort".to_string(), "lastModifiedDate".to_string()),
            ("page[size]".to_string(), PAGE_SIZE.to_string()),
            (
                "filter[lastModifiedDate][ge]".to_string(),
                self.state.watermark.clone(),
            ),
            ("page[number]".to_string(), self.state.next_page.to_string()),
        ]
    }

    /// Fetch the next page
    ///
    /// Returns `None` once the search is exhausted. A transient failure
    /// yields an empty page and leaves the cursor in place, so the same page
    /// is requested again on the next call. A permanent one (bad key,
    /// unknown endpoint) ends the iteration with an error.
    pub async fn next_page(&mut self) -> Option<Result<SearchPage, SearchError>> {
        if self.state.done {
            return None;
        }

        let response = match self.api.download(&self.url, &self.params()).await {
            Ok(response) => response,
            Err(e) if e.is_transient() => {
                log_failed_fetch(&self.url, self.state.next_page, &e);
                return Some(Ok(SearchPage::empty()));
            }
            Err(e) => {
                tracing::error!("FAILED: {} page {}: {}", self.url, self.state.next_page, e);
                self.state.done = true;
                return Some(Err(SearchError::Upstream(e)));
            }
        };

        let step = SearchPage::from_json(response).and_then(|page| {
            let meta = page.meta.ok_or_else(|| SearchError::MalformedPage("missing 'meta'".into()))?;
            let next = self.state.advance(&meta, page.last_modified())?;
            Ok((page, next))
        });

        match step {
            Ok((page, next)) => {
                if next.next_page == 1 && !next.done {
                    tracing::info!("Restarting {} search at {}", self.url, next.watermark);
                }
                self.state = next;
                Some(Ok(page))
            }
            Err(e) => {
                self.state.done = true;
                Some(Err(e))
            }
        }
    }
}

fn log_failed_fetch(url: &str, page: u32, err: &ApiError) {
    tracing::warn!("FAILED: {} page {}: {} (will retry)", url, page, err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiResult;
    use chrono::Duration;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedApi {
        responses: Mutex<VecDeque<ApiResult<Value>>>,
        requests: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<ApiResult<Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn param(&self, call: usize, name: &str) -> String {
            self.requests.lock()[call]
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        }
    }

    #[async_trait::async_trait]
    impl SearchApi for ScriptedApi {
        async fn download(&self, _url: &str, params: &[(String, String)]) -> ApiResult<Value> {
            self.requests.lock().push(params.to_vec());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"data": [], "meta": {"totalElements": 0, "pageNumber": 1, "totalPages": 0}})))
        }
    }

    /// Pages shaped like the upstream's, one second apart from 2020-01-01
    ///
    /// Each query reports its own remaining total and at most 20 pages.
    fn dataset(mut remaining: u64) -> Vec<ApiResult<Value>> {
        let start = NaiveDateTime::parse_from_str("2020-01-01 00:00:00", QUERY_TIME_FORMAT).unwrap();
        let mut counter = 1i64;
        let mut pages: Vec<ApiResult<Value>> = Vec::new();

        let item = |counter: &mut i64| {
            let date = (start + Duration::seconds(*counter)).format("%Y-%m-%dT%H:%M:%SZ").to_string();
            let value = json!({
                "id": format!("ABC-2020-{}", counter),
                "type": "dockets",
                "attributes": { "lastModifiedDate": date },
                "links": { "self": format!("http://a.b.c/{}", counter) }
            });
            *counter += 1;
            value
        };

        let max_pages = MAX_RESULTS_PER_QUERY / PAGE_SIZE as u64;
        while remaining > 0 {
            let query_total = remaining;
            let total_pages = query_total.div_ceil(PAGE_SIZE as u64).min(max_pages);
            for page_number in 1..=total_pages {
                let size = remaining.min(PAGE_SIZE as u64);
                let data: Vec<Value> = (0..size).map(|_| item(&mut counter)).collect();
                pages.push(Ok(json!({
                    "data": data,
                    "meta": { "totalElements": query_total, "pageNumber": page_number, "totalPages": total_pages }
                })));
                remaining -= size;
            }
        }
        pages
    }

    async fn drain(iter: &mut SearchIterator) -> Vec<SearchPage> {
        let mut pages = Vec::new();
        while let Some(page) = iter.next_page().await {
            pages.push(page.unwrap());
        }
        pages
    }

    #[test]
    fn test_watermark_converted_to_eastern() {
        assert_eq!(utc_to_eastern("1972-01-01 00:00:00").unwrap(), "1971-12-31 19:00:00");
        assert_eq!(utc_to_eastern("2020-07-01T12:00:00Z").unwrap(), "2020-07-01 08:00:00");
        assert!(utc_to_eastern("yesterday").is_err());
    }

    #[test]
    fn test_step_function() {
        let state = SearchState::new("2020-01-01 00:00:00").unwrap();

        let mid = PageMeta { total_elements: 5650, page_number: 3, total_pages: 20 };
        let next = state.advance(&mid, None).unwrap();
        assert_eq!(next.next_page, 2);
        assert!(!next.done);

        let small_final = PageMeta { total_elements: 40, page_number: 1, total_pages: 1 };
        assert!(state.advance(&small_final, None).unwrap().done);

        let big_final = PageMeta { total_elements: 5650, page_number: 20, total_pages: 20 };
        let reset = state.advance(&big_final, Some("2020-01-01T01:23:20Z")).unwrap();
        assert_eq!(reset.next_page, 1);
        assert_eq!(reset.watermark, "2019-12-31 20:23:20");
        assert!(!reset.done);

        assert!(state.advance(&big_final, None).is_err());

        let no_results = PageMeta { total_elements: 0, page_number: 1, total_pages: 0 };
        let next = state.advance(&no_results, None).unwrap();
        assert!(next.done);
        assert_eq!(next.watermark, state.watermark);
    }

    #[tokio::test]
    async fn test_empty_result_set_is_one_empty_page() {
        let api = ScriptedApi::new(vec![Ok(json!({
            "data": [],
            "meta": {"totalElements": 0, "pageNumber": 1, "totalPages": 0}
        }))]);
        let mut iter = SearchIterator::new(api.clone(), "u", "2020-01-01 00:00:00").unwrap();

        let pages = drain(&mut iter).await;
        assert_eq!(pages.len(), 1);
        assert!(pages[0].is_empty());
        assert_eq!(api.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_query_ends_iteration() {
        let api = ScriptedApi::new(vec![Err(ApiError::Status { url: "u".into(), status: 403 })]);
        let mut iter = SearchIterator::new(api.clone(), "u", "2020-01-01 00:00:00").unwrap();

        assert!(matches!(
            iter.next_page().await,
            Some(Err(SearchError::Upstream(ApiError::Status { status: 403, .. })))
        ));
        assert!(iter.next_page().await.is_none());
        assert_eq!(api.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_5000_results_is_20_pages() {
        let api = ScriptedApi::new(dataset(5000));
        let mut iter = SearchIterator::new(api.clone(), "https://api.regulations.gov/v4/dockets", "1972-01-01 00:00:00").unwrap();

        let pages = drain(&mut iter).await;
        assert_eq!(pages.len(), 20);
        assert_eq!(api.requests.lock().len(), 20);
        assert!(pages.iter().all(|p| p.data.len() == 250));
        assert_eq!(api.param(0, "filter[lastModifiedDate][ge]"), "1971-12-31 19:00:00");
        assert_eq!(api.param(0, "sort"), "lastModifiedDate");
        assert_eq!(api.param(0, "page[size]"), "250");
        assert_eq!(api.param(19, "page[number]"), "20");
    }

    #[tokio::test]
    async fn test_5650_results_resets_once() {
        let api = ScriptedApi::new(dataset(5650));
        let mut iter = SearchIterator::new(api.clone(), "https://api.regulations.gov/v4/dockets", "1972-01-01 00:00:00").unwrap();

        let pages = drain(&mut iter).await;
        assert_eq!(pages.len(), 23);
        assert_eq!(api.requests.lock().len(), 23);

        let page_numbers: Vec<String> = (0..23).map(|i| api.param(i, "page[number]")).collect();
        assert_eq!(page_numbers.iter().filter(|p| p.as_str() == "1").count(), 2);
        assert_eq!(api.param(20, "page[number]"), "1");
        // item 5000 was modified at 2020-01-01T01:23:20Z
        assert_eq!(api.param(20, "filter[lastModifiedDate][ge]"), "2019-12-31 20:23:20");
        assert_eq!(pages[22].data.len(), 150);
    }

    #[tokio::test]
    async fn test_failed_fetch_retries_same_page() {
        let api = ScriptedApi::new(vec![
            Err(ApiError::Status { url: "u".into(), status: 500 }),
            Ok(json!({
                "data": [{"id": "ABC-2020-1", "attributes": {"lastModifiedDate": "2020-01-01T00:00:01Z"}}],
                "meta": {"totalElements": 1, "pageNumber": 1, "totalPages": 1}
            })),
        ]);
        let mut iter = SearchIterator::new(api.clone(), "u", "2020-01-01 00:00:00").unwrap();

        let first = iter.next_page().await.unwrap().unwrap();
        assert!(first.is_empty());
        assert_eq!(iter.state().next_page, 1);

        let second = iter.next_page().await.unwrap().unwrap();
        assert_eq!(second.data.len(), 1);
        assert!(iter.next_page().await.is_none());

        assert_eq!(api.param(0, "page[number]"), "1");
        assert_eq!(api.param(1, "page[number]"), "1");
    }

    #[tokio::test]
    async fn test_malformed_page_ends_iteration() {
        let api = ScriptedApi::new(vec![Ok(json!({"data": []}))]);
        let mut iter = SearchIterator::new(api, "u", "2020-01-01 00:00:00").unwrap();

        assert!(matches!(iter.next_page().await, Some(Err(SearchError::MalformedPage(_)))));
        assert!(iter.next_page().await.is_none());
    }
}
