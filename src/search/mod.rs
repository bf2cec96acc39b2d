//! Upstream search access
//!
//! [`SearchIterator`] walks one endpoint from a watermark forward;
//! [`RegulationsApi`] is the rate-limited HTTP client behind it.

mod api;
mod iterator;

pub use api::{FetchApi, RegulationsApi, SearchApi, API_BASE_URL, MIN_DELAY_BETWEEN_CALLS, REQUEST_TIMEOUT};
pub use iterator::{
    utc_to_eastern, PageMeta, SearchIterator, SearchPage, SearchState, MAX_RESULTS_PER_QUERY,
    PAGE_SIZE,
};
