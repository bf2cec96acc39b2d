//! Periodic search → queue driver

use crate::error::Result;
use crate::generator::{DataStorage, ProcessSummary, ResultsProcessor};
use crate::queue::JobQueue;
use crate::search::{SearchApi, SearchIterator, API_BASE_URL};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Search endpoints, in the order they are generated
pub const ENDPOINTS: [&str; 3] = ["dockets", "documents", "comments"];

/// Default pause between generation rounds
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Drives SearchIterator → ResultsProcessor → JobQueue for every endpoint
pub struct WorkGenerator {
    queue: JobQueue,
    api: Arc<dyn SearchApi>,
    processor: ResultsProcessor,
    base_url: String,
    shutdown: Arc<AtomicBool>,
}

impl WorkGenerator {
    pub fn new(queue: JobQueue, api: Arc<dyn SearchApi>, storage: Arc<dyn DataStorage>) -> Self {
        Self {
            processor: ResultsProcessor::new(queue.clone(), storage),
            queue,
            api,
            base_url: API_BASE_URL.to_string(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Point searches at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Flag that stops [`run`](Self::run) when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Enqueue everything modified on `endpoint` since its checkpoint
    ///
    /// The checkpoint is moved forward after every processed page, so an
    /// interrupted run resumes close to where it stopped.
    pub async fn download(&self, endpoint: &str) -> Result<ProcessSummary> {
        let last_timestamp = self.queue.get_last_timestamp(endpoint).await?;
        let url = format!("{}/{}", self.base_url, endpoint);
        tracing::debug!("Searching {} from {}", url, last_timestamp);

        let mut iter = SearchIterator::new(self.api.clone(), url, &last_timestamp)?;
        let mut summary = ProcessSummary::default();

        while let Some(page) = iter.next_page().await {
            let page = page?;
            if page.is_empty() {
                if self.is_shutdown() {
                    break;
                }
                continue;
            }

            summary.merge(&self.processor.process_results(&page).await?);

            if let Some(timestamp) = page.last_modified() {
                self.queue.set_last_timestamp(endpoint, timestamp).await?;
            }

            if self.is_shutdown() {
                tracing::info!("Stopping {} generation on shutdown", endpoint);
                break;
            }
        }

        Ok(summary)
    }

    /// One generation round over every endpoint
    pub async fn run_once(&self) -> Result<ProcessSummary> {
        let mut total = ProcessSummary::default();

        for endpoint in ENDPOINTS {
            if self.is_shutdown() {
                break;
            }
            tracing::info!("Begin generate {} jobs", endpoint);
            let summary = self.download(endpoint).await?;
            summary.log();
            total.merge(&summary);
            tracing::info!("End generate {} jobs", endpoint);
        }

        Ok(total)
    }

    /// Generate every `interval` until shutdown
    ///
    /// A failed round is logged and retried after the next interval.
    pub async fn run(&self, interval: Duration) {
        while !self.is_shutdown() {
            match self.run_once().await {
                Ok(summary) => {
                    tracing::info!("Generation round added {} jobs", summary.total_added())
                }
                Err(e) => tracing::error!("FAILURE: generation round failed: {}", e),
            }

            self.sleep(interval).await;
        }
    }

    async fn sleep(&self, interval: Duration) {
        let step = Duration::from_secs(1).min(interval);
        let mut waited = Duration::ZERO;
        while waited < interval && !self.is_shutdown() {
            tokio::time::sleep(step).await;
            waited += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ApiResult};
    use crate::job::JobType;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    struct ScriptedApi {
        responses: Mutex<VecDeque<ApiResult<Value>>>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SearchApi for ScriptedApi {
        async fn download(&self, url: &str, _params: &[(String, String)]) -> ApiResult<Value> {
            self.urls.lock().push(url.to_string());
            self.responses.lock().pop_front().unwrap_or_else(|| {
                Ok(json!({ "data": [], "meta": { "totalElements": 0, "pageNumber": 1, "totalPages": 0 } }))
            })
        }
    }

    struct NothingStored;

    impl DataStorage for NothingStored {
        fn exists(&self, _path: &str) -> bool {
            false
        }
    }

    fn page(ids: &[(&str, &str)], page_number: u32, total_pages: u32) -> ApiResult<Value> {
        let data: Vec<Value> = ids
            .iter()
            .map(|(id, modified)| {
                json!({
                    "id": id,
                    "type": "dockets",
                    "attributes": { "agencyId": "EPA", "lastModifiedDate": modified },
                    "links": { "self": format!("https://api.regulations.gov/v4/dockets/{}", id) }
                })
            })
            .collect();
        Ok(json!({
            "data": data,
            "meta": { "totalElements": ids.len() as u64 * total_pages as u64, "pageNumber": page_number, "totalPages": total_pages }
        }))
    }

    fn generator(responses: Vec<ApiResult<Value>>) -> (JobQueue, Arc<ScriptedApi>, WorkGenerator) {
        let queue = JobQueue::new(Arc::new(MemoryStore::new()));
        let api = Arc::new(ScriptedApi {
            responses: Mutex::new(responses.into()),
            urls: Mutex::new(Vec::new()),
        });
        let gen = WorkGenerator::new(queue.clone(), api.clone(), Arc::new(NothingStored));
        (queue, api, gen)
    }

    #[tokio::test]
    async fn test_download_enqueues_and_checkpoints() {
        let (queue, api, gen) = generator(vec![
            page(&[("EPA-2020-0001", "2020-01-01T00:00:01Z"), ("EPA-2020-0002", "2020-01-01T00:00:02Z")], 1, 2),
            Err(ApiError::Status { url: "u".into(), status: 500 }),
            page(&[("EPA-2020-0003", "2020-01-01T00:00:03Z"), ("EPA-2020-0004", "2020-01-01T00:00:04Z")], 2, 2),
        ]);

        let summary = gen.download("dockets").await.unwrap();
        assert_eq!(summary.added(JobType::Dockets), 4);
        assert_eq!(queue.num_jobs().await.unwrap(), 4);
        assert_eq!(queue.get_last_timestamp("dockets").await.unwrap(), "2020-01-01 00:00:04");
        assert_eq!(api.urls.lock()[0], "https://api.regulations.gov/v4/dockets");
        assert_eq!(api.urls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_run_once_visits_every_endpoint() {
        let (_, api, gen) = generator(Vec::new());
        let gen = gen.with_base_url("http://localhost:9999/v4");

        let summary = gen.run_once().await.unwrap();
        assert_eq!(summary.total_added(), 0);
        assert_eq!(
            *api.urls.lock(),
            vec![
                "http://localhost:9999/v4/dockets",
                "http://localhost:9999/v4/documents",
                "http://localhost:9999/v4/comments",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_, _, gen) = generator(Vec::new());
        let handle = gen.shutdown_handle();
        handle.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), gen.run(DEFAULT_INTERVAL))
            .await
            .unwrap();
    }
}
