//! Job distribution protocol
//!
//! ```text
//! Waiting ──get_job──▶ InProgress ──put_results──▶ Done
//!                                 └─error payload─▶ Invalid
//! ```
//!
//! Protocol state lives entirely in the shared store and ownership is
//! re-read on every completion.

use crate::error::{ServerError, ServerResult};
use crate::job::{ClientId, Job, JobType};
use crate::queue::{
    JobQueue, JobStatistics, SystemStatus, CLIENT_JOBS_KEY, INVALID_JOBS_KEY,
    JOBS_IN_PROGRESS_KEY, TOTAL_CLIENT_IDS_KEY,
};
use crate::server::sink::{ResultSink, SaveOutcome};
use crate::server::validators::{
    has_errors, parse_client_id, validate_attachment_name, validate_client_id,
    validate_directory, PutResultsRequest,
};
use crate::store::KeyValueStore;

use base64::Engine;
use serde_json::Value;
use std::sync::Arc;

/// Reply for a payload persisted at its canonical path
pub const JOB_COMPLETED: &str = "Job was successfully completed";

/// Reply for `results == {}`
pub const JOB_COMPLETED_NO_ATTACHMENTS: &str = "Job completed no attachments";

/// Reply for an attachment batch
pub const ATTACHMENTS_SAVED: &str = "Attachments were successfully saved";

/// Coordinates clients, the queue and the result sink
pub struct WorkServer {
    store: Arc<dyn KeyValueStore>,
    queue: JobQueue,
    stats: JobStatistics,
    sink: Arc<dyn ResultSink>,
}

impl WorkServer {
    pub fn new(store: Arc<dyn KeyValueStore>, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            queue: JobQueue::new(store.clone()),
            stats: JobStatistics::new(store.clone()),
            store,
            sink,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Issue a new client identity
    pub async fn get_client_id(&self) -> ServerResult<ClientId> {
        let id = self.store.incr(TOTAL_CLIENT_IDS_KEY, 1).await?;
        let id = u64::try_from(id)
            .map_err(|_| ServerError::Store(format!("client id counter is negative: {}", id)))?;
        tracing::info!("Issued client id {}", id);
        Ok(ClientId(id))
    }

    /// Validate a raw `client_id` against the ids issued so far
    pub async fn authorize(&self, raw: Option<&str>) -> ServerResult<ClientId> {
        // syntax first so a malformed id is a 401 even with the store down
        let raw = raw.ok_or(ServerError::MissingClientId)?;
        parse_client_id(raw)?;

        let issued = self
            .store
            .get(TOTAL_CLIENT_IDS_KEY)
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        validate_client_id(Some(raw), issued)
    }

    /// Hand the oldest waiting job to `client_id`
    pub async fn get_job(&self, raw_client_id: Option<&str>) -> ServerResult<Job> {
        let client_id = self.authorize(raw_client_id).await?;
        self.store.ping().await?;

        // check-then-pop is two store calls; a concurrent claim between them
        // just surfaces as NoJobs and the client polls again
        if self.queue.num_jobs().await? == 0 {
            return Err(ServerError::NoJobs);
        }
        let job = self.queue.get_job().await?;

        if let Err(e) = self.record_claim(client_id, &job).await {
            self.release_claim(&job).await;
            return Err(e);
        }

        tracing::info!("Job {} ({}) claimed by client {}", job.job_id, job.job_type, client_id);
        Ok(job)
    }

    /// Accept the outcome of a job; returns the success message
    pub async fn put_results(&self, raw_client_id: Option<&str>, body: &Value) -> ServerResult<&'static str> {
        let request = PutResultsRequest::from_body(body)?;
        let client_id = self.authorize(raw_client_id).await?;
        self.store.ping().await?;

        if request.is_empty_result() {
            return Ok(JOB_COMPLETED_NO_ATTACHMENTS);
        }

        if request.job_type == JobType::Attachments {
            return self.put_attachment_results(client_id, &request).await;
        }

        if has_errors(&request.results) {
            return self.mark_invalid(client_id, &request).await;
        }

        let directory = validate_directory(request.directory.as_deref())?;
        let job_id = self.check_ownership(client_id, request.job_id.as_deref()).await?;

        match self.sink.save_json(directory, &request.results).await? {
            SaveOutcome::Written(path) => {
                tracing::info!("Wrote job {} to {}", job_id, path.display())
            }
            SaveOutcome::Duplicate(path) => {
                tracing::info!("Job {} matches stored {}", job_id, path.display())
            }
        }

        self.store.hash_del(JOBS_IN_PROGRESS_KEY, &job_id).await?;
        self.store.hash_del(CLIENT_JOBS_KEY, &job_id).await?;
        self.stats.increase_jobs_done(request.job_type, 1).await?;

        tracing::info!("SUCCESS: client {} job {}", client_id, job_id);
        Ok(JOB_COMPLETED)
    }

    /// Queue, completion and health snapshot
    pub async fn job_stats(&self) -> ServerResult<SystemStatus> {
        Ok(self.stats.status(&self.queue).await?)
    }

    async fn record_claim(&self, client_id: ClientId, job: &Job) -> ServerResult<()> {
        let job_id = job.job_id.to_string();
        self.store
            .hash_set(JOBS_IN_PROGRESS_KEY, &job_id, &job.url)
            .await?;
        self.store
            .hash_set(CLIENT_JOBS_KEY, &job_id, &client_id.to_string())
            .await?;
        Ok(())
    }

    /// Undo a partly recorded claim and return the job to the waiting list
    async fn release_claim(&self, job: &Job) {
        let job_id = job.job_id.to_string();
        let _ = self.store.hash_del(JOBS_IN_PROGRESS_KEY, &job_id).await;
        let _ = self.store.hash_del(CLIENT_JOBS_KEY, &job_id).await;

        match self.queue.requeue(job).await {
            Ok(()) => tracing::warn!("Claim for job {} failed, job requeued", job.job_id),
            Err(e) => tracing::error!("Job {} ({}) lost: requeue failed: {}", job.job_id, job.url, e),
        }
    }

    /// The job must be in progress and claimed by `client_id`
    async fn check_ownership(&self, client_id: ClientId, job_id: Option<&str>) -> ServerResult<String> {
        let job_id = job_id.ok_or(ServerError::StaleJob)?;

        let url = self.store.hash_get(JOBS_IN_PROGRESS_KEY, job_id).await?;
        let owner = self.store.hash_get(CLIENT_JOBS_KEY, job_id).await?;
        let (Some(_), Some(owner)) = (url, owner) else {
            tracing::warn!("Client {} completed job {} which was not in progress", client_id, job_id);
            return Err(ServerError::StaleJob);
        };

        if owner.parse::<u64>().ok() != Some(client_id.get()) {
            tracing::warn!(
                "Client {} completed job {} owned by client {}",
                client_id,
                job_id,
                owner
            );
            return Err(ServerError::Ownership);
        }

        Ok(job_id.to_string())
    }

    /// Upstream returned an error payload: park the job in `invalid_jobs`
    async fn mark_invalid(&self, client_id: ClientId, request: &PutResultsRequest) -> ServerResult<&'static str> {
        let job_id = self.check_ownership(client_id, request.job_id.as_deref()).await?;
        let url = self
            .store
            .hash_get(JOBS_IN_PROGRESS_KEY, &job_id)
            .await?
            .unwrap_or_default();

        tracing::info!("Errors in results. Adding job {} ({}) to invalid jobs", job_id, url);
        self.store.hash_del(JOBS_IN_PROGRESS_KEY, &job_id).await?;
        self.store.hash_del(CLIENT_JOBS_KEY, &job_id).await?;
        self.store.hash_set(INVALID_JOBS_KEY, &job_id, &url).await?;
        Ok(JOB_COMPLETED)
    }

    /// Files attached to a comment or document, sent before its main payload
    ///
    /// The parent job stays in progress; only its own completion ends it.
    async fn put_attachment_results(
        &self,
        client_id: ClientId,
        request: &PutResultsRequest,
    ) -> ServerResult<&'static str> {
        let directory = validate_directory(request.directory.as_deref())?;
        self.check_ownership(client_id, request.job_id.as_deref()).await?;

        let files = request
            .results
            .as_object()
            .ok_or(ServerError::InvalidAttachment)?;

        let mut decoded = Vec::with_capacity(files.len());
        for (name, encoded) in files {
            let name = validate_attachment_name(name)?;
            let bytes = encoded
                .as_str()
                .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok())
                .ok_or(ServerError::InvalidAttachment)?;
            decoded.push((name, bytes));
        }

        for (name, bytes) in &decoded {
            let path = format!("{}/{}", directory.trim_end_matches('/'), name);
            self.sink.save_binary(&path, bytes).await?;
        }

        self.stats
            .increase_jobs_done(JobType::Attachments, decoded.len() as u64)
            .await?;
        tracing::info!(
            "Saved {} attachments for {} to {}",
            decoded.len(),
            request.reg_id.as_deref().unwrap_or("unknown"),
            directory
        );
        Ok(ATTACHMENTS_SAVED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreResult};
    use crate::queue::JOBS_WAITING_QUEUE_KEY;
    use crate::server::sink::DiskSaver;
    use crate::store::{async_trait, MemoryStore};
    use serde_json::json;
    use tempfile::TempDir;

    const DIRECTORY: &str = "data/CMS/CMS-2014-0115/text-CMS-2014-0115/docket/CMS-2014-0115.json";

    struct Fixture {
        store: Arc<MemoryStore>,
        server: WorkServer,
        dir: TempDir,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let server = WorkServer::new(store.clone(), Arc::new(DiskSaver::new(dir.path())));
        Fixture { store, server, dir }
    }

    async fn claimed(f: &Fixture) -> (ClientId, Job) {
        let client = f.server.get_client_id().await.unwrap();
        f.server
            .queue()
            .add_job("http://a.b.c/1", JobType::Dockets, Some("CMS-2014-0115"), Some("CMS"))
            .await
            .unwrap();
        let job = f.server.get_job(Some(&client.to_string())).await.unwrap();
        (client, job)
    }

    #[tokio::test]
    async fn test_client_ids_increase() {
        let f = fixture();
        assert_eq!(f.server.get_client_id().await.unwrap(), ClientId(1));
        assert_eq!(f.server.get_client_id().await.unwrap(), ClientId(2));
        assert!(f.server.authorize(Some("2")).await.is_ok());
        assert!(matches!(f.server.authorize(Some("3")).await, Err(ServerError::InvalidClientId)));
    }

    #[tokio::test]
    async fn test_get_job_records_claim() {
        let f = fixture();
        let (client, job) = claimed(&f).await;
        let job_id = job.job_id.to_string();

        assert_eq!(
            f.store.hash_get(JOBS_IN_PROGRESS_KEY, &job_id).await.unwrap().as_deref(),
            Some("http://a.b.c/1")
        );
        assert_eq!(
            f.store.hash_get(CLIENT_JOBS_KEY, &job_id).await.unwrap(),
            Some(client.to_string())
        );
        assert_eq!(f.server.queue().job_stats().await.unwrap().num_jobs_dockets_queued, 0);
    }

    #[tokio::test]
    async fn test_get_job_errors() {
        let f = fixture();
        assert!(matches!(f.server.get_job(None).await, Err(ServerError::MissingClientId)));
        assert!(matches!(f.server.get_job(Some("1")).await, Err(ServerError::InvalidClientId)));

        f.server.get_client_id().await.unwrap();
        assert!(matches!(f.server.get_job(Some("1")).await, Err(ServerError::NoJobs)));

        f.store.set_available(false);
        assert!(matches!(f.server.get_job(Some("1")).await, Err(ServerError::StoreUnavailable)));
    }

    /// Memory store whose hash writes fail once `fail_hash_set` is on
    struct FlakyHashStore {
        inner: MemoryStore,
        fail_hash_set: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyHashStore {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            self.inner.set(key, value).await
        }
        async fn exists(&self, key: &str) -> StoreResult<bool> {
            self.inner.exists(key).await
        }
        async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
            self.inner.incr(key, delta).await
        }
        async fn push_back(&self, key: &str, value: &str) -> StoreResult<u64> {
            self.inner.push_back(key, value).await
        }
        async fn push_front(&self, key: &str, value: &str) -> StoreResult<u64> {
            self.inner.push_front(key, value).await
        }
        async fn pop_front(&self, key: &str) -> StoreResult<Option<String>> {
            self.inner.pop_front(key).await
        }
        async fn list_len(&self, key: &str) -> StoreResult<u64> {
            self.inner.list_len(key).await
        }
        async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
            if self.fail_hash_set.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.hash_set(key, field, value).await
        }
        async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
            self.inner.hash_get(key, field).await
        }
        async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
            self.inner.hash_del(key, field).await
        }
        async fn hash_len(&self, key: &str) -> StoreResult<u64> {
            self.inner.hash_len(key).await
        }
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_failed_claim_returns_job_to_queue() {
        let store = Arc::new(FlakyHashStore {
            inner: MemoryStore::new(),
            fail_hash_set: std::sync::atomic::AtomicBool::new(false),
        });
        let dir = TempDir::new().unwrap();
        let server = WorkServer::new(store.clone(), Arc::new(DiskSaver::new(dir.path())));

        let client = server.get_client_id().await.unwrap();
        let job_id = server
            .queue()
            .add_job("http://a.b.c/1", JobType::Documents, None, Some("CMS"))
            .await
            .unwrap();

        store.fail_hash_set.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            server.get_job(Some(&client.to_string())).await,
            Err(ServerError::StoreUnavailable)
        ));

        assert_eq!(store.list_len(JOBS_WAITING_QUEUE_KEY).await.unwrap(), 1);
        assert_eq!(store.hash_len(JOBS_IN_PROGRESS_KEY).await.unwrap(), 0);
        assert_eq!(server.queue().job_stats().await.unwrap().num_jobs_documents_queued, 1);

        store.fail_hash_set.store(false, std::sync::atomic::Ordering::SeqCst);
        let job = server.get_job(Some(&client.to_string())).await.unwrap();
        assert_eq!(job.job_id, job_id);
        assert_eq!(job.url, "http://a.b.c/1");
    }

    #[tokio::test]
    async fn test_put_results_completes_job() {
        let f = fixture();
        let (client, job) = claimed(&f).await;

        let body = json!({
            "job_id": job.job_id,
            "directory": DIRECTORY,
            "job_type": "dockets",
            "results": {"data": {"id": "CMS-2014-0115"}},
        });
        let message = f.server.put_results(Some(&client.to_string()), &body).await.unwrap();
        assert_eq!(message, JOB_COMPLETED);

        assert!(f.dir.path().join(DIRECTORY).exists());
        let job_id = job.job_id.to_string();
        assert_eq!(f.store.hash_get(JOBS_IN_PROGRESS_KEY, &job_id).await.unwrap(), None);
        assert_eq!(f.store.hash_get(CLIENT_JOBS_KEY, &job_id).await.unwrap(), None);
        assert_eq!(f.store.get("num_dockets_done").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_wrong_owner_is_rejected_and_job_kept() {
        let f = fixture();
        let (_, job) = claimed(&f).await;
        let other = f.server.get_client_id().await.unwrap();

        let body = json!({
            "job_id": job.job_id,
            "directory": DIRECTORY,
            "results": {"data": {}},
        });
        assert!(matches!(
            f.server.put_results(Some(&other.to_string()), &body).await,
            Err(ServerError::Ownership)
        ));

        let job_id = job.job_id.to_string();
        assert!(f.store.hash_get(JOBS_IN_PROGRESS_KEY, &job_id).await.unwrap().is_some());
        assert!(!f.dir.path().join(DIRECTORY).exists());
        assert_eq!(f.store.get("num_dockets_done").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_job_is_stale() {
        let f = fixture();
        let client = f.server.get_client_id().await.unwrap();
        let body = json!({"job_id": 99, "directory": DIRECTORY, "results": {"data": {}}});
        assert!(matches!(
            f.server.put_results(Some(&client.to_string()), &body).await,
            Err(ServerError::StaleJob)
        ));
    }

    #[tokio::test]
    async fn test_error_payload_marks_job_invalid() {
        let f = fixture();
        let (client, job) = claimed(&f).await;

        let body = json!({
            "job_id": job.job_id,
            "job_type": "dockets",
            "results": {"errors": [{"status": "404", "title": "The requested resource was not found"}]},
        });
        let message = f.server.put_results(Some(&client.to_string()), &body).await.unwrap();
        assert_eq!(message, JOB_COMPLETED);

        let job_id = job.job_id.to_string();
        assert_eq!(f.store.hash_get(JOBS_IN_PROGRESS_KEY, &job_id).await.unwrap(), None);
        assert_eq!(
            f.store.hash_get(INVALID_JOBS_KEY, &job_id).await.unwrap().as_deref(),
            Some("http://a.b.c/1")
        );
        assert!(!f.dir.path().join("data").exists());
    }

    #[tokio::test]
    async fn test_put_results_validation_order() {
        let f = fixture();
        // results are checked before the client id
        assert!(matches!(
            f.server.put_results(None, &json!({"job_id": 1})).await,
            Err(ServerError::MissingResults)
        ));
        assert!(matches!(
            f.server.put_results(None, &json!({"results": {}})).await,
            Err(ServerError::MissingClientId)
        ));

        let client = f.server.get_client_id().await.unwrap();
        assert_eq!(
            f.server
                .put_results(Some(&client.to_string()), &json!({"results": {}}))
                .await
                .unwrap(),
            JOB_COMPLETED_NO_ATTACHMENTS
        );
        assert!(matches!(
            f.server
                .put_results(Some(&client.to_string()), &json!({"job_id": 1, "directory": "nope", "results": {"a": 1}}))
                .await,
            Err(ServerError::InvalidDirectory)
        ));
    }

    #[tokio::test]
    async fn test_attachments_are_decoded_and_job_kept() {
        let f = fixture();
        let (client, job) = claimed(&f).await;
        let dir = "data/CMS/CMS-2014-0115/binary-CMS-2014-0115/comments_attachments";

        let mut files = serde_json::Map::new();
        files.insert(
            format!("{}_0.pdf", job.job_id),
            Value::String(base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4")),
        );
        let body = json!({
            "job_id": job.job_id,
            "job_type": "attachments",
            "directory": dir,
            "reg_id": "CMS-2014-0115-0092",
            "results": files,
        });
        let message = f.server.put_results(Some(&client.to_string()), &body).await.unwrap();
        assert_eq!(message, ATTACHMENTS_SAVED);

        let file = f.dir.path().join(dir).join(format!("{}_0.pdf", job.job_id));
        assert_eq!(std::fs::read(file).unwrap(), b"%PDF-1.4");
        assert_eq!(f.store.get("num_attachments_done").await.unwrap().as_deref(), Some("1"));
        assert!(f
            .store
            .hash_get(JOBS_IN_PROGRESS_KEY, &job.job_id.to_string())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_bad_attachment_encoding() {
        let f = fixture();
        let (client, job) = claimed(&f).await;
        let body = json!({
            "job_id": job.job_id,
            "job_type": "attachments",
            "directory": "data/CMS/x/binary-x/comments_attachments",
            "results": {"a.pdf": "***not base64***"},
        });
        assert!(matches!(
            f.server.put_results(Some(&client.to_string()), &body).await,
            Err(ServerError::InvalidAttachment)
        ));
    }
}
