//! FIFO job queue on the shared store
//!
//! Jobs are serialized into the `jobs_waiting_queue` list (pushed at the
//! tail, popped at the head), ids come from an atomic increment of
//! `last_job_id`, and per-endpoint search checkpoints live next to them.

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobType};
use crate::store::KeyValueStore;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Store key for the waiting list
pub const JOBS_WAITING_QUEUE_KEY: &str = "jobs_waiting_queue";

/// Store key for the job id counter
pub const LAST_JOB_ID_KEY: &str = "last_job_id";

/// Store key for the number of issued client ids
pub const TOTAL_CLIENT_IDS_KEY: &str = "total_num_client_ids";

/// Store key for the `job_id → url` map of claimed jobs
pub const JOBS_IN_PROGRESS_KEY: &str = "jobs_in_progress";

/// Store key for the `job_id → client_id` ownership map
pub const CLIENT_JOBS_KEY: &str = "client_jobs";

/// Store key for the `job_id → url` map of jobs whose upstream fetch failed
pub const INVALID_JOBS_KEY: &str = "invalid_jobs";

/// Checkpoint returned for an endpoint that has never been searched
pub const DEFAULT_TIMESTAMP: &str = "1972-01-01 00:00:00";

/// Store key of the waiting counter for one job type
pub fn waiting_counter_key(job_type: JobType) -> String {
    format!("num_jobs_{}_waiting", job_type)
}

/// Store key of the checkpoint for one endpoint
pub fn timestamp_key(endpoint: &str) -> String {
    format!("{}_last_timestamp", endpoint)
}

/// Convert `2010-06-10T20:49:03Z` into `2010-06-10 20:49:03`
///
/// Already-normalized values pass through unchanged.
pub fn normalize_timestamp(value: &str) -> String {
    value.trim().replace('T', " ").trim_end_matches('Z').to_string()
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs in the waiting list
    pub num_jobs_waiting: u64,
    /// Jobs claimed by a client
    pub num_jobs_in_progress: u64,
    /// Jobs whose upstream fetch returned errors
    pub num_jobs_invalid: u64,
    /// Waiting plus in progress
    pub jobs_total: u64,
    /// Client ids issued so far
    pub clients_total: u64,
    /// Waiting counter for dockets
    pub num_jobs_dockets_queued: i64,
    /// Waiting counter for documents
    pub num_jobs_documents_queued: i64,
    /// Waiting counter for comments
    pub num_jobs_comments_queued: i64,
    /// Waiting counter for attachments
    pub num_jobs_attachments_queued: i64,
}

/// Job queue backed by a [`KeyValueStore`]
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn KeyValueStore>,
}

impl JobQueue {
    /// Create a queue over the given store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Append a job to the tail of the waiting list
    ///
    /// The id comes from an atomic increment, so concurrent producers never
    /// share an id and each producer sees its own ids strictly increase.
    pub async fn add_job(
        &self,
        url: &str,
        job_type: JobType,
        reg_id: Option<&str>,
        agency: Option<&str>,
    ) -> QueueResult<u64> {
        let job_id = self.next_job_id().await?;
        let job = Job {
            job_id,
            url: url.to_string(),
            job_type,
            reg_id: reg_id.map(str::to_string),
            agency: agency.map(str::to_string),
        };

        self.store
            .push_back(JOBS_WAITING_QUEUE_KEY, &job.to_json()?)
            .await?;
        self.store.incr(&waiting_counter_key(job_type), 1).await?;

        tracing::debug!("Queued {} job {} for {}", job_type, job_id, url);
        Ok(job_id)
    }

    /// Pop the oldest waiting job
    ///
    /// Fails with [`QueueError::Empty`] when nothing is waiting and with
    /// [`QueueError::StoreUnavailable`] when the store cannot be reached.
    pub async fn get_job(&self) -> QueueResult<Job> {
        let raw = self
            .store
            .pop_front(JOBS_WAITING_QUEUE_KEY)
            .await?
            .ok_or_else(|| QueueError::Empty {
                name: JOBS_WAITING_QUEUE_KEY.to_string(),
            })?;

        let job = Job::from_json(&raw).map_err(|e| {
            tracing::error!("Dropping unreadable job from waiting list: {}", raw);
            QueueError::Serialization(e.to_string())
        })?;

        self.store.incr(&waiting_counter_key(job.job_type), -1).await?;
        Ok(job)
    }

    /// Put a popped job back at the head of the waiting list
    ///
    /// Used when a claim could not be recorded, so the job keeps its place
    /// and its type counter instead of being lost.
    pub async fn requeue(&self, job: &Job) -> QueueResult<()> {
        self.store
            .push_front(JOBS_WAITING_QUEUE_KEY, &job.to_json()?)
            .await?;
        self.store.incr(&waiting_counter_key(job.job_type), 1).await?;
        tracing::debug!("Requeued {} job {}", job.job_type, job.job_id);
        Ok(())
    }

    /// Number of jobs waiting
    pub async fn num_jobs(&self) -> QueueResult<u64> {
        Ok(self.store.list_len(JOBS_WAITING_QUEUE_KEY).await?)
    }

    /// Last processed timestamp for an endpoint, space-delimited
    pub async fn get_last_timestamp(&self, endpoint: &str) -> QueueResult<String> {
        match self.store.get(&timestamp_key(endpoint)).await? {
            Some(value) => Ok(normalize_timestamp(&value)),
            None => Ok(DEFAULT_TIMESTAMP.to_string()),
        }
    }

    /// Record the last processed timestamp for an endpoint
    ///
    /// The checkpoint never moves backwards; returns `false` when `value` is
    /// older than what is stored and nothing was written.
    pub async fn set_last_timestamp(&self, endpoint: &str, value: &str) -> QueueResult<bool> {
        let key = timestamp_key(endpoint);
        let normalized = normalize_timestamp(value);

        // Normalized timestamps are fixed-width, so string order is time order
        if let Some(current) = self.store.get(&key).await? {
            if normalized < normalize_timestamp(&current) {
                tracing::debug!(
                    "Ignoring {} checkpoint {} older than {}",
                    endpoint,
                    normalized,
                    current
                );
                return Ok(false);
            }
        }

        self.store.set(&key, &normalized).await?;
        Ok(true)
    }

    /// Counter snapshot
    pub async fn job_stats(&self) -> QueueResult<QueueStats> {
        let num_jobs_waiting = self.num_jobs().await?;
        let num_jobs_in_progress = self.store.hash_len(JOBS_IN_PROGRESS_KEY).await?;
        let num_jobs_invalid = self.store.hash_len(INVALID_JOBS_KEY).await?;
        let clients_total = self.read_counter(TOTAL_CLIENT_IDS_KEY).await?.max(0) as u64;

        Ok(QueueStats {
            num_jobs_waiting,
            num_jobs_in_progress,
            num_jobs_invalid,
            jobs_total: num_jobs_waiting + num_jobs_in_progress,
            clients_total,
            num_jobs_dockets_queued: self
                .read_counter(&waiting_counter_key(JobType::Dockets))
                .await?,
            num_jobs_documents_queued: self
                .read_counter(&waiting_counter_key(JobType::Documents))
                .await?,
            num_jobs_comments_queued: self
                .read_counter(&waiting_counter_key(JobType::Comments))
                .await?,
            num_jobs_attachments_queued: self
                .read_counter(&waiting_counter_key(JobType::Attachments))
                .await?,
        })
    }

    async fn next_job_id(&self) -> QueueResult<u64> {
        let id = self.store.incr(LAST_JOB_ID_KEY, 1).await?;
        u64::try_from(id).map_err(|_| QueueError::Store(format!("job id counter is negative: {}", id)))
    }

    async fn read_counter(&self, key: &str) -> QueueResult<i64> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0))
    }
}
