//! Completion counters and system status

use crate::error::QueueResult;
use crate::job::JobType;
use crate::queue::{JobQueue, QueueStats};
use crate::store::KeyValueStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Store key of the done counter for one job type
pub fn done_counter_key(job_type: JobType) -> String {
    format!("num_{}_done", job_type)
}

/// Completed job counts per type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsDone {
    pub num_dockets_done: u64,
    pub num_documents_done: u64,
    pub num_comments_done: u64,
    pub num_attachments_done: u64,
}

impl JobsDone {
    /// Sum over every type
    pub fn total(&self) -> u64 {
        self.num_dockets_done
            + self.num_documents_done
            + self.num_comments_done
            + self.num_attachments_done
    }
}

/// System-wide status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Queue counters
    #[serde(flatten)]
    pub queue: QueueStats,
    /// Completion counters
    #[serde(flatten)]
    pub done: JobsDone,
    /// idle, healthy, degraded or critical
    pub health: String,
    /// When this snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Messages/warnings
    pub messages: Vec<String>,
}

/// Done counters kept in the shared store
#[derive(Clone)]
pub struct JobStatistics {
    store: Arc<dyn KeyValueStore>,
}

impl JobStatistics {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Count `by` more completed jobs of `job_type`
    pub async fn increase_jobs_done(&self, job_type: JobType, by: u64) -> QueueResult<()> {
        if by == 0 || job_type == JobType::Other {
            return Ok(());
        }
        self.store
            .incr(&done_counter_key(job_type), by as i64)
            .await?;
        Ok(())
    }

    /// Read every done counter
    pub async fn get_jobs_done(&self) -> QueueResult<JobsDone> {
        Ok(JobsDone {
            num_dockets_done: self.read(JobType::Dockets).await?,
            num_documents_done: self.read(JobType::Documents).await?,
            num_comments_done: self.read(JobType::Comments).await?,
            num_attachments_done: self.read(JobType::Attachments).await?,
        })
    }

    /// Combine queue and completion counters into one snapshot
    pub async fn status(&self, queue: &JobQueue) -> QueueResult<SystemStatus> {
        let queue_stats = queue.job_stats().await?;
        let done = self.get_jobs_done().await?;
        let health = determine_health(&queue_stats, &done);

        let mut messages = Vec::new();

        if queue_stats.num_jobs_invalid > 0 {
            messages.push(format!(
                "{} jobs returned upstream errors and were marked invalid",
                queue_stats.num_jobs_invalid
            ));
        }

        if queue_stats.clients_total == 0 && queue_stats.num_jobs_waiting > 0 {
            messages.push(
                "Jobs are waiting but no client has registered - start workers to process them"
                    .to_string(),
            );
        }

        if queue_stats.num_jobs_in_progress > 0 && queue_stats.num_jobs_waiting == 0 {
            messages.push(format!(
                "{} claimed jobs outstanding; claims never expire",
                queue_stats.num_jobs_in_progress
            ));
        }

        Ok(SystemStatus {
            queue: queue_stats,
            done,
            health,
            timestamp: Utc::now(),
            messages,
        })
    }

    async fn read(&self, job_type: JobType) -> QueueResult<u64> {
        Ok(self
            .store
            .get(&done_counter_key(job_type))
            .await?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0))
    }
}

fn determine_health(stats: &QueueStats, done: &JobsDone) -> String {
    if stats.jobs_total == 0 && stats.num_jobs_invalid == 0 {
        return "idle".to_string();
    }

    if stats.clients_total == 0 && stats.num_jobs_waiting > 0 {
        return "critical".to_string();
    }

    if stats.num_jobs_invalid > done.total() / 10 {
        return "degraded".to_string();
    }

    "healthy".to_string()
}
