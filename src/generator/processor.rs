//! Search results → jobs

use crate::error::QueueResult;
use crate::generator::DataStorage;
use crate::job::JobType;
use crate::paths::PathGenerator;
use crate::queue::JobQueue;
use crate::search::SearchPage;

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Added/preexisting counts for one job type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCounts {
    pub added: u64,
    pub preexisting: u64,
}

/// Per-type outcome of processing one or more pages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    counts: HashMap<JobType, TypeCounts>,
    /// Entities that could not be turned into a job
    pub skipped: u64,
}

impl ProcessSummary {
    pub fn added(&self, job_type: JobType) -> u64 {
        self.counts.get(&job_type).map(|c| c.added).unwrap_or(0)
    }

    pub fn preexisting(&self, job_type: JobType) -> u64 {
        self.counts.get(&job_type).map(|c| c.preexisting).unwrap_or(0)
    }

    pub fn total_added(&self) -> u64 {
        self.counts.values().map(|c| c.added).sum()
    }

    /// Fold another summary into this one
    pub fn merge(&mut self, other: &ProcessSummary) {
        for (job_type, counts) in &other.counts {
            let entry = self.counts.entry(*job_type).or_default();
            entry.added += counts.added;
            entry.preexisting += counts.preexisting;
        }
        self.skipped += other.skipped;
    }

    /// Emit one line per type seen
    pub fn log(&self) {
        for job_type in JobType::ALL {
            if let Some(counts) = self.counts.get(&job_type) {
                tracing::info!("Added {}: {}", job_type, counts.added);
                tracing::info!("Preexisting {}: {}", job_type, counts.preexisting);
            }
        }
        if self.skipped > 0 {
            tracing::warn!("Skipped {} malformed entities", self.skipped);
        }
    }

    fn record(&mut self, job_type: JobType, added: bool) {
        let entry = self.counts.entry(job_type).or_default();
        if added {
            entry.added += 1;
        } else {
            entry.preexisting += 1;
        }
    }
}

/// Enqueues a job for every entity not already harvested
pub struct ResultsProcessor {
    queue: JobQueue,
    storage: Arc<dyn DataStorage>,
    paths: PathGenerator,
}

impl ResultsProcessor {
    pub fn new(queue: JobQueue, storage: Arc<dyn DataStorage>) -> Self {
        Self {
            queue,
            storage,
            paths: PathGenerator::new(),
        }
    }

    /// Process every entity in `page`
    ///
    /// Entities lacking an object shape or a `links.self` URL are skipped
    /// and counted; store failures abort the page.
    pub async fn process_results(&self, page: &SearchPage) -> QueueResult<ProcessSummary> {
        let mut summary = ProcessSummary::default();

        for item in &page.data {
            let path = match self.paths.get_path(&json!({ "data": item })) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Skipping search result: {}", e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let job_type = item
                .get("type")
                .and_then(Value::as_str)
                .map(JobType::parse_lossy)
                .unwrap_or_default();

            if self.storage.exists(&path) {
                summary.record(job_type, false);
                continue;
            }

            let Some(self_link) = item
                .get("links")
                .and_then(|l| l.get("self"))
                .and_then(Value::as_str)
            else {
                tracing::warn!("Skipping search result without links.self: {}", path);
                summary.skipped += 1;
                continue;
            };

            let url = if job_type == JobType::Comments {
                format!("{}?include=attachments", self_link)
            } else {
                self_link.to_string()
            };
            let reg_id = item.get("id").and_then(Value::as_str);
            let agency = item
                .get("attributes")
                .and_then(|a| a.get("agencyId"))
                .and_then(Value::as_str);

            self.queue.add_job(&url, job_type, reg_id, agency).await?;
            summary.record(job_type, true);
        }

        Ok(summary)
    }
}
