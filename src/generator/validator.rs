//! Harvest completeness check
//!
//! Replays each search from a fixed early watermark and lists the entities
//! whose canonical file is absent from the data directory.

use crate::error::Result;
use crate::generator::DataStorage;
use crate::paths::{PathGenerator, UNKNOWN};
use crate::search::{SearchApi, SearchIterator, SearchPage, API_BASE_URL};

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Watermark every validation search starts from
pub const VALIDATION_START: &str = "1990-01-01 00:00:00";

/// Entities the upstream knows about but the data directory does not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// `missing_<type>` → `links.self` of each missing entity, first seen first
    #[serde(flatten)]
    pub missing: BTreeMap<String, Vec<String>>,
    /// Search results with no file, counting redelivered boundary items
    pub not_in_db: u64,
    pub total_validated: u64,
    /// Results whose path could not be derived
    pub skipped: u64,
}

impl ValidationReport {
    /// Distinct missing entities across all types
    pub fn num_missing(&self) -> usize {
        self.missing.values().map(Vec::len).sum()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        for (key, links) in other.missing {
            let entry = self.missing.entry(key).or_default();
            for link in links {
                if !entry.contains(&link) {
                    entry.push(link);
                }
            }
        }
        self.not_in_db += other.not_in_db;
        self.total_validated += other.total_validated;
        self.skipped += other.skipped;
    }
}

/// Compares search results against harvested files
pub struct Validator {
    api: Arc<dyn SearchApi>,
    storage: Arc<dyn DataStorage>,
    paths: PathGenerator,
    base_url: String,
    shutdown: Arc<AtomicBool>,
}

impl Validator {
    pub fn new(api: Arc<dyn SearchApi>, storage: Arc<dyn DataStorage>) -> Self {
        Self {
            api,
            storage,
            paths: PathGenerator::new(),
            base_url: API_BASE_URL.to_string(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Point searches at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Flag that stops validation after the current page when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Check every entity ever published on `endpoint`
    pub async fn validate(&self, endpoint: &str) -> Result<ValidationReport> {
        let url = format!("{}/{}", self.base_url, endpoint);
        tracing::info!("Validating {} from {}", url, VALIDATION_START);

        let mut iter = SearchIterator::new(self.api.clone(), url, VALIDATION_START)?;
        let mut report = ValidationReport::default();
        let mut seen = HashSet::new();

        while let Some(page) = iter.next_page().await {
            let page = page?;
            self.check_page(&page, &mut report, &mut seen);

            if self.is_shutdown() {
                tracing::info!("Stopping {} validation on shutdown", endpoint);
                break;
            }
        }

        tracing::info!(
            "Jobs not found in database: {}, total jobs validated: {}",
            report.not_in_db,
            report.total_validated
        );
        Ok(report)
    }

    /// Validate several endpoints in order and merge their reports
    pub async fn validate_all(&self, endpoints: &[String]) -> Result<ValidationReport> {
        let mut total = ValidationReport::default();
        for endpoint in endpoints {
            if self.is_shutdown() {
                break;
            }
            total.merge(self.validate(endpoint).await?);
        }
        Ok(total)
    }

    fn check_page(&self, page: &SearchPage, report: &mut ValidationReport, seen: &mut HashSet<String>) {
        for item in &page.data {
            let path = match self.paths.get_path(&json!({ "data": item })) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Skipping search result: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };

            report.total_validated += 1;
            if self.storage.exists(&path) {
                continue;
            }
            report.not_in_db += 1;

            let Some(link) = item
                .get("links")
                .and_then(|l| l.get("self"))
                .and_then(Value::as_str)
            else {
                tracing::warn!("{} not in database and has no links.self", path);
                continue;
            };

            tracing::info!("{} not in database", path);
            if seen.insert(link.to_string()) {
                let kind = item.get("type").and_then(Value::as_str).unwrap_or(UNKNOWN);
                report
                    .missing
                    .entry(format!("missing_{}", kind))
                    .or_default()
                    .push(link.to_string());
            }
        }
    }
}
