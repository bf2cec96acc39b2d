//! Canonical storage paths for harvested entities
//!
//! The path doubles as the dedup key, so the output for a given entity
//! must never change between runs.

use crate::error::PathError;
use crate::job::JobType;

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Placeholder for any identifier missing from the entity
pub const UNKNOWN: &str = "unknown";

/// AGENCY-YEAR-NUMBER-SUFFIX, capturing the docket prefix
static STANDARD_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z]{2,}-[12]\d{2,}-\d{4,})-\d{4,}$").expect("Invalid standard id regex")
});

/// Identifiers extracted from an entity's JSON
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    pub agency_id: String,
    pub docket_id: String,
    pub item_id: String,
    pub job_type: JobType,
}

impl PathKey {
    /// Extract identifiers from `{"data": {...}}`
    pub fn from_entity(json: &Value) -> Result<Self, PathError> {
        let data = json
            .get("data")
            .filter(|d| d.is_object())
            .ok_or(PathError::MissingData)?;
        let attributes = data.get("attributes");

        let item_id = str_field(Some(data), "id").unwrap_or(UNKNOWN).to_string();
        let agency_id = attributes
            .and_then(|a| str_field(Some(a), "agencyId"))
            .unwrap_or(UNKNOWN)
            .to_string();
        let job_type = data
            .get("type")
            .and_then(Value::as_str)
            .map(JobType::parse_lossy)
            .unwrap_or(JobType::Dockets);

        let (item_id, docket_id) = match job_type {
            JobType::Documents | JobType::Comments => {
                let docket_id = match attributes.and_then(|a| str_field(Some(a), "docketId")) {
                    Some(id) => id.to_string(),
                    None => derive_docket_id(&item_id),
                };
                (item_id, docket_id)
            }
            _ if item_id.contains("FRDOC") => {
                let id = format!("{}_FRDOC_0001", agency_id);
                (id.clone(), id)
            }
            _ => (item_id.clone(), item_id),
        };

        Ok(Self {
            agency_id,
            docket_id,
            item_id,
            job_type,
        })
    }

    fn collection(&self) -> &'static str {
        match self.job_type {
            JobType::Documents => "documents",
            JobType::Comments => "comments",
            _ => "docket",
        }
    }
}

fn str_field<'a>(value: Option<&'a Value>, field: &str) -> Option<&'a str> {
    value
        .and_then(|v| v.get(field))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Recover the docket id from a document or comment id
pub fn derive_docket_id(item_id: &str) -> String {
    if item_id == UNKNOWN {
        return UNKNOWN.to_string();
    }

    if item_id.contains("FRDOC") {
        let mut parts = item_id.split('_');
        let agency = parts.next().unwrap_or(UNKNOWN);
        let seq = parts.last().unwrap_or(item_id);
        let seq = seq.rsplit_once('-').map(|(head, _)| head).unwrap_or(seq);
        return format!("{}_FRDOC_{}", agency, seq);
    }

    if let Some(caps) = STANDARD_ID_REGEX.captures(item_id) {
        return caps[1].to_string();
    }

    match item_id.rsplit_once('-') {
        Some((head, _)) => head.to_string(),
        None => item_id.to_string(),
    }
}

/// Derives canonical paths from entity JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct PathGenerator;

impl PathGenerator {
    pub fn new() -> Self {
        Self
    }

    /// `data/{agency}/{docket}/text-{docket}/{collection}/{item}.json`
    pub fn get_path(&self, json: &Value) -> Result<String, PathError> {
        let key = PathKey::from_entity(json)?;
        Ok(format!(
            "data/{agency}/{docket}/text-{docket}/{collection}/{item}.json",
            agency = key.agency_id,
            docket = key.docket_id,
            collection = key.collection(),
            item = key.item_id,
        ))
    }

    /// `data/{agency}/{docket}/binary-{docket}/{collection}_attachments`
    pub fn get_attachment_dir(&self, json: &Value) -> Result<String, PathError> {
        let key = PathKey::from_entity(json)?;
        Ok(format!(
            "data/{agency}/{docket}/binary-{docket}/{collection}_attachments",
            agency = key.agency_id,
            docket = key.docket_id,
            collection = key.collection(),
        ))
    }
}
