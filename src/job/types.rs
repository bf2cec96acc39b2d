//! Job types and data structures
//!
//! A Job is a single upstream URL to fetch, handed to exactly one worker
//! at a time by the work server.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity a job fetches
///
/// Serialized with the upstream collection names (`dockets`, `documents`,
/// ...). Singular spellings are accepted when parsing; anything else is
/// [`JobType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum JobType {
    Dockets,
    Documents,
    Comments,
    Attachments,
    Other,
}

impl JobType {
    /// Every job type, in counter order
    pub const ALL: [JobType; 5] = [
        JobType::Dockets,
        JobType::Documents,
        JobType::Comments,
        JobType::Attachments,
        JobType::Other,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Dockets => "dockets",
            JobType::Documents => "documents",
            JobType::Comments => "comments",
            JobType::Attachments => "attachments",
            JobType::Other => "other",
        }
    }

    /// Parse a wire name, falling back to `Other`
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "dockets" | "docket" => JobType::Dockets,
            "documents" | "document" => JobType::Documents,
            "comments" | "comment" => JobType::Comments,
            "attachments" | "attachment" => JobType::Attachments,
            _ => JobType::Other,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for JobType {
    fn default() -> Self {
        JobType::Other
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        Self::parse_lossy(&s)
    }
}

impl FromStr for JobType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_lossy(s))
    }
}

/// A unit of work in the waiting queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Monotonic identifier assigned by the queue
    pub job_id: u64,
    /// Upstream URL to fetch
    pub url: String,
    /// Kind of entity behind the URL
    #[serde(default)]
    pub job_type: JobType,
    /// Regulations.gov identifier of the entity
    #[serde(default)]
    pub reg_id: Option<String>,
    /// Agency owning the entity
    #[serde(default)]
    pub agency: Option<String>,
}

impl Job {
    /// Serialize for the waiting list
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from the waiting list
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Identity issued to a worker process by `get_client_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Raw integer value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_wire_names() {
        assert_eq!(JobType::Dockets.as_str(), "dockets");
        assert_eq!(JobType::parse_lossy("comment"), JobType::Comments);
        assert_eq!(JobType::parse_lossy("Documents"), JobType::Documents);
        assert_eq!(JobType::parse_lossy("frdoc"), JobType::Other);
    }

    #[test]
    fn test_job_type_serde() {
        let t: JobType = serde_json::from_str("\"docket\"").unwrap();
        assert_eq!(t, JobType::Dockets);
        let t: JobType = serde_json::from_str("\"whatever\"").unwrap();
        assert_eq!(t, JobType::Other);
        assert_eq!(serde_json::to_string(&JobType::Attachments).unwrap(), "\"attachments\"");
    }

    #[test]
    fn test_job_json() {
        let job = Job {
            job_id: 7,
            url: "https://api.regulations.gov/v4/dockets/EPA-HQ-OAR-2003-0129".into(),
            job_type: JobType::Dockets,
            reg_id: Some("EPA-HQ-OAR-2003-0129".into()),
            agency: Some("EPA".into()),
        };
        let parsed = Job::from_json(&job.to_json().unwrap()).unwrap();
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_job_without_optional_fields() {
        let job = Job::from_json(r#"{"job_id": 3, "url": "url"}"#).unwrap();
        assert_eq!(job.job_id, 3);
        assert_eq!(job.job_type, JobType::Other);
        assert_eq!(job.reg_id, None);
        assert_eq!(job.agency, None);
    }
}
