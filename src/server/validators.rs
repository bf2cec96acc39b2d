//! Request validation
//!
//! Every check here runs before the server touches protocol state.

use crate::error::{ServerError, ServerResult};
use crate::job::{ClientId, JobType};

use serde_json::Value;

/// Check a raw `client_id` query value against the number of issued ids
pub fn validate_client_id(raw: Option<&str>, issued: u64) -> ServerResult<ClientId> {
    let raw = raw.ok_or(ServerError::MissingClientId)?;
    let id = parse_client_id(raw)?;
    if id.get() == 0 || id.get() > issued {
        return Err(ServerError::InvalidClientId);
    }
    Ok(id)
}

/// Syntactic half of [`validate_client_id`]: ASCII digits only
pub fn parse_client_id(raw: &str) -> ServerResult<ClientId> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ServerError::InvalidClientId);
    }
    raw.parse::<u64>()
        .map(ClientId)
        .map_err(|_| ServerError::InvalidClientId)
}

/// Whether an upstream payload reports a failure
pub fn has_errors(results: &Value) -> bool {
    results
        .as_object()
        .is_some_and(|m| m.contains_key("error") || m.contains_key("errors"))
}

/// `directory` must name a file below the data root
pub fn validate_directory(directory: Option<&str>) -> ServerResult<&str> {
    let directory = directory.ok_or(ServerError::InvalidDirectory)?;
    let escapes = directory.starts_with('/')
        || directory.split('/').any(|segment| segment == "..");
    if !directory.contains('/') || escapes {
        return Err(ServerError::InvalidDirectory);
    }
    Ok(directory)
}

/// Attachment file names are single path segments
pub fn validate_attachment_name(name: &str) -> ServerResult<&str> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(ServerError::InvalidAttachment);
    }
    Ok(name)
}

/// Body of `PUT /put_results`
#[derive(Debug, Clone, PartialEq)]
pub struct PutResultsRequest {
    /// Job id as given; clients send it as a number or a string
    pub job_id: Option<String>,
    pub directory: Option<String>,
    pub job_type: JobType,
    pub results: Value,
    pub reg_id: Option<String>,
    pub agency: Option<String>,
}

impl PutResultsRequest {
    /// Extract the fields from a decoded body
    ///
    /// Fails with [`ServerError::MissingResults`] when the body is not an
    /// object or has no non-null `results`.
    pub fn from_body(body: &Value) -> ServerResult<Self> {
        let map = body.as_object().ok_or(ServerError::MissingResults)?;
        let results = match map.get("results") {
            Some(Value::Null) | None => return Err(ServerError::MissingResults),
            Some(results) => results.clone(),
        };

        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        let job_id = match map.get("job_id") {
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        Ok(Self {
            job_id,
            directory: text("directory"),
            job_type: text("job_type")
                .map(|t| JobType::parse_lossy(&t))
                .unwrap_or_default(),
            results,
            reg_id: text("reg_id"),
            agency: text("agency"),
        })
    }

    /// `results == {}`
    pub fn is_empty_result(&self) -> bool {
        self.results.as_object().is_some_and(|m| m.is_empty())
    }
}

/// Decode a request body that may be JSON or a JSON string holding JSON
pub fn decode_body(bytes: &[u8]) -> ServerResult<Value> {
    let value: Value = serde_json::from_slice(bytes).map_err(|_| ServerError::MissingResults)?;
    match value {
        Value::String(inner) => serde_json::from_str(&inner).map_err(|_| ServerError::MissingResults),
        other => Ok(other),
    }
}
