//! Client worker loop
//!
//! Polls the work server for jobs, fetches each job's URL upstream, ships
//! attachment files for documents and comments, then reports the payload.

use crate::config::ClientConfig;
use crate::error::{ClientError, ServerError};
use crate::job::{Job, JobType};
use crate::paths::PathGenerator;
use crate::search::FetchApi;
use crate::server::has_errors;

use base64::Engine;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for calls to the work server
pub const SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Result type for client worker operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// One downloadable rendition of an attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub url: String,
    pub format: String,
}

/// Every `fileFormats` entry in an entity payload
///
/// Looks at the primary `data` (object or array) and at `included`
/// records, which is where `?include=attachments` puts them.
pub fn attachment_files(payload: &Value) -> Vec<AttachmentFile> {
    let records = match payload.get("data") {
        Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    };
    let included = payload
        .get("included")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();

    records
        .into_iter()
        .chain(included)
        .filter_map(|record| record.pointer("/attributes/fileFormats")?.as_array())
        .flatten()
        .filter_map(|format| {
            Some(AttachmentFile {
                url: format.get("fileUrl")?.as_str()?.to_string(),
                format: format.get("format")?.as_str()?.to_string(),
            })
        })
        .collect()
}

/// Decode a `GET /get_job` response body
///
/// The job id is the one numeric key of the `job` object; its value is
/// the URL.
pub fn parse_job(body: &Value) -> ClientResult<Job> {
    let job = body
        .get("job")
        .and_then(Value::as_object)
        .ok_or_else(|| ClientError::InvalidResponse(format!("no job in {}", body)))?;

    let (job_id, url) = job
        .iter()
        .find_map(|(key, value)| Some((key.parse::<u64>().ok()?, value.as_str()?)))
        .ok_or_else(|| ClientError::InvalidResponse(format!("no job id in {}", body)))?;

    let text = |key: &str| job.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(Job {
        job_id,
        url: url.to_string(),
        job_type: text("job_type")
            .map(|t| JobType::parse_lossy(&t))
            .unwrap_or_default(),
        reg_id: text("reg_id"),
        agency: text("agency"),
    })
}

/// How a single job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Payload delivered, with this many attachment files
    Completed { attachments: usize },
    /// Upstream returned an error payload
    Invalid,
}

/// Counters for one [`WorkClient::run`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub jobs_completed: u64,
    pub jobs_invalid: u64,
    pub attachments_sent: u64,
    pub empty_polls: u64,
    pub errors: u64,
}

impl WorkerStats {
    /// Jobs that reached the server, valid or not
    pub fn jobs_done(&self) -> u64 {
        self.jobs_completed + self.jobs_invalid
    }
}

/// A worker process talking to one work server
pub struct WorkClient {
    http: reqwest::Client,
    api: Arc<dyn FetchApi>,
    config: ClientConfig,
    client_id: Option<u64>,
    paths: PathGenerator,
    shutdown: Arc<AtomicBool>,
}

impl WorkClient {
    pub fn new(config: ClientConfig, api: Arc<dyn FetchApi>) -> ClientResult<Self> {
        let http = reqwest::Client::builder().timeout(SERVER_TIMEOUT).build()?;

        Ok(Self {
            http,
            api,
            client_id: config.client_id,
            config,
            paths: PathGenerator::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Id in use, if one has been configured or issued
    pub fn client_id(&self) -> Option<u64> {
        self.client_id
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

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.server_url, path)
    }

    /// Return the configured id or ask the server for a new one
    pub async fn ensure_client_id(&mut self) -> ClientResult<u64> {
        if let Some(id) = self.client_id {
            return Ok(id);
        }

        let response = self.http.get(self.endpoint("get_client_id")).send().await?;
        let body = read_json(response).await?;
        let id = body
            .get("client_id")
            .and_then(Value::as_u64)
            .ok_or_else(|| ClientError::InvalidResponse(format!("no client_id in {}", body)))?;

        tracing::info!("Received client id {}", id);
        self.client_id = Some(id);
        Ok(id)
    }

    /// Claim the next job
    pub async fn get_job(&mut self) -> ClientResult<Job> {
        let client_id = self.ensure_client_id().await?;

        let response = self
            .http
            .get(self.endpoint("get_job"))
            .query(&[("client_id", client_id)])
            .send()
            .await?;

        let body = match read_json(response).await {
            Err(ClientError::Rejected { status: 403, message })
                if message == ServerError::NoJobs.to_string() =>
            {
                return Err(ClientError::NoJobsAvailable)
            }
            other => other?,
        };

        let job = parse_job(&body)?;
        tracing::debug!("Claimed job {} ({})", job.job_id, job.url);
        Ok(job)
    }

    /// Fetch a claimed job upstream and report it
    pub async fn perform_job(&mut self, job: &Job) -> ClientResult<JobOutcome> {
        let client_id = self.ensure_client_id().await?;

        if job.job_type == JobType::Attachments {
            // Attachments travel with their parent document or comment
            tracing::warn!("Job {} is a standalone attachment job; reporting empty", job.job_id);
            self.put_results(client_id, result_body(job, job.job_type, Value::Object(Map::new()), None))
                .await?;
            return Ok(JobOutcome::Completed { attachments: 0 });
        }

        let payload = self.api.fetch(&job.url).await?;

        if has_errors(&payload) {
            tracing::warn!("Upstream returned errors for job {} ({})", job.job_id, job.url);
            self.put_results(client_id, result_body(job, job.job_type, payload, None))
                .await?;
            return Ok(JobOutcome::Invalid);
        }

        let directory = self.paths.get_path(&payload)?;

        let attachments = if matches!(job.job_type, JobType::Comments | JobType::Documents) {
            self.send_attachments(client_id, job, &payload).await?
        } else {
            0
        };

        self.put_results(client_id, result_body(job, job.job_type, payload, Some(directory)))
            .await?;
        tracing::info!("SUCCESS: {} complete", job.url);
        Ok(JobOutcome::Completed { attachments })
    }

    /// Download, encode and upload an entity's attachment files
    async fn send_attachments(&self, client_id: u64, job: &Job, payload: &Value) -> ClientResult<usize> {
        let files = attachment_files(payload);
        if files.is_empty() {
            tracing::debug!("No attachments to download for job {}", job.job_id);
            return Ok(0);
        }

        let mut encoded = Map::new();
        for (i, file) in files.iter().enumerate() {
            match self.api.fetch_bytes(&file.url).await {
                Ok(bytes) => {
                    let name = format!("{}_{}.{}", job.job_id, i, file.format);
                    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
                    encoded.insert(name, Value::String(data));
                }
                Err(e) => tracing::warn!("Skipping attachment {}: {}", file.url, e),
            }
        }

        if encoded.is_empty() {
            return Ok(0);
        }

        let count = encoded.len();
        let directory = self.paths.get_attachment_dir(payload)?;
        self.put_results(
            client_id,
            result_body(job, JobType::Attachments, Value::Object(encoded), Some(directory)),
        )
        .await?;

        tracing::info!("Sent {} attachments for job {}", count, job.job_id);
        Ok(count)
    }

    async fn put_results(&self, client_id: u64, body: Value) -> ClientResult<String> {
        let response = self
            .http
            .put(self.endpoint("put_results"))
            .query(&[("client_id", client_id)])
            .json(&body)
            .send()
            .await?;

        let body = read_json(response).await?;
        Ok(body
            .get("success")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Claim and perform one job
    pub async fn job_operation(&mut self) -> ClientResult<JobOutcome> {
        let job = self.get_job().await?;
        self.perform_job(&job).await
    }

    /// Work until shutdown or until `max_jobs` jobs have been reported
    pub async fn run(&mut self) -> ClientResult<WorkerStats> {
        let client_id = self.ensure_client_id().await?;
        tracing::info!(
            "Client {} working for {}",
            client_id,
            self.config.server_url
        );

        let mut stats = WorkerStats::default();

        while !self.is_shutdown() && !self.reached_max(&stats) {
            match self.job_operation().await {
                Ok(JobOutcome::Completed { attachments }) => {
                    stats.jobs_completed += 1;
                    stats.attachments_sent += attachments as u64;
                }
                Ok(JobOutcome::Invalid) => stats.jobs_invalid += 1,
                Err(ClientError::NoJobsAvailable) => {
                    tracing::info!("No jobs available");
                    stats.empty_polls += 1;
                }
                Err(e) => {
                    tracing::error!("FAILURE: {}", e);
                    stats.errors += 1;
                }
            }

            if self.reached_max(&stats) {
                break;
            }
            self.sleep(self.config.poll_interval).await;
        }

        tracing::info!(
            "Client {} stopping: {} completed, {} invalid, {} errors",
            client_id,
            stats.jobs_completed,
            stats.jobs_invalid,
            stats.errors
        );
        Ok(stats)
    }

    fn reached_max(&self, stats: &WorkerStats) -> bool {
        self.config
            .max_jobs
            .is_some_and(|max| stats.jobs_done() >= max)
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

/// `PUT /put_results` body for `job`
fn result_body(job: &Job, job_type: JobType, results: Value, directory: Option<String>) -> Value {
    let mut body = json!({
        "job_id": job.job_id,
        "job_type": job_type.as_str(),
        "results": results,
        "reg_id": job.reg_id,
        "agency": job.agency,
    });
    if let (Some(directory), Some(map)) = (directory, body.as_object_mut()) {
        map.insert("directory".into(), Value::String(directory));
    }
    body
}

/// Decode a work server response, turning error statuses into `Rejected`
async fn read_json(response: reqwest::Response) -> ClientResult<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

    if status.is_success() {
        return Ok(body);
    }

    let message = body
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    Err(ClientError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job() {
        let body = json!({
            "job": {
                "17": "https://api.regulations.gov/v4/comments/EPA-HQ-OAR-2021-0208-0001?include=attachments",
                "job_type": "comments",
                "reg_id": "EPA-HQ-OAR-2021-0208-0001",
                "agency": "EPA"
            }
        });

        let job = parse_job(&body).unwrap();
        assert_eq!(job.job_id, 17);
        assert_eq!(job.job_type, JobType::Comments);
        assert_eq!(job.reg_id.as_deref(), Some("EPA-HQ-OAR-2021-0208-0001"));
        assert!(job.url.ends_with("?include=attachments"));
    }

    #[test]
    fn test_parse_job_rejects_missing_id() {
        let body = json!({"job": {"job_type": "dockets"}});
        assert!(matches!(parse_job(&body), Err(ClientError::InvalidResponse(_))));
        assert!(matches!(parse_job(&json!({})), Err(ClientError::InvalidResponse(_))));
    }

    #[test]
    fn test_attachment_files_from_included() {
        let payload = json!({
            "data": {
                "id": "EPA-HQ-OAR-2021-0208-0001",
                "type": "comments",
                "attributes": {"docketId": "EPA-HQ-OAR-2021-0208"}
            },
            "included": [
                {
                    "type": "attachments",
                    "attributes": {
                        "fileFormats": [
                            {"fileUrl": "https://downloads.regulations.gov/a/attachment_1.pdf", "format": "pdf"},
                            {"fileUrl": "https://downloads.regulations.gov/a/attachment_1.docx", "format": "docx"}
                        ]
                    }
                },
                {"type": "attachments", "attributes": {"fileFormats": null}}
            ]
        });

        let files = attachment_files(&payload);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].format, "pdf");
        assert_eq!(files[1].url, "https://downloads.regulations.gov/a/attachment_1.docx");
    }

    #[test]
    fn test_attachment_files_on_primary_data() {
        let payload = json!({
            "data": {
                "id": "USTR-2015-0010-0001",
                "type": "documents",
                "attributes": {
                    "fileFormats": [{"fileUrl": "https://x/content.htm", "format": "htm"}]
                }
            }
        });
        assert_eq!(
            attachment_files(&payload),
            vec![AttachmentFile {
                url: "https://x/content.htm".to_string(),
                format: "htm".to_string()
            }]
        );

        assert!(attachment_files(&json!({"data": []})).is_empty());
        assert!(attachment_files(&json!({"errors": [{"status": "404"}]})).is_empty());
    }

    #[test]
    fn test_result_body() {
        let job = Job {
            job_id: 3,
            url: "https://api.regulations.gov/v4/dockets/USTR-2015-0010".to_string(),
            job_type: JobType::Dockets,
            reg_id: Some("USTR-2015-0010".to_string()),
            agency: None,
        };

        let body = result_body(&job, job.job_type, json!({"data": {}}), Some("data/x.json".into()));
        assert_eq!(body["job_id"], 3);
        assert_eq!(body["job_type"], "dockets");
        assert_eq!(body["directory"], "data/x.json");
        assert!(body["agency"].is_null());

        let body = result_body(&job, JobType::Attachments, json!({}), None);
        assert!(body.get("directory").is_none());
    }

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats {
            jobs_completed: 4,
            jobs_invalid: 1,
            ..Default::default()
        };
        assert_eq!(stats.jobs_done(), 5);
    }
}
