//! Durable destinations for completed job payloads

use crate::error::{SinkError, SinkResult};

use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// What a save did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Payload written to this file
    Written(PathBuf),
    /// Identical payload already stored here; nothing written
    Duplicate(PathBuf),
}

/// Destination for job results
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    /// Store a JSON payload at the relative `path`
    async fn save_json(&self, path: &str, data: &Value) -> SinkResult<SaveOutcome>;

    /// Store raw bytes at the relative `path`, replacing any existing file
    async fn save_binary(&self, path: &str, data: &[u8]) -> SinkResult<()>;
}

/// Reject absolute paths and anything that climbs out of the root
pub fn check_relative(path: &str) -> SinkResult<&Path> {
    let p = Path::new(path);
    let escapes = p
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(SinkError::InvalidPath {
            path: path.to_string(),
            reason: "must be relative and stay inside the data root".to_string(),
        });
    }
    Ok(p)
}

/// `name.json` → `name(i).json`
fn numbered(path: &Path, i: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}({}).{}", stem, i, ext.to_string_lossy()),
        None => format!("{}({})", stem, i),
    };
    path.with_file_name(name)
}

/// Writes results below a local root directory
///
/// A second, different payload for the same path is kept alongside the first
/// as `name(1).json`, `name(2).json`, ...; an identical payload is skipped.
#[derive(Debug, Clone)]
pub struct DiskSaver {
    root: PathBuf,
}

impl DiskSaver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn make_parent(&self, path: &Path) -> SinkResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SinkError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn read_json(path: &Path) -> Option<Value> {
        let bytes = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[async_trait::async_trait]
impl ResultSink for DiskSaver {
    async fn save_json(&self, path: &str, data: &Value) -> SinkResult<SaveOutcome> {
        let target = self.root.join(check_relative(path)?);
        self.make_parent(&target).await?;

        let mut candidate = target.clone();
        let mut i = 0;
        while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            if Self::read_json(&candidate).await.as_ref() == Some(data) {
                tracing::debug!("Data is a duplicate, skipping {}", candidate.display());
                return Ok(SaveOutcome::Duplicate(candidate));
            }
            i += 1;
            candidate = numbered(&target, i);
        }

        if i > 0 {
            tracing::info!("JSON differs from stored copy: labeling ({})", i);
        }

        let body = serde_json::to_vec(data)?;
        tokio::fs::write(&candidate, body)
            .await
            .map_err(|source| SinkError::Write {
                path: candidate.clone(),
                source,
            })?;

        Ok(SaveOutcome::Written(candidate))
    }

    async fn save_binary(&self, path: &str, data: &[u8]) -> SinkResult<()> {
        let target = self.root.join(check_relative(path)?);
        self.make_parent(&target).await?;
        tokio::fs::write(&target, data)
            .await
            .map_err(|source| SinkError::Write {
                path: target.clone(),
                source,
            })
    }
}

/// Forwards every save to several sinks
///
/// The first sink is the primary; its outcome is returned. A failure in any
/// sink fails the save.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(primary: Arc<dyn ResultSink>) -> Self {
        Self {
            sinks: vec![primary],
        }
    }

    /// Add a secondary sink
    pub fn with(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait::async_trait]
impl ResultSink for FanoutSink {
    async fn save_json(&self, path: &str, data: &Value) -> SinkResult<SaveOutcome> {
        let mut outcome = None;
        for sink in &self.sinks {
            let result = sink.save_json(path, data).await?;
            outcome.get_or_insert(result);
        }
        outcome.ok_or_else(|| SinkError::InvalidPath {
            path: path.to_string(),
            reason: "no sinks configured".to_string(),
        })
    }

    async fn save_binary(&self, path: &str, data: &[u8]) -> SinkResult<()> {
        for sink in &self.sinks {
            sink.save_binary(path, data).await?;
        }
        Ok(())
    }
}
