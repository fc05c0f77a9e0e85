//! Output sinks: where completed payloads go.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, info};
use tubeforge_models::Job;

use crate::error::SinkError;
use crate::provider::ProviderOutput;

/// Receives the raw payload of every completed job.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Persist the output of a completed job.
    async fn persist(&self, job: &Job, output: &ProviderOutput) -> Result<(), SinkError>;

    /// Called after every job status transition.
    async fn status_changed(&self, _job: &Job) {}
}

/// Writes `<root>/<target>.json`, plus `<root>/<target>.png` when the payload
/// embeds a base64 image at `artifacts[0].base64`.
#[derive(Debug, Clone)]
pub struct FileSystemSink {
    root: PathBuf,
}

impl FileSystemSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for `target` under the root, without extension.
    ///
    /// Targets may use `/` to nest; `.`/`..` segments are dropped so a target
    /// can never escape the root.
    pub fn path_for(&self, target: &str) -> Result<PathBuf, SinkError> {
        let mut path = self.root.clone();
        let mut segments = 0;
        for segment in target.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                continue;
            }
            let clean: String = segment
                .chars()
                .map(|c| {
                    if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            path.push(clean);
            segments += 1;
        }

        if segments == 0 {
            return Err(SinkError::Rejected(format!("unusable target '{}'", target)));
        }
        Ok(path)
    }
}

#[async_trait]
impl OutputSink for FileSystemSink {
    async fn persist(&self, job: &Job, output: &ProviderOutput) -> Result<(), SinkError> {
        let base = self.path_for(&job.target)?;
        if let Some(parent) = base.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json_path = with_suffix(&base, "json");
        let bytes = serde_json::to_vec_pretty(&output.payload)?;
        tokio::fs::write(&json_path, bytes).await?;
        debug!(job_id = %job.id, path = %json_path.display(), "Wrote payload");

        if let Some(encoded) = output
            .payload
            .pointer("/artifacts/0/base64")
            .and_then(|v| v.as_str())
        {
            let image = STANDARD
                .decode(encoded)
                .map_err(|e| SinkError::Decode(e.to_string()))?;
            let image_path = with_suffix(&base, "png");
            tokio::fs::write(&image_path, image).await?;
            info!(job_id = %job.id, path = %image_path.display(), "Wrote image artifact");
        }

        Ok(())
    }
}

/// `base` plus `.ext`, keeping any dots already in the file name.
fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
