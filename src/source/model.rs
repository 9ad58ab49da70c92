use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::BatchSource;
use crate::classifier::ClusterModel;
use crate::engine::Command;

/// Reloads the cluster model whenever its file's mtime changes.
pub struct ModelFileSource {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    interval: Duration,
}

impl ModelFileSource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
            interval,
        }
    }
}

#[async_trait]
impl BatchSource for ModelFileSource {
    fn name(&self) -> &str {
        "model"
    }

    async fn poll(&mut self) -> Result<Vec<Command>> {
        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat model file {}", self.path.display()))?;
        if self.last_modified == Some(modified) {
            return Ok(Vec::new());
        }
        // a broken file is not retried until it is rewritten
        self.last_modified = Some(modified);

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read model file {}", self.path.display()))?;
        let model = ClusterModel::from_json_str(&content)
            .with_context(|| format!("Invalid cluster model in {}", self.path.display()))?;

        tracing::info!(
            path = %self.path.display(),
            centroids = model.centroids().len(),
            "Cluster model loaded"
        );
        Ok(vec![Command::LoadModel(model)])
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}
