pub mod file;
pub mod model;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::engine::Command;

/// Trait for collaborators that feed the engine.
///
/// Each source is polled on its own task and turns whatever it finds into
/// engine commands. A failed poll is reported to the engine once; the next
/// successful poll reports the source as restored.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Human-readable name for this source (e.g., "batches", "model")
    fn name(&self) -> &str;

    /// Fetch anything new since the last poll.
    async fn poll(&mut self) -> Result<Vec<Command>>;

    /// Delay between polls
    fn interval(&self) -> Duration;
}

/// Create the sources named by configuration, with CLI overrides applied.
pub fn create_sources(
    config: &Config,
    input: Option<&str>,
    model: Option<&str>,
) -> Result<Vec<Box<dyn BatchSource>>> {
    let mut sources: Vec<Box<dyn BatchSource>> = Vec::new();
    let interval = Duration::from_millis(config.source.poll_interval_ms);

    if let Some(path) = model.or(config.classifier.model_path.as_deref()) {
        sources.push(Box::new(model::ModelFileSource::new(path, interval)));
    }

    if let Some(path) = input.or(config.source.batch_path.as_deref()) {
        sources.push(Box::new(file::FileBatchSource::new(path, interval)));
    }

    tracing::info!(count = sources.len(), "Initialized sources");
    Ok(sources)
}

/// Poll a source forever on its own task. Aborting the handle stops future
/// polls; commands already queued are still handled.
pub fn spawn_source(mut source: Box<dyn BatchSource>, tx: mpsc::Sender<Command>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut failing = false;
        loop {
            let mut outgoing = Vec::new();
            match source.poll().await {
                Ok(commands) => {
                    if failing {
                        failing = false;
                        outgoing.push(Command::SourceRestored { source: source.name().to_string() });
                    }
                    outgoing.extend(commands);
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Source poll failed");
                    if !failing {
                        failing = true;
                        outgoing.push(Command::SourceFailed {
                            source: source.name().to_string(),
                            error: format!("{e:#}"),
                        });
                    }
                }
            }
            for command in outgoing {
                if tx.send(command).await.is_err() {
                    return; // engine gone
                }
            }
            tokio::time::sleep(source.interval()).await;
        }
    })
}
