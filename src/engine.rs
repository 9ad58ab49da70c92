use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::assembler::{BatchOutcome, TimeSeriesAssembler};
use crate::classifier::ClusterModel;
use crate::config::Config;
use crate::dispatcher::ScoringStrategyDispatcher;
use crate::normalizer::RawRecord;
use crate::storage::ScoreHistory;
use crate::types::{Notice, Strategy};

#[derive(Debug, Clone)]
pub enum Command {
    Batch(Vec<RawRecord>),
    SelectStrategy(Strategy),
    LoadModel(ClusterModel),
    ResetSubject,
    SourceFailed { source: String, error: String },
    SourceRestored { source: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Up,
    Down,
}

/// Command handling for one monitored subject. Every command is handled to
/// completion before the next one is taken, so batches never overlap and a
/// strategy switch sent during a batch lands at its boundary.
pub struct Engine {
    subject_id: String,
    dispatcher: ScoringStrategyDispatcher,
    assembler: TimeSeriesAssembler,
    history: ScoreHistory,
    failing: BTreeSet<String>,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        Self {
            subject_id: config.agent.subject_id.clone(),
            dispatcher: ScoringStrategyDispatcher::new(config),
            assembler: TimeSeriesAssembler::new(&config.assembler),
            history: ScoreHistory::new(config.assembler.max_points),
            failing: BTreeSet::new(),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn dispatcher(&self) -> &ScoringStrategyDispatcher {
        &self.dispatcher
    }

    /// Shared handle to the bounded score history
    pub fn history(&self) -> ScoreHistory {
        self.history.clone()
    }

    /// `Down` while any source is failing
    pub fn connectivity(&self) -> Connectivity {
        if self.failing.is_empty() {
            Connectivity::Up
        } else {
            Connectivity::Down
        }
    }

    /// Names of the sources currently failing
    pub fn failing_sources(&self) -> impl Iterator<Item = &str> + '_ {
        self.failing.iter().map(String::as_str)
    }

    pub fn handle(&mut self, command: Command) -> BatchOutcome {
        self.handle_at(command, Utc::now())
    }

    /// Handle one command, synthesizing sample times relative to `now`.
    pub fn handle_at(&mut self, command: Command, now: DateTime<Utc>) -> BatchOutcome {
        match command {
            Command::Batch(records) => {
                let outcome = self.assembler.process(&mut self.dispatcher, &records, now);
                for (channel, value) in &outcome.latest_raw {
                    self.history.record_raw(*channel, *value);
                }
                self.history.extend(outcome.records.iter().cloned());
                outcome
            }
            Command::SelectStrategy(strategy) => BatchOutcome {
                notices: self.dispatcher.set_strategy(strategy).into_iter().collect(),
                ..Default::default()
            },
            Command::LoadModel(model) => {
                self.dispatcher.load_model(model);
                BatchOutcome::default()
            }
            Command::ResetSubject => {
                info!(subject = %self.subject_id, "Resetting subject history");
                self.dispatcher.reset();
                self.history.clear();
                BatchOutcome::default()
            }
            Command::SourceFailed { source, error } => {
                // buffers stay as they are so a reconnect resumes the baseline
                error!(source = %source, error = %error, "Collaborator failure, connectivity down");
                self.failing.insert(source.clone());
                BatchOutcome {
                    notices: vec![Notice::CollaboratorFailure { source, error }],
                    ..Default::default()
                }
            }
            Command::SourceRestored { source } => {
                self.failing.remove(&source);
                info!(source = %source, still_failing = self.failing.len(), "Collaborator restored");
                BatchOutcome::default()
            }
        }
    }
}

/// Drain the command queue on a single task until every sender is gone.
/// Non-empty outcomes are forwarded; the engine is returned on exit.
pub async fn run_worker(
    mut engine: Engine,
    mut commands: mpsc::Receiver<Command>,
    outcomes: mpsc::Sender<BatchOutcome>,
) -> Engine {
    while let Some(command) = commands.recv().await {
        let outcome = engine.handle(command);
        if outcome.records.is_empty() && outcome.notices.is_empty() {
            continue;
        }
        if outcomes.send(outcome).await.is_err() {
            break;
        }
    }
    info!("Command queue closed, worker exiting");
    engine
}
