use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::AssemblerConfig;
use crate::dispatcher::ScoringStrategyDispatcher;
use crate::normalizer::{self, NormalizedRecord, RawRecord};
use crate::types::{Channel, Notice, ScoreRecord};

/// Result of processing one batch
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub records: Vec<ScoreRecord>,
    pub notices: Vec<Notice>,
    pub latest_raw: BTreeMap<Channel, f64>,
}

/// Flattens one delivered batch of raw records into a chronological stream
/// of scored samples. Sample times are synthesized: all samples of the
/// batch form one equally spaced series whose last sample is "now".
/// Detected record timestamps only decide the order between records.
pub struct TimeSeriesAssembler {
    interval: Duration,
    max_points: usize,
}

impl TimeSeriesAssembler {
    pub fn new(config: &AssemblerConfig) -> Self {
        Self {
            interval: Duration::milliseconds(config.intra_packet_interval_ms as i64),
            max_points: config.max_points.max(1),
        }
    }

    /// Processing order for a batch, as indices into it. Records with a
    /// detected timestamp are stable-sorted among themselves; records without
    /// one keep their arrival position.
    pub fn order(batch: &[RawRecord]) -> Vec<usize> {
        let stamps: Vec<Option<DateTime<Utc>>> = batch.iter().map(normalizer::detect_timestamp).collect();
        let mut order: Vec<usize> = (0..batch.len()).collect();

        let slots: Vec<usize> = (0..batch.len()).filter(|i| stamps[*i].is_some()).collect();
        if slots.len() < batch.len() && !slots.is_empty() {
            tracing::debug!(
                untimed = batch.len() - slots.len(),
                "Some records lack a usable timestamp, keeping their arrival position"
            );
        }
        let mut timed = slots.clone();
        timed.sort_by_key(|i| stamps[*i]);
        for (slot, index) in slots.into_iter().zip(timed) {
            order[slot] = index;
        }
        order
    }

    /// Normalize, score and timestamp every sample of the batch.
    pub fn process(
        &self,
        dispatcher: &mut ScoringStrategyDispatcher,
        batch: &[RawRecord],
        now: DateTime<Utc>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        let mut resolved: Vec<NormalizedRecord> = Vec::with_capacity(batch.len());
        for index in Self::order(batch) {
            let record = normalizer::normalize(&batch[index]);
            if record.is_empty() {
                tracing::warn!(index, "Skipping record with no resolvable channel");
                outcome.notices.push(Notice::UnresolvableRecord { index });
                continue;
            }
            for channel in record.channels() {
                if let Some(value) = record.latest(channel) {
                    outcome.latest_raw.insert(channel, value);
                }
            }
            resolved.push(record);
        }

        let total: usize = resolved.iter().map(NormalizedRecord::len).sum();
        let mut remaining = total;
        outcome.records.reserve(total.min(self.max_points));

        for record in &resolved {
            for i in 0..record.len() {
                remaining -= 1;
                let timestamp = now - self.interval * remaining as i32;
                let sample = record.sample_at(i, timestamp);
                outcome.records.push(dispatcher.score(&sample));
            }
        }
        outcome.notices.extend(dispatcher.take_notices());

        if outcome.records.len() > self.max_points {
            let excess = outcome.records.len() - self.max_points;
            outcome.records.drain(..excess);
        }

        tracing::debug!(
            records = batch.len(),
            samples = total,
            emitted = outcome.records.len(),
            "Batch assembled"
        );
        outcome
    }
}
