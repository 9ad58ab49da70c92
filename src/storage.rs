use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{Channel, ScoreRecord};

/// Thread-safe bounded score history plus the latest raw value per channel.
/// Clones share the same buffers, so the display side can read while the
/// worker writes.
#[derive(Clone)]
pub struct ScoreHistory {
    inner: Arc<RwLock<HistoryInner>>,
}

struct HistoryInner {
    records: VecDeque<ScoreRecord>,
    capacity: usize,
    latest_raw: BTreeMap<Channel, f64>,
}

impl HistoryInner {
    fn push(&mut self, record: ScoreRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}

impl ScoreHistory {
    pub fn new(max_points: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HistoryInner {
                records: VecDeque::with_capacity(max_points.max(1)),
                capacity: max_points.max(1),
                latest_raw: BTreeMap::new(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HistoryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HistoryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn extend<I: IntoIterator<Item = ScoreRecord>>(&self, records: I) {
        let mut inner = self.write();
        for record in records {
            inner.push(record);
        }
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<ScoreRecord> {
        self.read().records.back().cloned()
    }

    /// The most recent `n` records, oldest first
    pub fn recent(&self, n: usize) -> Vec<ScoreRecord> {
        let inner = self.read();
        let skip = inner.records.len().saturating_sub(n);
        inner.records.iter().skip(skip).cloned().collect()
    }

    pub fn record_raw(&self, channel: Channel, value: f64) {
        self.write().latest_raw.insert(channel, value);
    }

    /// Latest raw value per channel, passed through untouched
    pub fn latest_raw(&self) -> BTreeMap<Channel, f64> {
        self.read().latest_raw.clone()
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.records.clear();
        inner.latest_raw.clear();
    }
}
