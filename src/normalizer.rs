use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::types::{Channel, Sample};

/// One ingestion batch unit as delivered by the store
pub type RawRecord = Map<String, Value>;

/// Ordered aliases per canonical channel
pub const CHANNEL_ALIASES: [(Channel, &[&str]); 4] = [
    (Channel::HeartRate, &["heartRate", "heart_rate", "hr", "bpm", "ABPM", "avgBpm", "pulse"]),
    (Channel::OxygenSaturation, &["oxygenSaturation", "oxygen_saturation", "spo2", "sp_o2", "o2sat", "oxygen"]),
    (Channel::Temperature, &["temperature", "temp", "bodyTemp", "body_temp", "skinTemp"]),
    (Channel::AccelMagnitude, &["accelMagnitude", "accel_magnitude", "accelMag", "accel_mag", "magnitude", "accel"]),
];

/// Ordered aliases for the X, Y and Z acceleration axes
pub const AXIS_ALIASES: [&[&str]; 3] = [
    &["AcX", "accelX", "accel_x", "accelx", "ax", "x"],
    &["AcY", "accelY", "accel_y", "accely", "ay", "y"],
    &["AcZ", "accelZ", "accel_z", "accelz", "az", "z"],
];

/// Beat-to-beat interval fields in milliseconds, read only when no heart
/// rate alias resolves
pub const RR_ALIASES: &[&str] = &["rr_ms", "rr", "rrInterval", "rr_interval", "ibi"];

pub const TIMESTAMP_ALIASES: &[&str] = &[
    "timestamp", "ts", "time", "t", "createdAt", "created_at", "recordedAt",
];

/// Wrapper keys used by the document store for scalar values
const TYPED_SCALAR_KEYS: [&str; 4] = ["doubleValue", "integerValue", "stringValue", "floatValue"];

/// Epoch values above this are taken to be milliseconds
const EPOCH_MILLIS_CUTOFF: f64 = 1e12;

/// Shape of a raw field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue<'a> {
    Sequence(&'a [Value]),
    DelimitedString(&'a str),
    Scalar(&'a Value),
    Absent,
}

impl<'a> RawValue<'a> {
    pub fn from_json(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => RawValue::Absent,
            Some(Value::Array(items)) => RawValue::Sequence(items),
            Some(Value::String(s)) => RawValue::DelimitedString(s),
            Some(object @ Value::Object(map)) => {
                if let Some(array) = map.get("arrayValue") {
                    return match array.get("values") {
                        Some(Value::Array(items)) => RawValue::Sequence(items),
                        // the store omits `values` for empty arrays
                        _ => RawValue::Sequence(&[]),
                    };
                }
                TYPED_SCALAR_KEYS
                    .iter()
                    .find_map(|k| map.get(*k))
                    .map(|inner| RawValue::from_json(Some(inner)))
                    .unwrap_or(RawValue::Scalar(object))
            }
            Some(other) => RawValue::Scalar(other),
        }
    }

    /// Coerce into a numeric sequence. `None` only for `Absent`.
    pub fn to_numbers(&self) -> Option<Vec<f64>> {
        match self {
            RawValue::Absent => None,
            RawValue::Sequence(items) => Some(items.iter().map(coerce_value).collect()),
            RawValue::DelimitedString(s) => Some(split_delimited(s)),
            RawValue::Scalar(v) => Some(vec![coerce_value(v)]),
        }
    }
}

fn split_delimited(s: &str) -> Vec<f64> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    s.split([',', ';']).map(coerce_str).collect()
}

fn coerce_str(s: &str) -> f64 {
    finite_or_zero(s.trim().parse::<f64>().unwrap_or(0.0))
}

/// Coerce one element to a finite number, 0 when impossible
pub fn coerce_value(value: &Value) -> f64 {
    match value {
        Value::Number(n) => finite_or_zero(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => coerce_str(s),
        Value::Object(map) => TYPED_SCALAR_KEYS
            .iter()
            .find_map(|k| map.get(*k))
            .map(coerce_value)
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Find the first alias present in the record. Exact spelling is tried
/// before a case-insensitive scan.
pub fn resolve<'a>(record: &'a RawRecord, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        match record.get(*alias) {
            Some(v) if !v.is_null() => Some(v),
            _ => record
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(alias) && !v.is_null())
                .map(|(_, v)| v),
        }
    })
}

/// Channels resolved from one raw record. Unresolved channels are absent
/// from the map rather than zero-filled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    channels: BTreeMap<Channel, Vec<f64>>,
}

impl NormalizedRecord {
    pub fn get(&self, channel: Channel) -> Option<&[f64]> {
        self.channels.get(&channel).map(|v| v.as_slice())
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.channels.keys().copied()
    }

    /// Number of samples: the longest resolved channel
    pub fn len(&self) -> usize {
        self.channels.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build the sample at `index`. Channels shorter than `index` are missing.
    pub fn sample_at(&self, index: usize, timestamp: DateTime<Utc>) -> Sample {
        let mut sample = Sample::empty(timestamp);
        for (channel, values) in &self.channels {
            sample.set(*channel, values.get(index).copied());
        }
        sample
    }

    pub fn latest(&self, channel: Channel) -> Option<f64> {
        self.channels.get(&channel)?.last().copied()
    }
}

/// Resolve every canonical channel of a raw record.
///
/// Field names are looked up in ordered alias tables (first alias wins,
/// ASCII case-insensitive). Values may be numeric arrays, delimited strings,
/// scalars, or store-typed wrappers such as `{"arrayValue": {"values": [..]}}`.
/// Every element is coerced to a finite number; anything unparseable becomes 0.
pub fn normalize(record: &RawRecord) -> NormalizedRecord {
    let mut channels = BTreeMap::new();

    for (channel, aliases) in CHANNEL_ALIASES.iter() {
        if let Some(values) = RawValue::from_json(resolve(record, aliases)).to_numbers() {
            channels.insert(*channel, values);
        }
    }

    if !channels.contains_key(&Channel::HeartRate) {
        if let Some(rr) = RawValue::from_json(resolve(record, RR_ALIASES)).to_numbers() {
            channels.insert(Channel::HeartRate, heart_rate_from_rr(&rr));
        }
    }

    if !channels.contains_key(&Channel::AccelMagnitude) {
        if let Some(magnitude) = synthesize_magnitude(record) {
            channels.insert(Channel::AccelMagnitude, magnitude);
        }
    }

    NormalizedRecord { channels }
}

/// `60000 / rr` per interval; non-positive intervals are dropped
fn heart_rate_from_rr(rr: &[f64]) -> Vec<f64> {
    rr.iter().filter(|ms| **ms > 0.0).map(|ms| 60_000.0 / ms).collect()
}

/// Euclidean norm over the three axes, truncated to the shortest axis
fn synthesize_magnitude(record: &RawRecord) -> Option<Vec<f64>> {
    let mut axes = Vec::with_capacity(3);
    for aliases in AXIS_ALIASES.iter() {
        axes.push(RawValue::from_json(resolve(record, aliases)).to_numbers()?);
    }
    let len = axes.iter().map(Vec::len).min().unwrap_or(0);
    Some(
        (0..len)
            .map(|i| (axes[0][i].powi(2) + axes[1][i].powi(2) + axes[2][i].powi(2)).sqrt())
            .collect(),
    )
}

/// Best-effort record timestamp for inter-record ordering.
pub fn detect_timestamp(record: &RawRecord) -> Option<DateTime<Utc>> {
    parse_timestamp(resolve(record, TIMESTAMP_ALIASES)?)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => from_epoch(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                return from_epoch(n);
            }
            DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
        }
        Value::Object(map) => map
            .get("timestampValue")
            .or_else(|| TYPED_SCALAR_KEYS.iter().find_map(|k| map.get(*k)))
            .and_then(parse_timestamp),
        _ => None,
    }
}

fn from_epoch(n: f64) -> Option<DateTime<Utc>> {
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    let millis = if n > EPOCH_MILLIS_CUTOFF { n } else { n * 1000.0 };
    DateTime::from_timestamp_millis(millis as i64)
}
