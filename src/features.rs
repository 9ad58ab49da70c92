use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::FeatureConfig;
use crate::stats::{linear_regression, RunningStats};
use crate::types::Sample;

pub const FEATURE_COUNT: usize = 10;

/// Feature names in slot order. The order matches the offline training
/// pipeline and must not change: a cluster model trained on these features
/// standardizes and compares them position by position.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "hr_mean_bpm",
    "hrv_sdnn_ms",
    "hrv_rmssd_ms",
    "hrv_pnn50",
    "accel_mean_mag",
    "accel_std_mag",
    "accel_activity_frac",
    "temp_mean",
    "temp_std",
    "temp_slope_per_min",
];

pub const HR_MEAN: usize = 0;
pub const SDNN: usize = 1;
pub const RMSSD: usize = 2;
pub const PNN50: usize = 3;
pub const ACCEL_MEAN: usize = 4;
pub const ACCEL_STD: usize = 5;
pub const ACCEL_ACTIVITY: usize = 6;
pub const TEMP_MEAN: usize = 7;
pub const TEMP_STD: usize = 8;
pub const TEMP_SLOPE: usize = 9;

/// Spacing assumed between consecutive samples when rescaling the
/// temperature slope to per-minute
const SAMPLE_SPACING_SECS: f64 = 0.2;

/// Successive RR intervals further apart than this count toward pNN50
const NN50_THRESHOLD_MS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    pub fn as_array(&self) -> &[f64; FEATURE_COUNT] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES.iter().position(|n| *n == name).and_then(|i| self.get(i))
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for (name, value) in FEATURE_NAMES.iter().zip(self.values.iter()) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// HRV, activity and temperature features over the last `window_size` samples
pub struct WindowFeatureExtractor {
    window_size: usize,
}

impl WindowFeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self { window_size: config.window_size.max(1) }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Features over the window ending at `idx` (inclusive). An empty series
    /// or an out-of-range index yields the zero vector.
    pub fn extract(&self, samples: &[Sample], idx: usize) -> FeatureVector {
        if idx >= samples.len() {
            return FeatureVector::default();
        }
        let start = idx + 1 - self.window_size.min(idx + 1);
        let window = &samples[start..=idx];

        let mut values = [0.0; FEATURE_COUNT];
        heart_features(window, &mut values);
        accel_features(window, &mut values);
        temperature_features(window, &mut values);
        FeatureVector { values }
    }
}

fn heart_features(window: &[Sample], out: &mut [f64; FEATURE_COUNT]) {
    let hr: Vec<f64> = window.iter().filter_map(|s| s.heart_rate).collect();
    if hr.is_empty() {
        return;
    }
    out[HR_MEAN] = RunningStats::from_values(&hr).mean();

    let rr: Vec<f64> = hr.iter().filter(|h| **h > 0.0).map(|h| 60000.0 / h).collect();
    if rr.len() < 2 {
        return;
    }
    out[SDNN] = RunningStats::from_values(&rr).sample_std();

    let diffs: Vec<f64> = rr.windows(2).map(|w| w[1] - w[0]).collect();
    let n = diffs.len() as f64;
    out[RMSSD] = (diffs.iter().map(|d| d * d).sum::<f64>() / n).sqrt();
    out[PNN50] = 100.0 * diffs.iter().filter(|d| d.abs() > NN50_THRESHOLD_MS).count() as f64 / n;
}

fn accel_features(window: &[Sample], out: &mut [f64; FEATURE_COUNT]) {
    let mags: Vec<f64> = window.iter().filter_map(|s| s.accel_magnitude).collect();
    if mags.is_empty() {
        return;
    }
    let stats = RunningStats::from_values(&mags);
    let mean = stats.mean();
    let std = stats.population_std();
    let threshold = mean + std;

    out[ACCEL_MEAN] = mean;
    out[ACCEL_STD] = std;
    out[ACCEL_ACTIVITY] = mags.iter().filter(|m| **m > threshold).count() as f64 / mags.len() as f64;
}

fn temperature_features(window: &[Sample], out: &mut [f64; FEATURE_COUNT]) {
    let (xs, ys): (Vec<f64>, Vec<f64>) = window
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.temperature.map(|t| (i as f64, t)))
        .unzip();
    if ys.is_empty() {
        return;
    }
    let stats = RunningStats::from_values(&ys);
    out[TEMP_MEAN] = stats.mean();
    out[TEMP_STD] = stats.sample_std();

    if let Some((slope, _intercept, _r2)) = linear_regression(&xs, &ys) {
        out[TEMP_SLOPE] = slope * 60.0 / (window.len() as f64 * SAMPLE_SPACING_SECS);
    }
}
