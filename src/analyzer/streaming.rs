use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use smallvec::SmallVec;

use crate::config::AnalyzerConfig;
use crate::stats::{clamp01, RunningStats};
use crate::types::{Channel, Component, Components, Sample};

/// Variance floor used in every square root and division
pub const EPSILON: f64 = 1e-6;

/// Rolling statistics for one channel.
///
/// `anomaly_score` stays 0 while fewer than `min_samples` values are buffered.
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    buffer: VecDeque<f64>,
    pub long_mean: f64,
    pub long_var: f64,
    pub short_mean: f64,
    pub short_var: f64,
    pub trend: f64,
    pub anomaly_score: f64,
}

impl ChannelState {
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn stats(&self) -> BaselineStats {
        BaselineStats {
            samples: self.buffer.len(),
            long_mean: self.long_mean,
            long_var: self.long_var,
            short_mean: self.short_mean,
            short_var: self.short_var,
            trend: self.trend,
        }
    }
}

/// Raw baseline numbers kept for audit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineStats {
    pub samples: usize,
    pub long_mean: f64,
    pub long_var: f64,
    pub short_mean: f64,
    pub short_var: f64,
    pub trend: f64,
}

/// Fused risk across channels with its breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskBreakdown {
    pub score: f64,
    pub components: Components,
    pub baselines: BTreeMap<Channel, BaselineStats>,
}

/// Per-channel streaming baseline vs. current-window deviation detector.
///
/// The older part of each channel's buffer is the baseline, the most recent
/// `short_window` values are the current state. A channel scores high when the
/// current mean drifts from the baseline (trend) or its variance surges.
pub struct StreamingStatAnalyzer {
    config: AnalyzerConfig,
    states: BTreeMap<Channel, ChannelState>,
}

impl StreamingStatAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            config: config.clone(),
            states: empty_states(),
        }
    }

    /// Append one value and recompute that channel's statistics.
    /// Non-finite values are dropped as missing.
    pub fn add_sample(&mut self, channel: Channel, value: f64) {
        if !value.is_finite() {
            return;
        }
        let state = self.states.entry(channel).or_default();
        state.buffer.push_back(value);
        while state.buffer.len() > self.config.long_window {
            state.buffer.pop_front();
        }
        recompute(state, &self.config);
    }

    /// Feed every channel present in the sample; absent channels are skipped.
    pub fn observe(&mut self, sample: &Sample) {
        for channel in Channel::ALL {
            if let Some(value) = sample.get(channel) {
                self.add_sample(channel, value);
            }
        }
    }

    pub fn state(&self, channel: Channel) -> Option<&ChannelState> {
        self.states.get(&channel)
    }

    pub fn anomaly_score(&self, channel: Channel) -> f64 {
        self.states.get(&channel).map(|s| s.anomaly_score).unwrap_or(0.0)
    }

    pub fn compute_risk(&self) -> RiskBreakdown {
        let mut components: Components = SmallVec::new();
        let mut baselines = BTreeMap::new();
        let mut total = 0.0;

        for channel in Channel::ALL {
            let anomaly = self.anomaly_score(channel);
            total += self.config.weights.get(channel) * anomaly;
            components.push(Component::new(channel.to_string(), anomaly));
            if let Some(state) = self.states.get(&channel) {
                baselines.insert(channel, state.stats());
            }
        }

        RiskBreakdown {
            score: clamp01(total),
            components,
            baselines,
        }
    }

    /// Drop every channel's history.
    pub fn reset(&mut self) {
        self.states = empty_states();
        tracing::debug!("Streaming analyzer reset");
    }
}

fn empty_states() -> BTreeMap<Channel, ChannelState> {
    Channel::ALL.iter().map(|c| (*c, ChannelState::default())).collect()
}

fn recompute(state: &mut ChannelState, config: &AnalyzerConfig) {
    let len = state.buffer.len();
    if len < config.min_samples {
        state.anomaly_score = 0.0;
        return;
    }

    let start = len.saturating_sub(config.long_window);
    let end = (start + 1)
        .max((len as f64 * config.baseline_fraction).floor() as usize)
        .min(len);
    let long = RunningStats::from_values(state.buffer.range(start..end));

    let short_start = len - config.short_window.min(len);
    let short = RunningStats::from_values(state.buffer.range(short_start..));

    state.long_mean = long.mean();
    state.long_var = long.sample_variance();
    state.short_mean = short.mean();
    state.short_var = short.sample_variance();

    let long_std = state.long_var.max(EPSILON).sqrt();
    state.trend = (state.short_mean - state.long_mean) / long_std;

    let variance_surge = state.short_var.max(EPSILON).sqrt() / long_std.max(EPSILON);
    // a quieter current window is not anomalous, only a louder one
    let surge_term = (variance_surge - 1.0).tanh().max(0.0);

    state.anomaly_score = clamp01(0.6 * state.trend.abs().tanh() + 0.4 * surge_term);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> StreamingStatAnalyzer {
        StreamingStatAnalyzer::new(&AnalyzerConfig::default())
    }

    /// Deterministic pseudo-random stream
    fn lcg(seed: &mut u64) -> f64 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (*seed >> 11) as f64 / (1u64 << 53) as f64
    }

    #[test]
    fn below_min_samples_scores_zero() {
        let mut a = analyzer();
        for i in 0..99 {
            a.add_sample(Channel::HeartRate, if i % 2 == 0 { 40.0 } else { 200.0 });
            assert_eq!(a.anomaly_score(Channel::HeartRate), 0.0);
        }
    }

    #[test]
    fn constant_stream_settles_to_zero() {
        let mut a = analyzer();
        for _ in 0..1600 {
            a.add_sample(Channel::OxygenSaturation, 97.0);
        }
        let state = a.state(Channel::OxygenSaturation).unwrap();
        assert_eq!(state.len(), 1500);
        assert_eq!(state.long_var, 0.0);
        assert_eq!(state.short_var, 0.0);
        assert_eq!(state.anomaly_score, 0.0);
    }

    #[test]
    fn step_change_is_anomalous() {
        let mut a = analyzer();
        for _ in 0..100 {
            a.add_sample(Channel::HeartRate, 60.0);
        }
        for _ in 0..150 {
            a.add_sample(Channel::HeartRate, 180.0);
        }
        let state = a.state(Channel::HeartRate).unwrap();
        assert!(state.trend > 0.0, "trend {}", state.trend);
        assert!(state.anomaly_score > 0.5, "anomaly {}", state.anomaly_score);
        assert!((state.short_mean - 180.0).abs() < 1e-9);
        assert!((state.long_mean - 100.0).abs() < 1e-9);
    }

    #[test]
    fn variance_surge_raises_score() {
        let mut a = analyzer();
        for i in 0..200 {
            a.add_sample(Channel::Temperature, 37.0 + if i % 2 == 0 { 0.01 } else { -0.01 });
        }
        let calm = a.anomaly_score(Channel::Temperature);
        for i in 0..150 {
            a.add_sample(Channel::Temperature, 37.0 + if i % 2 == 0 { 1.5 } else { -1.5 });
        }
        let noisy = a.anomaly_score(Channel::Temperature);
        assert!(noisy > calm);
        assert!(noisy > 0.35, "noisy {}", noisy);
    }

    #[test]
    fn reset_clears_history() {
        let mut a = analyzer();
        for _ in 0..100 {
            a.add_sample(Channel::HeartRate, 60.0);
        }
        for _ in 0..150 {
            a.add_sample(Channel::HeartRate, 180.0);
        }
        assert!(a.anomaly_score(Channel::HeartRate) > 0.0);

        a.reset();
        for channel in Channel::ALL {
            assert_eq!(a.anomaly_score(channel), 0.0);
            assert!(a.state(channel).unwrap().is_empty());
        }
        for _ in 0..99 {
            a.add_sample(Channel::HeartRate, 250.0);
        }
        assert_eq!(a.anomaly_score(Channel::HeartRate), 0.0);
    }

    #[test]
    fn compute_risk_weights_channels() {
        let mut a = analyzer();
        for _ in 0..100 {
            a.add_sample(Channel::HeartRate, 60.0);
        }
        for _ in 0..150 {
            a.add_sample(Channel::HeartRate, 180.0);
        }
        let hr = a.anomaly_score(Channel::HeartRate);
        let risk = a.compute_risk();
        assert!((risk.score - 0.35 * hr).abs() < 1e-12);
        assert_eq!(risk.components.len(), 4);
        assert_eq!(risk.components[0].name, "heart_rate");
        assert_eq!(risk.baselines[&Channel::HeartRate].samples, 250);
        assert_eq!(risk.baselines[&Channel::Temperature].samples, 0);
    }

    #[test]
    fn missing_values_are_skipped() {
        let mut a = analyzer();
        a.add_sample(Channel::HeartRate, f64::NAN);
        a.add_sample(Channel::HeartRate, f64::INFINITY);
        assert!(a.state(Channel::HeartRate).unwrap().is_empty());

        let mut sample = Sample::empty(chrono::Utc::now());
        sample.heart_rate = Some(70.0);
        a.observe(&sample);
        assert_eq!(a.state(Channel::HeartRate).unwrap().len(), 1);
        assert!(a.state(Channel::OxygenSaturation).unwrap().is_empty());
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let mut a = analyzer();
        let mut seed = 7;
        for i in 0..3000 {
            let scale = if i % 500 < 250 { 1.0 } else { 1e6 };
            for channel in Channel::ALL {
                a.add_sample(channel, (lcg(&mut seed) - 0.5) * scale);
            }
            let risk = a.compute_risk();
            assert!((0.0..=1.0).contains(&risk.score));
            for channel in Channel::ALL {
                assert!((0.0..=1.0).contains(&a.anomaly_score(channel)));
            }
        }
    }
}
