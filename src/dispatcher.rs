use std::collections::VecDeque;

use smallvec::{smallvec, SmallVec};

use crate::analyzer::{StreamingStatAnalyzer, WeightedScorer};
use crate::classifier::{ClusterClassifier, ClusterModel};
use crate::config::{Config, RiskConfig};
use crate::features::WindowFeatureExtractor;
use crate::stats::clamp01;
use crate::types::{Component, Components, Notice, RiskTier, Sample, ScoreRecord, Strategy};

/// Owns every piece of scoring state for one monitored subject. Switching
/// strategy drops the streaming baselines and the weighted scorer's memory;
/// the cluster model survives.
pub struct ScoringStrategyDispatcher {
    strategy: Strategy,
    blend_alpha: f64,
    risk: RiskConfig,
    analyzer: StreamingStatAnalyzer,
    weighted: WeightedScorer,
    extractor: WindowFeatureExtractor,
    classifier: ClusterClassifier,
    window: VecDeque<Sample>,
    model_warned: bool,
    notices: Vec<Notice>,
}

impl ScoringStrategyDispatcher {
    pub fn new(config: &Config) -> Self {
        Self {
            strategy: config.strategy.initial,
            blend_alpha: config.strategy.blend_alpha,
            risk: config.risk.clone(),
            analyzer: StreamingStatAnalyzer::new(&config.analyzer),
            weighted: WeightedScorer::new(&config.weighted),
            extractor: WindowFeatureExtractor::new(&config.features),
            classifier: ClusterClassifier::new(&config.classifier),
            window: VecDeque::with_capacity(config.features.window_size),
            model_warned: false,
            notices: Vec::new(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Select a strategy. A real change resets the streaming analyzer and
    /// the weighted scorer's previous heart rate.
    pub fn set_strategy(&mut self, strategy: Strategy) -> Option<Notice> {
        if strategy == self.strategy {
            return None;
        }
        let from = self.strategy;
        self.strategy = strategy;
        self.analyzer.reset();
        self.weighted.reset();
        tracing::info!(%from, to = %strategy, "Scoring strategy switched");
        Some(Notice::StrategySwitched { from, to: strategy })
    }

    /// Subject change: drop all per-subject history. The model is kept.
    pub fn reset(&mut self) {
        self.analyzer.reset();
        self.weighted.reset();
        self.window.clear();
    }

    pub fn load_model(&mut self, model: ClusterModel) {
        self.classifier.load(model);
        self.model_warned = false;
    }

    pub fn analyzer(&self) -> &StreamingStatAnalyzer {
        &self.analyzer
    }

    pub fn classifier(&self) -> &ClusterClassifier {
        &self.classifier
    }

    /// Notices raised since the last call
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Score one sample under the active strategy.
    pub fn score(&mut self, sample: &Sample) -> ScoreRecord {
        if self.window.len() == self.extractor.window_size() {
            self.window.pop_front();
        }
        self.window.push_back(sample.clone());

        let (score, components) = match self.strategy {
            Strategy::Weighted => {
                let w = self.weighted.score(sample);
                (w.score, w.components)
            }
            Strategy::Recursive => {
                self.analyzer.observe(sample);
                let risk = self.analyzer.compute_risk();
                (risk.score, risk.components)
            }
            Strategy::Blend => {
                let w = self.weighted.score(sample);
                self.analyzer.observe(sample);
                let r = self.analyzer.compute_risk();
                let blended = self.blend_alpha * w.score + (1.0 - self.blend_alpha) * r.score;
                let components: Components = smallvec![
                    Component::new("weighted", w.score),
                    Component::new("recursive", r.score),
                ];
                (blended, components)
            }
            Strategy::Clustering => self.score_clustering(),
        };

        let score = clamp01(score);
        ScoreRecord {
            timestamp: sample.timestamp,
            score,
            risk_tier: RiskTier::from_score(score, self.risk.moderate_threshold, self.risk.high_threshold),
            strategy: self.strategy,
            components,
        }
    }

    fn score_clustering(&mut self) -> (f64, Components) {
        if !self.classifier.is_loaded() && !self.model_warned {
            tracing::warn!("Clustering selected but no cluster model loaded, scoring neutral");
            self.notices.push(Notice::ModelUnavailable);
            self.model_warned = true;
        }

        let samples = self.window.make_contiguous();
        let features = self.extractor.extract(samples, samples.len().saturating_sub(1));
        let result = self.classifier.classify(&features);

        let mut components: Components = SmallVec::new();
        components.push(Component::new("confidence", result.confidence));
        if let Some(distance) = result.distance {
            components.push(Component::new("distance", distance));
        }
        (result.score, components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::types::Channel;

    fn dispatcher(strategy: Strategy) -> ScoringStrategyDispatcher {
        let mut config = Config::default();
        config.strategy.initial = strategy;
        ScoringStrategyDispatcher::new(&config)
    }

    fn hr(value: f64) -> Sample {
        let mut s = Sample::empty(Utc::now());
        s.heart_rate = Some(value);
        s
    }

    fn feed_step(d: &mut ScoringStrategyDispatcher) {
        for _ in 0..100 {
            d.score(&hr(60.0));
        }
        for _ in 0..150 {
            d.score(&hr(180.0));
        }
    }

    #[test]
    fn defaults_to_blend() {
        let d = ScoringStrategyDispatcher::new(&Config::default());
        assert_eq!(d.strategy(), Strategy::Blend);
    }

    #[test]
    fn recursive_reports_analyzer_risk() {
        let mut d = dispatcher(Strategy::Recursive);
        feed_step(&mut d);
        let expected = d.analyzer().compute_risk().score;
        assert!(expected > 0.0);
        let record = d.score(&hr(180.0));
        assert_eq!(record.strategy, Strategy::Recursive);
        assert!((record.score - d.analyzer().compute_risk().score).abs() < 1e-12);
    }

    #[test]
    fn blend_mutates_analyzer_state() {
        let mut d = dispatcher(Strategy::Blend);
        feed_step(&mut d);
        assert!(d.analyzer().anomaly_score(Channel::HeartRate) > 0.5);
        let record = d.score(&hr(180.0));
        assert_eq!(record.components.len(), 2);
        let (w, r) = (record.components[0].value, record.components[1].value);
        assert!((record.score - (0.5 * w + 0.5 * r)).abs() < 1e-12);
    }

    #[test]
    fn switching_resets_anomaly_scores() {
        let mut d = dispatcher(Strategy::Recursive);
        feed_step(&mut d);
        assert!(d.analyzer().anomaly_score(Channel::HeartRate) > 0.0);

        let notice = d.set_strategy(Strategy::Weighted);
        assert_eq!(
            notice,
            Some(Notice::StrategySwitched { from: Strategy::Recursive, to: Strategy::Weighted })
        );
        for channel in Channel::ALL {
            assert_eq!(d.analyzer().anomaly_score(channel), 0.0);
        }
    }

    #[test]
    fn switching_forgets_previous_heart_rate() {
        let mut d = dispatcher(Strategy::Weighted);
        d.score(&hr(60.0));
        d.set_strategy(Strategy::Recursive);
        for _ in 0..10 {
            d.score(&hr(60.0));
        }
        d.set_strategy(Strategy::Weighted);
        let record = d.score(&hr(110.0));
        assert_eq!(record.components[0].name, "hr_delta");
        assert_eq!(record.components[0].value, 0.0);

        let record = d.score(&hr(110.0));
        assert_eq!(record.components[0].value, 0.0);
        let record = d.score(&hr(135.0));
        assert!(record.components[0].value > 0.0);
    }

    #[test]
    fn reselecting_same_strategy_keeps_baseline() {
        let mut d = dispatcher(Strategy::Recursive);
        feed_step(&mut d);
        assert_eq!(d.set_strategy(Strategy::Recursive), None);
        assert!(d.analyzer().anomaly_score(Channel::HeartRate) > 0.0);
    }

    #[test]
    fn switch_keeps_cluster_model() {
        let mut d = dispatcher(Strategy::Clustering);
        let model = ClusterModel::from_value(json!({
            "centroids": [{"id": 1, "vector": vec![0.0; 10], "riskLevel": 0.9}],
            "scaler": {"mean": vec![0.0; 10], "scale": vec![1.0; 10]}
        }))
        .unwrap();
        d.load_model(model);
        d.set_strategy(Strategy::Weighted);
        d.set_strategy(Strategy::Clustering);
        assert!(d.classifier().is_loaded());
    }

    #[test]
    fn clustering_without_model_is_neutral_and_warns_once() {
        let mut d = dispatcher(Strategy::Clustering);
        let first = d.score(&hr(70.0));
        let second = d.score(&hr(72.0));
        assert_eq!(first.score, 0.5);
        assert_eq!(second.score, 0.5);
        assert_eq!(first.risk_tier, RiskTier::Moderate);
        assert_eq!(d.take_notices(), vec![Notice::ModelUnavailable]);
        assert!(d.take_notices().is_empty());
    }

    #[test]
    fn clustering_uses_trailing_window() {
        let mut d = dispatcher(Strategy::Clustering);
        let model = ClusterModel::from_value(json!({
            "centroids": [
                {"id": "rest", "vector": [70.0, 0, 0, 0, 0, 0, 0, 0, 0, 0], "riskLevel": 0.0},
                {"id": "tachy", "vector": [150.0, 0, 0, 0, 0, 0, 0, 0, 0, 0], "riskLevel": 1.0}
            ],
            "scaler": {"mean": vec![0.0; 10], "scale": vec![1.0; 10]}
        }))
        .unwrap();
        d.load_model(model);
        let mut last = None;
        for _ in 0..30 {
            last = Some(d.score(&hr(150.0)));
        }
        let record = last.unwrap();
        assert_eq!(record.score, 1.0);
        assert_eq!(record.risk_tier, RiskTier::High);
    }

    #[test]
    fn reset_clears_subject_history() {
        let mut d = dispatcher(Strategy::Recursive);
        feed_step(&mut d);
        d.reset();
        assert_eq!(d.strategy(), Strategy::Recursive);
        for channel in Channel::ALL {
            assert_eq!(d.analyzer().anomaly_score(channel), 0.0);
        }
    }

    #[test]
    fn every_strategy_scores_in_unit_interval() {
        for strategy in [Strategy::Weighted, Strategy::Recursive, Strategy::Blend, Strategy::Clustering] {
            let mut d = dispatcher(strategy);
            for i in 0..400 {
                let mut s = Sample::empty(Utc::now());
                s.heart_rate = Some(if i % 7 == 0 { 250.0 } else { 40.0 + i as f64 });
                s.oxygen_saturation = Some(70.0 + (i % 30) as f64);
                s.temperature = Some(30.0 + (i % 13) as f64);
                s.accel_magnitude = Some((i % 11) as f64 * 3.0);
                let record = d.score(&s);
                assert!((0.0..=1.0).contains(&record.score), "{} gave {}", strategy, record.score);
            }
        }
    }
}
