use smallvec::SmallVec;

use crate::config::WeightedConfig;
use crate::stats::clamp01;
use crate::types::{Component, Components, Sample};

/// Static weighted heuristic score
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedScore {
    pub score: f64,
    pub components: Components,
}

/// Fixed-weight heuristic over four independently normalized component risks:
/// heart-rate jump between consecutive samples (an HRV proxy), SpO2 below the
/// clinical floor, accelerometer deviation from rest and temperature deviation
/// from the reference. A missing channel contributes 0.
pub struct WeightedScorer {
    config: WeightedConfig,
    last_heart_rate: Option<f64>,
}

impl WeightedScorer {
    pub fn new(config: &WeightedConfig) -> Self {
        Self {
            config: config.clone(),
            last_heart_rate: None,
        }
    }

    pub fn score(&mut self, sample: &Sample) -> WeightedScore {
        let c = &self.config;

        let hr_risk = match (sample.heart_rate, self.last_heart_rate) {
            (Some(hr), Some(prev)) if hr > 0.0 => ratio((hr - prev).abs(), c.hr_delta_span),
            _ => 0.0,
        };
        if let Some(hr) = sample.heart_rate.filter(|hr| *hr > 0.0) {
            self.last_heart_rate = Some(hr);
        }

        // 0 is what the oximeter reports with no finger on it
        let spo2_risk = match sample.oxygen_saturation {
            Some(spo2) if spo2 > 0.0 => {
                let span = c.spo2_floor - c.spo2_critical;
                if span <= 0.0 {
                    if spo2 < c.spo2_floor { 1.0 } else { 0.0 }
                } else {
                    ratio(c.spo2_floor - spo2, span)
                }
            }
            _ => 0.0,
        };

        let accel_risk = sample
            .accel_magnitude
            .map(|m| ratio((m - c.accel_rest).abs(), c.accel_span))
            .unwrap_or(0.0);

        let temp_risk = match sample.temperature {
            Some(t) if t > 0.0 => ratio((t - c.temperature_reference).abs(), c.temperature_span),
            _ => 0.0,
        };

        let w = &c.weights;
        let score = clamp01(
            w.heart_rate * hr_risk
                + w.oxygen_saturation * spo2_risk
                + w.accel_magnitude * accel_risk
                + w.temperature * temp_risk,
        );

        let mut components: Components = SmallVec::new();
        components.push(Component::new("hr_delta", hr_risk));
        components.push(Component::new("spo2_deficit", spo2_risk));
        components.push(Component::new("accel_deviation", accel_risk));
        components.push(Component::new("temp_deviation", temp_risk));

        WeightedScore { score, components }
    }

    pub fn reset(&mut self) {
        self.last_heart_rate = None;
    }
}

fn ratio(value: f64, span: f64) -> f64 {
    if span <= 0.0 {
        return if value > 0.0 { 1.0 } else { 0.0 };
    }
    clamp01(value / span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(hr: Option<f64>, spo2: Option<f64>, temp: Option<f64>, accel: Option<f64>) -> Sample {
        Sample {
            timestamp: Utc::now(),
            heart_rate: hr,
            oxygen_saturation: spo2,
            temperature: temp,
            accel_magnitude: accel,
        }
    }

    #[test]
    fn healthy_sample_scores_zero() {
        let mut scorer = WeightedScorer::new(&WeightedConfig::default());
        let s = sample(Some(70.0), Some(98.0), Some(37.0), Some(1.0));
        assert_eq!(scorer.score(&s).score, 0.0);
        assert_eq!(scorer.score(&s).score, 0.0);
    }

    #[test]
    fn missing_channels_contribute_nothing() {
        let mut scorer = WeightedScorer::new(&WeightedConfig::default());
        let result = scorer.score(&sample(None, None, None, None));
        assert_eq!(result.score, 0.0);
        assert!(result.components.iter().all(|c| c.value == 0.0));
    }

    #[test]
    fn components_saturate_at_full_weight() {
        let mut scorer = WeightedScorer::new(&WeightedConfig::default());
        scorer.score(&sample(Some(60.0), None, None, None));
        let result = scorer.score(&sample(Some(160.0), Some(80.0), Some(41.0), Some(5.0)));
        assert!((result.score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn spo2_deficit_is_linear_below_floor() {
        let mut scorer = WeightedScorer::new(&WeightedConfig::default());
        let result = scorer.score(&sample(None, Some(89.5), None, None));
        // (94 - 89.5) / 9 = 0.5
        assert!((result.components[1].value - 0.5).abs() < 1e-12);
        assert!((result.score - 0.15).abs() < 1e-12);
    }

    #[test]
    fn zero_readings_are_not_alarms() {
        let mut scorer = WeightedScorer::new(&WeightedConfig::default());
        let result = scorer.score(&sample(Some(0.0), Some(0.0), Some(0.0), None));
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn reset_forgets_previous_heart_rate() {
        let mut scorer = WeightedScorer::new(&WeightedConfig::default());
        scorer.score(&sample(Some(60.0), None, None, None));
        scorer.reset();
        let result = scorer.score(&sample(Some(120.0), None, None, None));
        assert_eq!(result.components[0].value, 0.0);
    }
}
