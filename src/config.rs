use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::{Channel, Strategy};

/// Top-level configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub weighted: WeightedConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub assembler: AssemblerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_subject")]
    pub subject_id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            subject_id: default_subject(),
            log_level: default_log_level(),
        }
    }
}

/// Per-channel weights. Used both for the recursive analyzer's fusion and
/// for the weighted heuristic's components.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChannelWeights {
    #[serde(default = "default_w_hr")]
    pub heart_rate: f64,
    #[serde(default = "default_w_spo2")]
    pub oxygen_saturation: f64,
    #[serde(default = "default_w_accel")]
    pub accel_magnitude: f64,
    #[serde(default = "default_w_temp")]
    pub temperature: f64,
}

impl Default for ChannelWeights {
    fn default() -> Self {
        Self { heart_rate: 0.35, oxygen_saturation: 0.30, accel_magnitude: 0.20, temperature: 0.15 }
    }
}

impl ChannelWeights {
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::HeartRate => self.heart_rate,
            Channel::OxygenSaturation => self.oxygen_saturation,
            Channel::AccelMagnitude => self.accel_magnitude,
            Channel::Temperature => self.temperature,
        }
    }

    pub fn sum(&self) -> f64 {
        self.heart_rate + self.oxygen_saturation + self.accel_magnitude + self.temperature
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    #[serde(default = "default_long_window")]
    pub long_window: usize,
    #[serde(default = "default_short_window")]
    pub short_window: usize,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_baseline_fraction")]
    pub baseline_fraction: f64,
    #[serde(default)]
    pub weights: ChannelWeights,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            long_window: 1500,
            short_window: 150,
            min_samples: 100,
            baseline_fraction: 0.6,
            weights: ChannelWeights::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeightedConfig {
    #[serde(default)]
    pub weights: ChannelWeights,
    #[serde(default = "default_spo2_floor")]
    pub spo2_floor: f64,
    #[serde(default = "default_spo2_critical")]
    pub spo2_critical: f64,
    #[serde(default = "default_temp_reference")]
    pub temperature_reference: f64,
    #[serde(default = "default_temp_span")]
    pub temperature_span: f64,
    #[serde(default = "default_hr_delta_span")]
    pub hr_delta_span: f64,
    #[serde(default = "default_accel_rest")]
    pub accel_rest: f64,
    #[serde(default = "default_accel_span")]
    pub accel_span: f64,
}

impl Default for WeightedConfig {
    fn default() -> Self {
        Self {
            weights: ChannelWeights::default(),
            spo2_floor: 94.0,
            spo2_critical: 85.0,
            temperature_reference: 37.0,
            temperature_span: 2.0,
            hr_delta_span: 25.0,
            accel_rest: 1.0,
            accel_span: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default)]
    pub initial: Strategy,
    #[serde(default = "default_blend_alpha")]
    pub blend_alpha: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self { initial: Strategy::Blend, blend_alpha: 0.5 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeatureConfig {
    #[serde(default = "default_feature_window")]
    pub window_size: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { window_size: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_max_distance")]
    pub max_distance: f64,
    pub model_path: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { max_distance: 10.0, model_path: None }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssemblerConfig {
    #[serde(default = "default_intra_packet_interval")]
    pub intra_packet_interval_ms: u64,
    #[serde(default = "default_max_points")]
    pub max_points: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self { intra_packet_interval_ms: 200, max_points: 600 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: f64,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self { moderate_threshold: 0.33, high_threshold: 0.67 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub batch_path: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { batch_path: None, poll_interval_ms: 1000, channel_capacity: 64 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            analyzer: AnalyzerConfig::default(),
            weighted: WeightedConfig::default(),
            strategy: StrategyConfig::default(),
            features: FeatureConfig::default(),
            classifier: ClassifierConfig::default(),
            assembler: AssemblerConfig::default(),
            risk: RiskConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content);

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.analyzer;
        anyhow::ensure!(a.long_window > 0 && a.short_window > 0, "analyzer windows must be non-zero");
        anyhow::ensure!(
            a.short_window <= a.long_window,
            "analyzer.short_window ({}) exceeds long_window ({})", a.short_window, a.long_window
        );
        anyhow::ensure!(
            a.baseline_fraction > 0.0 && a.baseline_fraction <= 1.0,
            "analyzer.baseline_fraction must be in (0, 1]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.strategy.blend_alpha),
            "strategy.blend_alpha must be in [0, 1]"
        );
        anyhow::ensure!(self.features.window_size > 0, "features.window_size must be non-zero");
        anyhow::ensure!(self.classifier.max_distance > 0.0, "classifier.max_distance must be positive");
        anyhow::ensure!(self.assembler.max_points > 0, "assembler.max_points must be non-zero");
        anyhow::ensure!(
            self.risk.moderate_threshold <= self.risk.high_threshold,
            "risk.moderate_threshold must not exceed risk.high_threshold"
        );
        anyhow::ensure!(self.source.channel_capacity > 0, "source.channel_capacity must be non-zero");
        Ok(())
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .to_string()
}

// Default value functions
fn default_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_subject() -> String { "default".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_w_hr() -> f64 { 0.35 }
fn default_w_spo2() -> f64 { 0.30 }
fn default_w_accel() -> f64 { 0.20 }
fn default_w_temp() -> f64 { 0.15 }
fn default_long_window() -> usize { 1500 }
fn default_short_window() -> usize { 150 }
fn default_min_samples() -> usize { 100 }
fn default_baseline_fraction() -> f64 { 0.6 }
fn default_spo2_floor() -> f64 { 94.0 }
fn default_spo2_critical() -> f64 { 85.0 }
fn default_temp_reference() -> f64 { 37.0 }
fn default_temp_span() -> f64 { 2.0 }
fn default_hr_delta_span() -> f64 { 25.0 }
fn default_accel_rest() -> f64 { 1.0 }
fn default_accel_span() -> f64 { 1.0 }
fn default_blend_alpha() -> f64 { 0.5 }
fn default_feature_window() -> usize { 30 }
fn default_max_distance() -> f64 { 10.0 }
fn default_intra_packet_interval() -> u64 { 200 }
fn default_max_points() -> usize { 600 }
fn default_moderate_threshold() -> f64 { 0.33 }
fn default_high_threshold() -> f64 { 0.67 }
fn default_poll_interval() -> u64 { 1000 }
fn default_channel_capacity() -> usize { 64 }
