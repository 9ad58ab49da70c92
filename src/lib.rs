pub mod stats;
pub mod normalizer;
pub mod analyzer;
pub mod features;
pub mod classifier;
pub mod dispatcher;
pub mod assembler;
pub mod storage;
pub mod engine;
pub mod source;
pub mod config;

/// Common types used across modules
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use smallvec::SmallVec;

    /// Physiological measurement stream
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub enum Channel {
        HeartRate,
        OxygenSaturation,
        Temperature,
        AccelMagnitude,
    }

    impl Channel {
        pub const ALL: [Channel; 4] = [
            Channel::HeartRate,
            Channel::OxygenSaturation,
            Channel::Temperature,
            Channel::AccelMagnitude,
        ];
    }

    /// One time-aligned point. A `None` channel was absent, which is not the
    /// same thing as a zero reading.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Sample {
        pub timestamp: DateTime<Utc>,
        pub heart_rate: Option<f64>,
        pub oxygen_saturation: Option<f64>,
        pub temperature: Option<f64>,
        pub accel_magnitude: Option<f64>,
    }

    impl Sample {
        pub fn empty(timestamp: DateTime<Utc>) -> Self {
            Self {
                timestamp,
                heart_rate: None,
                oxygen_saturation: None,
                temperature: None,
                accel_magnitude: None,
            }
        }

        pub fn get(&self, channel: Channel) -> Option<f64> {
            match channel {
                Channel::HeartRate => self.heart_rate,
                Channel::OxygenSaturation => self.oxygen_saturation,
                Channel::Temperature => self.temperature,
                Channel::AccelMagnitude => self.accel_magnitude,
            }
        }

        pub fn set(&mut self, channel: Channel, value: Option<f64>) {
            match channel {
                Channel::HeartRate => self.heart_rate = value,
                Channel::OxygenSaturation => self.oxygen_saturation = value,
                Channel::Temperature => self.temperature = value,
                Channel::AccelMagnitude => self.accel_magnitude = value,
            }
        }
    }

    /// Active scoring strategy
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Strategy {
        Weighted,
        Recursive,
        #[default]
        Blend,
        Clustering,
    }

    impl std::str::FromStr for Strategy {
        type Err = anyhow::Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s.trim().to_ascii_lowercase().as_str() {
                "weighted" => Ok(Strategy::Weighted),
                "recursive" => Ok(Strategy::Recursive),
                "blend" => Ok(Strategy::Blend),
                "clustering" | "cluster" => Ok(Strategy::Clustering),
                other => anyhow::bail!("unknown strategy: {}", other),
            }
        }
    }

    /// Discrete risk band for display
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RiskTier {
        Low,
        Moderate,
        High,
    }

    impl RiskTier {
        pub fn from_score(score: f64, moderate: f64, high: f64) -> Self {
            if score >= high {
                RiskTier::High
            } else if score >= moderate {
                RiskTier::Moderate
            } else {
                RiskTier::Low
            }
        }
    }

    /// A named contribution to a score
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct Component {
        pub name: String,
        pub value: f64,
    }

    impl Component {
        pub fn new(name: impl Into<String>, value: f64) -> Self {
            Self { name: name.into(), value }
        }
    }

    pub type Components = SmallVec<[Component; 4]>;

    /// Scored output for one sample
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ScoreRecord {
        pub timestamp: DateTime<Utc>,
        pub score: f64,
        pub risk_tier: RiskTier,
        pub strategy: Strategy,
        pub components: Components,
    }

    /// Non-fatal diagnostic produced while processing
    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum Notice {
        UnresolvableRecord { index: usize },
        ModelUnavailable,
        StrategySwitched { from: Strategy, to: Strategy },
        CollaboratorFailure { source: String, error: String },
    }

    impl std::fmt::Display for Channel {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                Channel::HeartRate => "heart_rate",
                Channel::OxygenSaturation => "oxygen_saturation",
                Channel::Temperature => "temperature",
                Channel::AccelMagnitude => "accel_magnitude",
            };
            write!(f, "{}", s)
        }
    }

    impl std::fmt::Display for Strategy {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                Strategy::Weighted => "weighted",
                Strategy::Recursive => "recursive",
                Strategy::Blend => "blend",
                Strategy::Clustering => "clustering",
            };
            write!(f, "{}", s)
        }
    }

    impl std::fmt::Display for RiskTier {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                RiskTier::Low => write!(f, "LOW"),
                RiskTier::Moderate => write!(f, "MODERATE"),
                RiskTier::High => write!(f, "HIGH"),
            }
        }
    }

    impl std::fmt::Display for Notice {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Notice::UnresolvableRecord { index } => {
                    write!(f, "record {} has no resolvable channel", index)
                }
                Notice::ModelUnavailable => write!(f, "cluster model not loaded"),
                Notice::StrategySwitched { from, to } => {
                    write!(f, "strategy switched from {} to {}", from, to)
                }
                Notice::CollaboratorFailure { source, error } => {
                    write!(f, "{} failed: {}", source, error)
                }
            }
        }
    }
}
