pub mod streaming;
pub mod weighted;

pub use streaming::{BaselineStats, ChannelState, RiskBreakdown, StreamingStatAnalyzer};
pub use weighted::{WeightedScore, WeightedScorer};
