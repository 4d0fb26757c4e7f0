//! Anomaly Detection Module
//!
//! 異常検知システム（Zスコア・静的閾値）

mod detector;
mod threshold;
mod types;

pub use detector::ZScoreDetector;
pub use threshold::ThresholdDetector;
pub use types::AnomalyEvent;
