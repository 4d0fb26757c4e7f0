//! Analytics Module
//!
//! クライアント側の予測分析・異常検知

pub mod anomaly;
pub mod buffer;
pub mod prediction;

pub use anomaly::{AnomalyEvent, ThresholdDetector, ZScoreDetector};
pub use buffer::RingBuffer;
pub use prediction::{
    fit_least_squares, ActivityPrediction, ActivityPredictor, ExponentialSmoothingModel,
    LinearRegressionModel, Prediction, PredictorConfig, RegressionFit, SystemPrediction,
};
