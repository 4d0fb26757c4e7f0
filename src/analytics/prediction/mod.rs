//! Prediction Analytics Module
//!
//! 予測分析システム（線形回帰・指数平滑化）

mod predictor;
mod smoothing;
mod types;

pub use predictor::{fit_least_squares, ActivityPredictor, LinearRegressionModel, PredictorConfig};
pub use smoothing::ExponentialSmoothingModel;
pub use types::{ActivityPrediction, Prediction, RegressionFit, SystemPrediction};
