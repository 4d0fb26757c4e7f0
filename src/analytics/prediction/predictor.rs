//! Linear Regression Predictor
//!
//! アクティブユーザー数の線形回帰予測器

use super::types::{ActivityPrediction, RegressionFit};
use crate::analytics::buffer::RingBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// 最小二乗法で `y = intercept + slope * x`（x は系列インデックス）をフィット
///
/// Returns `None` when `n·Σx² − (Σx)²` is zero (fewer than two points).
pub fn fit_least_squares(values: &[f64]) -> Option<RegressionFit> {
    let n = values.len() as f64;

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mse = values
        .iter()
        .enumerate()
        .map(|(i, &y)| (y - (intercept + slope * i as f64)).powi(2))
        .sum::<f64>()
        / n;

    Some(RegressionFit {
        intercept,
        slope,
        mse,
        accuracy: (100.0 - mse / 100.0).clamp(0.0, 100.0),
        samples: values.len(),
    })
}

/// 線形回帰モデルの状態
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressionModel {
    pub intercept: f64,
    pub slope: f64,
    /// 最終学習時刻（未学習なら None）
    pub last_training_time: Option<DateTime<Utc>>,
    /// 精度（0-100）
    pub accuracy: f64,
}

impl LinearRegressionModel {
    /// 学習ウィンドウからモデルを再計算
    ///
    /// On a degenerate window the previous coefficients are kept.
    pub fn train(&mut self, window: &[f64], now: DateTime<Utc>) -> Option<RegressionFit> {
        let fit = fit_least_squares(window)?;
        self.intercept = fit.intercept;
        self.slope = fit.slope;
        self.accuracy = fit.accuracy;
        self.last_training_time = Some(now);
        Some(fit)
    }

    pub fn is_trained(&self) -> bool {
        self.last_training_time.is_some()
    }

    /// `x` における予測値（未学習なら None）
    pub fn predict(&self, x: f64) -> Option<f64> {
        self.is_trained().then(|| self.intercept + self.slope * x)
    }
}

/// 予測器設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// 学習用履歴の容量
    pub training_capacity: usize,
    /// 再学習までのサンプル数
    pub retrain_every: usize,
    /// 学習に必要な最小サンプル数
    pub min_training_samples: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            training_capacity: 1000,
            retrain_every: 50,
            min_training_samples: 10,
        }
    }
}

/// アクティビティ予測器
///
/// 履歴を蓄積し、`retrain_every` サンプルごとにモデルを再学習する。
#[derive(Debug, Clone)]
pub struct ActivityPredictor {
    config: PredictorConfig,
    /// 学習用履歴
    history: RingBuffer<f64>,
    /// 前回学習以降に蓄積されたサンプル数
    since_training: usize,
    model: LinearRegressionModel,
}

impl ActivityPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            history: RingBuffer::new(config.training_capacity),
            config,
            since_training: 0,
            model: LinearRegressionModel::default(),
        }
    }

    /// サンプルを追加（再学習した場合はフィット結果を返す）
    pub fn add_sample(&mut self, value: f64, now: DateTime<Utc>) -> Option<RegressionFit> {
        self.history.push(value);
        self.since_training += 1;

        if self.since_training < self.config.retrain_every.max(1) {
            return None;
        }
        self.since_training = 0;
        self.retrain(now)
    }

    /// 履歴データをまとめて追加
    pub fn add_history<I>(&mut self, values: I, now: DateTime<Utc>) -> Option<RegressionFit>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut last_fit = None;
        for value in values {
            if let Some(fit) = self.add_sample(value, now) {
                last_fit = Some(fit);
            }
        }
        last_fit
    }

    /// 即時再学習
    pub fn retrain(&mut self, now: DateTime<Utc>) -> Option<RegressionFit> {
        if self.history.len() < self.config.min_training_samples {
            debug!(
                samples = self.history.len(),
                "Skipping training: insufficient history"
            );
            return None;
        }

        let window = self.history.snapshot();
        let fit = self.model.train(&window, now)?;
        info!(
            samples = fit.samples,
            accuracy = fit.accuracy,
            "📈 User activity model trained"
        );
        Some(fit)
    }

    /// 次の値を予測（x = 現在のバッファ長）
    pub fn predict_next(&self, buffer_len: usize) -> Option<ActivityPrediction> {
        if buffer_len == 0 {
            return None;
        }
        let predicted = self.model.predict(buffer_len as f64)?;
        Some(ActivityPrediction {
            predicted_users: predicted.max(0.0),
            accuracy: self.model.accuracy,
            intercept: self.model.intercept,
            slope: self.model.slope,
        })
    }

    pub fn model(&self) -> &LinearRegressionModel {
        &self.model
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.since_training = 0;
        self.model = LinearRegressionModel::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(n: usize) -> Vec<f64> {
        (0..n).map(|x| 2.0 * x as f64 + 3.0).collect()
    }

    #[test]
    fn test_fit_exact_line() {
        let fit = fit_least_squares(&linear(20)).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 3.0).abs() < 1e-9);
        assert!(fit.mse < 1e-12);
        assert!((fit.accuracy - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_degenerate() {
        assert!(fit_least_squares(&[]).is_none());
        assert!(fit_least_squares(&[42.0]).is_none());
    }

    #[test]
    fn test_accuracy_bounded_below() {
        let noisy: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 0.0 } else { 1000.0 })
            .collect();
        let fit = fit_least_squares(&noisy).unwrap();
        assert_eq!(fit.accuracy, 0.0);
    }

    #[test]
    fn test_untrained_model_has_no_prediction() {
        let model = LinearRegressionModel::default();
        assert!(model.predict(5.0).is_none());
    }

    #[test]
    fn test_retrain_every_n_samples() {
        let mut predictor = ActivityPredictor::new(PredictorConfig {
            training_capacity: 100,
            retrain_every: 5,
            min_training_samples: 2,
        });
        let now = Utc::now();

        for (i, y) in linear(4).into_iter().enumerate() {
            assert!(predictor.add_sample(y, now).is_none(), "sample {}", i);
        }
        let fit = predictor.add_sample(11.0, now).unwrap();
        assert_eq!(fit.samples, 5);
        assert!((fit.slope - 2.0).abs() < 1e-9);

        // 次の再学習は5サンプル後
        for y in [13.0, 15.0, 17.0, 19.0] {
            assert!(predictor.add_sample(y, now).is_none());
        }
        assert!(predictor.add_sample(21.0, now).is_some());
    }

    #[test]
    fn test_history_backlog_trains_once() {
        let mut predictor = ActivityPredictor::new(PredictorConfig::default());
        let fit = predictor.add_history(linear(50), Utc::now()).unwrap();
        assert_eq!(fit.samples, 50);
        assert!(predictor.model().is_trained());
    }

    #[test]
    fn test_min_training_samples() {
        let mut predictor = ActivityPredictor::new(PredictorConfig {
            training_capacity: 100,
            retrain_every: 3,
            min_training_samples: 10,
        });
        assert!(predictor.add_history(linear(3), Utc::now()).is_none());
        assert!(!predictor.model().is_trained());
    }

    #[test]
    fn test_predict_next_uses_buffer_length() {
        let mut predictor = ActivityPredictor::new(PredictorConfig::default());
        predictor.add_history(linear(50), Utc::now());

        let prediction = predictor.predict_next(10).unwrap();
        assert!((prediction.predicted_users - 23.0).abs() < 1e-6);
        assert!(predictor.predict_next(0).is_none());
    }

    #[test]
    fn test_prediction_clamped_at_zero() {
        let mut predictor = ActivityPredictor::new(PredictorConfig::default());
        let falling: Vec<f64> = (0..50).map(|x| 100.0 - 10.0 * x as f64).collect();
        predictor.add_history(falling, Utc::now());

        let prediction = predictor.predict_next(40).unwrap();
        assert_eq!(prediction.predicted_users, 0.0);
    }

    #[test]
    fn test_reset() {
        let mut predictor = ActivityPredictor::new(PredictorConfig::default());
        predictor.add_history(linear(50), Utc::now());
        predictor.reset();
        assert_eq!(predictor.history_len(), 0);
        assert!(predictor.predict_next(10).is_none());
    }
}
