//! Prediction Types
//!
//! 予測分析用の型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 最小二乗法のフィット結果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionFit {
    /// 切片
    pub intercept: f64,
    /// 傾き
    pub slope: f64,
    /// 平均二乗誤差
    pub mse: f64,
    /// 精度ヒューリスティック（0-100）
    pub accuracy: f64,
    /// 学習に使ったサンプル数
    pub samples: usize,
}

impl RegressionFit {
    /// `x` における推定値
    pub fn estimate(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// アクティブユーザー数の予測
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPrediction {
    /// 予測値（0未満は0に丸める）
    pub predicted_users: f64,
    /// モデル精度（0-100）
    pub accuracy: f64,
    pub intercept: f64,
    pub slope: f64,
}

/// システムメトリクスの平滑化予測
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPrediction {
    /// フィールドごとのEMA値
    pub predictions: BTreeMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

/// 予測更新イベントのペイロード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Prediction {
    Activity(ActivityPrediction),
    System(SystemPrediction),
}
