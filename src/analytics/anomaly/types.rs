//! Anomaly Detection Types
//!
//! 異常検知用の型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 異常検知イベント（発行のみ、コアでは保持しない）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyEvent {
    /// アクティビティのZスコア異常
    Activity {
        value: f64,
        z_score: f64,
        /// 判定に使ったウィンドウ平均
        mean: f64,
        /// 判定に使ったウィンドウ標準偏差
        std: f64,
        timestamp: DateTime<Utc>,
    },
    /// システムメトリクスの閾値超過
    System {
        field: String,
        value: f64,
        threshold: f64,
        timestamp: DateTime<Utc>,
    },
}

impl AnomalyEvent {
    pub fn value(&self) -> f64 {
        match self {
            AnomalyEvent::Activity { value, .. } | AnomalyEvent::System { value, .. } => *value,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AnomalyEvent::Activity { timestamp, .. } | AnomalyEvent::System { timestamp, .. } => {
                *timestamp
            }
        }
    }

    /// 人が読める説明
    pub fn describe(&self) -> String {
        match self {
            AnomalyEvent::Activity {
                value,
                z_score,
                mean,
                ..
            } => format!(
                "Unusual user activity: {:.0} (expected ~{:.0}, z-score: {:.2})",
                value, mean, z_score
            ),
            AnomalyEvent::System {
                field,
                value,
                threshold,
                ..
            } => format!("High {} usage: {:.1}% (threshold {:.1}%)", field, value, threshold),
        }
    }
}
