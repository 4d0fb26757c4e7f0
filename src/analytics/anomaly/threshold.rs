//! Threshold Anomaly Detector
//!
//! フィールドごとの静的上限による異常検知

use super::types::AnomalyEvent;
use crate::protocol::SystemMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 閾値異常検知器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDetector {
    /// フィールド → 上限
    thresholds: BTreeMap<String, f64>,
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self::new(Self::default_thresholds())
    }
}

impl ThresholdDetector {
    pub fn new(thresholds: BTreeMap<String, f64>) -> Self {
        Self { thresholds }
    }

    /// デフォルト閾値（cpu 85, memory 80, disk 90, network 75）
    pub fn default_thresholds() -> BTreeMap<String, f64> {
        [("cpu", 85.0), ("memory", 80.0), ("disk", 90.0), ("network", 75.0)]
            .into_iter()
            .map(|(field, ceiling)| (field.to_string(), ceiling))
            .collect()
    }

    pub fn with_threshold(mut self, field: impl Into<String>, ceiling: f64) -> Self {
        self.thresholds.insert(field.into(), ceiling);
        self
    }

    /// システムメトリクスを評価（上限を厳密に超えたフィールドごとに1イベント）
    pub fn check(&self, sample: &SystemMetrics) -> Vec<AnomalyEvent> {
        self.check_fields(sample.fields(), sample.timestamp)
    }

    /// 任意のフィールド集合を評価
    pub fn check_fields<'a, I>(&self, fields: I, timestamp: DateTime<Utc>) -> Vec<AnomalyEvent>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        fields
            .into_iter()
            .filter_map(|(field, value)| {
                let threshold = *self.thresholds.get(field)?;
                (value > threshold).then(|| AnomalyEvent::System {
                    field: field.to_string(),
                    value,
                    threshold,
                    timestamp,
                })
            })
            .collect()
    }

    pub fn thresholds(&self) -> &BTreeMap<String, f64> {
        &self.thresholds
    }
}
