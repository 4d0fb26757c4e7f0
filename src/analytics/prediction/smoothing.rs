//! Exponential Smoothing Predictor
//!
//! システムメトリクスの指数平滑化フィルタ

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 指数平滑化モデル（フィールドごとに1つのEMA値）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentialSmoothingModel {
    /// 平滑化係数 (0, 1)
    alpha: f64,
    predictions: BTreeMap<String, f64>,
    last_update: Option<DateTime<Utc>>,
}

impl ExponentialSmoothingModel {
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(Error::InvalidInput(format!(
                "smoothing alpha must be in (0, 1), got {}",
                alpha
            )));
        }
        Ok(Self {
            alpha,
            predictions: BTreeMap::new(),
            last_update: None,
        })
    }

    /// 最新サンプルでEMAを更新（初回観測時はその値で初期化）
    pub fn update<'a, I>(&mut self, fields: I, now: DateTime<Utc>) -> &BTreeMap<String, f64>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let alpha = self.alpha;
        for (field, value) in fields {
            if !value.is_finite() {
                continue;
            }
            self.predictions
                .entry(field.to_string())
                .and_modify(|ema| *ema = alpha * value + (1.0 - alpha) * *ema)
                .or_insert(value);
        }
        self.last_update = Some(now);
        &self.predictions
    }

    pub fn forecast(&self, field: &str) -> Option<f64> {
        self.predictions.get(field).copied()
    }

    pub fn predictions(&self) -> &BTreeMap<String, f64> {
        &self.predictions
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn reset(&mut self) {
        self.predictions.clear();
        self.last_update = None;
    }
}
