//! Z-Score Anomaly Detector
//!
//! スライディングウィンドウによるZスコア異常検知器

use super::types::AnomalyEvent;
use crate::analytics::buffer::RingBuffer;
use chrono::{DateTime, Utc};

/// Zスコア異常検知器
///
/// 新しい値はウィンドウ統計（その値を含まない）に対して評価され、その後ウィンドウに追加される。
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    /// 観測値ウィンドウ
    values: RingBuffer<f64>,
    /// 現在のウィンドウ平均
    mean: f64,
    /// 現在のウィンドウ標準偏差（母分散）
    std: f64,
    /// Zスコア閾値
    threshold: f64,
}

impl ZScoreDetector {
    /// 新しい検知器を作成
    pub fn new(window_size: usize, threshold: f64) -> Self {
        Self {
            values: RingBuffer::new(window_size),
            mean: 0.0,
            std: 0.0,
            threshold,
        }
    }

    /// 値を観測し、異常なら AnomalyEvent を返す
    pub fn observe(&mut self, value: f64, timestamp: DateTime<Utc>) -> Option<AnomalyEvent> {
        let event = self.score(value).and_then(|z_score| {
            (z_score > self.threshold).then(|| AnomalyEvent::Activity {
                value,
                z_score,
                mean: self.mean,
                std: self.std,
                timestamp,
            })
        });

        self.values.push(value);
        self.recompute();
        event
    }

    /// 現在のウィンドウに対するZスコア（標準偏差0なら None）
    pub fn score(&self, value: f64) -> Option<f64> {
        if self.values.is_empty() || self.std <= 0.0 {
            return None;
        }
        Some((value - self.mean).abs() / self.std)
    }

    fn recompute(&mut self) {
        let n = self.values.len() as f64;
        if n == 0.0 {
            self.mean = 0.0;
            self.std = 0.0;
            return;
        }
        self.mean = self.values.iter().sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|v| (v - self.mean).powi(2))
            .sum::<f64>()
            / n;
        self.std = variance.sqrt();
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn window_len(&self) -> usize {
        self.values.len()
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.recompute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spike_after_stable_series() {
        let mut detector = ZScoreDetector::new(5, 2.5);
        let now = Utc::now();

        for value in [50.0, 52.0, 51.0, 53.0] {
            assert!(detector.observe(value, now).is_none(), "fired on {}", value);
        }

        let event = detector.observe(130.0, now).expect("spike should fire");
        match event {
            AnomalyEvent::Activity {
                value,
                z_score,
                mean,
                ..
            } => {
                assert_eq!(value, 130.0);
                assert_eq!(mean, 51.5);
                assert!(z_score > 2.5);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_constant_window_skips_detection() {
        let mut detector = ZScoreDetector::new(10, 2.5);
        let now = Utc::now();
        for _ in 0..10 {
            assert!(detector.observe(100.0, now).is_none());
        }
        assert_eq!(detector.std(), 0.0);
        assert!(detector.score(1000.0).is_none());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut detector = ZScoreDetector::new(3, 2.5);
        let now = Utc::now();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            detector.observe(value, now);
        }
        assert_eq!(detector.window_len(), 3);
        assert_eq!(detector.mean(), 4.0);
    }

    #[test]
    fn test_normal_variation_does_not_fire() {
        let mut detector = ZScoreDetector::new(100, 2.5);
        let now = Utc::now();
        for i in 0..50 {
            detector.observe(100.0 + (i % 5) as f64, now);
        }
        assert!(detector.observe(103.0, now).is_none());
    }

    #[test]
    fn test_reset() {
        let mut detector = ZScoreDetector::new(10, 2.5);
        let now = Utc::now();
        detector.observe(1.0, now);
        detector.observe(5.0, now);
        detector.reset();
        assert_eq!(detector.window_len(), 0);
        assert_eq!(detector.std(), 0.0);
    }
}
