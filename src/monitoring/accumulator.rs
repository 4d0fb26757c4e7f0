//! Metrics Accumulator
//!
//! パイプライン自体のスループット計測（events/sec・uptime）と受信サンプルのアーカイブ

use crate::analytics::buffer::RingBuffer;
use crate::protocol::{MetricSample, StreamKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// アーカイブされた受信サンプル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedSample {
    pub received_at: DateTime<Utc>,
    pub sample: MetricSample,
}

/// 計測値のスナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorSnapshot {
    pub total_events: u64,
    pub events_per_second: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub uptime_secs: f64,
    pub events_by_stream: BTreeMap<StreamKind, u64>,
}

/// メトリクスアキュムレータ
///
/// `events_per_second` is only recomputed by `tick` (1Hz), never per sample.
#[derive(Debug, Clone)]
pub struct MetricsAccumulator {
    total_events: u64,
    events_per_second: f64,
    events_by_stream: BTreeMap<StreamKind, u64>,
    last_update: Option<DateTime<Utc>>,
    connected_at: Option<Instant>,
    /// 前回ティックの時刻とイベント数
    last_tick: Option<(Instant, u64)>,
    /// 学習・エクスポート用アーカイブ
    archive: RingBuffer<ArchivedSample>,
}

impl MetricsAccumulator {
    pub fn new(archive_capacity: usize) -> Self {
        Self {
            total_events: 0,
            events_per_second: 0.0,
            events_by_stream: BTreeMap::new(),
            last_update: None,
            connected_at: None,
            last_tick: None,
            archive: RingBuffer::new(archive_capacity),
        }
    }

    /// 受信サンプルを記録
    pub fn record(&mut self, sample: &MetricSample, received_at: DateTime<Utc>) {
        self.total_events += 1;
        *self.events_by_stream.entry(sample.kind()).or_insert(0) += 1;
        self.last_update = Some(received_at);
        self.archive.push(ArchivedSample {
            received_at,
            sample: sample.clone(),
        });
    }

    /// 1Hzティック: Δevents / Δtime を計算
    pub fn tick(&mut self, now: Instant) -> f64 {
        if let Some((last_at, last_count)) = self.last_tick {
            let elapsed = now.saturating_duration_since(last_at).as_secs_f64();
            if elapsed > 0.0 {
                self.events_per_second = (self.total_events - last_count) as f64 / elapsed;
            }
        }
        self.last_tick = Some((now, self.total_events));
        self.events_per_second
    }

    /// 接続開始を記録
    pub fn mark_connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
    }

    pub fn mark_disconnected(&mut self) {
        self.connected_at = None;
    }

    /// 接続時間
    pub fn uptime(&self, now: Instant) -> Duration {
        self.connected_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn events_per_second(&self) -> f64 {
        self.events_per_second
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn archive(&self) -> &RingBuffer<ArchivedSample> {
        &self.archive
    }

    pub fn snapshot(&self, now: Instant) -> AccumulatorSnapshot {
        AccumulatorSnapshot {
            total_events: self.total_events,
            events_per_second: self.events_per_second,
            last_update: self.last_update,
            uptime_secs: self.uptime(now).as_secs_f64(),
            events_by_stream: self.events_by_stream.clone(),
        }
    }

    /// カウンタとアーカイブをクリア（接続時刻は保持）
    pub fn reset(&mut self) {
        self.total_events = 0;
        self.events_per_second = 0.0;
        self.events_by_stream.clear();
        self.last_update = None;
        self.last_tick = None;
        self.archive.clear();
    }
}

impl Default for MetricsAccumulator {
    fn default() -> Self {
        Self::new(1000)
    }
}
