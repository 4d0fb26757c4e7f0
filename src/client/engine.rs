//! Analytics Engine
//!
//! 受信サンプルを保持し、予測・異常検知・計測を行う同期ステートマシン。
//! I/O は行わず、各操作は発生した `DashboardEvent` を返す。

use super::events::DashboardEvent;
use super::export::{archive_to_csv, ChartData, ExportSnapshot, PredictionSet};
use crate::analytics::{
    ActivityPrediction, ActivityPredictor, AnomalyEvent, ExponentialSmoothingModel, Prediction,
    PredictorConfig, RingBuffer, SystemPrediction, ThresholdDetector, ZScoreDetector,
};
use crate::error::{Error, Result};
use crate::monitoring::MetricsAccumulator;
use crate::protocol::{
    BusinessKpis, HistoricalPoint, MetricSample, ServerMessage, SystemMetrics, UserActivity,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// エンジン設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// ストリームごとのチャートバッファ容量
    pub max_data_points: usize,
    /// 受信サンプルアーカイブの容量
    pub archive_capacity: usize,
    pub predictor: PredictorConfig,
    pub smoothing_alpha: f64,
    pub zscore_window: usize,
    pub zscore_threshold: f64,
    /// システムメトリクスの閾値（%）
    pub thresholds: BTreeMap<String, f64>,
    pub enable_predictive_analytics: bool,
    pub enable_anomaly_detection: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_data_points: 100,
            archive_capacity: 1000,
            predictor: PredictorConfig::default(),
            smoothing_alpha: 0.3,
            zscore_window: 100,
            zscore_threshold: 2.5,
            thresholds: ThresholdDetector::default_thresholds(),
            enable_predictive_analytics: true,
            enable_anomaly_detection: true,
        }
    }
}

/// クライアント側分析エンジン
#[derive(Debug, Clone)]
pub struct AnalyticsEngine {
    config: EngineConfig,
    activity: RingBuffer<UserActivity>,
    system: RingBuffer<SystemMetrics>,
    kpis: RingBuffer<BusinessKpis>,
    predictor: ActivityPredictor,
    smoothing: ExponentialSmoothingModel,
    zscore: ZScoreDetector,
    thresholds: ThresholdDetector,
    accumulator: MetricsAccumulator,
    last_prediction: Option<ActivityPrediction>,
    connected: bool,
    paused: bool,
}

impl AnalyticsEngine {
    /// 新しいエンジンを作成（alpha が (0,1) 外ならエラー）
    pub fn new(config: EngineConfig) -> Result<Self> {
        if config.max_data_points == 0 {
            return Err(Error::InvalidInput(
                "max_data_points must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            activity: RingBuffer::new(config.max_data_points),
            system: RingBuffer::new(config.max_data_points),
            kpis: RingBuffer::new(config.max_data_points),
            predictor: ActivityPredictor::new(config.predictor.clone()),
            smoothing: ExponentialSmoothingModel::new(config.smoothing_alpha)?,
            zscore: ZScoreDetector::new(config.zscore_window, config.zscore_threshold),
            thresholds: ThresholdDetector::new(config.thresholds.clone()),
            accumulator: MetricsAccumulator::new(config.archive_capacity),
            last_prediction: None,
            connected: false,
            paused: false,
            config,
        })
    }

    /// 接続確立
    pub fn on_connected(&mut self, now: Instant) -> Vec<DashboardEvent> {
        self.connected = true;
        self.accumulator.mark_connected(now);
        vec![DashboardEvent::Connected]
    }

    /// 切断（全状態をリセット）
    pub fn on_disconnected(&mut self, reason: impl Into<String>) -> Vec<DashboardEvent> {
        self.connected = false;
        self.accumulator.mark_disconnected();
        self.clear();
        vec![DashboardEvent::Disconnected {
            reason: reason.into(),
        }]
    }

    /// サーバーメッセージ（JSONテキスト）を処理
    pub fn handle_text(&mut self, text: &str, received_at: DateTime<Utc>) -> Result<Vec<DashboardEvent>> {
        let message = ServerMessage::parse(text)?;
        Ok(self.handle_message(message, received_at))
    }

    pub fn handle_message(
        &mut self,
        message: ServerMessage,
        received_at: DateTime<Utc>,
    ) -> Vec<DashboardEvent> {
        match message {
            ServerMessage::HistoricalData(points) => self.ingest_history(&points, received_at),
            ServerMessage::AnalyticsData(sample) => self.ingest(sample, received_at),
        }
    }

    /// 履歴データで予測器を事前学習
    pub fn ingest_history(
        &mut self,
        points: &[HistoricalPoint],
        received_at: DateTime<Utc>,
    ) -> Vec<DashboardEvent> {
        let mut events = vec![DashboardEvent::HistoryLoaded {
            points: points.len(),
        }];

        if self.config.enable_predictive_analytics {
            let values = points.iter().map(|p| p.active_users as f64);
            if let Some(fit) = self.predictor.add_history(values, received_at) {
                events.push(DashboardEvent::ModelTrained {
                    samples: fit.samples,
                    accuracy: fit.accuracy,
                });
            }
        }

        debug!(points = points.len(), "Historical data loaded");
        events
    }

    /// ライブサンプルを処理
    ///
    /// Activity samples are scored by the z-score detector before they join its window.
    pub fn ingest(&mut self, sample: MetricSample, received_at: DateTime<Utc>) -> Vec<DashboardEvent> {
        self.accumulator.record(&sample, received_at);

        let mut events = Vec::new();
        match &sample {
            MetricSample::UserActivity(activity) => {
                self.activity.push(activity.clone());
                let value = activity.active_users as f64;

                if self.config.enable_predictive_analytics {
                    if let Some(fit) = self.predictor.add_sample(value, received_at) {
                        events.push(DashboardEvent::ModelTrained {
                            samples: fit.samples,
                            accuracy: fit.accuracy,
                        });
                    }
                }

                if self.config.enable_anomaly_detection {
                    if let Some(anomaly) = self.zscore.observe(value, activity.timestamp) {
                        warn!(
                            value = anomaly.value(),
                            "🚨 {}",
                            anomaly.describe()
                        );
                        events.push(DashboardEvent::AnomalyDetected(anomaly));
                    }
                }
            }
            MetricSample::SystemMetrics(metrics) => {
                self.system.push(metrics.clone());
            }
            MetricSample::BusinessKpis(kpis) => {
                self.kpis.push(kpis.clone());
            }
        }

        events.insert(0, DashboardEvent::SampleReceived(sample));
        events
    }

    /// 1Hzティック: スループット・予測・閾値チェック
    pub fn tick(&mut self, now: Instant, wall_clock: DateTime<Utc>) -> Vec<DashboardEvent> {
        self.accumulator.tick(now);

        let mut events = Vec::new();

        if self.config.enable_predictive_analytics {
            if let Some(prediction) = self.predictor.predict_next(self.activity.len()) {
                self.last_prediction = Some(prediction.clone());
                events.push(DashboardEvent::PredictionUpdated(Prediction::Activity(
                    prediction,
                )));
            }

            if let Some(latest) = self.system.latest() {
                let predictions = self.smoothing.update(latest.fields(), wall_clock).clone();
                events.push(DashboardEvent::PredictionUpdated(Prediction::System(
                    SystemPrediction {
                        predictions,
                        updated_at: wall_clock,
                    },
                )));
            }
        }

        if self.config.enable_anomaly_detection {
            if let Some(latest) = self.system.latest() {
                for anomaly in self.thresholds.check(latest) {
                    warn!(value = anomaly.value(), "⚠️ {}", anomaly.describe());
                    events.push(DashboardEvent::AnomalyDetected(anomaly));
                }
            }
        }

        events
    }

    /// 一時停止（送信側の unsubscribe はドライバが行う）
    pub fn pause(&mut self) -> Vec<DashboardEvent> {
        if self.paused {
            return Vec::new();
        }
        self.paused = true;
        info!("⏸️ Dashboard paused");
        vec![DashboardEvent::Paused]
    }

    pub fn resume(&mut self) -> Vec<DashboardEvent> {
        if !self.paused {
            return Vec::new();
        }
        self.paused = false;
        info!("▶️ Dashboard resumed");
        vec![DashboardEvent::Resumed]
    }

    /// バッファ・モデル・検知器・カウンタをクリア
    pub fn reset(&mut self) -> Vec<DashboardEvent> {
        self.clear();
        info!("🔄 Dashboard reset");
        vec![DashboardEvent::Reset]
    }

    fn clear(&mut self) {
        self.activity.clear();
        self.system.clear();
        self.kpis.clear();
        self.predictor.reset();
        self.smoothing.reset();
        self.zscore.reset();
        self.accumulator.reset();
        self.last_prediction = None;
    }

    /// 現在の状態をエクスポート
    pub fn export(&self, now: Instant) -> ExportSnapshot {
        ExportSnapshot {
            timestamp: Utc::now(),
            metrics: self.accumulator.snapshot(now),
            chart_data: ChartData {
                user_activity: self.activity.snapshot(),
                system_metrics: self.system.snapshot(),
                business_kpis: self.kpis.snapshot(),
            },
            predictions: PredictionSet {
                activity: self.last_prediction.clone(),
                system: self.smoothing.predictions().clone(),
            },
        }
    }

    /// アーカイブを CSV で出力
    pub fn export_csv(&self) -> Result<String> {
        archive_to_csv(self.accumulator.archive())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn activity_buffer(&self) -> &RingBuffer<UserActivity> {
        &self.activity
    }

    pub fn system_buffer(&self) -> &RingBuffer<SystemMetrics> {
        &self.system
    }

    pub fn kpi_buffer(&self) -> &RingBuffer<BusinessKpis> {
        &self.kpis
    }

    pub fn predictor(&self) -> &ActivityPredictor {
        &self.predictor
    }

    pub fn smoothing(&self) -> &ExponentialSmoothingModel {
        &self.smoothing
    }

    pub fn zscore(&self) -> &ZScoreDetector {
        &self.zscore
    }

    pub fn accumulator(&self) -> &MetricsAccumulator {
        &self.accumulator
    }

    pub fn last_prediction(&self) -> Option<&ActivityPrediction> {
        self.last_prediction.as_ref()
    }
}

/// 閾値超過イベントだけを抽出
pub fn anomalies(events: &[DashboardEvent]) -> Vec<&AnomalyEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            DashboardEvent::AnomalyDetected(anomaly) => Some(anomaly),
            _ => None,
        })
        .collect()
}
