//! Dashboard Events
//!
//! クライアント側ドメインイベントと型付きイベントチャネル

use crate::analytics::{AnomalyEvent, Prediction};
use crate::protocol::MetricSample;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// ダッシュボードイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// 接続確立
    Connected,
    /// 切断
    Disconnected { reason: String },
    /// サンプル受信
    SampleReceived(MetricSample),
    /// 履歴データ受信
    HistoryLoaded { points: usize },
    /// 回帰モデル再学習
    ModelTrained { samples: usize, accuracy: f64 },
    /// 予測更新
    PredictionUpdated(Prediction),
    /// 異常検知
    AnomalyDetected(AnomalyEvent),
    /// 一時停止
    Paused,
    /// 再開
    Resumed,
    /// リセット
    Reset,
}

impl DashboardEvent {
    /// イベント名
    pub fn name(&self) -> &'static str {
        match self {
            DashboardEvent::Connected => "connected",
            DashboardEvent::Disconnected { .. } => "disconnected",
            DashboardEvent::SampleReceived(_) => "sample_received",
            DashboardEvent::HistoryLoaded { .. } => "history_loaded",
            DashboardEvent::ModelTrained { .. } => "model_trained",
            DashboardEvent::PredictionUpdated(_) => "prediction_updated",
            DashboardEvent::AnomalyDetected(_) => "anomaly_detected",
            DashboardEvent::Paused => "paused",
            DashboardEvent::Resumed => "resumed",
            DashboardEvent::Reset => "reset",
        }
    }
}

/// イベントバス（複数の表示層が購読できる）
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// イベントを購読
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    /// イベントを発行（購読者がいなくてもエラーにしない）
    pub fn publish(&self, event: DashboardEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn publish_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = DashboardEvent>,
    {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
