//! Wire protocol
//!
//! JSON envelopes exchanged between the streaming server and dashboard clients.
//!
//! Client → Server:
//! `{"type":"subscribe","payload":{"streams":[..],"interval":1000}}`, `{"type":"unsubscribe"}`
//!
//! Server → Client:
//! `{"type":"historical_data","payload":[..]}`, `{"type":"analytics_data","payload":{"type":"user_activity",..}}`

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// メトリクスストリームの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKind {
    /// アクティブユーザー数
    #[serde(rename = "user_activity")]
    Activity,
    /// システムリソース使用率
    #[serde(rename = "system_metrics")]
    System,
    /// ビジネスKPI
    #[serde(rename = "business_kpis")]
    Kpi,
}

impl StreamKind {
    /// 1ティック内の発行順序（activity → system → kpi）
    pub const ALL: [StreamKind; 3] = [StreamKind::Activity, StreamKind::System, StreamKind::Kpi];

    /// ワイヤー上の名前
    pub fn wire_name(&self) -> &'static str {
        match self {
            StreamKind::Activity => "user_activity",
            StreamKind::System => "system_metrics",
            StreamKind::Kpi => "business_kpis",
        }
    }

    /// ワイヤー上の名前から解決（未知の名前は None）
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// ユーザーアクティビティのサンプル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub timestamp: DateTime<Utc>,
    pub active_users: u64,
}

/// システムメトリクスのサンプル（単位: %）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
}

impl SystemMetrics {
    /// フィールド名と値の組
    pub fn fields(&self) -> [(&'static str, f64); 4] {
        [
            ("cpu", self.cpu),
            ("memory", self.memory),
            ("disk", self.disk),
            ("network", self.network),
        ]
    }
}

/// ビジネスKPIのサンプル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessKpis {
    pub timestamp: DateTime<Utc>,
    pub revenue: f64,
    pub costs: f64,
    pub profit: f64,
}

impl BusinessKpis {
    pub fn fields(&self) -> [(&'static str, f64); 3] {
        [
            ("revenue", self.revenue),
            ("costs", self.costs),
            ("profit", self.profit),
        ]
    }
}

/// メトリクスサンプル（`analytics_data` のペイロード）
///
/// Immutable once built; the `type` tag selects the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricSample {
    UserActivity(UserActivity),
    SystemMetrics(SystemMetrics),
    BusinessKpis(BusinessKpis),
}

impl MetricSample {
    /// ストリーム種別
    pub fn kind(&self) -> StreamKind {
        match self {
            MetricSample::UserActivity(_) => StreamKind::Activity,
            MetricSample::SystemMetrics(_) => StreamKind::System,
            MetricSample::BusinessKpis(_) => StreamKind::Kpi,
        }
    }

    /// タイムスタンプ
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MetricSample::UserActivity(s) => s.timestamp,
            MetricSample::SystemMetrics(s) => s.timestamp,
            MetricSample::BusinessKpis(s) => s.timestamp,
        }
    }

    /// 数値フィールドの一覧
    pub fn fields(&self) -> Vec<(&'static str, f64)> {
        match self {
            MetricSample::UserActivity(s) => vec![("activeUsers", s.active_users as f64)],
            MetricSample::SystemMetrics(s) => s.fields().to_vec(),
            MetricSample::BusinessKpis(s) => s.fields().to_vec(),
        }
    }
}

/// 初回接続時に送信される履歴データポイント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalPoint {
    /// UNIXエポックからのミリ秒
    pub timestamp: i64,
    pub active_users: u64,
    pub cpu: u64,
    pub memory: u64,
}

/// サーバー → クライアントのメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    HistoricalData(Vec<HistoricalPoint>),
    AnalyticsData(MetricSample),
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))
    }
}

/// 購読設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeConfig {
    /// 購読するストリーム名（空なら全ストリーム）
    #[serde(default)]
    pub streams: Vec<String>,
    /// 送信間隔（ミリ秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
}

impl SubscribeConfig {
    pub fn new(streams: &[StreamKind], interval_ms: u64) -> Self {
        Self {
            streams: streams.iter().map(|s| s.wire_name().to_string()).collect(),
            interval: Some(interval_ms as f64),
        }
    }

    /// 有効な送信間隔（欠落・0・非有限値は None）
    pub fn interval_ms(&self) -> Option<u64> {
        self.interval
            .filter(|ms| ms.is_finite() && *ms >= 1.0)
            .map(|ms| ms as u64)
    }

    /// 認識できたストリームの一覧（順序は activity → system → kpi）
    ///
    /// Unknown names are dropped; an empty result means every stream.
    pub fn resolved_streams(&self) -> Vec<StreamKind> {
        let requested: Vec<StreamKind> = self
            .streams
            .iter()
            .filter_map(|name| StreamKind::from_wire(name))
            .collect();

        if requested.is_empty() {
            return StreamKind::ALL.to_vec();
        }

        StreamKind::ALL
            .into_iter()
            .filter(|kind| requested.contains(kind))
            .collect()
    }
}

/// クライアント → サーバーの制御メッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        payload: SubscribeConfig,
    },
    Unsubscribe,
}

impl ClientMessage {
    pub fn subscribe(streams: &[StreamKind], interval_ms: u64) -> Self {
        ClientMessage::Subscribe {
            payload: SubscribeConfig::new(streams, interval_ms),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 制御メッセージを解析
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))
    }
}
