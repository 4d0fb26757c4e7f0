//! Subscription / Dispatch Layer
//!
//! 接続ごとの購読状態機械と定期送信スケジューラ
//!
//! `Unsubscribed → Subscribed → Unsubscribed | Closed`

mod registry;
pub mod server;

pub use registry::TaskRegistry;
pub use server::{AnalyticsServer, ServerConfig};

use crate::error::{Error, Result};
use crate::generator::SharedGenerator;
use crate::protocol::{ClientMessage, ServerMessage, StreamKind, SubscribeConfig};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// 接続ID型
pub type ConnectionId = Uuid;

/// 設定に関わらず適用される送信間隔の下限（`interval_at` は0を受け付けない）
pub const MIN_PUSH_INTERVAL: Duration = Duration::from_millis(1);

/// 接続への送信チャネル（fire-and-forget）
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// ディスパッチ設定
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 購読時に間隔が指定されなかった場合の送信間隔
    pub default_interval: Duration,
    /// 送信間隔の下限
    pub min_interval: Duration,
    /// 接続時に送る履歴ポイント数
    pub history_points: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_millis(1000),
            min_interval: Duration::from_millis(10),
            history_points: 50,
        }
    }
}

/// 購読状態
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Unsubscribed,
    Subscribed {
        interval: Duration,
        streams: Vec<StreamKind>,
    },
}

/// 接続レコード（ディスパッチ層が専有）
#[derive(Debug)]
struct Connection {
    outbound: Outbound,
    state: ConnectionState,
}

/// ディスパッチ統計
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchStatistics {
    pub active_connections: usize,
    pub active_subscriptions: usize,
    pub total_connections: u64,
}

/// ディスパッチャ
#[derive(Clone)]
pub struct Dispatcher {
    generator: SharedGenerator,
    connections: Arc<RwLock<HashMap<ConnectionId, Connection>>>,
    registry: TaskRegistry,
    config: Arc<DispatcherConfig>,
    total_connections: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(generator: SharedGenerator, config: DispatcherConfig) -> Self {
        Self {
            generator,
            connections: Arc::new(RwLock::new(HashMap::new())),
            registry: TaskRegistry::new(),
            config: Arc::new(config),
            total_connections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 新しい接続を登録し、履歴データを送信
    pub async fn connect(&self, outbound: Outbound) -> ConnectionId {
        let id = Uuid::new_v4();

        let backlog = self
            .generator
            .lock()
            .await
            .historical_backlog(self.config.history_points, Utc::now());
        if outbound.send(ServerMessage::HistoricalData(backlog)).is_err() {
            debug!(connection_id = %id, "Outbound closed before historical data");
        }

        self.connections.write().await.insert(
            id,
            Connection {
                outbound,
                state: ConnectionState::Unsubscribed,
            },
        );
        self.total_connections.fetch_add(1, Ordering::SeqCst);

        info!(connection_id = %id, "📱 Client connected");
        id
    }

    /// 受信テキストを処理（不正なメッセージはログに残して無視）
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "❌ Ignoring malformed control message");
                return;
            }
        };

        let result = match message {
            ClientMessage::Subscribe { payload } => self.subscribe(id, payload).await,
            ClientMessage::Unsubscribe => self.unsubscribe(id).await,
        };

        if let Err(e) = result {
            warn!(connection_id = %id, error = %e, "Control message failed");
        }
    }

    /// 購読を開始（既存の定期タスクは先に停止される）
    pub async fn subscribe(&self, id: ConnectionId, config: SubscribeConfig) -> Result<()> {
        let outbound = self
            .connections
            .read()
            .await
            .get(&id)
            .map(|conn| conn.outbound.clone())
            .ok_or(Error::ConnectionNotFound(id))?;

        let interval = self.resolve_interval(&config);
        let streams = config.resolved_streams();
        for name in &config.streams {
            if StreamKind::from_wire(name).is_none() {
                debug!(connection_id = %id, stream = %name, "Ignoring unknown stream");
            }
        }

        let generator = self.generator.clone();
        let task_streams = streams.clone();
        self.registry
            .start(id, move |token| {
                push_loop(id, token, generator, outbound, interval, task_streams)
            })
            .await;

        let registered = match self.connections.write().await.get_mut(&id) {
            Some(conn) => {
                conn.state = ConnectionState::Subscribed {
                    interval,
                    streams: streams.clone(),
                };
                true
            }
            None => false,
        };
        if !registered {
            // close が並行して完了した接続にタスクを残さない
            self.registry.stop(id).await;
            return Err(Error::ConnectionNotFound(id));
        }

        info!(
            connection_id = %id,
            interval_ms = interval.as_millis() as u64,
            streams = ?streams,
            "📈 Client subscribed to data streams"
        );
        Ok(())
    }

    /// 購読を停止（未購読なら何もしない）
    pub async fn unsubscribe(&self, id: ConnectionId) -> Result<()> {
        if !self.connections.read().await.contains_key(&id) {
            return Err(Error::ConnectionNotFound(id));
        }

        let stopped = self.registry.stop(id).await;
        if let Some(conn) = self.connections.write().await.get_mut(&id) {
            conn.state = ConnectionState::Unsubscribed;
        }

        if stopped {
            info!(connection_id = %id, "⏸️ Client unsubscribed from data streams");
        }
        Ok(())
    }

    /// 接続を閉じる（購読停止 → レコード解放）。何度呼んでもよい
    pub async fn close(&self, id: ConnectionId) {
        self.registry.stop(id).await;
        if self.connections.write().await.remove(&id).is_some() {
            info!(connection_id = %id, "🔚 Client disconnected");
        }
    }

    /// 全接続を閉じる
    pub async fn close_all(&self) {
        self.registry.stop_all().await;
        self.connections.write().await.clear();
    }

    /// 全接続へメッセージを送信
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|conn| conn.outbound.send(message.clone()).is_ok())
            .count()
    }

    pub async fn connection_state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|conn| conn.state.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn statistics(&self) -> DispatchStatistics {
        DispatchStatistics {
            active_connections: self.connection_count().await,
            active_subscriptions: self.registry.active_count().await,
            total_connections: self.total_connections.load(Ordering::SeqCst),
        }
    }

    pub fn generator(&self) -> &SharedGenerator {
        &self.generator
    }

    fn resolve_interval(&self, config: &SubscribeConfig) -> Duration {
        config
            .interval_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_interval)
            .max(self.config.min_interval)
            .max(MIN_PUSH_INTERVAL)
    }
}

/// 定期送信ループ: 生成器を1回進め、購読ストリームごとに1サンプル送信
async fn push_loop(
    id: ConnectionId,
    token: CancellationToken,
    generator: SharedGenerator,
    outbound: Outbound,
    interval: Duration,
    streams: Vec<StreamKind>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let tick = generator.lock().await.tick();
                for sample in tick.samples(&streams) {
                    if outbound.send(ServerMessage::AnalyticsData(sample)).is_err() {
                        debug!(connection_id = %id, "Outbound closed, stopping push loop");
                        return;
                    }
                }
                trace!(connection_id = %id, "Dispatched tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GeneratorConfig, MetricGenerator};
    use tokio::sync::mpsc::error::TryRecvError;

    fn dispatcher() -> Dispatcher {
        let generator = MetricGenerator::new(GeneratorConfig {
            anomaly_injection: false,
            seed: Some(42),
            ..GeneratorConfig::default()
        });
        Dispatcher::new(generator.shared(), DispatcherConfig::default())
    }

    fn fast(streams: &[StreamKind]) -> SubscribeConfig {
        SubscribeConfig::new(streams, 10)
    }

    #[tokio::test]
    async fn test_connect_sends_history() {
        let dispatcher = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;

        match rx.recv().await {
            Some(ServerMessage::HistoricalData(points)) => assert_eq!(points.len(), 50),
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(
            dispatcher.connection_state(id).await,
            Some(ConnectionState::Unsubscribed)
        );
    }

    #[tokio::test]
    async fn test_subscribe_streams_samples() {
        let dispatcher = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;
        let _history = rx.recv().await;

        dispatcher.subscribe(id, fast(&StreamKind::ALL)).await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..3 {
            match rx.recv().await {
                Some(ServerMessage::AnalyticsData(sample)) => kinds.push(sample.kind()),
                other => panic!("unexpected message: {:?}", other),
            }
        }
        assert_eq!(kinds, StreamKind::ALL.to_vec());

        dispatcher.close(id).await;
    }

    #[tokio::test]
    async fn test_resubscribe_keeps_single_task() {
        let dispatcher = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;

        dispatcher.subscribe(id, fast(&StreamKind::ALL)).await.unwrap();
        dispatcher
            .subscribe(id, SubscribeConfig::new(&StreamKind::ALL, 3_600_000))
            .await
            .unwrap();
        assert_eq!(dispatcher.statistics().await.active_subscriptions, 1);

        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        dispatcher.close(id).await;
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_sends() {
        let dispatcher = dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;

        dispatcher.subscribe(id, fast(&StreamKind::ALL)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        dispatcher.unsubscribe(id).await.unwrap();

        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(
            dispatcher.connection_state(id).await,
            Some(ConnectionState::Unsubscribed)
        );

        // 二重の unsubscribe と close は冪等
        dispatcher.unsubscribe(id).await.unwrap();
        dispatcher.close(id).await;
        dispatcher.close(id).await;
        assert_eq!(dispatcher.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_message_is_ignored() {
        let dispatcher = dispatcher();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;

        dispatcher.handle_text(id, "{not json").await;
        dispatcher.handle_text(id, r#"{"type":"launch"}"#).await;

        assert_eq!(
            dispatcher.connection_state(id).await,
            Some(ConnectionState::Unsubscribed)
        );
    }

    #[tokio::test]
    async fn test_handle_text_subscribe_with_defaults() {
        let dispatcher = dispatcher();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;

        dispatcher
            .handle_text(id, r#"{"type":"subscribe","payload":{"streams":["system_metrics"]}}"#)
            .await;

        assert_eq!(
            dispatcher.connection_state(id).await,
            Some(ConnectionState::Subscribed {
                interval: Duration::from_millis(1000),
                streams: vec![StreamKind::System],
            })
        );
        dispatcher.close(id).await;
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let dispatcher = dispatcher();
        let id = Uuid::new_v4();
        assert!(matches!(
            dispatcher.subscribe(id, SubscribeConfig::default()).await,
            Err(Error::ConnectionNotFound(_))
        ));
        assert!(dispatcher.unsubscribe(id).await.is_err());
    }

    #[tokio::test]
    async fn test_interval_is_clamped_to_minimum() {
        let dispatcher = dispatcher();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;

        dispatcher
            .subscribe(id, SubscribeConfig::new(&[StreamKind::Kpi], 1))
            .await
            .unwrap();
        match dispatcher.connection_state(id).await {
            Some(ConnectionState::Subscribed { interval, .. }) => {
                assert_eq!(interval, Duration::from_millis(10))
            }
            other => panic!("unexpected state: {:?}", other),
        }
        dispatcher.close(id).await;
    }

    #[tokio::test]
    async fn test_zero_intervals_fall_back_to_one_millisecond() {
        let generator = MetricGenerator::new(GeneratorConfig {
            anomaly_injection: false,
            seed: Some(42),
            ..GeneratorConfig::default()
        });
        let dispatcher = Dispatcher::new(
            generator.shared(),
            DispatcherConfig {
                default_interval: Duration::ZERO,
                min_interval: Duration::ZERO,
                history_points: 0,
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;
        let _history = rx.recv().await;

        dispatcher.subscribe(id, SubscribeConfig::default()).await.unwrap();
        assert_eq!(
            dispatcher.connection_state(id).await,
            Some(ConnectionState::Subscribed {
                interval: MIN_PUSH_INTERVAL,
                streams: StreamKind::ALL.to_vec(),
            })
        );

        let message = tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .expect("push loop should keep running");
        assert!(matches!(message, Some(ServerMessage::AnalyticsData(_))));

        dispatcher.close(id).await;
    }

    #[tokio::test]
    async fn test_broadcast_and_statistics() {
        let dispatcher = dispatcher();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        dispatcher.connect(tx1).await;
        dispatcher.connect(tx2).await;
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}

        let delivered = dispatcher
            .broadcast(ServerMessage::HistoricalData(Vec::new()))
            .await;
        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());

        let stats = dispatcher.statistics().await;
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_ends_push_loop() {
        let dispatcher = dispatcher();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = dispatcher.connect(tx).await;
        drop(rx);

        dispatcher.subscribe(id, fast(&StreamKind::ALL)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // 送信先が消えても他の状態には影響しない
        dispatcher.close(id).await;
        assert_eq!(dispatcher.statistics().await.active_subscriptions, 0);
    }
}
