//! Dashboard Client Driver
//!
//! WebSocket 接続を管理し、受信メッセージと1Hzティックをエンジンへ渡す。

use super::engine::AnalyticsEngine;
use super::events::{DashboardEvent, EventBus};
use super::export::ExportSnapshot;
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, StreamKind};
use chrono::Utc;
use futures::{Sink, SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// クライアント設定
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 接続先 URL
    pub url: String,
    /// サーバーに要求する送信間隔（ミリ秒）
    pub update_interval_ms: u64,
    /// 再接続の最大試行回数
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// 購読するストリーム
    pub streams: Vec<StreamKind>,
    /// エンジンのティック間隔
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001/ws".to_string(),
            update_interval_ms: 1000,
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            streams: StreamKind::ALL.to_vec(),
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// ドライバへのコマンド
#[derive(Debug)]
pub enum ClientCommand {
    Pause,
    Resume,
    Reset,
    Export(oneshot::Sender<ExportSnapshot>),
    Shutdown,
}

/// 実行中のクライアントへのハンドル
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
    events: EventBus,
}

impl ClientHandle {
    async fn send(&self, command: ClientCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::Connection("client task has stopped".to_string()))
    }

    /// 一時停止（サーバーへ unsubscribe を送る）
    pub async fn pause(&self) -> Result<()> {
        self.send(ClientCommand::Pause).await
    }

    /// 再開（subscribe を再送する）
    pub async fn resume(&self) -> Result<()> {
        self.send(ClientCommand::Resume).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(ClientCommand::Reset).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(ClientCommand::Shutdown).await
    }

    /// 現在の状態をエクスポート
    pub async fn export(&self) -> Result<ExportSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(ClientCommand::Export(tx)).await?;
        rx.await
            .map_err(|_| Error::Connection("client task dropped the export request".to_string()))
    }

    /// ダッシュボードイベントを購読
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

/// ダッシュボードクライアント
pub struct DashboardClient {
    config: ClientConfig,
    engine: AnalyticsEngine,
    events: EventBus,
}

impl DashboardClient {
    pub fn new(config: ClientConfig, engine: AnalyticsEngine) -> Self {
        Self {
            config,
            engine,
            events: EventBus::default(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// バックグラウンドタスクとして起動
    pub fn spawn(self) -> (ClientHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = ClientHandle {
            commands: tx,
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    /// 接続・再接続ループ
    ///
    /// Returns `Ok` on shutdown and `Err` once `reconnect_attempts` consecutive
    /// attempts have failed.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>) -> Result<()> {
        let mut failures: u32 = 0;

        loop {
            match connect_async(self.config.url.as_str()).await {
                Ok((stream, _)) => {
                    failures = 0;
                    info!(url = %self.config.url, "🔌 Connected to analytics server");

                    match self.session(stream, &mut commands).await {
                        SessionEnd::Shutdown => {
                            info!("Dashboard client stopped");
                            return Ok(());
                        }
                        SessionEnd::Dropped(reason) => {
                            warn!(reason = %reason, "Connection lost");
                            let events = self.engine.on_disconnected(reason);
                            self.events.publish_all(events);
                        }
                    }
                }
                Err(e) => {
                    warn!(url = %self.config.url, error = %e, "Connection attempt failed");
                }
            }

            failures += 1;
            if failures > self.config.reconnect_attempts {
                error!(
                    attempts = failures,
                    "Giving up on {} after repeated failures", self.config.url
                );
                return Err(Error::Connection(format!(
                    "unable to reach {} after {} attempts",
                    self.config.url, failures
                )));
            }

            info!(
                attempt = failures,
                max_attempts = self.config.reconnect_attempts,
                "Reconnecting in {:?}",
                self.config.reconnect_delay
            );

            let delay = tokio::time::sleep(self.config.reconnect_delay);
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    _ = &mut delay => break,
                    command = commands.recv() => match command {
                        None | Some(ClientCommand::Shutdown) => return Ok(()),
                        Some(command) => self.apply_local(command),
                    },
                }
            }
        }
    }

    async fn session(
        &mut self,
        stream: WsStream,
        commands: &mut mpsc::Receiver<ClientCommand>,
    ) -> SessionEnd {
        let (mut sink, mut source) = stream.split();

        self.events
            .publish_all(self.engine.on_connected(Instant::now()));

        if !self.engine.is_paused() {
            if let Err(e) = send_message(&mut sink, &self.subscribe_message()).await {
                return SessionEnd::Dropped(e.to_string());
            }
        }

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match self.engine.handle_text(text.as_str(), Utc::now()) {
                            Ok(events) => self.events.publish_all(events),
                            Err(e) => warn!(error = %e, "Ignoring malformed server message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return SessionEnd::Dropped("closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                    None => return SessionEnd::Dropped("stream ended".to_string()),
                },
                _ = ticker.tick() => {
                    let events = self.engine.tick(Instant::now(), Utc::now());
                    self.events.publish_all(events);
                }
                command = commands.recv() => match command {
                    None | Some(ClientCommand::Shutdown) => {
                        let _ = send_message(&mut sink, &ClientMessage::Unsubscribe).await;
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    }
                    Some(ClientCommand::Pause) if !self.engine.is_paused() => {
                        if let Err(e) = send_message(&mut sink, &ClientMessage::Unsubscribe).await {
                            return SessionEnd::Dropped(e.to_string());
                        }
                        self.apply_local(ClientCommand::Pause);
                    }
                    Some(ClientCommand::Resume) if self.engine.is_paused() => {
                        if let Err(e) = send_message(&mut sink, &self.subscribe_message()).await {
                            return SessionEnd::Dropped(e.to_string());
                        }
                        self.apply_local(ClientCommand::Resume);
                    }
                    Some(command) => self.apply_local(command),
                },
            }
        }
    }

    /// 接続に依存しないコマンドを処理
    fn apply_local(&mut self, command: ClientCommand) {
        let events = match command {
            ClientCommand::Pause => self.engine.pause(),
            ClientCommand::Resume => self.engine.resume(),
            ClientCommand::Reset => self.engine.reset(),
            ClientCommand::Export(reply) => {
                if reply.send(self.engine.export(Instant::now())).is_err() {
                    debug!("Export requester went away");
                }
                Vec::new()
            }
            ClientCommand::Shutdown => Vec::new(),
        };
        self.events.publish_all(events);
    }

    fn subscribe_message(&self) -> ClientMessage {
        ClientMessage::subscribe(&self.config.streams, self.config.update_interval_ms)
    }
}

async fn send_message<S>(sink: &mut S, message: &ClientMessage) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = message.to_json()?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}
