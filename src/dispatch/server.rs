//! WebSocket Server
//!
//! Axumベースのメトリクス配信WebSocketサーバー

use super::{Dispatcher, DispatcherConfig};
use crate::error::{Error, Result};
use crate::generator::SharedGenerator;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// サーバー設定
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// バインドアドレス
    pub bind_addr: SocketAddr,
    /// 最大接続数
    pub max_connections: usize,
    /// ディスパッチ設定
    pub dispatch: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 3001).into(),
            max_connections: 1000,
            dispatch: DispatcherConfig::default(),
        }
    }
}

/// ハンドラ共有状態
#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    /// 接続枠（アップグレード前に確保し、切断時に解放）
    slots: Arc<Semaphore>,
}

/// メトリクス配信サーバー
pub struct AnalyticsServer {
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    slots: Arc<Semaphore>,
    shutdown: Option<CancellationToken>,
    local_addr: Option<SocketAddr>,
}

impl AnalyticsServer {
    /// 新しいサーバーを作成
    pub fn new(config: ServerConfig, generator: SharedGenerator) -> Self {
        let dispatcher = Dispatcher::new(generator, config.dispatch.clone());
        let slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config: Arc::new(config),
            dispatcher,
            slots,
            shutdown: None,
            local_addr: None,
        }
    }

    /// ルーターを構築（`/` と `/ws` の両方でアップグレードを受け付ける）
    pub fn router(&self) -> Router {
        let state = ServerState {
            dispatcher: self.dispatcher.clone(),
            slots: self.slots.clone(),
        };

        Router::new()
            .route("/", get(websocket_handler))
            .route("/ws", get(websocket_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// サーバーを起動し、実際にバインドしたアドレスを返す
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.shutdown.is_some() {
            return Err(Error::Server("Server is already running".to_string()));
        }

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| Error::Server(format!("Failed to bind: {}", e)))?;
        let local_addr = listener.local_addr()?;

        let app = self.router();
        let token = CancellationToken::new();
        let shutdown = token.clone();

        tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await });

            if let Err(e) = serve.await {
                error!("Server error: {}", e);
            }
        });

        self.shutdown = Some(token);
        self.local_addr = Some(local_addr);
        info!("🚀 WebSocket server running on ws://{}", local_addr);
        Ok(local_addr)
    }

    /// サーバーを停止し、全接続の定期タスクを解放
    pub async fn stop(&mut self) -> Result<()> {
        let token = self
            .shutdown
            .take()
            .ok_or_else(|| Error::Server("Server is not running".to_string()))?;

        token.cancel();
        self.dispatcher.close_all().await;
        self.local_addr = None;
        info!("🛑 WebSocket server stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// 残りの接続枠
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// WebSocketアップグレードハンドラ
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let permit = match state.slots.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Max connections reached, rejecting {}", addr);
            return (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, permit))
}

/// WebSocket接続を処理（`_permit` はセッション終了まで接続枠を保持）
async fn handle_socket(
    socket: WebSocket,
    state: ServerState,
    addr: SocketAddr,
    _permit: OwnedSemaphorePermit,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();

    let conn_id = state.dispatcher.connect(outbound).await;
    debug!(connection_id = %conn_id, client = %addr, "WebSocket session opened");

    // 送信タスク: ディスパッチ層からのメッセージをソケットへ
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                debug!("Failed to send message: {}", e);
                break;
            }
        }
        let _ = sender.close().await;
    });

    // 受信ループ
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                state.dispatcher.handle_text(conn_id, text.as_str()).await;
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => state.dispatcher.handle_text(conn_id, text).await,
                Err(_) => warn!(connection_id = %conn_id, "Ignoring non UTF-8 binary frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // ping/pong はAxumが処理
            }
            Err(e) => {
                warn!(connection_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // 購読停止 → 接続解放
    state.dispatcher.close(conn_id).await;
    writer.abort();
    debug!(connection_id = %conn_id, "Connection closed");
}
