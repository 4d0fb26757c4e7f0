//! WebSocket server end-to-end tests (axum server + tokio-tungstenite client)

use futures::{SinkExt, StreamExt};
use realtime_analytics::client::{ClientConfig, DashboardClient, DashboardEvent, EngineConfig};
use realtime_analytics::dispatch::{AnalyticsServer, ServerConfig};
use realtime_analytics::generator::{GeneratorConfig, MetricGenerator};
use realtime_analytics::protocol::{ClientMessage, ServerMessage, StreamKind};
use realtime_analytics::AnalyticsEngine;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(max_connections: usize) -> (AnalyticsServer, SocketAddr) {
    let generator = MetricGenerator::new(GeneratorConfig {
        anomaly_injection: false,
        seed: Some(11),
        ..GeneratorConfig::default()
    });
    let config = ServerConfig {
        bind_addr: ([127, 0, 0, 1], 0).into(),
        max_connections,
        ..ServerConfig::default()
    };
    let mut server = AnalyticsServer::new(config, generator.shared());
    let addr = server.start().await.unwrap();
    (server, addr)
}

async fn next_message(socket: &mut Socket) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for server message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return ServerMessage::parse(text.as_str()).unwrap();
        }
    }
}

async fn send(socket: &mut Socket, message: &ClientMessage) {
    socket
        .send(Message::Text(message.to_json().unwrap().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_history_then_live_samples() {
    let (mut server, addr) = start_server(10).await;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    match next_message(&mut socket).await {
        ServerMessage::HistoricalData(points) => assert_eq!(points.len(), 50),
        other => panic!("expected historical data, got {:?}", other),
    }

    send(
        &mut socket,
        &ClientMessage::subscribe(&[StreamKind::Activity], 20),
    )
    .await;

    for _ in 0..3 {
        match next_message(&mut socket).await {
            ServerMessage::AnalyticsData(sample) => assert_eq!(sample.kind(), StreamKind::Activity),
            other => panic!("expected analytics data, got {:?}", other),
        }
    }

    send(&mut socket, &ClientMessage::Unsubscribe).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(50), socket.next()).await {}
    assert!(
        tokio::time::timeout(Duration::from_millis(200), socket.next())
            .await
            .is_err(),
        "received data after unsubscribe"
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_root_path_accepts_upgrades() {
    let (mut server, addr) = start_server(10).await;
    let (mut socket, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();

    assert!(matches!(
        next_message(&mut socket).await,
        ServerMessage::HistoricalData(_)
    ));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_message_keeps_connection_open() {
    let (mut server, addr) = start_server(10).await;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    next_message(&mut socket).await;

    socket
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    send(
        &mut socket,
        &ClientMessage::subscribe(&[StreamKind::Kpi], 20),
    )
    .await;

    match next_message(&mut socket).await {
        ServerMessage::AnalyticsData(sample) => assert_eq!(sample.kind(), StreamKind::Kpi),
        other => panic!("expected analytics data, got {:?}", other),
    }
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_connection_limit() {
    let (mut server, addr) = start_server(1).await;
    let url = format!("ws://{}/ws", addr);

    let (mut first, _) = connect_async(url.as_str()).await.unwrap();
    next_message(&mut first).await;

    match connect_async(url.as_str()).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("second connection should be refused"),
    }

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_limit_holds_under_burst() {
    let (mut server, addr) = start_server(2).await;
    let url = format!("ws://{}/ws", addr);

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let url = url.clone();
            tokio::spawn(async move { connect_async(url.as_str()).await })
        })
        .collect();

    let mut accepted = Vec::new();
    let mut refused = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok((socket, _)) => accepted.push(socket),
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 503);
                refused += 1;
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(accepted.len(), 2);
    assert_eq!(refused, 6);
    assert_eq!(server.available_slots(), 0);

    for mut socket in accepted {
        next_message(&mut socket).await;
        socket.close(None).await.unwrap();
    }
    let mut released = false;
    for _ in 0..50 {
        if server.available_slots() == 2 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "connection slots were not returned");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_releases_connection() {
    let (mut server, addr) = start_server(10).await;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    next_message(&mut socket).await;
    send(&mut socket, &ClientMessage::subscribe(&StreamKind::ALL, 20)).await;
    next_message(&mut socket).await;

    socket.close(None).await.unwrap();

    let dispatcher = server.dispatcher().clone();
    let mut released = false;
    for _ in 0..50 {
        let stats = dispatcher.statistics().await;
        if stats.active_connections == 0 && stats.active_subscriptions == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "connection record or task leaked");
    assert_eq!(dispatcher.statistics().await.total_connections, 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_dashboard_client_end_to_end() {
    let (mut server, addr) = start_server(10).await;

    let config = ClientConfig {
        url: format!("ws://{}/ws", addr),
        update_interval_ms: 20,
        tick_interval: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let engine = AnalyticsEngine::new(EngineConfig::default()).unwrap();
    let client = DashboardClient::new(config, engine);
    let mut events = client.events().subscribe();
    let (handle, task) = client.spawn();

    let mut seen_connected = false;
    let mut seen_history = false;
    let mut samples = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while samples < 10 && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Ok(DashboardEvent::Connected)) => seen_connected = true,
            Ok(Ok(DashboardEvent::HistoryLoaded { points })) => {
                assert_eq!(points, 50);
                seen_history = true;
            }
            Ok(Ok(DashboardEvent::SampleReceived(_))) => samples += 1,
            Ok(Ok(_)) => {}
            other => panic!("event stream failed: {:?}", other),
        }
    }
    assert!(seen_connected);
    assert!(seen_history);
    assert!(samples >= 10);

    handle.pause().await.unwrap();
    let snapshot = handle.export().await.unwrap();
    assert!(snapshot.metrics.total_events >= 10);
    assert!(!snapshot.chart_data.user_activity.is_empty());

    handle.shutdown().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    server.stop().await.unwrap();
}
