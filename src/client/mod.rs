//! Dashboard Client
//!
//! ストリーミングサーバーに接続し、受信データをリアルタイム分析するクライアント

pub mod driver;
pub mod engine;
pub mod events;
pub mod export;

pub use driver::{ClientCommand, ClientConfig, ClientHandle, DashboardClient};
pub use engine::{AnalyticsEngine, EngineConfig};
pub use events::{DashboardEvent, EventBus};
pub use export::{archive_to_csv, ChartData, ExportSnapshot, PredictionSet};
