//! # realtime-analytics
//!
//! Real-time metrics streaming over WebSocket, paired with a client-side
//! analytics engine.
//!
//! The server side simulates user activity, system resource and business KPI
//! streams and pushes them to each subscribed connection on its own schedule.
//! The client side keeps bounded buffers of what it receives, forecasts user
//! activity with linear regression, smooths system metrics with an exponential
//! moving average, and flags anomalies by z-score and fixed thresholds.

pub mod analytics;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod logging;
pub mod monitoring;
pub mod protocol;

pub use client::{AnalyticsEngine, DashboardClient, DashboardEvent, EngineConfig};
pub use config::AnalyticsConfig;
pub use dispatch::{AnalyticsServer, Dispatcher, ServerConfig};
pub use error::{Error, Result};
pub use generator::{GeneratorConfig, MetricGenerator};
pub use protocol::{ClientMessage, MetricSample, ServerMessage, StreamKind};
