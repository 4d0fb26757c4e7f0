//! Configuration
//!
//! デフォルト値 → TOML ファイル → `ANALYTICS__SECTION__KEY` 環境変数の順に重ねて読み込む。

use crate::analytics::{PredictorConfig, ThresholdDetector};
use crate::client::{ClientConfig, EngineConfig};
use crate::dispatch::{DispatcherConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::generator::GeneratorConfig;
use crate::logging::LogConfig;
use crate::protocol::StreamKind;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// 環境変数の接頭辞
pub const ENV_PREFIX: &str = "ANALYTICS";

/// パス未指定時に探索する設定ファイル
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["analytics", "config/analytics"];

/// アプリケーション設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub server: ServerSettings,
    pub generator: GeneratorSettings,
    pub client: ClientSettings,
    pub analytics: AnalyticsSettings,
    pub log: LogConfig,
}

/// ストリーミングサーバー設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub default_interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_connections: usize,
    pub history_points: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            default_interval_ms: 1000,
            min_interval_ms: 10,
            max_connections: 1000,
            history_points: 50,
        }
    }
}

/// メトリクス生成器設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub anomaly_injection: bool,
    pub anomaly_probability: f64,
    pub spike_min: f64,
    pub spike_max: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        let defaults = GeneratorConfig::default();
        Self {
            anomaly_injection: defaults.anomaly_injection,
            anomaly_probability: defaults.anomaly_probability,
            spike_min: defaults.spike_min,
            spike_max: defaults.spike_max,
            seed: defaults.seed,
        }
    }
}

/// ダッシュボードクライアント設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub url: String,
    pub update_interval_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub streams: Vec<StreamKind>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001/ws".to_string(),
            update_interval_ms: 1000,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            streams: StreamKind::ALL.to_vec(),
        }
    }
}

/// 分析エンジン設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    pub max_data_points: usize,
    pub archive_capacity: usize,
    pub training_capacity: usize,
    pub retrain_every: usize,
    pub min_training_samples: usize,
    pub smoothing_alpha: f64,
    pub zscore_window: usize,
    pub zscore_threshold: f64,
    pub enable_predictive_analytics: bool,
    pub enable_anomaly_detection: bool,
    /// システムメトリクスの閾値（%）
    pub thresholds: BTreeMap<String, f64>,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        let predictor = PredictorConfig::default();
        Self {
            max_data_points: 100,
            archive_capacity: 1000,
            training_capacity: predictor.training_capacity,
            retrain_every: predictor.retrain_every,
            min_training_samples: predictor.min_training_samples,
            smoothing_alpha: 0.3,
            zscore_window: 100,
            zscore_threshold: 2.5,
            enable_predictive_analytics: true,
            enable_anomaly_detection: true,
            thresholds: ThresholdDetector::default_thresholds(),
        }
    }
}

impl AnalyticsConfig {
    /// 設定を読み込む
    ///
    /// With `path` the file is required; otherwise `analytics.toml` and
    /// `config/analytics.toml` are tried if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(
            path,
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// 環境変数ソースを指定して読み込む
    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&AnalyticsConfig::default())?);

        match path {
            Some(path) => {
                info!("📁 Loading configuration: {}", path.display());
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                for name in DEFAULT_CONFIG_FILES {
                    builder = builder.add_source(File::with_name(name).required(false));
                }
            }
        }

        let config: AnalyticsConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// TOML 文字列から読み込む（環境変数は適用しない）
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AnalyticsConfig = Config::builder()
            .add_source(Config::try_from(&AnalyticsConfig::default())?)
            .add_source(File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        let analytics = &self.analytics;
        if !(analytics.smoothing_alpha > 0.0 && analytics.smoothing_alpha < 1.0) {
            return Err(Error::Config(format!(
                "analytics.smoothing_alpha must be in (0, 1), got {}",
                analytics.smoothing_alpha
            )));
        }

        let capacities = [
            ("analytics.max_data_points", analytics.max_data_points),
            ("analytics.archive_capacity", analytics.archive_capacity),
            ("analytics.training_capacity", analytics.training_capacity),
            ("analytics.retrain_every", analytics.retrain_every),
            ("analytics.zscore_window", analytics.zscore_window),
            ("server.max_connections", self.server.max_connections),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{} must be greater than zero", name)));
        }

        let intervals = [
            ("server.default_interval_ms", self.server.default_interval_ms),
            ("server.min_interval_ms", self.server.min_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{} must be greater than zero", name)));
        }

        let generator = &self.generator;
        if generator.spike_min > generator.spike_max {
            return Err(Error::Config(format!(
                "generator.spike_min ({}) exceeds generator.spike_max ({})",
                generator.spike_min, generator.spike_max
            )));
        }
        if !(0.0..=1.0).contains(&generator.anomaly_probability) {
            return Err(Error::Config(format!(
                "generator.anomaly_probability must be within [0, 1], got {}",
                generator.anomaly_probability
            )));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server.bind_addr.parse().map_err(|e| {
            Error::Config(format!(
                "invalid server.bind_addr '{}': {}",
                self.server.bind_addr, e
            ))
        })
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            default_interval: Duration::from_millis(self.server.default_interval_ms),
            min_interval: Duration::from_millis(self.server.min_interval_ms),
            history_points: self.server.history_points,
        }
    }

    pub fn server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            bind_addr: self.bind_addr()?,
            max_connections: self.server.max_connections,
            dispatch: self.dispatcher_config(),
        })
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            anomaly_injection: self.generator.anomaly_injection,
            anomaly_probability: self.generator.anomaly_probability,
            spike_min: self.generator.spike_min,
            spike_max: self.generator.spike_max,
            seed: self.generator.seed,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.client.url.clone(),
            update_interval_ms: self.client.update_interval_ms,
            reconnect_attempts: self.client.reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.client.reconnect_delay_ms),
            streams: self.client.streams.clone(),
            ..ClientConfig::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let analytics = &self.analytics;
        EngineConfig {
            max_data_points: analytics.max_data_points,
            archive_capacity: analytics.archive_capacity,
            predictor: PredictorConfig {
                training_capacity: analytics.training_capacity,
                retrain_every: analytics.retrain_every,
                min_training_samples: analytics.min_training_samples,
            },
            smoothing_alpha: analytics.smoothing_alpha,
            zscore_window: analytics.zscore_window,
            zscore_threshold: analytics.zscore_threshold,
            thresholds: analytics.thresholds.clone(),
            enable_predictive_analytics: analytics.enable_predictive_analytics,
            enable_anomaly_detection: analytics.enable_anomaly_detection,
        }
    }

    /// コメント付きサンプル設定を生成
    pub fn sample_toml() -> Result<String> {
        let body = toml::to_string_pretty(&AnalyticsConfig::default())
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(format!(
            r#"# realtime-analytics configuration
#
# Save as analytics.toml (or config/analytics.toml), or pass --config PATH.
# Any key can be overridden from the environment, e.g.
#   ANALYTICS__SERVER__BIND_ADDR=0.0.0.0:3001
#   ANALYTICS__ANALYTICS__ZSCORE_THRESHOLD=3.0
#
# [server]     streaming server (interval values in milliseconds)
# [generator]  simulated metrics; set `seed` for reproducible streams
# [client]     dashboard client used by `watch`
# [analytics]  buffers, regression, smoothing and anomaly thresholds
# [log]        level, console/file output, rotation = daily | hourly | never

{}"#,
            body
        ))
    }
}
