use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// ログファイル名の接頭辞
pub const LOG_FILE_PREFIX: &str = "realtime-analytics.log";

/// ログ設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error) または EnvFilter 構文
    pub level: String,
    /// ログディレクトリ
    #[serde(rename = "dir")]
    pub log_dir: PathBuf,
    /// ファイルローテーション設定
    pub rotation: LogRotation,
    /// コンソール出力有効
    #[serde(rename = "console")]
    pub console_enabled: bool,
    /// ファイル出力有効
    #[serde(rename = "file")]
    pub file_enabled: bool,
    /// JSON 形式で出力
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// 日次ローテーション
    Daily,
    /// 時間毎ローテーション
    Hourly,
    /// ローテーションなし
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            rotation: LogRotation::Daily,
            console_enabled: true,
            file_enabled: false,
            json: false,
        }
    }
}

impl LogConfig {
    /// ログレベルを上書き
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// カスタムログディレクトリを設定
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// ローテーション設定
    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// コンソール出力制御
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    /// ファイル出力制御
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.file_enabled = enabled;
        self
    }

    pub fn with_json(mut self, enabled: bool) -> Self {
        self.json = enabled;
        self
    }

    /// EnvFilter を作成（不正な指定は info にフォールバック）
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// ログディレクトリを確保
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

fn console_layer(json: bool) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn file_layer(config: &LogConfig) -> Result<(BoxedLayer, WorkerGuard)> {
    ensure_log_dir(&config.log_dir)?;

    let file_appender = match config.rotation {
        LogRotation::Daily => rolling::daily(&config.log_dir, LOG_FILE_PREFIX),
        LogRotation::Hourly => rolling::hourly(&config.log_dir, LOG_FILE_PREFIX),
        LogRotation::Never => rolling::never(&config.log_dir, LOG_FILE_PREFIX),
    };
    let (writer, guard) = non_blocking(file_appender);

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let layer = if config.json {
        layer.json().boxed()
    } else {
        layer.boxed()
    };
    Ok((layer, guard))
}

/// ログシステムを初期化
///
/// The returned guard must be held for as long as file output should be flushed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    // 両方無効でも警告以上はコンソールに出す
    let console_only_warnings = !config.console_enabled && !config.file_enabled;
    if config.console_enabled || console_only_warnings {
        layers.push(console_layer(config.json));
    }

    if config.file_enabled {
        let (layer, file_guard) = file_layer(config)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    let filter = if console_only_warnings {
        EnvFilter::new("warn")
    } else {
        config.env_filter()
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;

    tracing::info!(
        level = %config.level,
        console = config.console_enabled,
        file = config.file_enabled,
        json = config.json,
        "📝 Logging initialized"
    );
    if config.file_enabled {
        tracing::info!("📂 Log directory: {}", config.log_dir.display());
    }

    Ok(guard)
}
