//! Metric Generator
//!
//! 共有ワールド状態を有界ランダムウォークで進めるメトリクス生成器

mod world;

pub use world::{ActivityState, KpiState, SystemState, WorldState};

use crate::protocol::{
    BusinessKpis, HistoricalPoint, MetricSample, StreamKind, SystemMetrics, UserActivity,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

/// 全接続で共有される生成器
pub type SharedGenerator = Arc<Mutex<MetricGenerator>>;

/// 生成器設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// 異常値注入を有効化
    pub anomaly_injection: bool,
    /// ティックごとの注入確率
    pub anomaly_probability: f64,
    /// スパイクの最小オフセット
    pub spike_min: f64,
    /// スパイクの最大オフセット
    pub spike_max: f64,
    /// 乱数シード（テスト用）
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            anomaly_injection: true,
            anomaly_probability: 0.05,
            spike_min: 200.0,
            spike_max: 300.0,
            seed: None,
        }
    }
}

/// 1ティック分の生成結果
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub activity: UserActivity,
    pub system: SystemMetrics,
    pub kpis: BusinessKpis,
    /// 注入された異常アクティビティ
    pub injected: Option<UserActivity>,
}

impl Tick {
    /// 購読ストリームに応じたサンプル列（activity → system → kpi → 注入スパイク）
    pub fn samples(&self, streams: &[StreamKind]) -> Vec<MetricSample> {
        let mut samples = Vec::with_capacity(4);
        for kind in StreamKind::ALL {
            if !streams.contains(&kind) {
                continue;
            }
            samples.push(match kind {
                StreamKind::Activity => MetricSample::UserActivity(self.activity.clone()),
                StreamKind::System => MetricSample::SystemMetrics(self.system.clone()),
                StreamKind::Kpi => MetricSample::BusinessKpis(self.kpis.clone()),
            });
        }
        if let Some(spike) = &self.injected {
            if streams.contains(&StreamKind::Activity) {
                samples.push(MetricSample::UserActivity(spike.clone()));
            }
        }
        samples
    }
}

/// メトリクス生成器
#[derive(Debug)]
pub struct MetricGenerator {
    world: WorldState,
    config: GeneratorConfig,
    rng: StdRng,
    ticks: u64,
}

impl MetricGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self::with_world(WorldState::default(), config)
    }

    /// 初期ワールド状態を指定して作成
    pub fn with_world(world: WorldState, config: GeneratorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            world,
            config,
            rng,
            ticks: 0,
        }
    }

    pub fn shared(self) -> SharedGenerator {
        Arc::new(Mutex::new(self))
    }

    /// ワールドを1ステップ進めて全ストリームのサンプルを生成
    pub fn tick(&mut self) -> Tick {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&mut self, timestamp: DateTime<Utc>) -> Tick {
        self.world = self.world.step(&mut self.rng);
        self.ticks += 1;

        let injected = self.maybe_inject(timestamp);
        trace!(tick = self.ticks, injected = injected.is_some(), "World advanced");

        Tick {
            activity: UserActivity {
                timestamp,
                active_users: self.world.activity.active_users.floor() as u64,
            },
            system: SystemMetrics {
                timestamp,
                cpu: self.world.system.cpu,
                memory: self.world.system.memory,
                disk: self.world.system.disk,
                network: self.world.system.network,
            },
            kpis: BusinessKpis {
                timestamp,
                revenue: self.world.kpis.revenue,
                costs: self.world.kpis.costs,
                profit: self.world.kpis.profit,
            },
            injected,
        }
    }

    /// 確率的に異常スパイクを注入
    fn maybe_inject(&mut self, timestamp: DateTime<Utc>) -> Option<UserActivity> {
        if !self.config.anomaly_injection {
            return None;
        }
        let probability = self.config.anomaly_probability;
        if !probability.is_finite() || !self.rng.gen_bool(probability.clamp(0.0, 1.0)) {
            return None;
        }

        let offset = if self.config.spike_max > self.config.spike_min {
            self.rng.gen_range(self.config.spike_min..self.config.spike_max)
        } else {
            self.config.spike_min
        };
        Some(UserActivity {
            timestamp,
            active_users: (self.world.activity.active_users + offset).floor() as u64,
        })
    }

    /// 初回接続時の履歴バックログ（1秒間隔、最古が先頭）
    pub fn historical_backlog(&mut self, points: usize, now: DateTime<Utc>) -> Vec<HistoricalPoint> {
        (0..points)
            .map(|i| {
                let age = ChronoDuration::seconds((points - i) as i64);
                HistoricalPoint {
                    timestamp: (now - age).timestamp_millis(),
                    active_users: self.rng.gen_range(50.0..150.0_f64).floor() as u64,
                    cpu: self.rng.gen_range(30.0..80.0_f64).floor() as u64,
                    memory: self.rng.gen_range(40.0..80.0_f64).floor() as u64,
                }
            })
            .collect()
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// 異常値注入の切り替え
    pub fn set_anomaly_injection(&mut self, enabled: bool) {
        self.config.anomaly_injection = enabled;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Default for MetricGenerator {
    fn default() -> Self {
        Self::new(GeneratorConfig::default())
    }
}
