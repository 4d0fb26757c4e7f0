//! World State
//!
//! 全接続が観測する共有シミュレーション状態

use rand::Rng;
use serde::{Deserialize, Serialize};

/// アクティビティ状態
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityState {
    pub active_users: f64,
}

impl ActivityState {
    /// 下限
    pub const FLOOR: f64 = 10.0;

    fn step<R: Rng>(self, rng: &mut R) -> Self {
        Self {
            active_users: (self.active_users + jitter(rng, 20.0)).max(Self::FLOOR),
        }
    }
}

/// システムリソース状態（%）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
}

impl SystemState {
    /// 各フィールドの揺らぎ幅 k（`uniform(-k/2, k/2)`）
    pub const CPU_MAGNITUDE: f64 = 10.0;
    pub const MEMORY_MAGNITUDE: f64 = 5.0;
    pub const DISK_MAGNITUDE: f64 = 2.0;
    pub const NETWORK_MAGNITUDE: f64 = 15.0;

    fn step<R: Rng>(self, rng: &mut R) -> Self {
        Self {
            cpu: perturb_percent(rng, self.cpu, Self::CPU_MAGNITUDE),
            memory: perturb_percent(rng, self.memory, Self::MEMORY_MAGNITUDE),
            disk: perturb_percent(rng, self.disk, Self::DISK_MAGNITUDE),
            network: perturb_percent(rng, self.network, Self::NETWORK_MAGNITUDE),
        }
    }
}

/// ビジネスKPI状態
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KpiState {
    pub revenue: f64,
    pub costs: f64,
    /// 常に revenue − costs
    pub profit: f64,
}

impl KpiState {
    pub fn new(revenue: f64, costs: f64) -> Self {
        Self {
            revenue,
            costs,
            profit: revenue - costs,
        }
    }

    fn step<R: Rng>(self, rng: &mut R) -> Self {
        let revenue = (self.revenue + jitter(rng, 2000.0)).max(0.0);
        let costs = (self.costs + jitter(rng, 1000.0)).max(0.0);
        // profit は revenue/costs 更新後に再計算する
        Self::new(revenue, costs)
    }
}

/// 共有ワールド状態
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub activity: ActivityState,
    pub system: SystemState,
    pub kpis: KpiState,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            activity: ActivityState { active_users: 100.0 },
            system: SystemState {
                cpu: 45.0,
                memory: 60.0,
                disk: 70.0,
                network: 30.0,
            },
            kpis: KpiState::new(50_000.0, 30_000.0),
        }
    }
}

impl WorldState {
    /// 次の状態を返す（activity → system → kpi の順に更新）
    pub fn step<R: Rng>(&self, rng: &mut R) -> WorldState {
        let activity = self.activity.step(rng);
        let system = self.system.step(rng);
        let kpis = self.kpis.step(rng);
        WorldState {
            activity,
            system,
            kpis,
        }
    }
}

/// `value + uniform(-k/2, k/2)` を [0, 100] に収める
fn perturb_percent<R: Rng>(rng: &mut R, value: f64, k: f64) -> f64 {
    (value + jitter(rng, k)).clamp(0.0, 100.0)
}

/// `uniform(-span/2, span/2)`
fn jitter<R: Rng>(rng: &mut R, span: f64) -> f64 {
    (rng.gen::<f64>() - 0.5) * span
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_step_is_pure() {
        let world = WorldState::default();
        let mut rng = StdRng::seed_from_u64(3);
        let next = world.step(&mut rng);
        assert_eq!(world, WorldState::default());
        assert_ne!(next, world);
    }

    #[test]
    fn test_activity_floor() {
        let mut world = WorldState {
            activity: ActivityState { active_users: 10.0 },
            ..WorldState::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            world = world.step(&mut rng);
            assert!(world.activity.active_users >= ActivityState::FLOOR);
        }
    }

    #[test]
    fn test_activity_step_is_bounded() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut world = WorldState::default();
        for _ in 0..200 {
            let next = world.step(&mut rng);
            let delta = next.activity.active_users - world.activity.active_users;
            assert!(delta.abs() <= 10.0 || next.activity.active_users == ActivityState::FLOOR);
            world = next;
        }
    }

    #[test]
    fn test_system_clamped() {
        let mut world = WorldState {
            system: SystemState {
                cpu: 99.9,
                memory: 0.1,
                disk: 100.0,
                network: 0.0,
            },
            ..WorldState::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..500 {
            world = world.step(&mut rng);
            for value in [
                world.system.cpu,
                world.system.memory,
                world.system.disk,
                world.system.network,
            ] {
                assert!((0.0..=100.0).contains(&value));
            }
        }
    }

    #[test]
    fn test_kpi_clamped_and_profit_derived() {
        let mut world = WorldState {
            kpis: KpiState::new(100.0, 50.0),
            ..WorldState::default()
        };
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..500 {
            world = world.step(&mut rng);
            assert!(world.kpis.revenue >= 0.0);
            assert!(world.kpis.costs >= 0.0);
            assert_eq!(world.kpis.profit, world.kpis.revenue - world.kpis.costs);
        }
    }
}
