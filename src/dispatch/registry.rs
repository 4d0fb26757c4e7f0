//! Scheduled Task Registry
//!
//! 接続ID → 定期送信タスクのレジストリ。キャンセルは必ず `stop` を経由する。

use super::ConnectionId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 実行中の定期タスク
#[derive(Debug)]
struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// キャンセルしてタスクの終了を待つ
    async fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
        // 中断による JoinError は想定内
        let _ = self.handle.await;
    }
}

/// タスクレジストリ
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<ConnectionId, ScheduledTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しいタスクを開始し、置き換えられた既存タスクを停止
    ///
    /// The swap happens under one lock, so concurrent starts for the same id
    /// always leave exactly one task registered.
    pub async fn start<F, Fut>(&self, id: ConnectionId, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        let replaced = self
            .tasks
            .lock()
            .await
            .insert(id, ScheduledTask { token, handle });

        if let Some(old) = replaced {
            old.cancel().await;
            debug!(connection_id = %id, "Replaced existing scheduled task");
        }
    }

    /// タスクを停止（終了を待ってから戻る）。停止したタスクがあれば true
    pub async fn stop(&self, id: ConnectionId) -> bool {
        let task = self.tasks.lock().await.remove(&id);
        match task {
            Some(task) => {
                task.cancel().await;
                true
            }
            None => false,
        }
    }

    /// 全タスクを停止
    pub async fn stop_all(&self) -> usize {
        let tasks: Vec<ScheduledTask> = self.tasks.lock().await.drain().map(|(_, t)| t).collect();
        let count = tasks.len();
        for task in tasks {
            task.cancel().await;
        }
        count
    }

    pub async fn is_active(&self, id: ConnectionId) -> bool {
        self.tasks.lock().await.contains_key(&id)
    }

    pub async fn active_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}
