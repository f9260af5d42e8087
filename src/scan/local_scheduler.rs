//! プロセス内のホストスケジューラ
//!
//! tokio のタイマーで遅延実行を模す。実行ごとに持ち時間（budget）があり、
//! 超過すると期限切れ通知を送る。

use super::background::{
    BackgroundTask, HostScheduler, SchedulerError, TaskCompletion, TaskHandler, TaskRequest,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;

/// 期限切れ通知の後、完了報告を待つ時間
const EXPIRATION_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub identifier: String,
    pub success: bool,
}

struct Pending {
    generation: u64,
    abort: AbortHandle,
}

struct SchedulerInner {
    handlers: Mutex<HashMap<String, TaskHandler>>,
    pending: Mutex<HashMap<String, Pending>>,
    generation: AtomicU64,
    budget: Duration,
    outcomes: broadcast::Sender<TaskOutcome>,
}

#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<SchedulerInner>,
}

impl LocalScheduler {
    pub fn new(budget: Duration) -> Self {
        let (outcomes, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(SchedulerInner {
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                budget,
                outcomes,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskOutcome> {
        self.inner.outcomes.subscribe()
    }

    /// 未開始の要求があるか
    pub fn is_pending(&self, identifier: &str) -> bool {
        self.inner.pending.lock().contains_key(identifier)
    }
}

impl SchedulerInner {
    /// 予約が取り下げ・置き換えされていなければ取り出す
    fn take_pending(&self, identifier: &str, generation: u64) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(identifier) {
            Some(entry) if entry.generation == generation => {
                pending.remove(identifier);
                true
            }
            _ => false,
        }
    }

    async fn run(&self, identifier: String) {
        let handler = self.handlers.lock().get(&identifier).cloned();
        let Some(handler) = handler else {
            tracing::warn!("ハンドラ未登録のため実行できません: {}", identifier);
            return;
        };

        let (expire_tx, expire_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        handler(BackgroundTask {
            identifier: identifier.clone(),
            expiration: expire_rx,
            completion: TaskCompletion::new(done_tx),
        });

        tokio::pin!(done_rx);
        let success = tokio::select! {
            result = &mut done_rx => result.unwrap_or(false),
            _ = tokio::time::sleep(self.budget) => {
                tracing::debug!("持ち時間を超過: {}", identifier);
                let _ = expire_tx.send(());
                match tokio::time::timeout(EXPIRATION_GRACE, &mut done_rx).await {
                    Ok(Ok(success)) => success,
                    _ => false,
                }
            }
        };

        let _ = self.outcomes.send(TaskOutcome {
            identifier,
            success,
        });
    }
}

impl HostScheduler for LocalScheduler {
    fn register(&self, identifier: &str, handler: TaskHandler) -> Result<(), SchedulerError> {
        let mut handlers = self.inner.handlers.lock();
        if handlers.contains_key(identifier) {
            return Err(SchedulerError::AlreadyRegistered(identifier.to_string()));
        }
        handlers.insert(identifier.to_string(), handler);
        Ok(())
    }

    /// 同じIDの未開始要求は置き換える
    fn submit(&self, request: TaskRequest) -> Result<(), SchedulerError> {
        if !self.inner.handlers.lock().contains_key(&request.identifier) {
            return Err(SchedulerError::NotRegistered(request.identifier));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::Unavailable)?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let identifier = request.identifier.clone();
        let delay = request.earliest_start;

        let mut pending = self.inner.pending.lock();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.take_pending(&identifier, generation) {
                inner.run(identifier).await;
            }
        });

        if let Some(previous) = pending.insert(
            request.identifier,
            Pending {
                generation,
                abort: task.abort_handle(),
            },
        ) {
            previous.abort.abort();
        }
        Ok(())
    }

    fn cancel(&self, identifier: &str) {
        if let Some(previous) = self.inner.pending.lock().remove(identifier) {
            previous.abort.abort();
            tracing::debug!("予約を取り消し: {}", identifier);
        }
    }
}
