//! バックグラウンド実行との橋渡し
//!
//! ホストの遅延実行にスキャンの再開を登録し、ホストからの期限切れ通知を
//! チェックポイント + 再スケジュールに変換する。

use super::orchestrator::{ScanOrchestrator, ScanOutcome};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// 登録・投入に使う固定のタスクID
pub const BACKGROUND_TASK_ID: &str = "vault-scan.background-scan";

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("タスクが登録されていません: {0}")]
    NotRegistered(String),

    #[error("タスクは登録済みです: {0}")]
    AlreadyRegistered(String),

    #[error("スケジューラが停止しています")]
    Unavailable,
}

/// 遅延実行の要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub identifier: String,
    pub earliest_start: Duration,
    pub requires_network: bool,
    pub requires_external_power: bool,
}

impl TaskRequest {
    pub fn new(identifier: impl Into<String>, earliest_start: Duration) -> Self {
        Self {
            identifier: identifier.into(),
            earliest_start,
            requires_network: false,
            requires_external_power: false,
        }
    }
}

/// ホストへの完了報告
#[derive(Debug)]
pub struct TaskCompletion(oneshot::Sender<bool>);

impl TaskCompletion {
    pub fn new(sender: oneshot::Sender<bool>) -> Self {
        Self(sender)
    }

    pub fn complete(self, success: bool) {
        // ホスト側が待っていなければ捨てる
        let _ = self.0.send(success);
    }
}

/// ホストから渡される実行中タスク
#[derive(Debug)]
pub struct BackgroundTask {
    pub identifier: String,
    /// 強制終了が迫ったときに発火する
    pub expiration: oneshot::Receiver<()>,
    pub completion: TaskCompletion,
}

pub type TaskHandler = Arc<dyn Fn(BackgroundTask) + Send + Sync>;

/// ホストの遅延実行機構
pub trait HostScheduler: Send + Sync {
    fn register(&self, identifier: &str, handler: TaskHandler) -> Result<(), SchedulerError>;

    fn submit(&self, request: TaskRequest) -> Result<(), SchedulerError>;

    /// 未開始の要求を取り下げる
    fn cancel(&self, identifier: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    /// ループが最後まで終わった（再スケジュールなし）
    Finished(ScanOutcome),
    /// 期限切れ。チェックポイント後に再スケジュールした
    Expired,
    /// 他の経路でキャンセルされた
    Interrupted { cursor: usize },
    Failed(String),
}

pub struct BackgroundTaskCoordinator {
    scheduler: Arc<dyn HostScheduler>,
    orchestrator: ScanOrchestrator,
    threshold: u8,
    earliest_start: Duration,
}

impl BackgroundTaskCoordinator {
    pub fn new(
        scheduler: Arc<dyn HostScheduler>,
        orchestrator: ScanOrchestrator,
        threshold: u8,
        earliest_start: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            orchestrator,
            threshold,
            earliest_start,
        })
    }

    /// ハンドラをホストに登録する
    ///
    /// ハンドラは弱参照しか持たないので、コーディネータが破棄されたら何もしない。
    pub fn register(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handler: TaskHandler = Arc::new(move |task: BackgroundTask| {
            let Some(coordinator) = weak.upgrade() else {
                task.completion.complete(false);
                return;
            };
            tokio::spawn(async move {
                coordinator.handle(task).await;
            });
        });
        self.scheduler.register(BACKGROUND_TASK_ID, handler)
    }

    /// 次回の実行を要求する。失敗してもログのみ
    pub fn schedule(&self) {
        let request = TaskRequest::new(BACKGROUND_TASK_ID, self.earliest_start);
        match self.scheduler.submit(request) {
            Ok(()) => tracing::debug!(
                "バックグラウンドスキャンを予約: {}秒後以降",
                self.earliest_start.as_secs()
            ),
            Err(e) => tracing::warn!("バックグラウンドスキャンの予約に失敗: {}", e),
        }
    }

    pub fn cancel_all(&self) {
        self.scheduler.cancel(BACKGROUND_TASK_ID);
    }

    pub async fn handle(&self, task: BackgroundTask) -> TaskReport {
        let BackgroundTask {
            identifier,
            expiration,
            completion,
        } = task;
        tracing::info!("バックグラウンドタスク開始: {}", identifier);

        // 送信側が消えただけなら期限切れとはみなさない
        let expired = async move {
            if expiration.await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(expired);
        let mut scan = Box::pin(self.orchestrator.resume_or_start(self.threshold));

        let finished = tokio::select! {
            biased;
            result = &mut scan => Some(result),
            _ = &mut expired => None,
        };

        let report = match finished {
            Some(Ok(ScanOutcome::Cancelled { cursor, .. })) => {
                completion.complete(false);
                TaskReport::Interrupted { cursor }
            }
            Some(Ok(outcome)) => {
                completion.complete(true);
                TaskReport::Finished(outcome)
            }
            Some(Err(e)) => {
                tracing::error!("バックグラウンドスキャン失敗: {}", e);
                completion.complete(false);
                TaskReport::Failed(e.to_string())
            }
            None => {
                // 保存 → 停止 → ループ破棄 → 再予約
                tracing::warn!("バックグラウンド実行の期限切れ。進捗を保存します");
                if let Err(e) = self.orchestrator.checkpoint() {
                    tracing::warn!("チェックポイントの保存に失敗: {}", e);
                }
                self.orchestrator.cancel();
                drop(scan);
                self.schedule();
                completion.complete(false);
                TaskReport::Expired
            }
        };

        tracing::info!("バックグラウンドタスク終了: {:?}", report);
        report
    }
}
