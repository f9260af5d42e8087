//! 再開可能なスキャンエンジン
//!
//! - store: スキャン状態の永続化
//! - orchestrator: アイテムループとチェックポイント
//! - background: ホストの遅延実行との橋渡し
//! - local_scheduler: プロセス内のホスト実装

mod background;
mod local_scheduler;
mod orchestrator;
mod store;

pub use background::{
    BackgroundTask, BackgroundTaskCoordinator, HostScheduler, SchedulerError, TaskCompletion,
    TaskHandler, TaskReport, TaskRequest, BACKGROUND_TASK_ID,
};
pub use local_scheduler::{LocalScheduler, TaskOutcome};
pub use orchestrator::{ScanOrchestrator, ScanOutcome, ScanProgress, ScanSettings};
pub use store::{ScanStateStore, STATE_FILE_NAME};
