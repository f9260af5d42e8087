//! スキャンのステートマシン
//!
//! Idle → Running → {Completed | Idle(キャンセル)}
//!
//! - 同時に走るループは1つだけ（running フラグ + RAII ガード）
//! - 作業中の ScanState はミューテックスの内側にだけ存在し、
//!   ループとチェックポイントは必ずこのミューテックス越しに触る
//! - キャンセルは各アイテムの境界でのみ観測される

use super::background::BackgroundTaskCoordinator;
use super::store::ScanStateStore;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::error::{Result, VaultScanError};
use crate::library::PhotoLibrary;
use crate::notify::Notifier;
use crate::statistics::StatisticsSink;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use vault_scan_common::{ScanState, MAX_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// この件数ごとにチェックポイントを保存する
    pub batch_size: usize,
    /// 分類に渡す画像の長辺
    pub max_image_size: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_image_size: 1024,
        }
    }
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_image_size: config.max_image_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { matched: usize, total: usize },
    Cancelled { cursor: usize, total: usize },
    /// 別のループが実行中（何もしない）
    AlreadyRunning,
    /// 保存済みの状態が完了済み（何もしない）
    AlreadyCompleted { matched: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanProgress {
    pub processed: usize,
    pub total: usize,
    pub matched: usize,
    pub running: bool,
}

impl ScanProgress {
    fn of(state: &ScanState, running: bool) -> Self {
        Self {
            processed: state.cursor,
            total: state.total(),
            matched: state.matched_count(),
            running,
        }
    }
}

struct Inner {
    library: Arc<dyn PhotoLibrary>,
    classifier: Arc<dyn Classifier>,
    store: ScanStateStore,
    settings: ScanSettings,
    notifier: Arc<dyn Notifier>,
    statistics: RwLock<Option<Weak<dyn StatisticsSink>>>,
    background: RwLock<Option<Weak<BackgroundTaskCoordinator>>>,
    /// 実行中ループの作業コピー（Idle 中は None）
    state: Mutex<Option<ScanState>>,
    /// ファイル書き込みの直列化。state のロックはスナップショットを取る間だけ持つ
    save_lock: Mutex<()>,
    running: AtomicBool,
    cancelled: AtomicBool,
    progress: watch::Sender<ScanProgress>,
}

impl Inner {
    fn statistics(&self) -> Option<Arc<dyn StatisticsSink>> {
        self.statistics.read().as_ref().and_then(Weak::upgrade)
    }

    fn background(&self) -> Option<Arc<BackgroundTaskCoordinator>> {
        self.background.read().as_ref().and_then(Weak::upgrade)
    }

    fn publish(&self, state: &ScanState) {
        self.progress.send_replace(ScanProgress::of(state, true));
    }
}

/// running フラグを保持している間だけ生きるガード
///
/// ループの future が途中で破棄された場合も含め、drop で Idle に戻す。
struct RunningGuard {
    inner: Arc<Inner>,
}

impl RunningGuard {
    fn acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        inner.cancelled.store(false, Ordering::SeqCst);
        Some(Self {
            inner: Arc::clone(inner),
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        *self.inner.state.lock() = None;
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.progress.send_modify(|p| p.running = false);
    }
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<Inner>,
}

impl ScanOrchestrator {
    pub fn new(
        library: Arc<dyn PhotoLibrary>,
        classifier: Arc<dyn Classifier>,
        store: ScanStateStore,
        settings: ScanSettings,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let initial = store
            .load()
            .map(|state| ScanProgress::of(&state, false))
            .unwrap_or_default();
        let (progress, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                library,
                classifier,
                store,
                settings,
                notifier,
                statistics: RwLock::new(None),
                background: RwLock::new(None),
                state: Mutex::new(None),
                save_lock: Mutex::new(()),
                running: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                progress,
            }),
        }
    }

    /// 統計の記録先（所有しない）
    pub fn configure_statistics(&self, statistics: Weak<dyn StatisticsSink>) {
        *self.inner.statistics.write() = Some(statistics);
    }

    /// 新規スキャン開始時の予約と、キャンセル時の取り下げに使う（所有しない）
    pub fn configure_background(&self, coordinator: &Arc<BackgroundTaskCoordinator>) {
        *self.inner.background.write() = Some(Arc::downgrade(coordinator));
    }

    pub fn store(&self) -> &ScanStateStore {
        &self.inner.store
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 新しいスキャンを最初から開始する
    pub async fn start(&self, threshold: u8) -> Result<ScanOutcome> {
        let threshold = threshold.min(MAX_THRESHOLD);
        if !self.inner.library.request_access().await {
            return Err(VaultScanError::PermissionDenied);
        }
        let Some(guard) = RunningGuard::acquire(&self.inner) else {
            return Ok(ScanOutcome::AlreadyRunning);
        };

        let state = self.fresh_state(threshold).await?;
        self.run_loop(state, guard).await
    }

    /// 保存済みの位置から再開する。状態がなければ新規に開始する
    pub async fn resume_or_start(&self, threshold: u8) -> Result<ScanOutcome> {
        let threshold = threshold.min(MAX_THRESHOLD);
        if self.is_running() {
            return Ok(ScanOutcome::AlreadyRunning);
        }
        if !self.inner.library.request_access().await {
            return Err(VaultScanError::PermissionDenied);
        }
        let Some(guard) = RunningGuard::acquire(&self.inner) else {
            return Ok(ScanOutcome::AlreadyRunning);
        };

        let state = self.inner.store.load_or_create(threshold);
        if state.completed {
            tracing::info!("スキャンは完了済みです: {}", state.summary());
            return Ok(ScanOutcome::AlreadyCompleted {
                matched: state.matched_count(),
            });
        }

        let state = if state.item_ids.is_empty() {
            self.fresh_state(threshold).await?
        } else {
            tracing::info!("スキャン再開: {}/{}", state.cursor, state.total());
            state
        };
        self.run_loop(state, guard).await
    }

    /// ループに停止を要求する（次のアイテム境界で止まる）
    pub fn cancel(&self) {
        if self.is_running() {
            tracing::info!("スキャンのキャンセルを要求");
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(background) = self.inner.background() {
            background.cancel_all();
        }
    }

    /// 現在の進捗をそのまま保存する
    ///
    /// ループ以外のコンテキストからも呼べる。進捗が変わっていなければ
    /// 同じ内容が書かれる。書き込みは呼び出し元のスレッドで行う。
    pub fn checkpoint(&self) -> Result<()> {
        if let Some(state) = self.persist_snapshot()? {
            tracing::debug!("checkpoint: cursor {}/{}", state.cursor, state.total());
        }
        Ok(())
    }

    /// 作業コピーを複製してロックの外で書く
    ///
    /// save_lock を先に取るので、後から書かれるスナップショットが古くなることはない。
    fn persist_snapshot(&self) -> Result<Option<ScanState>> {
        let _writer = self.inner.save_lock.lock();
        let snapshot = self.inner.state.lock().clone();
        match snapshot {
            Some(state) => {
                self.inner.store.save(&state)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// しきい値を超えたアイテム（コーパス順）
    pub fn selected_ids(&self) -> Vec<String> {
        self.inner
            .store
            .load()
            .map(|state| {
                state
                    .item_ids
                    .iter()
                    .filter(|id| state.matched_ids.contains(*id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_completed(&self) -> bool {
        self.inner
            .store
            .load()
            .map(|state| state.completed)
            .unwrap_or(false)
    }

    /// 実行中はライブの値、Idle 中は保存済みの状態から
    pub fn progress(&self) -> ScanProgress {
        if self.is_running() {
            return *self.inner.progress.borrow();
        }
        self.inner
            .store
            .load()
            .map(|state| ScanProgress::of(&state, false))
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.inner.progress.subscribe()
    }

    /// コーパスを取得し、初期化した状態を保存する
    ///
    /// コーパスが空なら何も変更しない。
    async fn fresh_state(&self, threshold: u8) -> Result<ScanState> {
        let item_ids = self.inner.library.fetch_all_image_ids().await?;
        if item_ids.is_empty() {
            return Err(VaultScanError::EmptyCorpus);
        }

        if let Err(e) = self.inner.store.reset() {
            tracing::warn!("古いスキャン状態を削除できません: {}", e);
        }
        let state = ScanState::with_corpus(item_ids, threshold);
        if let Err(e) = self.inner.store.save(&state) {
            tracing::warn!("{}", e);
        }
        if let Some(statistics) = self.inner.statistics() {
            statistics.record_scan_started();
        }
        // このプロセスが途中で終わっても続きを拾えるように
        if let Some(background) = self.inner.background() {
            background.schedule();
        }
        tracing::info!("スキャン開始: {} 枚, しきい値 {}", state.total(), threshold);
        Ok(state)
    }

    async fn run_loop(&self, state: ScanState, guard: RunningGuard) -> Result<ScanOutcome> {
        let item_ids = state.item_ids.clone();
        let threshold = state.threshold;
        let start = state.cursor;
        let total = item_ids.len();
        let batch_size = self.inner.settings.batch_size.max(1);

        self.inner.publish(&state);
        *self.inner.state.lock() = Some(state);

        for (index, id) in item_ids.iter().enumerate().skip(start) {
            if self.inner.cancelled.load(Ordering::SeqCst) {
                self.log_checkpoint();
                self.record_scanned(index - start);
                tracing::info!("スキャンをキャンセルしました: {}/{}", index, total);
                drop(guard);
                return Ok(ScanOutcome::Cancelled {
                    cursor: index,
                    total,
                });
            }

            let matched = self.classify_item(id, threshold).await;

            let cursor = {
                let mut slot = self.inner.state.lock();
                match slot.as_mut() {
                    Some(current) => {
                        current.record(index, matched);
                        self.inner.publish(current);
                        current.cursor
                    }
                    None => index + 1,
                }
            };

            if cursor % batch_size == 0 {
                self.log_checkpoint();
            }
        }

        if let Some(current) = self.inner.state.lock().as_mut() {
            current.completed = true;
            self.inner.publish(current);
        }
        let matched = match self.persist_snapshot() {
            Ok(Some(state)) => {
                tracing::info!("スキャン完了: {}", state.summary());
                state.matched_count()
            }
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("{}", e);
                self.inner
                    .state
                    .lock()
                    .as_ref()
                    .map(ScanState::matched_count)
                    .unwrap_or(0)
            }
        };
        drop(guard);

        self.record_scanned(total - start);
        self.inner.notifier.send_completion(matched);
        Ok(ScanOutcome::Completed { matched, total })
    }

    /// 1アイテムを分類する。取得・読み込み・推論の失敗は「一致なし」
    async fn classify_item(&self, id: &str, threshold: u8) -> bool {
        let Some(handle) = self.inner.library.fetch_by_id(id).await else {
            tracing::warn!("アイテムが見つかりません。スキップ: {}", id);
            return false;
        };

        let image = match self
            .inner
            .library
            .request_downscaled_image(&handle, self.inner.settings.max_image_size)
            .await
        {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("画像を読み込めません。スキップ: {} ({})", id, e);
                return false;
            }
        };

        match self.inner.classifier.confidence(&image).await {
            Ok(score) => {
                tracing::debug!("{}: {}", id, score);
                score >= threshold
            }
            Err(e) => {
                tracing::warn!("分類に失敗。一致なしとして扱います: {} ({})", id, e);
                false
            }
        }
    }

    fn log_checkpoint(&self) {
        if let Err(e) = self.checkpoint() {
            tracing::warn!("チェックポイントの保存に失敗: {}", e);
        }
    }

    fn record_scanned(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(statistics) = self.inner.statistics() {
            statistics.record_photos_scanned(count);
        }
    }
}
