//! スキャンオーケストレータのテスト
//!
//! チェックポイント間隔・キャンセル・再開・しきい値変更・多重起動を検証

mod support;

use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock, Weak};
use support::*;
use tempfile::{tempdir, TempDir};
use vault_scan::classifier::Classifier;
use vault_scan::error::VaultScanError;
use vault_scan::scan::{ScanOrchestrator, ScanOutcome, ScanSettings, ScanStateStore, STATE_FILE_NAME};
use vault_scan::statistics::StatisticsSink;
use vault_scan_common::ScanState;

const TOTAL: usize = 45;

/// 指定インデックスだけ 90、それ以外 10
fn scores(n: usize, matches: &[usize]) -> Vec<u8> {
    (0..n)
        .map(|i| if matches.contains(&i) { 90 } else { 10 })
        .collect()
}

struct Fixture {
    _dir: TempDir,
    store: ScanStateStore,
    library: Arc<FakeLibrary>,
    notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    fn new(library: FakeLibrary) -> Self {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = ScanStateStore::new(dir.path().join(STATE_FILE_NAME));
        Self {
            _dir: dir,
            store,
            library: Arc::new(library),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    fn orchestrator(&self, classifier: Arc<dyn Classifier>) -> ScanOrchestrator {
        ScanOrchestrator::new(
            self.library.clone(),
            classifier,
            self.store.clone(),
            ScanSettings {
                batch_size: 20,
                max_image_size: 256,
            },
            self.notifier.clone(),
        )
    }

    fn persisted(&self) -> ScanState {
        self.store.load().expect("保存済みの状態があること")
    }
}

/// 45枚・バッチ20 → 20, 40 でチェックポイント、45 で完了保存
#[tokio::test]
async fn test_checkpoints_every_batch() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(TOTAL, &[3, 25, 44])));

    // 各アイテムの分類直前に保存済みカーソルを覗く
    let observed = Arc::new(Mutex::new(Vec::new()));
    let peek_store = fixture.store.clone();
    let sink = observed.clone();
    let classifier = Arc::new(PixelClassifier::with_hook(move |_| {
        let state = peek_store.load().expect("開始時に保存されていること");
        assert!(state.is_consistent());
        sink.lock().push(state.cursor);
    }));

    let orchestrator = fixture.orchestrator(classifier.clone());
    let outcome = orchestrator.start(85).await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { matched: 3, total: TOTAL });
    assert_eq!(classifier.calls(), TOTAL);

    let observed = observed.lock().clone();
    for (index, cursor) in observed.iter().enumerate() {
        let expected = (index / 20) * 20;
        assert_eq!(*cursor, expected, "item {} の時点の保存カーソル", index);
    }

    let state = fixture.persisted();
    assert_eq!(state.cursor, TOTAL);
    assert!(state.completed);
    assert_eq!(state.matched_count(), 3);
    assert_eq!(*fixture.notifier.completions.lock(), vec![3]);
}

/// スコアがしきい値ちょうどなら一致
#[tokio::test]
async fn test_threshold_is_inclusive() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&[84, 85, 86]));
    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));

    orchestrator.start(85).await.unwrap();
    assert_eq!(orchestrator.selected_ids(), vec!["IMG_0001.jpg", "IMG_0002.jpg"]);
}

/// 33番目の処理中にキャンセル → 境界で停止し、その先は保存されない
#[tokio::test]
async fn test_cancel_mid_loop() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(TOTAL, &[10, 33, 40])));

    let handle: Arc<OnceLock<ScanOrchestrator>> = Arc::new(OnceLock::new());
    let hook_handle = handle.clone();
    let classifier = Arc::new(PixelClassifier::with_hook(move |call| {
        if call == 33 {
            if let Some(orchestrator) = hook_handle.get() {
                orchestrator.cancel();
            }
        }
    }));
    let orchestrator = fixture.orchestrator(classifier.clone());
    let _ = handle.set(orchestrator.clone());

    let outcome = orchestrator.start(85).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Cancelled { cursor: 34, total: TOTAL });
    assert_eq!(classifier.calls(), 34);

    let state = fixture.persisted();
    assert_eq!(state.cursor, 34);
    assert!(!state.completed);
    assert!(state.is_consistent());
    assert!(state.matched_ids.contains("IMG_0033.jpg"));
    assert!(!state.matched_ids.contains("IMG_0040.jpg"));
    assert!(fixture.notifier.completions.lock().is_empty());
    assert!(!orchestrator.is_running());
}

/// 保存カーソル k から再開すると [k, len) だけを処理する
#[tokio::test]
async fn test_resume_processes_only_remaining() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(TOTAL, &[2, 30])));

    let mut seeded = ScanState::with_corpus(item_ids(TOTAL), 85);
    for i in 0..17 {
        seeded.record(i, i == 2);
    }
    fixture.store.save(&seeded).unwrap();

    let classifier = Arc::new(PixelClassifier::new());
    let orchestrator = fixture.orchestrator(classifier.clone());
    let outcome = orchestrator.resume_or_start(85).await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { matched: 2, total: TOTAL });
    assert_eq!(classifier.calls(), TOTAL - 17);
    assert_eq!(fixture.library.loaded(), item_ids(TOTAL)[17..].to_vec());
    assert_eq!(orchestrator.selected_ids(), vec!["IMG_0002.jpg", "IMG_0030.jpg"]);
}

/// キャンセル後の再開で、すでに処理したアイテムは再分類しない
#[tokio::test]
async fn test_cancel_then_resume() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(TOTAL, &[5, 20])));

    let handle: Arc<OnceLock<ScanOrchestrator>> = Arc::new(OnceLock::new());
    let hook_handle = handle.clone();
    let first = fixture.orchestrator(Arc::new(PixelClassifier::with_hook(move |call| {
        if call == 9 {
            if let Some(orchestrator) = hook_handle.get() {
                orchestrator.cancel();
            }
        }
    })));
    let _ = handle.set(first.clone());
    assert_eq!(
        first.start(85).await.unwrap(),
        ScanOutcome::Cancelled { cursor: 10, total: TOTAL }
    );

    let classifier = Arc::new(PixelClassifier::new());
    let second = fixture.orchestrator(classifier.clone());
    let outcome = second.resume_or_start(85).await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { matched: 2, total: TOTAL });
    assert_eq!(classifier.calls(), TOTAL - 10);
    assert!(second.is_completed());
}

/// 保存時と異なるしきい値で再開すると最初からやり直す
#[tokio::test]
async fn test_resume_with_new_threshold_restarts() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&[50, 70, 90]));

    let mut seeded = ScanState::with_corpus(item_ids(3), 85);
    seeded.record(0, false);
    seeded.record(1, false);
    fixture.store.save(&seeded).unwrap();

    let classifier = Arc::new(PixelClassifier::new());
    let orchestrator = fixture.orchestrator(classifier.clone());
    let outcome = orchestrator.resume_or_start(60).await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { matched: 2, total: 3 });
    assert_eq!(classifier.calls(), 3);
    assert_eq!(fixture.persisted().threshold, 60);
}

/// 完了済みなら何もしない
#[tokio::test]
async fn test_resume_when_completed_is_noop() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&[90, 10]));
    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));
    orchestrator.start(85).await.unwrap();
    let before = std::fs::read(fixture.store.path()).unwrap();

    let classifier = Arc::new(PixelClassifier::new());
    let again = fixture.orchestrator(classifier.clone());
    let outcome = again.resume_or_start(85).await.unwrap();

    assert_eq!(outcome, ScanOutcome::AlreadyCompleted { matched: 1 });
    assert_eq!(classifier.calls(), 0);
    assert_eq!(std::fs::read(fixture.store.path()).unwrap(), before);
}

/// 状態がなければ resume は新規スキャンになる
#[tokio::test]
async fn test_resume_without_state_starts() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&[90, 90, 10]));
    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));

    let outcome = orchestrator.resume_or_start(85).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Completed { matched: 2, total: 3 });
}

/// start は保存済みの進捗を捨てて最初から
#[tokio::test]
async fn test_start_discards_previous_progress() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(5, &[0])));
    let mut seeded = ScanState::with_corpus(item_ids(5), 85);
    seeded.record(0, true);
    seeded.record(1, false);
    seeded.record(2, false);
    fixture.store.save(&seeded).unwrap();

    let classifier = Arc::new(PixelClassifier::new());
    let orchestrator = fixture.orchestrator(classifier.clone());
    orchestrator.start(85).await.unwrap();
    assert_eq!(classifier.calls(), 5);
}

/// コーパスが空なら失敗し、状態は作られない
#[tokio::test]
async fn test_empty_corpus() {
    let fixture = Fixture::new(FakeLibrary::default());
    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));

    let result = orchestrator.start(85).await;
    assert!(matches!(result, Err(VaultScanError::EmptyCorpus)));
    assert!(fixture.store.load().is_none());
    assert!(!orchestrator.is_running());

    let result = orchestrator.resume_or_start(85).await;
    assert!(matches!(result, Err(VaultScanError::EmptyCorpus)));
}

/// アクセス拒否では何も変更しない
#[tokio::test]
async fn test_permission_denied() {
    let mut library = FakeLibrary::with_scores(&[90]);
    library.denied = true;
    let fixture = Fixture::new(library);
    let seeded = ScanState::with_corpus(item_ids(1), 85);
    fixture.store.save(&seeded).unwrap();

    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));
    assert!(matches!(
        orchestrator.start(85).await,
        Err(VaultScanError::PermissionDenied)
    ));
    assert!(matches!(
        orchestrator.resume_or_start(85).await,
        Err(VaultScanError::PermissionDenied)
    ));
    assert_eq!(fixture.persisted(), seeded);
}

/// 見つからない・読めない・分類失敗のアイテムは一致なしで進む
#[tokio::test]
async fn test_per_item_failures_are_skipped() {
    let mut library = FakeLibrary::with_scores(&[90, 90, 90, FAILING_SCORE, 90]);
    library.missing.insert("IMG_0000.jpg".into());
    library.broken.insert("IMG_0001.jpg".into());
    let fixture = Fixture::new(library);

    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));
    let outcome = orchestrator.start(85).await.unwrap();

    assert_eq!(outcome, ScanOutcome::Completed { matched: 2, total: 5 });
    assert_eq!(orchestrator.selected_ids(), vec!["IMG_0002.jpg", "IMG_0004.jpg"]);
    let state = fixture.persisted();
    assert_eq!(state.cursor, 5);
    assert!(state.completed);
}

/// 進捗が変わらなければチェックポイントの出力は同一
#[tokio::test]
async fn test_checkpoint_is_idempotent() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(10, &[1, 4])));

    let handle: Arc<OnceLock<ScanOrchestrator>> = Arc::new(OnceLock::new());
    let snapshots: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let hook_handle = handle.clone();
    let hook_snapshots = snapshots.clone();
    let path = fixture.store.path().to_path_buf();
    let classifier = Arc::new(PixelClassifier::with_hook(move |call| {
        if call == 6 {
            let Some(orchestrator) = hook_handle.get() else { return };
            orchestrator.checkpoint().unwrap();
            hook_snapshots.lock().push(std::fs::read(&path).unwrap());
            orchestrator.checkpoint().unwrap();
            hook_snapshots.lock().push(std::fs::read(&path).unwrap());
        }
    }));
    let orchestrator = fixture.orchestrator(classifier);
    let _ = handle.set(orchestrator.clone());
    orchestrator.start(85).await.unwrap();

    let snapshots = snapshots.lock().clone();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0], snapshots[1]);

    let checkpointed: ScanState = serde_json::from_slice(&snapshots[0]).unwrap();
    assert_eq!(checkpointed.cursor, 6);
    assert_eq!(checkpointed.matched_count(), 2);
}

/// Idle 中のチェックポイントは何も書かない
#[tokio::test]
async fn test_checkpoint_when_idle() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&[90]));
    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));

    orchestrator.checkpoint().unwrap();
    assert!(fixture.store.load().is_none());
}

/// 実行中の多重起動は何もしない
#[tokio::test]
async fn test_second_run_is_rejected_while_running() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&[90, 90]));
    let (classifier, started) = StallingClassifier::new(0);
    let orchestrator = fixture.orchestrator(Arc::new(classifier));

    let running = orchestrator.clone();
    let task = tokio::spawn(async move { running.start(85).await });
    started.await.unwrap();

    assert!(orchestrator.is_running());
    assert_eq!(orchestrator.resume_or_start(85).await.unwrap(), ScanOutcome::AlreadyRunning);
    assert_eq!(orchestrator.start(85).await.unwrap(), ScanOutcome::AlreadyRunning);

    // ループを破棄すると Idle に戻る
    task.abort();
    let _ = task.await;
    assert!(!orchestrator.is_running());
    assert_eq!(fixture.persisted().cursor, 0);
}

/// 照会は保存内容を変更しない
#[tokio::test]
async fn test_queries_do_not_mutate() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&[90, 10, 90]));
    let mut seeded = ScanState::with_corpus(item_ids(3), 85);
    seeded.record(0, true);
    fixture.store.save(&seeded).unwrap();
    let before = std::fs::read(fixture.store.path()).unwrap();

    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));
    assert_eq!(orchestrator.selected_ids(), vec!["IMG_0000.jpg"]);
    assert!(!orchestrator.is_completed());
    let progress = orchestrator.progress();
    assert_eq!((progress.processed, progress.total, progress.matched), (1, 3, 1));
    assert!(!progress.running);

    assert_eq!(std::fs::read(fixture.store.path()).unwrap(), before);
}

/// 進捗は watch チャネルで配信される
#[tokio::test]
async fn test_progress_is_published() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(5, &[0, 1])));
    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));
    let receiver = orchestrator.subscribe();

    orchestrator.start(85).await.unwrap();

    let last = *receiver.borrow();
    assert_eq!(last.processed, 5);
    assert_eq!(last.total, 5);
    assert_eq!(last.matched, 2);
    assert!(!last.running);
}

/// 統計は弱参照。破棄されていても動作に影響しない
#[tokio::test]
async fn test_statistics_are_optional() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(TOTAL, &[])));

    let statistics = Arc::new(RecordingStatistics::default());
    let orchestrator = fixture.orchestrator(Arc::new(PixelClassifier::new()));
    let weak: Weak<dyn StatisticsSink> = Arc::downgrade(&statistics) as Weak<dyn StatisticsSink>;
    orchestrator.configure_statistics(weak);
    orchestrator.start(85).await.unwrap();

    assert_eq!(statistics.scans_started.load(Ordering::SeqCst), 1);
    assert_eq!(statistics.photos_scanned.load(Ordering::SeqCst), TOTAL);

    drop(statistics);
    let outcome = orchestrator.start(85).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Completed { matched: 0, total: TOTAL });
}

/// 100 を超えるしきい値は 100 として扱い、保存した状態が読めなくならない
#[tokio::test]
async fn test_threshold_above_max_is_clamped() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(TOTAL, &[7])));
    let classifier = Arc::new(PixelClassifier::new());
    let orchestrator = fixture.orchestrator(classifier.clone());

    let outcome = orchestrator.start(150).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Completed { matched: 0, total: TOTAL });

    let state = fixture.persisted();
    assert_eq!(state.threshold, 100);
    assert!(state.completed);
    assert!(orchestrator.is_completed());

    // 完了済みとして扱われ、再スキャンしない
    let again = orchestrator.resume_or_start(150).await.unwrap();
    assert_eq!(again, ScanOutcome::AlreadyCompleted { matched: 0 });
    assert_eq!(classifier.calls(), TOTAL);
}

/// ループ中に何度チェックポイントしても保存カーソルは後退しない
#[tokio::test]
async fn test_checkpoint_during_loop_tracks_cursor() {
    let fixture = Fixture::new(FakeLibrary::with_scores(&scores(TOTAL, &[2, 30])));

    let handle: Arc<OnceLock<ScanOrchestrator>> = Arc::new(OnceLock::new());
    let hook_handle = handle.clone();
    let peek_store = fixture.store.clone();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let classifier = Arc::new(PixelClassifier::with_hook(move |call| {
        let Some(orchestrator) = hook_handle.get() else { return };
        orchestrator.checkpoint().unwrap();
        // 書き込み中も作業コピーのロックは解放されている
        assert!(orchestrator.progress().running);
        sink.lock().push(peek_store.load().unwrap().cursor);
        assert_eq!(*sink.lock().last().unwrap(), call);
    }));
    let orchestrator = fixture.orchestrator(classifier);
    let _ = handle.set(orchestrator.clone());

    orchestrator.start(85).await.unwrap();

    let observed = observed.lock().clone();
    assert_eq!(observed.len(), TOTAL);
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert!(fixture.persisted().completed);
}
