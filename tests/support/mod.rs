//! 統合テスト用のフェイク実装
//!
//! 画像は 1x1 で、赤チャンネルにスコアを埋め込む。
//! 255 は分類失敗として扱う。

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use vault_scan::classifier::{ClassificationError, Classifier};
use vault_scan::library::{ItemHandle, LibraryError, PhotoLibrary};
use vault_scan::notify::Notifier;
use vault_scan::ocr::{OcrError, RecognizedLine, TextRecognizer};
use vault_scan::scan::{
    BackgroundTask, HostScheduler, SchedulerError, TaskCompletion, TaskHandler, TaskRequest,
};
use vault_scan::statistics::StatisticsSink;
use vault_scan_common::NormalizedRect;

pub const FAILING_SCORE: u8 = 255;

pub fn score_image(score: u8) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([score, 0, 0, 255])))
}

pub fn item_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("IMG_{:04}.jpg", i)).collect()
}

/// メモリ上の写真ライブラリ
#[derive(Default)]
pub struct FakeLibrary {
    pub denied: bool,
    order: Mutex<Vec<String>>,
    images: Mutex<HashMap<String, DynamicImage>>,
    /// ID一覧には出るが fetch_by_id で見つからない
    pub missing: HashSet<String>,
    /// 読み込みに失敗する
    pub broken: HashSet<String>,
    pub fail_save: bool,
    pub fail_delete: bool,
    /// 呼び出し履歴（"load:", "save:", "delete:"）
    pub events: Mutex<Vec<String>>,
    saved: AtomicUsize,
}

impl FakeLibrary {
    /// 各アイテムのスコアを指定して作成
    pub fn with_scores(scores: &[u8]) -> Self {
        let library = Self::default();
        for (id, score) in item_ids(scores.len()).into_iter().zip(scores) {
            library.insert(&id, score_image(*score));
        }
        library
    }

    pub fn insert(&self, id: &str, image: DynamicImage) {
        self.order.lock().push(id.to_string());
        self.images.lock().insert(id.to_string(), image);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.images.lock().contains_key(id)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// 分類用に読み込まれたID（順番どおり）
    pub fn loaded(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("load:").map(str::to_string))
            .collect()
    }

    pub fn image(&self, id: &str) -> Option<DynamicImage> {
        self.images.lock().get(id).cloned()
    }
}

#[async_trait]
impl PhotoLibrary for FakeLibrary {
    fn is_authorized(&self) -> bool {
        !self.denied
    }

    async fn fetch_all_image_ids(&self) -> Result<Vec<String>, LibraryError> {
        Ok(self.order.lock().clone())
    }

    async fn fetch_by_id(&self, id: &str) -> Option<ItemHandle> {
        if self.missing.contains(id) || !self.contains(id) {
            return None;
        }
        Some(ItemHandle::new(id))
    }

    async fn request_downscaled_image(
        &self,
        handle: &ItemHandle,
        _max_size: u32,
    ) -> Result<DynamicImage, LibraryError> {
        self.events.lock().push(format!("load:{}", handle.id));
        if self.broken.contains(&handle.id) {
            return Err(LibraryError::ImageLoad(handle.id.clone()));
        }
        self.image(&handle.id)
            .ok_or_else(|| LibraryError::NotFound(handle.id.clone()))
    }

    async fn request_full_image(&self, handle: &ItemHandle) -> Result<DynamicImage, LibraryError> {
        self.events.lock().push(format!("full:{}", handle.id));
        if self.broken.contains(&handle.id) {
            return Err(LibraryError::ImageLoad(handle.id.clone()));
        }
        self.image(&handle.id)
            .ok_or_else(|| LibraryError::NotFound(handle.id.clone()))
    }

    async fn save_new_image(&self, image: &DynamicImage) -> Result<String, LibraryError> {
        if self.fail_save {
            self.events.lock().push("save:failed".into());
            return Err(LibraryError::Save("disk full".into()));
        }
        let id = format!("redacted-{}.png", self.saved.fetch_add(1, Ordering::SeqCst));
        self.events.lock().push(format!("save:{}", id));
        self.insert(&id, image.clone());
        Ok(id)
    }

    async fn delete_item(&self, id: &str) -> Result<(), LibraryError> {
        self.events.lock().push(format!("delete:{}", id));
        if self.fail_delete {
            return Err(LibraryError::Delete("read-only".into()));
        }
        self.order.lock().retain(|existing| existing != id);
        self.images
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))
    }
}

type ClassifyHook = Box<dyn Fn(usize) + Send + Sync>;

/// 画像の赤チャンネルをスコアとして返す
#[derive(Default)]
pub struct PixelClassifier {
    calls: AtomicUsize,
    /// 分類のたびに呼び出し回数（0始まり）を渡す
    hook: Option<ClassifyHook>,
}

impl PixelClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            hook: Some(Box::new(hook)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for PixelClassifier {
    async fn confidence(&self, image: &DynamicImage) -> Result<u8, ClassificationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook(call);
        }
        let score = image.to_rgba8().get_pixel(0, 0)[0];
        if score == FAILING_SCORE {
            return Err(ClassificationError::Inference("model crashed".into()));
        }
        Ok(score.min(100))
    }
}

/// after 件までは通常どおり分類し、その後は止まる（期限切れのテスト用）
pub struct StallingClassifier {
    after: usize,
    calls: AtomicUsize,
    started: Mutex<Option<oneshot::Sender<()>>>,
}

impl StallingClassifier {
    pub fn new(after: usize) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                after,
                calls: AtomicUsize::new(0),
                started: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl Classifier for StallingClassifier {
    async fn confidence(&self, image: &DynamicImage) -> Result<u8, ClassificationError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.after {
            return Ok(image.to_rgba8().get_pixel(0, 0)[0].min(100));
        }
        let stalled = self.started.lock().take();
        if let Some(tx) = stalled {
            let _ = tx.send(());
        }
        std::future::pending::<()>().await;
        Ok(0)
    }
}

/// 1件ごとに待つ分類器
pub struct SlowClassifier {
    pub delay: std::time::Duration,
    pub calls: AtomicUsize,
}

impl SlowClassifier {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Classifier for SlowClassifier {
    async fn confidence(&self, image: &DynamicImage) -> Result<u8, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(image.to_rgba8().get_pixel(0, 0)[0].min(100))
    }
}

/// 決まった行を返すOCR
#[derive(Default)]
pub struct FakeRecognizer {
    pub lines: Vec<RecognizedLine>,
    pub fail: bool,
}

impl FakeRecognizer {
    pub fn with_boxes(boxes: &[(f64, f64, f64, f64)]) -> Self {
        Self {
            lines: boxes
                .iter()
                .map(|&(x, y, w, h)| RecognizedLine {
                    text: "secret".into(),
                    bounds: NormalizedRect::new(x, y, w, h),
                    confidence: 95.0,
                })
                .collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            lines: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(
        &self,
        _image: &DynamicImage,
        _region: Option<NormalizedRect>,
    ) -> Result<Vec<RecognizedLine>, OcrError> {
        if self.fail {
            return Err(OcrError::Engine("engine crashed".into()));
        }
        Ok(self.lines.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub completions: Mutex<Vec<usize>>,
}

impl Notifier for RecordingNotifier {
    fn send_completion(&self, matched: usize) {
        self.completions.lock().push(matched);
    }
}

#[derive(Default)]
pub struct RecordingStatistics {
    pub scans_started: AtomicUsize,
    pub photos_scanned: AtomicUsize,
    pub photos_redacted: AtomicUsize,
}

impl StatisticsSink for RecordingStatistics {
    fn record_scan_started(&self) {
        self.scans_started.fetch_add(1, Ordering::SeqCst);
    }

    fn record_photos_scanned(&self, count: usize) {
        self.photos_scanned.fetch_add(count, Ordering::SeqCst);
    }

    fn record_photo_redacted(&self) {
        self.photos_redacted.fetch_add(1, Ordering::SeqCst);
    }
}

/// 手動で発火させるホストスケジューラ
#[derive(Default)]
pub struct ManualScheduler {
    handlers: Mutex<HashMap<String, TaskHandler>>,
    pub submitted: Mutex<Vec<TaskRequest>>,
    pub cancelled: Mutex<Vec<String>>,
    pub reject: bool,
}

/// 発火したタスクのホスト側
pub struct FiredTask {
    pub expire: oneshot::Sender<()>,
    pub done: oneshot::Receiver<bool>,
}

impl ManualScheduler {
    pub fn submissions(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn fire(&self, identifier: &str) -> Option<FiredTask> {
        let handler = self.handlers.lock().get(identifier).cloned()?;
        let (expire, expiration) = oneshot::channel();
        let (completion, done) = oneshot::channel();
        handler(BackgroundTask {
            identifier: identifier.to_string(),
            expiration,
            completion: TaskCompletion::new(completion),
        });
        Some(FiredTask { expire, done })
    }
}

impl HostScheduler for ManualScheduler {
    fn register(&self, identifier: &str, handler: TaskHandler) -> Result<(), SchedulerError> {
        self.handlers.lock().insert(identifier.to_string(), handler);
        Ok(())
    }

    fn submit(&self, request: TaskRequest) -> Result<(), SchedulerError> {
        if self.reject {
            return Err(SchedulerError::Unavailable);
        }
        self.submitted.lock().push(request);
        Ok(())
    }

    fn cancel(&self, identifier: &str) {
        self.cancelled.lock().push(identifier.to_string());
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
