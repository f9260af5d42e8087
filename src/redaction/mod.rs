//! テキスト墨消しと置き換え
//!
//! 元画像の削除は、置き換え画像の保存が確定した後にしか行わない。

mod compositor;

pub use compositor::{build_mask, composite, render_redacted};

use crate::library::PhotoLibrary;
use crate::ocr::{OcrError, TextRegionDetector};
use crate::statistics::StatisticsSink;
use image::DynamicImage;
use std::sync::{Arc, Weak};
use thiserror::Error;
use vault_scan_common::TextBox;

#[derive(Error, Debug)]
pub enum RedactionError {
    #[error("画像の読み込みに失敗: {0}")]
    LoadImageFailed(String),

    #[error("テキスト検出に失敗: {0}")]
    OcrFailed(String),

    #[error("墨消し画像の生成に失敗: {0}")]
    RenderFailed(String),

    #[error("墨消し画像の保存に失敗: {0}")]
    SaveFailed(String),

    /// 新しい画像は保存済み。元画像が残っている
    #[error("元画像の削除に失敗 (新しい画像: {new_id}): {reason}")]
    DeleteFailed { new_id: String, reason: String },

    #[error("画像内にテキストが見つかりません")]
    NoTextFound,
}

impl RedactionError {
    /// 置き換え画像が作成済みならそのID
    pub fn new_item_id(&self) -> Option<&str> {
        match self {
            RedactionError::DeleteFailed { new_id, .. } => Some(new_id),
            _ => None,
        }
    }
}

pub struct RedactionCompositor {
    library: Arc<dyn PhotoLibrary>,
    detector: TextRegionDetector,
    blur_radius: f32,
    statistics: Option<Weak<dyn StatisticsSink>>,
}

impl RedactionCompositor {
    pub fn new(library: Arc<dyn PhotoLibrary>, detector: TextRegionDetector, blur_radius: f32) -> Self {
        Self {
            library,
            detector,
            blur_radius,
            statistics: None,
        }
    }

    pub fn with_statistics(mut self, statistics: Weak<dyn StatisticsSink>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// 墨消し対象の領域を検出する（ライブラリには触れない）
    pub async fn detect(&self, image: &DynamicImage) -> Result<Vec<TextBox>, RedactionError> {
        let regions = match self.detector.detect_redaction_regions(image).await {
            Ok(regions) => regions,
            Err(OcrError::NoTextDetected) => Vec::new(),
            Err(e) => return Err(RedactionError::OcrFailed(e.to_string())),
        };
        if regions.is_empty() {
            return Err(RedactionError::NoTextFound);
        }
        Ok(regions)
    }

    /// 検出 + レンダリング
    pub async fn redact_image(&self, image: &DynamicImage) -> Result<DynamicImage, RedactionError> {
        let regions = self.detect(image).await?;
        tracing::debug!("墨消し領域: {}", regions.len());

        let image = image.clone();
        let blur_radius = self.blur_radius;
        tokio::task::spawn_blocking(move || render_redacted(&image, &regions, blur_radius))
            .await
            .map_err(|e| RedactionError::RenderFailed(e.to_string()))?
            .map_err(RedactionError::RenderFailed)
    }

    /// 墨消し画像を新規保存し、成功した場合のみ元画像を削除する
    ///
    /// 戻り値は新しい画像のID。削除だけ失敗した場合は DeleteFailed に新IDが入る。
    pub async fn redact_and_replace(&self, item_id: &str) -> Result<String, RedactionError> {
        let handle = self
            .library
            .fetch_by_id(item_id)
            .await
            .ok_or_else(|| RedactionError::LoadImageFailed(format!("見つかりません: {}", item_id)))?;

        let image = self
            .library
            .request_full_image(&handle)
            .await
            .map_err(|e| RedactionError::LoadImageFailed(e.to_string()))?;

        let redacted = self.redact_image(&image).await?;

        let new_id = self
            .library
            .save_new_image(&redacted)
            .await
            .map_err(|e| RedactionError::SaveFailed(e.to_string()))?;
        tracing::info!("墨消し画像を保存: {}", new_id);

        if let Err(e) = self.library.delete_item(item_id).await {
            tracing::warn!("元画像 {} の削除に失敗: {}", item_id, e);
            return Err(RedactionError::DeleteFailed {
                new_id,
                reason: e.to_string(),
            });
        }

        if let Some(statistics) = self.statistics.as_ref().and_then(Weak::upgrade) {
            statistics.record_photo_redacted();
        }
        tracing::info!("置き換え完了: {} -> {}", item_id, new_id);
        Ok(new_id)
    }
}
