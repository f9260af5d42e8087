//! テキスト領域検出
//!
//! OCRエンジン本体は TextRecognizer の向こう側（既定は tesseract）。
//! ここでは2つの使い方を提供する:
//! - 領域指定OCR: 領域ごとにテキストを抽出し TextSegment を返す
//! - 墨消し用の全体OCR: ピクセル座標のパディング済みボックスを返す

mod tesseract;

pub use tesseract::{parse_tesseract_tsv, TesseractRecognizer};

use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;
use vault_scan_common::{
    merge_boxes, sanitize, DetectedRegion, NormalizedRect, TextBox, TextSegment,
};

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("画像の変換に失敗: {0}")]
    ImageConversion(String),

    #[error("テキストが検出されませんでした")]
    NoTextDetected,

    #[error("OCRエンジンエラー: {0}")]
    Engine(String),
}

/// 認識された1行
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedLine {
    pub text: String,
    /// 画像全体に対する正規化座標（原点左上）
    pub bounds: NormalizedRect,
    /// 0..100
    pub confidence: f32,
}

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// region 指定時はその範囲だけを認識する
    async fn recognize(
        &self,
        image: &DynamicImage,
        region: Option<NormalizedRect>,
    ) -> Result<Vec<RecognizedLine>, OcrError>;
}

#[derive(Clone)]
pub struct TextRegionDetector {
    recognizer: Arc<dyn TextRecognizer>,
    padding: f64,
}

impl TextRegionDetector {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, padding: f64) -> Self {
        Self { recognizer, padding }
    }

    pub fn padding(&self) -> f64 {
        self.padding
    }

    /// 領域ごとにOCRし、テキストが得られた領域だけ返す
    pub async fn extract_segments(
        &self,
        image: &DynamicImage,
        regions: &[DetectedRegion],
    ) -> Result<Vec<TextSegment>, OcrError> {
        let mut collected = Vec::new();

        for region in regions {
            let rect = region.normalized_rect.clamped();
            if rect.is_empty() {
                continue;
            }

            let lines = self.recognizer.recognize(image, Some(rect)).await?;
            let raw_text = lines
                .iter()
                .map(|line| line.text.as_str())
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();

            if raw_text.is_empty() {
                continue;
            }

            tracing::debug!("region {}: {} lines", region.id, lines.len());
            collected.push(TextSegment {
                region_id: region.id.clone(),
                sanitized_text: sanitize(&raw_text),
                raw_text,
            });
        }

        if collected.is_empty() {
            return Err(OcrError::NoTextDetected);
        }
        Ok(collected)
    }

    /// 全体OCR → ピクセル座標 + パディング（画像範囲に切り詰め）
    pub async fn detect_text_boxes(&self, image: &DynamicImage) -> Result<Vec<TextBox>, OcrError> {
        let (width, height) = (image.width(), image.height());
        let lines = self.recognizer.recognize(image, None).await?;

        Ok(lines
            .iter()
            .map(|line| line.bounds.clamped().to_pixels(width, height))
            .filter(|rect| !rect.is_empty())
            .map(|rect| TextBox::padded(rect, self.padding, width, height))
            .collect())
    }

    /// 墨消し対象の最終領域（検出 + マージ）
    pub async fn detect_redaction_regions(
        &self,
        image: &DynamicImage,
    ) -> Result<Vec<TextBox>, OcrError> {
        let boxes = self.detect_text_boxes(image).await?;
        let merged = merge_boxes(&boxes, self.padding);
        tracing::debug!("text boxes: {} -> merged {}", boxes.len(), merged.len());
        Ok(merged)
    }
}
