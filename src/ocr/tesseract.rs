use super::{OcrError, RecognizedLine, TextRecognizer};
use crate::config::OcrConfig;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use tokio::process::Command;
use vault_scan_common::{NormalizedRect, PixelRect};

/// tesseract TSV の1単語
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
    pub text: String,
    pub confidence: f32,
    pub rect: PixelRect,
}

/// `tesseract <png> stdout tsv` による認識
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    program: String,
    language: Option<String>,
    min_confidence: f32,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.program.clone(),
            language: config.language.clone(),
            min_confidence: config.min_confidence,
        }
    }

    async fn run_output(&self, image_path: &Path) -> Result<String, OcrError> {
        let mut command = Command::new(&self.program);
        command.arg(image_path).args(["stdout", "tsv"]);
        if let Some(language) = &self.language {
            command.args(["-l", language]);
        }

        let output = command
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OcrError::Engine(format!("{} を起動できません: {}", self.program, e)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }
        Err(OcrError::Engine(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(
        &self,
        image: &DynamicImage,
        region: Option<NormalizedRect>,
    ) -> Result<Vec<RecognizedLine>, OcrError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(OcrError::ImageConversion("画像サイズが0です".into()));
        }

        let crop = region.map(|r| crop_bounds(r, width, height));
        if matches!(crop, Some((_, _, w, h)) if w == 0 || h == 0) {
            return Ok(Vec::new());
        }

        let image = image.clone();
        let temp = tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile, String> {
            let target = match crop {
                Some((x, y, w, h)) => image.crop_imm(x, y, w, h),
                None => image,
            };
            let mut temp = tempfile::Builder::new()
                .prefix("vault-scan-ocr-")
                .suffix(".png")
                .tempfile()
                .map_err(|e| e.to_string())?;
            target
                .write_to(temp.as_file_mut(), ImageFormat::Png)
                .map_err(|e| e.to_string())?;
            Ok(temp)
        })
        .await
        .map_err(|e| OcrError::ImageConversion(e.to_string()))?
        .map_err(OcrError::ImageConversion)?;

        let tsv = self.run_output(temp.path()).await?;
        let words: Vec<OcrWord> = parse_tesseract_tsv(&tsv)
            .into_iter()
            .filter(|w| w.confidence >= self.min_confidence)
            .collect();

        let (offset_x, offset_y) = crop.map(|(x, y, _, _)| (x as f64, y as f64)).unwrap_or((0.0, 0.0));
        let lines = group_lines(&words)
            .into_iter()
            .map(|(text, rect, confidence)| RecognizedLine {
                text,
                bounds: NormalizedRect::new(
                    (rect.x + offset_x) / width as f64,
                    (rect.y + offset_y) / height as f64,
                    rect.width / width as f64,
                    rect.height / height as f64,
                ),
                confidence,
            })
            .collect::<Vec<_>>();

        tracing::debug!("tesseract: {} words, {} lines", words.len(), lines.len());
        Ok(lines)
    }
}

/// 正規化領域 → 切り出し範囲 (x, y, w, h)
fn crop_bounds(region: NormalizedRect, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let rect = region.clamped().to_pixels(width, height);
    let x = (rect.min_x().floor() as u32).min(width);
    let y = (rect.min_y().floor() as u32).min(height);
    let max_x = (rect.max_x().ceil() as u32).min(width);
    let max_y = (rect.max_y().ceil() as u32).min(height);
    (x, y, max_x.saturating_sub(x), max_y.saturating_sub(y))
}

/// TSV出力から単語行だけを取り出す
///
/// 列: level page block par line word left top width height conf text
pub fn parse_tesseract_tsv(tsv: &str) -> Vec<OcrWord> {
    let mut words = Vec::new();
    for (idx, line) in tsv.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let confidence = cols[10].parse::<f32>().unwrap_or(-1.0);
        if confidence < 0.0 {
            continue;
        }
        let left = cols[6].parse::<i64>().unwrap_or(-1);
        let top = cols[7].parse::<i64>().unwrap_or(-1);
        let width = cols[8].parse::<i64>().unwrap_or(0);
        let height = cols[9].parse::<i64>().unwrap_or(0);
        if left < 0 || top < 0 || width <= 0 || height <= 0 {
            continue;
        }
        let number = |i: usize| cols[i].parse::<u32>().unwrap_or(0);

        words.push(OcrWord {
            block: number(2),
            paragraph: number(3),
            line: number(4),
            text: text.to_string(),
            confidence,
            rect: PixelRect::new(left as f64, top as f64, width as f64, height as f64),
        });
    }
    words
}

/// (block, par, line) ごとに単語をまとめ、外接矩形と平均信頼度を求める
fn group_lines(words: &[OcrWord]) -> Vec<(String, PixelRect, f32)> {
    let mut groups: Vec<((u32, u32, u32), Vec<&OcrWord>)> = Vec::new();
    for word in words {
        let key = (word.block, word.paragraph, word.line);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(word),
            None => groups.push((key, vec![word])),
        }
    }

    groups
        .into_iter()
        .filter_map(|(_, members)| {
            let first = members.first()?;
            let rect = members
                .iter()
                .skip(1)
                .fold(first.rect, |acc, w| acc.union(&w.rect));
            let text = members
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let confidence =
                members.iter().map(|w| w.confidence).sum::<f32>() / members.len() as f32;
            Some((text, rect, confidence))
        })
        .collect()
}
