//! 画像分類アダプタ
//!
//! confidence(image) -> 0..=100 のみを公開する。
//! 実装（外部モデル / スタブ）は構築時に一度だけ選び、呼び出し側は区別しない。

mod command;
mod stub;

pub use command::CommandClassifier;
pub use stub::StubClassifier;

use crate::config::ClassifierConfig;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("画像のデコードに失敗: {0}")]
    Decode(String),

    #[error("推論に失敗: {0}")]
    Inference(String),

    #[error("スコアが不正: {0}")]
    InvalidScore(String),

    #[error("推論がタイムアウト ({0}秒)")]
    Timeout(u64),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// 0..=100 の信頼度
    async fn confidence(&self, image: &DynamicImage) -> Result<u8, ClassificationError>;
}

/// 設定から分類器を構築する
///
/// 外部モデルが見つからない場合は乱数スタブに切り替える。
pub fn build_classifier(config: &ClassifierConfig, timeout: Duration) -> Arc<dyn Classifier> {
    match config {
        ClassifierConfig::Command { program, args } => {
            match CommandClassifier::locate(program, args.clone(), timeout) {
                Some(classifier) => {
                    tracing::info!("分類モデル: {}", program);
                    Arc::new(classifier)
                }
                None => {
                    tracing::warn!("分類モデル {} が見つかりません。スタブ分類器を使用します", program);
                    Arc::new(StubClassifier::random())
                }
            }
        }
        ClassifierConfig::Stub { score: Some(score) } => Arc::new(StubClassifier::fixed(*score)),
        ClassifierConfig::Stub { score: None } => Arc::new(StubClassifier::random()),
    }
}

/// モデル出力をスコアへ変換
///
/// 整数 0-100 はそのまま、小数 0.0-1.0 は確率として 100 倍し切り捨てる。
pub fn parse_score(output: &str) -> Result<u8, ClassificationError> {
    let token = output
        .split_whitespace()
        .next()
        .ok_or_else(|| ClassificationError::InvalidScore("空の出力".into()))?;

    if let Ok(value) = token.parse::<u8>() {
        return if value <= 100 {
            Ok(value)
        } else {
            Err(ClassificationError::InvalidScore(token.to_string()))
        };
    }

    let value: f64 = token
        .parse()
        .map_err(|_| ClassificationError::InvalidScore(token.to_string()))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ClassificationError::InvalidScore(token.to_string()));
    }
    Ok((value * 100.0) as u8)
}
