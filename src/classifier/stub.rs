use super::{ClassificationError, Classifier};
use async_trait::async_trait;
use image::DynamicImage;
use rand::Rng;

/// モデルのない環境向けの分類器
#[derive(Debug, Clone, Copy)]
pub enum StubClassifier {
    Fixed(u8),
    Random,
}

impl StubClassifier {
    pub fn fixed(score: u8) -> Self {
        StubClassifier::Fixed(score.min(100))
    }

    pub fn random() -> Self {
        StubClassifier::Random
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn confidence(&self, _image: &DynamicImage) -> Result<u8, ClassificationError> {
        Ok(match self {
            StubClassifier::Fixed(score) => *score,
            StubClassifier::Random => rand::thread_rng().gen_range(0..=100),
        })
    }
}
