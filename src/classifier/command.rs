//! 外部モデル実行ファイルによる分類
//!
//! 画像を一時PNGに書き出し、`program [args...] <png>` を実行して
//! 標準出力の先頭トークンをスコアとして読む。

use super::{parse_score, ClassificationError, Classifier};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(program: PathBuf, args: Vec<String>, timeout: Duration) -> Self {
        Self { program, args, timeout }
    }

    /// PATH 上でプログラムを探す。見つからなければ None
    pub fn locate(program: &str, args: Vec<String>, timeout: Duration) -> Option<Self> {
        find_program(program).map(|path| Self::new(path, args, timeout))
    }

    async fn run(&self, image_path: &Path) -> Result<String, ClassificationError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ClassificationError::Inference(format!("モデル実行エラー: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClassificationError::Inference(format!(
                "model failed (code {:?}): {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    async fn confidence(&self, image: &DynamicImage) -> Result<u8, ClassificationError> {
        let image = image.clone();
        let temp = tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile, String> {
            let mut temp = tempfile::Builder::new()
                .prefix("vault-scan-")
                .suffix(".png")
                .tempfile()
                .map_err(|e| e.to_string())?;
            image
                .write_to(temp.as_file_mut(), ImageFormat::Png)
                .map_err(|e| e.to_string())?;
            Ok(temp)
        })
        .await
        .map_err(|e| ClassificationError::Decode(e.to_string()))?
        .map_err(ClassificationError::Decode)?;

        let stdout = self.run(temp.path()).await?;
        let score = parse_score(&stdout)?;
        tracing::debug!("classifier score: {}", score);
        Ok(score)
    }
}

fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
