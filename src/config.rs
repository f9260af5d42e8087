use crate::error::{Result, VaultScanError};
use crate::persist;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use vault_scan_common::DEFAULT_THRESHOLD;

/// 分類器の選択（起動時に一度だけ決定）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClassifierConfig {
    /// 外部モデル実行ファイル（画像パスを受け取りスコアを出力）
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// モデルなし環境向け。score 省略時は 0-100 の乱数
    Stub {
        #[serde(default)]
        score: Option<u8>,
    },
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig::Stub { score: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub program: String,
    pub language: Option<String>,
    /// これ未満の信頼度（0-100）の単語は捨てる
    pub min_confidence: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            program: "tesseract".into(),
            language: None,
            min_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    /// テキスト領域の外側に足す余白（px）
    pub padding: f64,
    pub blur_radius: f32,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            padding: 6.0,
            blur_radius: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub earliest_start_secs: u64,
    /// バックグラウンド実行1回あたりの持ち時間
    pub budget_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            earliest_start_secs: 30,
            budget_secs: 300,
        }
    }
}

impl BackgroundConfig {
    pub fn earliest_start(&self) -> Duration {
        Duration::from_secs(self.earliest_start_secs)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub threshold: u8,
    pub batch_size: usize,
    pub max_image_size: u32,
    pub timeout_seconds: u64,
    pub state_dir: Option<PathBuf>,
    pub classifier: ClassifierConfig,
    pub ocr: OcrConfig,
    pub redaction: RedactionConfig,
    pub background: BackgroundConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            batch_size: 20,
            max_image_size: 1024,
            timeout_seconds: 120,
            state_dir: None,
            classifier: ClassifierConfig::default(),
            ocr: OcrConfig::default(),
            redaction: RedactionConfig::default(),
            background: BackgroundConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        persist::write_json_atomic(&config_path, self)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| VaultScanError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("vault-scan").join("config.json"))
    }

    /// スキャン状態・統計の保存先
    pub fn state_dir(&self) -> Result<PathBuf> {
        // 環境変数を優先
        if let Ok(dir) = std::env::var("VAULT_SCAN_STATE_DIR") {
            return Ok(PathBuf::from(dir));
        }

        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }

        dirs::data_dir()
            .map(|d| d.join("vault-scan"))
            .ok_or_else(|| VaultScanError::Config("データディレクトリが見つかりません".into()))
    }

    pub fn set_threshold(&mut self, threshold: i64) -> Result<()> {
        self.threshold = vault_scan_common::validate_threshold(threshold)?;
        self.save()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        vault_scan_common::validate_threshold(self.threshold as i64)?;
        if self.batch_size == 0 {
            return Err(VaultScanError::Config("batch_size は1以上".into()));
        }
        if self.max_image_size == 0 {
            return Err(VaultScanError::Config("max_image_size は1以上".into()));
        }
        Ok(())
    }
}
