use crate::classifier::ClassificationError;
use crate::library::LibraryError;
use crate::ocr::OcrError;
use crate::redaction::RedactionError;
use crate::scan::SchedulerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultScanError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("フォルダが見つかりません: {0}")]
    FolderNotFound(String),

    #[error("写真ライブラリへのアクセスが許可されていません")]
    PermissionDenied,

    #[error("スキャン対象の画像が見つかりません")]
    EmptyCorpus,

    #[error("アイテムが見つかりません: {0}")]
    ItemNotFound(String),

    #[error("状態の保存に失敗: {0}")]
    StateSave(String),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Redaction(#[from] RedactionError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Common(#[from] vault_scan_common::Error),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VaultScanError>;
