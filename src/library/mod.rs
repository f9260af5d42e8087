//! 写真ライブラリへのアクセス
//!
//! スキャンと墨消しはこのトレイト越しにライブラリを扱う。
//! 実装はフォルダベースの FolderLibrary。

mod exif;
mod folder;

pub use folder::FolderLibrary;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("アイテムが見つかりません: {0}")]
    NotFound(String),

    #[error("画像読み込みエラー: {0}")]
    ImageLoad(String),

    #[error("画像保存エラー: {0}")]
    Save(String),

    #[error("削除エラー: {0}")]
    Delete(String),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

/// ライブラリ内アイテムへのハンドル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemHandle {
    pub id: String,
    pub captured_at: Option<NaiveDateTime>,
}

impl ItemHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            captured_at: None,
        }
    }
}

#[async_trait]
pub trait PhotoLibrary: Send + Sync {
    /// アクセス許可を要求（必要なら対話的に）
    async fn request_access(&self) -> bool {
        self.is_authorized()
    }

    fn is_authorized(&self) -> bool;

    /// 全画像のID（撮影日時の降順）
    async fn fetch_all_image_ids(&self) -> Result<Vec<String>, LibraryError>;

    async fn fetch_by_id(&self, id: &str) -> Option<ItemHandle>;

    /// 長辺 max_size 以下に縮小した画像
    async fn request_downscaled_image(
        &self,
        handle: &ItemHandle,
        max_size: u32,
    ) -> Result<DynamicImage, LibraryError>;

    async fn request_full_image(&self, handle: &ItemHandle) -> Result<DynamicImage, LibraryError>;

    /// 新規アイテムとして保存し、そのIDを返す
    async fn save_new_image(&self, image: &DynamicImage) -> Result<String, LibraryError>;

    async fn delete_item(&self, id: &str) -> Result<(), LibraryError>;
}
