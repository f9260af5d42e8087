use super::exif;
use super::{ItemHandle, LibraryError, PhotoLibrary};
use crate::error::{Result, VaultScanError};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "JPG", "JPEG", "PNG"];

const REDACTED_PREFIX: &str = "redacted-";

/// ディレクトリを写真ライブラリとして扱う
///
/// アイテムIDはルートからの相対パス（区切りは '/'）。
#[derive(Debug, Clone)]
pub struct FolderLibrary {
    root: PathBuf,
    recursive: bool,
}

impl FolderLibrary {
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(VaultScanError::FolderNotFound(root.display().to_string()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            recursive: false,
        })
    }

    /// サブフォルダも再帰的に扱う
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// ID → 実パス（ルート外を指すIDは拒否）
    pub fn resolve(&self, id: &str) -> Option<PathBuf> {
        let relative = Path::new(id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if id.is_empty() || escapes {
            return None;
        }
        let path = self.root.join(relative);
        path.is_file().then_some(path)
    }

    fn id_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }

    fn scan_entries(&self) -> Vec<(String, NaiveDateTime)> {
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_image_path(path) {
                continue;
            }
            let Some(id) = self.id_for(path) else {
                continue;
            };
            let captured = exif::extract_capture_time(path)
                .or_else(|| modified_time(path))
                .unwrap_or_default();
            entries.push((id, captured));
        }

        // 撮影日時の降順、同時刻はID順
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    fn unused_name(&self, digest: &str) -> PathBuf {
        let short = &digest[..12.min(digest.len())];
        let mut candidate = self.root.join(format!("{}{}.png", REDACTED_PREFIX, short));
        let mut counter = 1;
        while candidate.exists() {
            candidate = self
                .root
                .join(format!("{}{}-{}.png", REDACTED_PREFIX, short, counter));
            counter += 1;
        }
        candidate
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext_str = ext.to_string_lossy();
            IMAGE_EXTENSIONS.iter().any(|&e| e == ext_str)
        })
        .unwrap_or(false)
}

fn modified_time(path: &Path) -> Option<NaiveDateTime> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified).naive_local())
}

async fn decode_blocking(path: PathBuf) -> std::result::Result<DynamicImage, LibraryError> {
    tokio::task::spawn_blocking(move || {
        image::open(&path).map_err(|e| LibraryError::ImageLoad(format!("{}: {}", path.display(), e)))
    })
    .await
    .map_err(|e| LibraryError::ImageLoad(e.to_string()))?
}

#[async_trait]
impl PhotoLibrary for FolderLibrary {
    fn is_authorized(&self) -> bool {
        std::fs::read_dir(&self.root).is_ok()
    }

    async fn fetch_all_image_ids(&self) -> std::result::Result<Vec<String>, LibraryError> {
        let library = self.clone();
        let entries = tokio::task::spawn_blocking(move || library.scan_entries())
            .await
            .map_err(|e| LibraryError::Io(std::io::Error::other(e.to_string())))?;
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }

    async fn fetch_by_id(&self, id: &str) -> Option<ItemHandle> {
        let path = self.resolve(id)?;
        Some(ItemHandle {
            id: id.to_string(),
            captured_at: exif::extract_capture_time(&path).or_else(|| modified_time(&path)),
        })
    }

    async fn request_downscaled_image(
        &self,
        handle: &ItemHandle,
        max_size: u32,
    ) -> std::result::Result<DynamicImage, LibraryError> {
        let path = self
            .resolve(&handle.id)
            .ok_or_else(|| LibraryError::NotFound(handle.id.clone()))?;
        let image = decode_blocking(path).await?;

        if image.width() <= max_size && image.height() <= max_size {
            return Ok(image);
        }
        tokio::task::spawn_blocking(move || image.thumbnail(max_size, max_size))
            .await
            .map_err(|e| LibraryError::ImageLoad(e.to_string()))
    }

    async fn request_full_image(
        &self,
        handle: &ItemHandle,
    ) -> std::result::Result<DynamicImage, LibraryError> {
        let path = self
            .resolve(&handle.id)
            .ok_or_else(|| LibraryError::NotFound(handle.id.clone()))?;
        decode_blocking(path).await
    }

    async fn save_new_image(&self, image: &DynamicImage) -> std::result::Result<String, LibraryError> {
        let image = image.clone();
        let png = tokio::task::spawn_blocking(move || {
            let mut bytes = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .map(|_| bytes)
        })
        .await
        .map_err(|e| LibraryError::Save(e.to_string()))?
        .map_err(|e| LibraryError::Save(e.to_string()))?;

        let digest = hex::encode(Sha256::digest(&png));
        let target = self.unused_name(&digest);

        let mut temp = NamedTempFile::new_in(&self.root)?;
        temp.write_all(&png)?;
        temp.as_file().sync_all()?;
        temp.persist_noclobber(&target)
            .map_err(|e| LibraryError::Save(format!("{}: {}", target.display(), e.error)))?;

        self.id_for(&target)
            .ok_or_else(|| LibraryError::Save(target.display().to_string()))
    }

    async fn delete_item(&self, id: &str) -> std::result::Result<(), LibraryError> {
        let path = self
            .resolve(id)
            .ok_or_else(|| LibraryError::NotFound(id.to_string()))?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| LibraryError::Delete(format!("{}: {}", path.display(), e)))
    }
}
