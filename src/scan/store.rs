//! スキャン状態の永続化
//!
//! ライブラリのルートごとに1ファイル。読めない・壊れている・不変条件を
//! 満たさないファイルは「存在しない」ものとして扱う。

use crate::error::{Result, VaultScanError};
use crate::persist;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use vault_scan_common::{ScanState, MAX_THRESHOLD};

pub const STATE_FILE_NAME: &str = "ScanState.json";

#[derive(Debug, Clone)]
pub struct ScanStateStore {
    path: PathBuf,
}

impl ScanStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<state_dir>/<ルートのハッシュ>/ScanState.json`
    pub fn for_library(state_dir: &Path, library_root: &Path) -> Self {
        let root = library_root
            .canonicalize()
            .unwrap_or_else(|_| library_root.to_path_buf());
        let digest = hex::encode(Sha256::digest(root.to_string_lossy().as_bytes()));
        Self::new(state_dir.join(&digest[..16]).join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保存済みの状態をそのまま読む（しきい値の扱いなし）
    pub fn load(&self) -> Option<ScanState> {
        let state: ScanState = persist::read_json(&self.path)?;
        if !state.is_consistent() {
            tracing::warn!("スキャン状態が不整合のため破棄します: {}", self.path.display());
            return None;
        }
        Some(state)
    }

    /// 保存済みの状態を読み込む。なければ新規作成
    ///
    /// 保存時と異なるしきい値が指定された場合は進捗をすべてリセットする。
    /// コーパスのスナップショットだけは残す。
    pub fn load_or_create(&self, threshold: u8) -> ScanState {
        let threshold = threshold.min(MAX_THRESHOLD);
        match self.load() {
            None => ScanState::new(threshold),
            Some(state) if state.threshold == threshold => state,
            Some(mut state) => {
                tracing::info!(
                    "しきい値が変更されました ({} -> {})。進捗をリセットします",
                    state.threshold,
                    threshold
                );
                state.reset_progress(threshold);
                state
            }
        }
    }

    /// 全体を一時ファイル経由で置き換える
    pub fn save(&self, state: &ScanState) -> Result<()> {
        persist::write_json_atomic(&self.path, state)
            .map_err(|e| VaultScanError::StateSave(format!("{}: {}", self.path.display(), e)))
    }

    pub fn reset(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultScanError::StateSave(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
