//! スキャン状態・検出結果の型定義
//!
//! - ScanState: 永続化されるスキャン進捗
//! - DetectedRegion: 外部検出器が出力する正規化領域
//! - TextSegment: 領域ごとのOCR結果

use crate::geometry::NormalizedRect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 既定の信頼度しきい値
pub const DEFAULT_THRESHOLD: u8 = 85;

/// しきい値の上限
pub const MAX_THRESHOLD: u8 = 100;

/// スキャン進捗（単一インスタンスとして永続化）
///
/// matched_ids は BTreeSet なので、同じ内容は常に同じバイト列に直列化される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    /// スキャン開始時に確定したコーパスのスナップショット
    #[serde(rename = "itemIDs")]
    pub item_ids: Vec<String>,

    /// 次に処理するインデックス
    pub cursor: usize,

    /// しきい値を超えたアイテム
    #[serde(rename = "matchedIDs")]
    pub matched_ids: BTreeSet<String>,

    pub threshold: u8,

    pub completed: bool,
}

impl ScanState {
    /// 空の状態
    pub fn new(threshold: u8) -> Self {
        Self {
            item_ids: Vec::new(),
            cursor: 0,
            matched_ids: BTreeSet::new(),
            threshold,
            completed: false,
        }
    }

    /// コーパスを指定して新規スキャン状態を作成
    pub fn with_corpus(item_ids: Vec<String>, threshold: u8) -> Self {
        Self {
            item_ids,
            ..Self::new(threshold)
        }
    }

    pub fn total(&self) -> usize {
        self.item_ids.len()
    }

    pub fn remaining(&self) -> usize {
        self.total().saturating_sub(self.cursor)
    }

    pub fn matched_count(&self) -> usize {
        self.matched_ids.len()
    }

    /// 進捗とマッチ結果をクリアする（コーパスは保持）
    pub fn reset_progress(&mut self, threshold: u8) {
        self.threshold = threshold;
        self.cursor = 0;
        self.matched_ids.clear();
        self.completed = false;
    }

    /// index 番目の処理結果を記録し、カーソルを進める
    pub fn record(&mut self, index: usize, matched: bool) {
        if index >= self.item_ids.len() {
            return;
        }
        if matched {
            self.matched_ids.insert(self.item_ids[index].clone());
        }
        self.cursor = index + 1;
    }

    /// 不変条件の検証
    ///
    /// - 0 <= cursor <= len(item_ids)
    /// - matched_ids ⊆ item_ids[0:cursor]
    /// - threshold <= 100
    /// - completed なら cursor == len(item_ids)
    pub fn is_consistent(&self) -> bool {
        if self.cursor > self.item_ids.len() || self.threshold > MAX_THRESHOLD {
            return false;
        }
        if self.completed && self.cursor != self.item_ids.len() {
            return false;
        }
        let processed: BTreeSet<&String> = self.item_ids[..self.cursor].iter().collect();
        self.matched_ids.iter().all(|id| processed.contains(id))
    }

    /// 完了サマリー
    pub fn summary(&self) -> String {
        format!("{} images matched ≥ {}", self.matched_count(), self.threshold)
    }
}

impl Default for ScanState {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

/// 外部検出器が返す領域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedRegion {
    pub id: String,
    pub normalized_rect: NormalizedRect,
    #[serde(default)]
    pub label: String,
    /// 0..1
    #[serde(default)]
    pub confidence: f32,
}

impl DetectedRegion {
    pub fn new(id: impl Into<String>, normalized_rect: NormalizedRect) -> Self {
        Self {
            id: id.into(),
            normalized_rect,
            label: String::new(),
            confidence: 1.0,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// 領域ごとのOCR結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSegment {
    #[serde(rename = "regionID")]
    pub region_id: String,
    pub raw_text: String,
    pub sanitized_text: String,
}
