//! 利用統計
//!
//! 統計の記録は観測用途のみ。失敗しても呼び出し元の処理には影響しない。

use crate::persist;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const STATISTICS_FILE: &str = "statistics.json";

pub trait StatisticsSink: Send + Sync {
    fn record_scan_started(&self);
    fn record_photos_scanned(&self, count: usize);
    fn record_photo_redacted(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    pub photos_scanned: u64,
    pub photos_redacted: u64,
    pub total_scans: u64,
    pub last_scan_date: Option<DateTime<Local>>,
}

/// JSONファイルに保存する統計
#[derive(Debug)]
pub struct StatisticsStore {
    path: PathBuf,
    stats: Mutex<Statistics>,
}

impl StatisticsStore {
    /// 読めないファイルは初期値として扱う
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(STATISTICS_FILE);
        let stats = persist::read_json(&path).unwrap_or_default();
        Self {
            path,
            stats: Mutex::new(stats),
        }
    }

    pub fn snapshot(&self) -> Statistics {
        self.stats.lock().clone()
    }

    fn update(&self, apply: impl FnOnce(&mut Statistics)) {
        let mut stats = self.stats.lock();
        apply(&mut stats);
        if let Err(e) = persist::write_json_atomic(&self.path, &*stats) {
            tracing::warn!("統計の保存に失敗: {}", e);
        }
    }
}

impl StatisticsSink for StatisticsStore {
    fn record_scan_started(&self) {
        self.update(|s| {
            s.total_scans += 1;
            s.last_scan_date = Some(Local::now());
        });
    }

    fn record_photos_scanned(&self, count: usize) {
        self.update(|s| s.photos_scanned += count as u64);
    }

    fn record_photo_redacted(&self) {
        self.update(|s| s.photos_redacted += 1);
    }
}
