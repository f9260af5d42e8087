//! vault-scan
//!
//! 写真ライブラリを1枚ずつ分類する再開可能なスキャンエンジンと、
//! 画像内テキストの墨消し処理。

pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod library;
pub mod logging;
pub mod notify;
pub mod ocr;
pub mod persist;
pub mod redaction;
pub mod scan;
pub mod statistics;

pub use error::{Result, VaultScanError};
