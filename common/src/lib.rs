//! Vault Scan Common Library
//!
//! スキャンエンジンと墨消し処理で共有される型・ジオメトリ・純粋ロジック

pub mod types;
pub mod geometry;
pub mod merge;
pub mod sanitizer;
pub mod error;
pub mod parser;

pub use types::{ScanState, DetectedRegion, TextSegment, DEFAULT_THRESHOLD, MAX_THRESHOLD};
pub use geometry::{NormalizedRect, PixelRect, TextBox};
pub use merge::merge_boxes;
pub use sanitizer::sanitize;
pub use error::{Error, Result};
pub use parser::{validate_threshold, parse_region, parse_regions_json};
