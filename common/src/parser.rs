//! 入力パーサー
//!
//! - しきい値の範囲チェック
//! - CLI の領域指定 "x,y,w,h[,label]"
//! - 検出器出力の JSON 配列

use crate::error::{Error, Result};
use crate::geometry::NormalizedRect;
use crate::types::{DetectedRegion, MAX_THRESHOLD};

/// しきい値を 0..=100 に検証
pub fn validate_threshold(value: i64) -> Result<u8> {
    if (0..=MAX_THRESHOLD as i64).contains(&value) {
        Ok(value as u8)
    } else {
        Err(Error::InvalidThreshold(value))
    }
}

/// "x,y,w,h[,label]" 形式の正規化領域をパース
pub fn parse_region(spec: &str, id: &str) -> Result<DetectedRegion> {
    let parts: Vec<&str> = spec.split(',').map(|s| s.trim()).collect();
    if parts.len() < 4 || parts.len() > 5 {
        return Err(Error::InvalidRegion(format!(
            "{}: x,y,w,h[,label] の形式で指定してください",
            spec
        )));
    }

    let mut values = [0.0f64; 4];
    for (slot, raw) in values.iter_mut().zip(&parts[..4]) {
        *slot = raw
            .parse::<f64>()
            .map_err(|_| Error::InvalidRegion(format!("{}: 数値ではありません: {}", spec, raw)))?;
    }

    if values.iter().any(|v| !v.is_finite()) || values[2] <= 0.0 || values[3] <= 0.0 {
        return Err(Error::InvalidRegion(format!("{}: 幅と高さは正の値", spec)));
    }

    let rect = NormalizedRect::new(values[0], values[1], values[2], values[3]);
    let region = DetectedRegion::new(id, rect);
    Ok(match parts.get(4) {
        Some(label) => region.with_label(*label),
        None => region,
    })
}

/// 検出器出力（DetectedRegion の JSON 配列）をパース
pub fn parse_regions_json(json: &str) -> Result<Vec<DetectedRegion>> {
    let regions: Vec<DetectedRegion> = serde_json::from_str(json)?;
    Ok(regions)
}
