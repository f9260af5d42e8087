//! 矩形ジオメトリ
//!
//! - NormalizedRect: 0..1 正規化座標（原点は左上）
//! - PixelRect: ピクセル座標
//! - TextBox: パディング済みのテキスト領域

use serde::{Deserialize, Serialize};

/// 正規化矩形（0..1、原点左上）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// 単位正方形 [0,1]x[0,1] の内側に収める
    pub fn clamped(&self) -> Self {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let width = self.width.min(1.0 - x).max(0.0);
        let height = self.height.min(1.0 - y).max(0.0);
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// ピクセル座標へ変換
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> PixelRect {
        let w = image_width as f64;
        let h = image_height as f64;
        PixelRect::new(self.x * w, self.y * h, self.width * w, self.height * h)
    }
}

/// ピクセル座標の矩形
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn min_x(&self) -> f64 {
        self.x
    }

    pub fn min_y(&self) -> f64 {
        self.y
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// 辺が接している場合も交差とみなす
    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.min_x() <= other.max_x()
            && other.min_x() <= self.max_x()
            && self.min_y() <= other.max_y()
            && other.min_y() <= self.max_y()
    }

    /// 両方を包含する最小矩形
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        let min_x = self.min_x().min(other.min_x());
        let min_y = self.min_y().min(other.min_y());
        let max_x = self.max_x().max(other.max_x());
        let max_y = self.max_y().max(other.max_y());
        PixelRect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// 各辺を内側へ dx, dy 縮める（負値なら外側へ広げる）
    pub fn inset(&self, dx: f64, dy: f64) -> PixelRect {
        PixelRect::new(
            self.x + dx,
            self.y + dy,
            self.width - 2.0 * dx,
            self.height - 2.0 * dy,
        )
    }

    /// 画像範囲 [0,width]x[0,height] に切り詰める
    pub fn clamped(&self, width: u32, height: u32) -> PixelRect {
        let min_x = self.min_x().clamp(0.0, width as f64);
        let min_y = self.min_y().clamp(0.0, height as f64);
        let max_x = self.max_x().clamp(0.0, width as f64);
        let max_y = self.max_y().clamp(0.0, height as f64);
        PixelRect::new(min_x, min_y, (max_x - min_x).max(0.0), (max_y - min_y).max(0.0))
    }
}

/// パディング適用済みのテキスト領域
///
/// 生成時に固定パディングを上下左右へ加え、画像範囲に切り詰める。
/// 以降はマージ処理（union）でのみ変化する。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    pub rect: PixelRect,
}

impl TextBox {
    pub fn padded(raw: PixelRect, padding: f64, image_width: u32, image_height: u32) -> Self {
        Self {
            rect: raw.inset(-padding, -padding).clamped(image_width, image_height),
        }
    }

    pub fn from_rect(rect: PixelRect) -> Self {
        Self { rect }
    }

    pub(crate) fn absorb(&mut self, other: &TextBox) {
        self.rect = self.rect.union(&other.rect);
    }
}
