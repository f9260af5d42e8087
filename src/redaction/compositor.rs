//! マスク生成・ぼかし・合成
//!
//! いずれも同期処理。呼び出し側で spawn_blocking に載せる。

use image::{imageops, DynamicImage, GrayImage, Luma, RgbaImage};
use rayon::prelude::*;
use vault_scan_common::TextBox;

const MASK_ON: u8 = 255;

/// 画像と同サイズのマスク（ボックス内 255、それ以外 0）
///
/// ボックスの端はピクセル境界の外側へ丸める。
pub fn build_mask(width: u32, height: u32, boxes: &[TextBox]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);

    for text_box in boxes {
        let rect = text_box.rect.clamped(width, height);
        if rect.is_empty() {
            continue;
        }
        let x0 = rect.min_x().floor() as u32;
        let y0 = rect.min_y().floor() as u32;
        let x1 = (rect.max_x().ceil() as u32).min(width);
        let y1 = (rect.max_y().ceil() as u32).min(height);

        for y in y0..y1 {
            for x in x0..x1 {
                mask.put_pixel(x, y, Luma([MASK_ON]));
            }
        }
    }
    mask
}

/// マスク重み付き合成: 白 → ぼかし画素、黒 → 元画素
pub fn composite(
    original: &RgbaImage,
    blurred: &RgbaImage,
    mask: &GrayImage,
) -> Result<RgbaImage, String> {
    let (width, height) = original.dimensions();
    if blurred.dimensions() != (width, height) || mask.dimensions() != (width, height) {
        return Err(format!(
            "サイズ不一致: original {:?}, blurred {:?}, mask {:?}",
            original.dimensions(),
            blurred.dimensions(),
            mask.dimensions()
        ));
    }

    let row_len = width as usize * 4;
    let mut out = vec![0u8; row_len * height as usize];
    if row_len == 0 {
        return RgbaImage::from_raw(width, height, out).ok_or_else(|| "空の画像".to_string());
    }

    let src = original.as_raw();
    let blur = blurred.as_raw();
    let weights = mask.as_raw();

    out.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        let offset = y * row_len;
        for x in 0..width as usize {
            let weight = weights[y * width as usize + x] as u32;
            for c in 0..4 {
                let i = x * 4 + c;
                let a = src[offset + i] as u32;
                let b = blur[offset + i] as u32;
                row[i] = ((a * (255 - weight) + b * weight + 127) / 255) as u8;
            }
        }
    });

    RgbaImage::from_raw(width, height, out).ok_or_else(|| "合成結果の生成に失敗".to_string())
}

/// 画像全体をぼかし、マスク部分だけ差し替えた画像を返す
pub fn render_redacted(
    image: &DynamicImage,
    boxes: &[TextBox],
    blur_radius: f32,
) -> Result<DynamicImage, String> {
    let original = image.to_rgba8();
    let (width, height) = original.dimensions();
    if width == 0 || height == 0 {
        return Err("画像サイズが0です".into());
    }

    let mask = build_mask(width, height, boxes);
    let blurred = imageops::blur(&original, blur_radius);
    composite(&original, &blurred, &mask).map(DynamicImage::ImageRgba8)
}
