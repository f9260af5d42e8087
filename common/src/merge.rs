//! テキスト領域のマージ
//!
//! 交差する（または許容距離内にある）ボックスを連鎖的に統合し、
//! 覆い隠すべき最終矩形の集合を得る。

use crate::geometry::TextBox;
use std::cmp::Ordering;

/// 重なり合うボックスを統合する
///
/// 1. 縦方向の原点で昇順ソート
/// 2. 先頭を current として取り出し、交差するボックスを union で吸収
///    （吸収がなくなるまで繰り返す）
/// 3. current を出力へ追加し、残りが空になるまで続ける
///
/// 1 パスの結果同士がまだ交差している場合はパスを繰り返す。
/// 統合可否は矩形の拡大に対して単調なので、最終結果は入力順に依存しない。
pub fn merge_boxes(boxes: &[TextBox], tolerance: f64) -> Vec<TextBox> {
    let mut current_set: Vec<TextBox> = boxes.to_vec();

    loop {
        let before = current_set.len();
        current_set = merge_pass(current_set, tolerance);
        if current_set.len() == before {
            return current_set;
        }
    }
}

fn merge_pass(mut remaining: Vec<TextBox>, tolerance: f64) -> Vec<TextBox> {
    remaining.sort_by(compare_origin);

    let mut merged = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut current = remaining.remove(0);

        let mut did_merge = true;
        while did_merge {
            did_merge = false;
            let position = remaining
                .iter()
                .position(|candidate| touches(&current, candidate, tolerance));
            if let Some(index) = position {
                let absorbed = remaining.remove(index);
                current.absorb(&absorbed);
                did_merge = true;
            }
        }

        merged.push(current);
    }

    merged
}

fn touches(current: &TextBox, candidate: &TextBox, tolerance: f64) -> bool {
    current.rect.intersects(&candidate.rect)
        || current
            .rect
            .inset(-tolerance, -tolerance)
            .intersects(&candidate.rect)
}

// y → x → 幅 → 高さ の全順序
fn compare_origin(a: &TextBox, b: &TextBox) -> Ordering {
    a.rect
        .y
        .total_cmp(&b.rect.y)
        .then(a.rect.x.total_cmp(&b.rect.x))
        .then(a.rect.width.total_cmp(&b.rect.width))
        .then(a.rect.height.total_cmp(&b.rect.height))
}
