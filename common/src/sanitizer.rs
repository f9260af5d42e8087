//! OCRテキストの正規化

use regex::Regex;

/// 認識テキストを正規化する
///
/// - 制御文字を除去（改行・タブは保持）
/// - 行内の連続空白を1つに
/// - 空行を除去し、前後の空白をトリム
pub fn sanitize(text: &str) -> String {
    lazy_static::lazy_static! {
        static ref CONTROL_RE: Regex = Regex::new(r"[\p{Cc}&&[^\n\t]]").unwrap();
        static ref SPACE_RE: Regex = Regex::new(r"[ \t\u{3000}]+").unwrap();
    }

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let without_control = CONTROL_RE.replace_all(&normalized, "");

    without_control
        .lines()
        .map(|line| SPACE_RE.replace_all(line.trim(), " ").to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
