// src/crawler/language.rs
//! 文字体系 (スクリプト) による候補の許可判定。
//! 言語判定ではないので、ラテン文字で書かれた対象外の言語はそのまま通る

use std::ops::RangeInclusive;

/// 拒否する非ラテン文字ブロック
const BLOCKED_SCRIPTS: &[(&str, RangeInclusive<u32>)] = &[
    ("Greek", 0x0370..=0x03FF),
    ("Greek Extended", 0x1F00..=0x1FFF),
    ("Cyrillic", 0x0400..=0x052F),
    ("Cyrillic Extended-C", 0x1C80..=0x1C8F),
    ("Cyrillic Extended-A", 0x2DE0..=0x2DFF),
    ("Cyrillic Extended-B", 0xA640..=0xA69F),
    ("Armenian", 0x0530..=0x058F),
    ("Hebrew", 0x0590..=0x05FF),
    ("Arabic", 0x0600..=0x06FF),
    ("Syriac", 0x0700..=0x074F),
    ("Arabic Supplement", 0x0750..=0x077F),
    ("Thaana", 0x0780..=0x07BF),
    ("Arabic Extended-A", 0x08A0..=0x08FF),
    ("Devanagari", 0x0900..=0x097F),
    ("Bengali", 0x0980..=0x09FF),
    ("Gurmukhi", 0x0A00..=0x0A7F),
    ("Gujarati", 0x0A80..=0x0AFF),
    ("Tamil", 0x0B80..=0x0BFF),
    ("Telugu", 0x0C00..=0x0C7F),
    ("Kannada", 0x0C80..=0x0CFF),
    ("Malayalam", 0x0D00..=0x0D7F),
    ("Sinhala", 0x0D80..=0x0DFF),
    ("Thai", 0x0E00..=0x0E7F),
    ("Lao", 0x0E80..=0x0EFF),
    ("Tibetan", 0x0F00..=0x0FFF),
    ("Myanmar", 0x1000..=0x109F),
    ("Georgian", 0x10A0..=0x10FF),
    ("Hangul Jamo", 0x1100..=0x11FF),
    ("Ethiopic", 0x1200..=0x137F),
    ("Khmer", 0x1780..=0x17FF),
    ("Mongolian", 0x1800..=0x18AF),
    ("CJK Radicals", 0x2E80..=0x2FDF),
    ("CJK Symbols and Punctuation", 0x3000..=0x303F),
    ("Hiragana", 0x3040..=0x309F),
    ("Katakana", 0x30A0..=0x30FF),
    ("Bopomofo", 0x3100..=0x312F),
    ("Hangul Compatibility Jamo", 0x3130..=0x318F),
    ("CJK Unified Ideographs Extension A", 0x3400..=0x4DBF),
    ("CJK Unified Ideographs", 0x4E00..=0x9FFF),
    ("Yi", 0xA000..=0xA4CF),
    ("Hangul Syllables", 0xAC00..=0xD7AF),
    ("CJK Compatibility Ideographs", 0xF900..=0xFAFF),
    ("Arabic Presentation Forms-A", 0xFB50..=0xFDFF),
    ("Arabic Presentation Forms-B", 0xFE70..=0xFEFF),
    ("Halfwidth Katakana / Hangul", 0xFF66..=0xFFDC),
    ("CJK Unified Ideographs Extension B+", 0x20000..=0x2FA1F),
];

/// 拒否対象の文字ブロックに属する最初の文字とブロック名
pub(crate) fn blocked_script(text: &str) -> Option<(char, &'static str)> {
    text.chars().find_map(|c| {
        let cp = c as u32;
        BLOCKED_SCRIPTS
            .iter()
            .find(|(_, range)| range.contains(&cp))
            .map(|(name, _)| (c, *name))
    })
}

/// 拒否対象の文字ブロックの文字を1つも含まなければ true
pub fn is_allowed_script(text: &str) -> bool {
    blocked_script(text).is_none()
}

/// 発見段階の粗いフィルタ: 印字可能な ASCII だけで構成されているか
pub fn is_printable_ascii(text: &str) -> bool {
    text.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cyrillic() {
        assert!(!is_allowed_script("Вопрос"));
        assert_eq!(blocked_script("Кино").map(|(_, name)| name), Some("Cyrillic"));
    }

    #[test]
    fn accepts_latin_with_diacritics() {
        assert!(is_allowed_script("\u{00C9}t\u{00E9}"));
        assert!(is_allowed_script("Legião Urbana - Tempo Perdido"));
        assert!(is_allowed_script("Mötley Crüe"));
    }

    #[test]
    fn rejects_other_scripts() {
        for text in ["東京事変", "ラルク", "방탄소년단", "فيروز", "שלום", "เพลง", "दिल", "Ελλάδα"] {
            assert!(!is_allowed_script(text), "{} should be rejected", text);
        }
    }

    #[test]
    fn mixed_text_is_rejected_if_any_char_is_blocked() {
        assert!(!is_allowed_script("Nautilus Pompilius (Наутилус)"));
    }

    #[test]
    fn printable_ascii_heuristic() {
        assert!(is_printable_ascii("Guns N' Roses"));
        assert!(!is_printable_ascii("Beyoncé"));
        assert!(!is_printable_ascii("tab\there"));
    }
}
