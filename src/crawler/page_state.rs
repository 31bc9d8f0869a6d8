// src/crawler/page_state.rs
//! ページに埋め込まれた状態 (JSON) の抽出。
//!
//! HTMLパーサーは使わず、次の順で探す:
//! 1. `js-store` コンテナ要素の `data-content` 属性 (HTMLエンティティ化されたJSON)
//! 2. `<script>` 内の変数代入 (`= JSON.parse("...")` または `= { ... }`)

use super::CrawlError;
use serde_json::Value;

const CONTAINER_CLASS: &str = "js-store";
const CONTAINER_ATTR: &str = "data-content";

/// 代入先として探す変数名 (先に見つかったものを使う)
const SCRIPT_MARKERS: &[&str] = &[
    "window.UGAPP.store.page",
    "window.__INITIAL_STATE__",
    "window.__NUXT__",
    "window.__DATA__",
];

const PARSE_CALL: &str = "JSON.parse(";

/// 走査中の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    InString(u8),
    Escaped(u8),
}

/// ページから埋め込み状態を取り出し、汎用の JSON ツリーとして返す
pub(super) fn extract(html: &str) -> Result<Value, CrawlError> {
    if let Some(raw) = find_container_attribute(html) {
        tracing::debug!("Found {} container ({} bytes)", CONTAINER_CLASS, raw.len());
        return decode_and_parse(raw);
    }

    for marker in SCRIPT_MARKERS {
        // `if (window.__NUXT__)` のような参照は読み飛ばし、代入を探す
        let mut search_from = 0;
        while let Some(rel) = html[search_from..].find(marker) {
            search_from += rel + marker.len();
            let rest = &html[search_from..];
            if let Some(rhs) = assignment_rhs(rest) {
                tracing::debug!("Found scripted page state: {}", marker);
                return extract_assignment(&rest[rhs..], marker);
            }
        }
    }

    Err(CrawlError::Parse(
        "no embedded page state found in document".to_string(),
    ))
}

fn decode_and_parse(raw: &str) -> Result<Value, CrawlError> {
    let decoded = html_escape::decode_html_entities(raw);
    Ok(serde_json::from_str(&decoded)?)
}

// --- 状態ツリーの読み出し ---

/// JSON Pointer の位置にある空でない文字列 (数値は文字列化する)
pub(super) fn str_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// JSON Pointer の位置にある数値 ("4.5" のような文字列も受け付ける)
pub(super) fn f64_at(value: &Value, pointer: &str) -> Option<f64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

pub(super) fn i64_at(value: &Value, pointer: &str) -> Option<i64> {
    f64_at(value, pointer).filter(|n| n.is_finite()).map(|n| n as i64)
}

// --- コンテナ属性 ---

fn find_container_attribute(html: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(rel) = html[search_from..].find(CONTAINER_CLASS) {
        let class_pos = search_from + rel;
        search_from = class_pos + CONTAINER_CLASS.len();

        let Some(tag_start) = html[..class_pos].rfind('<') else {
            continue;
        };
        let Some(tag_end) = find_tag_end(html.as_bytes(), tag_start) else {
            continue;
        };
        if let Some(value) = attribute_value(&html[tag_start..tag_end], CONTAINER_ATTR) {
            return Some(value);
        }
    }
    None
}

/// `<` から、引用符の外にある最初の `>` の位置
fn find_tag_end(bytes: &[u8], tag_start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(tag_start) {
        match (quote, b) {
            (None, b'"' | b'\'') => quote = Some(b),
            (Some(q), _) if b == q => quote = None,
            (None, b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

/// タグ文字列から `name="value"` の value 部分を (未デコードのまま) 取り出す
fn attribute_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let bytes = tag.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None => {
                let preceded_by_space = i > 0 && bytes[i - 1].is_ascii_whitespace();
                if preceded_by_space && tag[i..].starts_with(name) {
                    let mut j = skip_whitespace(bytes, i + name.len());
                    if bytes.get(j) == Some(&b'=') {
                        j = skip_whitespace(bytes, j + 1);
                        let q = *bytes.get(j)?;
                        if q == b'"' || q == b'\'' {
                            let end = tag[j + 1..].find(q as char)? + j + 1;
                            return Some(&tag[j + 1..end]);
                        }
                    }
                }
            }
        }
        i += 1;
    }
    None
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

// --- スクリプト内の代入 ---

/// マーカー直後が単純な代入 (`=`、`==` ではない) なら右辺の開始位置
fn assignment_rhs(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let eq = skip_whitespace(bytes, 0);
    if bytes.get(eq) != Some(&b'=') || bytes.get(eq + 1) == Some(&b'=') {
        return None;
    }
    Some(skip_whitespace(bytes, eq + 1))
}

/// 代入の右辺 (`rhs` は右辺の先頭から始まる) を JSON として読む
fn extract_assignment(rhs: &str, marker: &str) -> Result<Value, CrawlError> {
    let bytes = rhs.as_bytes();

    if rhs.starts_with(PARSE_CALL) {
        let start = skip_whitespace(bytes, PARSE_CALL.len());
        if !matches!(bytes.get(start), Some(b'"' | b'\'')) {
            return Err(CrawlError::Parse(format!(
                "{} = JSON.parse(...) argument is not a string literal",
                marker
            )));
        }
        let end = scan_string_literal(bytes, start)?;
        let literal = unescape_js_string(&rhs[start + 1..end])?;
        return decode_and_parse(&literal);
    }

    if bytes.first() == Some(&b'{') {
        let end = scan_balanced_object(bytes, 0)?;
        return decode_and_parse(&rhs[..=end]);
    }

    Err(CrawlError::Parse(format!(
        "unsupported right-hand side for {}",
        marker
    )))
}

/// `bytes[start]` の引用符に対応する閉じ引用符の位置 (バックスラッシュエスケープを考慮)
fn scan_string_literal(bytes: &[u8], start: usize) -> Result<usize, CrawlError> {
    let quote = bytes[start];
    let mut state = ScanState::InString(quote);
    for (i, &b) in bytes.iter().enumerate().skip(start + 1) {
        state = match state {
            ScanState::InString(q) if b == b'\\' => ScanState::Escaped(q),
            ScanState::InString(q) if b == q => return Ok(i),
            ScanState::Escaped(q) => ScanState::InString(q),
            other => other,
        };
    }
    Err(CrawlError::Parse("unterminated string literal".to_string()))
}

/// `bytes[start]` の `{` に対応する `}` の位置。
/// 深さは文字列の外でだけ数え、文字列内のエスケープを尊重する
fn scan_balanced_object(bytes: &[u8], start: usize) -> Result<usize, CrawlError> {
    let mut depth = 0usize;
    let mut state = ScanState::Normal;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        state = match state {
            ScanState::Normal => match b {
                b'"' | b'\'' => ScanState::InString(b),
                b'{' => {
                    depth += 1;
                    ScanState::Normal
                }
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                    ScanState::Normal
                }
                _ => ScanState::Normal,
            },
            ScanState::InString(q) if b == b'\\' => ScanState::Escaped(q),
            ScanState::InString(q) if b == q => ScanState::Normal,
            ScanState::InString(q) => ScanState::InString(q),
            ScanState::Escaped(q) => ScanState::InString(q),
        };
    }
    Err(CrawlError::Parse("unterminated object literal".to_string()))
}

/// JavaScript の文字列リテラル本体 (引用符の内側) を展開する
fn unescape_js_string(body: &str) -> Result<String, CrawlError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            return Err(CrawlError::Parse("dangling escape in string literal".into()));
        };
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(hex_char(&hex)?);
            }
            'u' => {
                let unit = read_u16(&mut chars)?;
                if (0xD800..0xDC00).contains(&unit) {
                    // サロゲートペアの後半 "\uDCxx" を読む
                    if chars.next() != Some('\\') || chars.next() != Some('u') {
                        return Err(CrawlError::Parse("lone surrogate in string literal".into()));
                    }
                    let low = read_u16(&mut chars)?;
                    let decoded = char::decode_utf16([unit, low])
                        .next()
                        .and_then(Result::ok)
                        .ok_or_else(|| CrawlError::Parse("invalid surrogate pair".into()))?;
                    out.push(decoded);
                } else {
                    out.push(
                        char::from_u32(u32::from(unit))
                            .ok_or_else(|| CrawlError::Parse("invalid \\u escape".into()))?,
                    );
                }
            }
            // 行継続
            '\n' => {}
            // \\, \", \', \/ などはその文字自身
            other => out.push(other),
        }
    }
    Ok(out)
}

fn read_u16(chars: &mut std::str::Chars<'_>) -> Result<u16, CrawlError> {
    let hex: String = chars.by_ref().take(4).collect();
    u16::from_str_radix(&hex, 16)
        .map_err(|_| CrawlError::Parse(format!("invalid \\u escape: {}", hex)))
}

fn hex_char(hex: &str) -> Result<char, CrawlError> {
    u8::from_str_radix(hex, 16)
        .map(char::from)
        .map_err(|_| CrawlError::Parse(format!("invalid \\x escape: {}", hex)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_entity_encoded_container_attribute() {
        let html = r#"<html><body>
            <div class="js-store" data-content="{&quot;store&quot;:{&quot;page&quot;:{&quot;data&quot;:{&quot;title&quot;:&quot;Rock &amp; Roll&quot;}}}}"></div>
            </body></html>"#;
        let state = extract(html).unwrap();
        assert_eq!(state["store"]["page"]["data"]["title"], "Rock & Roll");
    }

    #[test]
    fn container_attribute_ignores_other_attributes_and_order() {
        let html = r#"<div data-x='a > b' class="app js-store" id="s" data-content="{&quot;a&quot;:1}">"#;
        assert_eq!(extract(html).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn object_literal_keeps_braces_inside_strings() {
        let html = r#"<script>
            window.__INITIAL_STATE__ = {"content":"line {not a brace} here","nested":{"list":[1,{"b":"}"}]},"q":"say \"}\""};
            window.other = {};
        </script>"#;
        let state = extract(html).unwrap();
        assert_eq!(state["content"], "line {not a brace} here");
        assert_eq!(state["nested"]["list"][1]["b"], "}");
        assert_eq!(state["q"], "say \"}\"");
    }

    #[test]
    fn json_parse_string_literal_is_unescaped() {
        let html = r#"<script>window.__DATA__ = JSON.parse("{\"title\":\"He said \\\"hi\\\"\",\"x\":\"a}b\",\"e\":\"é\"}");</script>"#;
        let state = extract(html).unwrap();
        assert_eq!(state["title"], "He said \"hi\"");
        assert_eq!(state["x"], "a}b");
        assert_eq!(state["e"], "é");
    }

    #[test]
    fn single_quoted_parse_argument() {
        let html = r#"<script>window.__NUXT__=JSON.parse('{"song":"it\'s \x41"}')</script>"#;
        assert_eq!(extract(html).unwrap()["song"], "it's A");
    }

    #[test]
    fn unterminated_structures_are_parse_errors() {
        let object = r#"<script>window.__INITIAL_STATE__ = {"a":{"b":"}"}"#;
        assert!(matches!(extract(object), Err(CrawlError::Parse(_))));

        let literal = r#"<script>window.__DATA__ = JSON.parse("{\"a\":1}</script>"#;
        assert!(matches!(extract(literal), Err(CrawlError::Parse(_))));
    }

    #[test]
    fn references_before_the_assignment_are_skipped() {
        let html = r#"<script>
            if (window.__NUXT__) { console.log(window.__NUXT__.state); }
            if (window.__NUXT__ === undefined) {}
            window.__NUXT__ = {"song":"Wonderwall"};
        </script>"#;
        assert_eq!(extract(html).unwrap()["song"], "Wonderwall");
    }

    #[test]
    fn marker_without_assignment_falls_through_to_next_marker() {
        let html = r#"<script>
            var seen = !!window.UGAPP.store.page;
            window.__DATA__ = JSON.parse("{\"a\":1}");
        </script>"#;
        assert_eq!(extract(html).unwrap(), json!({"a": 1}));

        let only_reference = "<script>if (window.__DATA__) {}</script>";
        assert!(matches!(extract(only_reference), Err(CrawlError::Parse(_))));
    }

    #[test]
    fn missing_state_is_parse_error() {
        let err = extract("<html><body><p>Nothing here</p></body></html>").unwrap_err();
        assert_eq!(err.kind(), crate::crawler::ErrorKind::Parse);
    }

    #[test]
    fn balanced_scan_stops_at_matching_brace() {
        let src = br#"{"a":{"b":"x{"},"c":'}'} trailing }"#;
        let end = scan_balanced_object(src, 0).unwrap();
        assert_eq!(&src[..=end], br#"{"a":{"b":"x{"},"c":'}'}"#);
    }

    #[test]
    fn tree_accessors_accept_numbers_and_strings() {
        let tree = json!({"a": {"n": 12, "s": "4.5", "big": "1,234", "empty": " "}});
        assert_eq!(str_at(&tree, "/a/n").as_deref(), Some("12"));
        assert_eq!(str_at(&tree, "/a/empty"), None);
        assert_eq!(f64_at(&tree, "/a/s"), Some(4.5));
        assert_eq!(i64_at(&tree, "/a/big"), Some(1234));
        assert_eq!(i64_at(&tree, "/a/missing"), None);
    }
}
