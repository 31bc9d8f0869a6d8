// src/crawler/content.rs
use super::match_key;
use once_cell::sync::Lazy;
use regex::Regex;

/// ヘッダー除去で調べる先頭行数 (歌詞を誤って消さないよう上限を設ける)
const HEADER_SCAN_LINES: usize = 8;

static RE_HEADER_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(tuning|afina[cç][aã]o|capo|capotraste|key|tom|tonalidade|artist|artista|band|banda|song|title|t[ií]tulo|m[uú]sica|difficulty|dificuldade|bpm)\s*:",
    )
    .expect("Failed to compile header field regex")
});

static RE_HEADER_CREDIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(tabbed|transcribed|tab|chords|cifra|transcrito)\s+(by|por)\b")
        .expect("Failed to compile header credit regex")
});

static RE_YOUTUBE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:watch\?v=|embed/)|youtu\.be/)[A-Za-z0-9_\-]{6,}[^\s\]\)<>]*",
    )
    .expect("Failed to compile youtube regex")
});

// 動画URLを除いた後に残っても意味のないラベル
static RE_VIDEO_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:video|v[ií]deo|lesson|aula|videoaula|youtube|watch|link|here|aqui)\s*)*[:\-]?\s*$")
        .expect("Failed to compile video label regex")
});

/// サニタイズ結果
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Sanitized {
    pub content: String,
    pub youtube_lesson_url: Option<String>,
}

/// 改行を正規化し、動画リンクと冗長なヘッダー行を取り除く
pub(super) fn sanitize(raw: &str, artist: &str, title: &str) -> Sanitized {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let (without_videos, youtube_lesson_url) = strip_video_links(&normalized);
    let without_header = strip_header_lines(&without_videos, artist, title);
    Sanitized {
        content: trim_blank_edges(&without_header),
        youtube_lesson_url,
    }
}

fn trim_blank_edges(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end]
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// 先頭の数行だけを見て、チューニング/カポ/キーやタイトル・アーティストの再掲を取り除く。
/// ヘッダーでない行が現れた時点で止める
pub(super) fn strip_header_lines(content: &str, artist: &str, title: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let restatements = restatement_keys(artist, title);

    let mut first_body_line = 0;
    for (idx, line) in lines.iter().enumerate().take(HEADER_SCAN_LINES) {
        if line.trim().is_empty() || is_header_line(line, &restatements) {
            first_body_line = idx + 1;
        } else {
            break;
        }
    }

    lines[first_body_line.min(lines.len())..].join("\n")
}

fn restatement_keys(artist: &str, title: &str) -> Vec<String> {
    [
        title.to_string(),
        artist.to_string(),
        format!("{} {}", artist, title),
        format!("{} {}", title, artist),
        format!("{} by {}", title, artist),
    ]
    .iter()
    .map(|s| match_key(s))
    .filter(|k| !k.is_empty())
    .collect()
}

fn is_header_line(line: &str, restatements: &[String]) -> bool {
    if RE_HEADER_FIELD.is_match(line) || RE_HEADER_CREDIT.is_match(line) {
        return true;
    }
    let key = match_key(line);
    !key.is_empty() && restatements.contains(&key)
}

/// 装飾だけの区切り行 ("-----", "=====", "* * *" など)
fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.chars().filter(|c| !c.is_whitespace()).count() >= 3
        && trimmed
            .chars()
            .all(|c| c.is_whitespace() || matches!(c, '-' | '=' | '_' | '*' | '~' | '#' | '.'))
}

/// 最初に見つかったURLを (スキームを補って) 返す
pub(super) fn find_youtube_url(text: &str) -> Option<String> {
    RE_YOUTUBE.find(text).map(|m| with_scheme(m.as_str()))
}

fn with_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// 本文中の YouTube リンクを除去し、隣接する区切り行も落とす
pub(super) fn strip_video_links(content: &str) -> (String, Option<String>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut first_url = None;
    let mut kept: Vec<Option<String>> = Vec::with_capacity(lines.len());
    let mut video_lines = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if !RE_YOUTUBE.is_match(line) {
            kept.push(Some(line.to_string()));
            continue;
        }
        if first_url.is_none() {
            first_url = find_youtube_url(line);
        }
        video_lines.push(idx);
        let remainder = RE_YOUTUBE.replace_all(line, "");
        if RE_VIDEO_LABEL.is_match(&remainder) {
            kept.push(None);
        } else {
            kept.push(Some(remainder.trim_end().to_string()));
        }
    }

    for idx in video_lines {
        for neighbour in [idx.checked_sub(1), Some(idx + 1)].into_iter().flatten() {
            if neighbour < lines.len() && is_separator(lines[neighbour]) {
                kept[neighbour] = None;
            }
        }
    }

    let content = kept.into_iter().flatten().collect::<Vec<_>>().join("\n");
    (content, first_url)
}
