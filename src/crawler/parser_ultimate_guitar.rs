// src/crawler/parser_ultimate_guitar.rs
use super::content::{find_youtube_url, sanitize};
use super::language::blocked_script;
use super::page_state::{self, f64_at, i64_at, str_at};
use super::selector::{normalize_type, split_version};
use super::{
    CrawlError, Instrument, TabDraft, TabParser, TabType, TuningDraft,
    first_non_empty, humanize_slug, url_segment,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use url::Url;

// --- Ultimate Guitar パーサー ---

static RE_TITLE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("Failed to compile title tag regex")
});

// "WONDERWALL CHORDS (ver 2) by Oasis @ Ultimate-Guitar.Com"
static RE_PAGE_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.*?)\s+(?:official\s+|bass\s+|ukulele\s+|drum\s+)?(?:chords|tabs?|lyrics|pro)\b.*?\bby\s+(.*?)\s*@\s*ultimate-guitar\.com")
        .expect("Failed to compile page title regex")
});

// "/tab/oasis/wonderwall-chords-39144" の曲スラッグから種別とIDを落とす
static RE_SONG_SLUG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?)-(?:chords|tabs|tab|bass|ukulele|drums|lyrics|guitar-pro|power|official|video)(?:-\d+)*$")
        .expect("Failed to compile song slug regex")
});

/// 埋め込み状態ツリーから `page.data` を取り出す (コンテナ経由とスクリプト代入経由の両方)
pub(super) fn page_data(state: &Value) -> Option<&Value> {
    ["/store/page/data", "/page/data", "/data"]
        .iter()
        .find_map(|pointer| state.pointer(pointer))
}

pub(super) struct UltimateGuitarParser;

/// フィールド抽出に渡す文脈
struct UgPage<'a> {
    html: &'a str,
    url: &'a Url,
    data: &'a Value,
}

impl TabParser for UltimateGuitarParser {
    fn parse_tab(
        &self,
        html: &str,
        url: &Url,
        _companion_html: Option<&str>,
    ) -> Result<TabDraft, CrawlError> {
        let state = page_state::extract(html)?;
        let data = page_data(&state)
            .ok_or_else(|| CrawlError::Parse(format!("page data missing on {}", url)))?;
        if data.get("tab").is_none() || data.get("tab_view").is_none() {
            return Err(CrawlError::Parse(format!("tab data missing on {}", url)));
        }
        let page = UgPage { html, url, data };

        let type_label = str_at(data, "/tab/type").unwrap_or_default();
        let normalized_type = normalize_type(&type_label);
        if matches!(normalized_type.as_str(), "official" | "pro" | "power" | "video") {
            return Err(CrawlError::Skipped(format!(
                "{} is a {} tab",
                url, type_label
            )));
        }

        let artist_name = first_non_empty(&page, ARTIST_EXTRACTORS)
            .ok_or_else(|| CrawlError::Parse(format!("artist name not found on {}", url)))?;
        let raw_title = first_non_empty(&page, TITLE_EXTRACTORS)
            .ok_or_else(|| CrawlError::Parse(format!("song title not found on {}", url)))?;
        let (song_title, title_version) = split_version(&raw_title);

        for text in [&artist_name, &song_title] {
            if let Some((c, script)) = blocked_script(text) {
                return Err(CrawlError::Skipped(format!(
                    "{:?} contains {} text ({:?})",
                    text, script, c
                )));
            }
        }

        let raw_content = str_at(data, "/tab_view/wiki_tab/content")
            .ok_or_else(|| CrawlError::Parse(format!("tab content missing on {}", url)))?;
        let sanitized = sanitize(&raw_content, &artist_name, &song_title);

        let instrument = instrument_from_type(&normalized_type);
        let tuning = extract_tuning(data, instrument);

        tracing::info!(
            "Processing (Ultimate Guitar): {} - {} [{} {}]",
            artist_name,
            song_title,
            instrument.as_str(),
            type_label
        );

        Ok(TabDraft {
            source_url: url.to_string(),
            artist_name,
            song_title,
            genre: first_non_empty(&page, GENRE_EXTRACTORS),
            instrument,
            tab_type: tab_type_from_label(&type_label),
            content: sanitized.content,
            difficulty: str_at(data, "/tab_view/meta/difficulty")
                .or_else(|| str_at(data, "/tab/difficulty")),
            capo: i64_at(data, "/tab_view/meta/capo").filter(|capo| *capo > 0),
            key: str_at(data, "/tab_view/meta/tonality")
                .or_else(|| str_at(data, "/tab/tonality_name")),
            rating: f64_at(data, "/tab/rating").map(|r| r.clamp(0.0, 5.0)),
            rating_count: i64_at(data, "/tab/votes"),
            views_count: i64_at(data, "/tab_view/stats/view_total"),
            version_name: title_version.or_else(|| str_at(data, "/tab/part").map(|p| humanize_slug(&p))),
            tuning,
            youtube_lesson_url: sanitized.youtube_lesson_url,
            youtube_music_url: extract_music_video(data),
        })
    }
}

// --- フィールドごとのフォールバック ---

const ARTIST_EXTRACTORS: &[fn(&UgPage<'_>) -> Option<String>] = &[
    |p| str_at(p.data, "/tab/artist_name"),
    |p| str_at(p.data, "/artist/name"),
    |p| page_title_parts(p.html).map(|(_, artist)| artist),
    |p| url_segment(p.url, 1).map(|slug| humanize_slug(&slug)),
];

const TITLE_EXTRACTORS: &[fn(&UgPage<'_>) -> Option<String>] = &[
    |p| str_at(p.data, "/tab/song_name"),
    |p| page_title_parts(p.html).map(|(title, _)| title),
    |p| {
        url_segment(p.url, 2).map(|slug| {
            let base = RE_SONG_SLUG
                .captures(&slug)
                .and_then(|caps| caps.get(1))
                .map_or(slug.clone(), |m| m.as_str().to_string());
            humanize_slug(&base)
        })
    },
];

const GENRE_EXTRACTORS: &[fn(&UgPage<'_>) -> Option<String>] = &[
    |p| str_at(p.data, "/tab_view/song_genre"),
    |p| str_at(p.data, "/tab/genre"),
    |p| str_at(p.data, "/genre"),
];

/// `<title>` から (曲名, アーティスト) を取り出す
fn page_title_parts(html: &str) -> Option<(String, String)> {
    let raw = RE_TITLE_TAG.captures(html)?.get(1)?.as_str();
    let title = html_escape::decode_html_entities(raw.trim());
    let caps = RE_PAGE_TITLE.captures(&title)?;
    let song = caps.get(1)?.as_str().trim().to_string();
    let artist = caps.get(2)?.as_str().trim().to_string();
    Some((song, artist))
}

fn instrument_from_type(normalized_type: &str) -> Instrument {
    match normalized_type {
        "bass" => Instrument::Bass,
        "ukulele" => Instrument::Ukulele,
        "drums" => Instrument::Drums,
        "cavaquinho" => Instrument::Cavaquinho,
        _ => Instrument::Guitar,
    }
}

fn tab_type_from_label(label: &str) -> Option<TabType> {
    let label = label.to_lowercase();
    if label.contains("chord") {
        Some(TabType::Chords)
    } else if label.contains("lyric") {
        Some(TabType::Lyrics)
    } else if label.contains("tab") {
        Some(TabType::Tab)
    } else {
        None
    }
}

/// `meta.tuning` を優先し、無ければ楽器の標準チューニング
fn extract_tuning(data: &Value, instrument: Instrument) -> Option<TuningDraft> {
    if instrument == Instrument::Drums {
        return None;
    }
    let strings: Vec<String> = str_at(data, "/tab_view/meta/tuning/value")
        .map(|value| value.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let name = str_at(data, "/tab_view/meta/tuning/name");

    match (name, strings.is_empty()) {
        (Some(name), false) => Some(TuningDraft::named(name, strings)),
        (None, false) => Some(TuningDraft::derived(strings)),
        (_, true) => TuningDraft::standard(instrument),
    }
}

fn extract_music_video(data: &Value) -> Option<String> {
    str_at(data, "/tab_view/recording/youtube_url")
        .and_then(|url| find_youtube_url(&url))
        .or_else(|| {
            str_at(data, "/tab_view/recording/performance/video_id")
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
        })
}
