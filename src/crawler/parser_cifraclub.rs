// src/crawler/parser_cifraclub.rs
use super::content::{find_youtube_url, sanitize};
use super::language::blocked_script;
use super::selector::split_version;
use super::{
    CrawlError, Instrument, TabDraft, TabParser, TabType, TuningDraft, first_non_empty,
    humanize_slug, match_key, url_segment,
};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

// --- Cifra Club パーサー ---

/// Cifra Club と歌詞ページのセレクタ
struct CifraSelectors {
    page_title: Selector,
    title_t1: Selector,
    title_h1: Selector,
    artist_t3: Selector,
    artist_h2: Selector,
    canonical: Selector,
    content_block: Selector,
    content_pre: Selector,
    key: Selector,
    capo: Selector,
    tuning: Selector,
    breadcrumb: Selector,
    views: Selector,
    views_fallback: Selector,
    video_iframe: Selector,
    video_id: Selector,
    lyric_original: Selector,
    lyric_legacy: Selector,
}

/// セレクタを起動時に一度だけパースする
static SELECTORS: Lazy<CifraSelectors> = Lazy::new(|| CifraSelectors {
    page_title: Selector::parse("head > title").expect("Failed to parse title selector"),
    title_t1: Selector::parse("h1.t1").expect("Failed to parse h1.t1 selector"),
    title_h1: Selector::parse("h1").expect("Failed to parse h1 selector"),
    artist_t3: Selector::parse("h2.t3 a").expect("Failed to parse h2.t3 selector"),
    artist_h2: Selector::parse("h2 a").expect("Failed to parse h2 selector"),
    canonical: Selector::parse("link[rel=canonical]").expect("Failed to parse canonical selector"),
    content_block: Selector::parse("div.cifra_cnt pre").expect("Failed to parse content selector"),
    content_pre: Selector::parse("pre").expect("Failed to parse pre selector"),
    key: Selector::parse("#cifra_tom a").expect("Failed to parse key selector"),
    capo: Selector::parse("#cifra_capo a").expect("Failed to parse capo selector"),
    tuning: Selector::parse("#cifra_afi a").expect("Failed to parse tuning selector"),
    breadcrumb: Selector::parse("#breadcrumb a, .breadcrumb a")
        .expect("Failed to parse breadcrumb selector"),
    views: Selector::parse(".cifra-views").expect("Failed to parse views selector"),
    views_fallback: Selector::parse(".views").expect("Failed to parse views fallback selector"),
    video_iframe: Selector::parse("iframe[src*='youtube']")
        .expect("Failed to parse video iframe selector"),
    video_id: Selector::parse("[data-video-id]").expect("Failed to parse video id selector"),
    lyric_original: Selector::parse("div.lyric-original p")
        .expect("Failed to parse lyric selector"),
    lyric_legacy: Selector::parse("div.cnt-letra p").expect("Failed to parse legacy lyric selector"),
});

// "Tempo Perdido - Legião Urbana - Cifra Club"
static RE_PAGE_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(.+?)\s+-\s+(.+?)\s+-\s+(?:cifra club|letras\.mus\.br|letras)\s*$")
        .expect("Failed to compile page title regex")
});

static RE_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("Failed to compile digits regex"));

static RE_NOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-G][#b]?$").expect("Failed to compile note regex"));

/// フラット表記の半音階 (ずらしたチューニングの音名に使う)
const CHROMATIC: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

pub(super) struct CifraClubParser;

/// フィールド抽出に渡す文脈
struct CifraPage<'a> {
    document: &'a Html,
    url: &'a Url,
}

impl TabParser for CifraClubParser {
    fn parse_tab(
        &self,
        html: &str,
        url: &Url,
        companion_html: Option<&str>,
    ) -> Result<TabDraft, CrawlError> {
        let document = Html::parse_document(html);
        let page = CifraPage {
            document: &document,
            url,
        };

        let raw_title = first_non_empty(&page, TITLE_EXTRACTORS)
            .ok_or_else(|| CrawlError::Parse(format!("song title not found on {}", url)))?;
        let artist_name = first_non_empty(&page, ARTIST_EXTRACTORS)
            .ok_or_else(|| CrawlError::Parse(format!("artist name not found on {}", url)))?;
        let (song_title, title_version) = split_version(&raw_title);

        for text in [&artist_name, &song_title] {
            if let Some((c, script)) = blocked_script(text) {
                return Err(CrawlError::Skipped(format!(
                    "{:?} contains {} text ({:?})",
                    text, script, c
                )));
            }
        }

        let (raw_content, lyrics_only) = match tab_content(&document) {
            Some(content) => (content, false),
            None => {
                let companion = companion_html.map(Html::parse_document);
                let lyrics = if is_lyrics_host(url) {
                    lyric_text(&document)
                } else {
                    companion.as_ref().and_then(lyric_text)
                };
                let lyrics = lyrics.ok_or_else(|| {
                    CrawlError::Parse(format!("no tab content or lyrics for {}", url))
                })?;
                (lyrics, true)
            }
        };
        let sanitized = sanitize(&raw_content, &artist_name, &song_title);

        let variants = variant_segments(url);
        let instrument = instrument_from_path(&variants);
        let tab_type = if lyrics_only {
            TabType::Lyrics
        } else {
            tab_type_from_path(&variants)
        };
        let tuning = parse_tuning(first_text(&document, &SELECTORS.tuning).as_deref(), instrument);

        tracing::info!(
            "Processing (Cifra Club): {} - {} [{} {}]",
            artist_name,
            song_title,
            instrument.as_str(),
            tab_type.as_str()
        );

        Ok(TabDraft {
            source_url: url.to_string(),
            genre: extract_genre(&document, &artist_name, &song_title),
            artist_name,
            song_title,
            instrument,
            tab_type: Some(tab_type),
            content: sanitized.content,
            difficulty: None,
            capo: first_text(&document, &SELECTORS.capo)
                .and_then(|text| leading_number(&text))
                .filter(|capo| *capo > 0),
            key: first_text(&document, &SELECTORS.key),
            rating: None,
            rating_count: None,
            views_count: first_text(&document, &SELECTORS.views)
                .or_else(|| first_text(&document, &SELECTORS.views_fallback))
                .and_then(|text| digits_only(&text)),
            version_name: title_version.or_else(|| version_from_path(&variants)),
            tuning,
            youtube_lesson_url: sanitized.youtube_lesson_url,
            youtube_music_url: extract_music_video(&document),
        })
    }

    /// 本文 (`pre`) が無いページは歌詞サイトの同じ曲に置き換える
    fn companion_url(&self, html: &str, url: &Url) -> Option<Url> {
        if is_lyrics_host(url) {
            return None;
        }
        let document = Html::parse_document(html);
        if tab_content(&document).is_some() {
            return None;
        }
        let artist = url_segment(url, 0)?;
        let song = url_segment(url, 1)?;
        Url::parse(&format!("https://www.letras.mus.br/{}/{}/", artist, song)).ok()
    }
}

// --- フィールドごとのフォールバック ---

const TITLE_EXTRACTORS: &[fn(&CifraPage<'_>) -> Option<String>] = &[
    |p| page_title_parts(p.document).map(|(song, _)| song),
    |p| first_text(p.document, &SELECTORS.title_t1),
    |p| first_text(p.document, &SELECTORS.title_h1),
    |p| url_segment(p.url, 1).map(|slug| humanize_slug(&slug)),
];

// スラッグ由来は最後 (アクセントが失われる)
const ARTIST_EXTRACTORS: &[fn(&CifraPage<'_>) -> Option<String>] = &[
    |p| page_title_parts(p.document).map(|(_, artist)| artist),
    |p| first_text(p.document, &SELECTORS.artist_t3),
    |p| first_text(p.document, &SELECTORS.artist_h2),
    |p| {
        canonical_url(p.document)
            .and_then(|canonical| url_segment(&canonical, 0))
            .map(|slug| humanize_slug(&slug))
    },
    |p| url_segment(p.url, 0).map(|slug| humanize_slug(&slug)),
];

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// セレクタに一致する最初の空でない要素のテキスト (空白は1つに畳む)
fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

/// `<title>` から (曲名, アーティスト) を取り出す
fn page_title_parts(document: &Html) -> Option<(String, String)> {
    let title = first_text(document, &SELECTORS.page_title)?;
    let caps = RE_PAGE_TITLE.captures(&title)?;
    Some((
        caps.get(1)?.as_str().trim().to_string(),
        caps.get(2)?.as_str().trim().to_string(),
    ))
}

fn canonical_url(document: &Html) -> Option<Url> {
    document
        .select(&SELECTORS.canonical)
        .filter_map(|element| element.value().attr("href"))
        .find_map(|href| Url::parse(href).ok())
}

/// 本文ブロック。改行を保つため空白は畳まない
fn tab_content(document: &Html) -> Option<String> {
    [&SELECTORS.content_block, &SELECTORS.content_pre]
        .into_iter()
        .flat_map(|selector| document.select(selector))
        .map(|element| element.text().collect::<String>())
        .find(|text| !text.trim().is_empty())
}

/// 歌詞ページの段落を `<br>` を改行として読み、段落間は空行で区切る
fn lyric_text(document: &Html) -> Option<String> {
    for selector in [&SELECTORS.lyric_original, &SELECTORS.lyric_legacy] {
        let stanzas: Vec<String> = document
            .select(selector)
            .map(paragraph_lines)
            .filter(|stanza| !stanza.is_empty())
            .collect();
        if !stanzas.is_empty() {
            return Some(stanzas.join("\n\n"));
        }
    }
    None
}

fn paragraph_lines(paragraph: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in paragraph.descendants() {
        match node.value() {
            Node::Text(chunk) => text.push_str(&chunk.replace('\n', " ")),
            Node::Element(element) if element.name() == "br" => text.push('\n'),
            _ => {}
        }
    }
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn is_lyrics_host(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| host.ends_with("letras.mus.br"))
}

/// 曲スラッグより後ろのパス ("baixo", "simplificada" など)
fn variant_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .skip(2)
                .map(|s| s.trim_end_matches(".html").to_lowercase())
                .collect()
        })
        .unwrap_or_default()
}

fn path_has(segments: &[String], words: &[&str]) -> bool {
    segments
        .iter()
        .any(|segment| words.iter().any(|word| segment.contains(word)))
}

fn instrument_from_path(segments: &[String]) -> Instrument {
    if path_has(segments, &["baixo", "bass"]) {
        Instrument::Bass
    } else if path_has(segments, &["cavaco", "cavaquinho"]) {
        Instrument::Cavaquinho
    } else if path_has(segments, &["ukulele"]) {
        Instrument::Ukulele
    } else if path_has(segments, &["bateria", "drums"]) {
        Instrument::Drums
    } else {
        Instrument::Guitar
    }
}

fn tab_type_from_path(segments: &[String]) -> TabType {
    if path_has(segments, &["letra"]) {
        TabType::Lyrics
    } else if path_has(segments, &["tablatura", "tabs"]) {
        TabType::Tab
    } else {
        TabType::Chords
    }
}

fn version_from_path(segments: &[String]) -> Option<String> {
    path_has(segments, &["simplificada"]).then(|| "Simplified".to_string())
}

/// "2ª casa" → 2
fn leading_number(text: &str) -> Option<i64> {
    RE_DIGITS.find(text)?.as_str().parse().ok()
}

/// "1.234.567 exibições" → 1234567
fn digits_only(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn note_index(note: &str) -> Option<usize> {
    let flat = match note {
        "C#" => "Db",
        "D#" => "Eb",
        "F#" => "Gb",
        "G#" => "Ab",
        "A#" => "Bb",
        other => other,
    };
    CHROMATIC.iter().position(|n| *n == flat)
}

fn shift_down(strings: &[&str], semitones: usize) -> Vec<String> {
    strings
        .iter()
        .map(|note| match note_index(note) {
            Some(idx) => CHROMATIC[(idx + 12 - semitones % 12) % 12].to_string(),
            None => note.to_string(),
        })
        .collect()
}

/// 既知の名前付きチューニングか音名の並びを解釈する。無指定は標準
fn parse_tuning(label: Option<&str>, instrument: Instrument) -> Option<TuningDraft> {
    let standard = instrument.standard_strings()?;
    let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
        return TuningDraft::standard(instrument);
    };

    let (name, strings) = match match_key(label).as_str() {
        "padrao" | "afinacao padrao" | "standard" | "e standard" => {
            return TuningDraft::standard(instrument);
        }
        "meio tom abaixo" | "half step down" | "1 2 tom abaixo" => {
            ("Half Step Down", shift_down(standard, 1))
        }
        "um tom abaixo" | "1 tom abaixo" | "whole step down" => {
            ("Whole Step Down", shift_down(standard, 2))
        }
        "drop d" => {
            let mut strings: Vec<String> = standard.iter().map(|s| s.to_string()).collect();
            if let Some(lowest) = strings.first_mut() {
                *lowest = "D".to_string();
            }
            ("Drop D", strings)
        }
        _ => {
            let notes: Vec<String> = label
                .split(|c: char| c.is_whitespace() || c == ',' || c == '-')
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect();
            if notes.len() == standard.len() && notes.iter().all(|n| RE_NOTE.is_match(n)) {
                return Some(TuningDraft::derived(notes));
            }
            tracing::warn!("Unrecognized tuning {:?}, assuming standard", label);
            return TuningDraft::standard(instrument);
        }
    };
    Some(TuningDraft::named(name, strings))
}

/// パンくずのうちサイト名・アーティスト・曲名以外の最初の項目
fn extract_genre(document: &Html, artist: &str, title: &str) -> Option<String> {
    let skip = [
        match_key(artist),
        match_key(title),
        "cifra club".to_string(),
        "inicio".to_string(),
        "home".to_string(),
    ];
    document
        .select(&SELECTORS.breadcrumb)
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .find(|text| !skip.contains(&match_key(text)))
}

fn extract_music_video(document: &Html) -> Option<String> {
    document
        .select(&SELECTORS.video_iframe)
        .filter_map(|element| element.value().attr("src"))
        .find_map(find_youtube_url)
        .or_else(|| {
            document
                .select(&SELECTORS.video_id)
                .filter_map(|element| element.value().attr("data-video-id"))
                .map(str::trim)
                .find(|id| !id.is_empty())
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::testing::StaticFetcher;
    use crate::crawler::{ErrorKind, scrape_tab};

    const SONG_URL: &str = "https://www.cifraclub.com.br/legiao-urbana/tempo-perdido/";

    fn chords_page() -> String {
        r#"<html><head><title>Tempo Perdido - Legião Urbana - Cifra Club</title>
<link rel="canonical" href="https://www.cifraclub.com.br/legiao-urbana/tempo-perdido/"></head>
<body>
<div id="breadcrumb"><a href="/">Cifra Club</a><a href="/estilos/rock/">Rock</a><a href="/legiao-urbana/">Legião Urbana</a><a>Tempo Perdido</a></div>
<h1 class="t1">Tempo Perdido</h1><h2 class="t3"><a href="/legiao-urbana/">Legião Urbana</a></h2>
<div class="cifra-views">1.234.567 exibições</div>
<span id="cifra_tom">Tom: <a>C</a></span>
<span id="cifra_capo">Capotraste na <a>2ª casa</a></span>
<span id="cifra_afi">Afinação: <a>Meio tom abaixo</a></span>
<div class="cifra_cnt"><pre>Tom: C
[Intro] <b>C</b>  <b>G</b>
Aula: https://www.youtube.com/watch?v=abcdefghijk
-----
Todos os dias quando acordo
</pre></div>
<iframe src="https://www.youtube.com/embed/zyxwvutsrqp?rel=0"></iframe>
</body></html>"#
            .to_string()
    }

    fn parse(html: &str, url: &str) -> Result<TabDraft, CrawlError> {
        CifraClubParser.parse_tab(html, &Url::parse(url).unwrap(), None)
    }

    #[test]
    fn parses_chords_page() {
        let draft = parse(&chords_page(), SONG_URL).unwrap();
        assert_eq!(draft.artist_name, "Legião Urbana");
        assert_eq!(draft.song_title, "Tempo Perdido");
        assert_eq!(draft.genre.as_deref(), Some("Rock"));
        assert_eq!(draft.instrument, Instrument::Guitar);
        assert_eq!(draft.tab_type, Some(TabType::Chords));
        assert_eq!(draft.content, "[Intro] C  G\nTodos os dias quando acordo");
        assert_eq!(draft.key.as_deref(), Some("C"));
        assert_eq!(draft.capo, Some(2));
        assert_eq!(draft.views_count, Some(1_234_567));
        assert_eq!(
            draft.youtube_lesson_url.as_deref(),
            Some("https://www.youtube.com/watch?v=abcdefghijk")
        );
        assert_eq!(
            draft.youtube_music_url.as_deref(),
            Some("https://www.youtube.com/embed/zyxwvutsrqp?rel=0")
        );
        let tuning = draft.tuning.unwrap();
        assert_eq!(tuning.name, "Half Step Down");
        assert_eq!(tuning.strings, ["Eb", "Ab", "Db", "Gb", "Bb", "Eb"]);
        assert!(!tuning.derived_name);
    }

    #[test]
    fn bass_path_uses_bass_standard_tuning() {
        let html = "<html><head><title>Tempo Perdido - Legião Urbana - Cifra Club</title></head>\
                    <body><pre>G|--5--7--|</pre></body></html>";
        let draft = parse(html, "https://www.cifraclub.com.br/legiao-urbana/tempo-perdido/baixo/").unwrap();
        assert_eq!(draft.instrument, Instrument::Bass);
        assert_eq!(draft.tuning.unwrap().strings, ["E", "A", "D", "G"]);
    }

    #[test]
    fn simplified_path_sets_version() {
        let html = "<html><head><title>Tempo Perdido - Legião Urbana - Cifra Club</title></head>\
                    <body><pre>C G Am</pre></body></html>";
        let draft = parse(
            html,
            "https://www.cifraclub.com.br/legiao-urbana/tempo-perdido/simplificada.html",
        )
        .unwrap();
        assert_eq!(draft.version_name.as_deref(), Some("Simplified"));
    }

    #[test]
    fn falls_back_to_url_slugs() {
        let html = "<html><head><title>Cifra Club</title></head><body><pre>C G Am</pre></body></html>";
        let draft = parse(html, SONG_URL).unwrap();
        assert_eq!(draft.artist_name, "Legiao Urbana");
        assert_eq!(draft.song_title, "Tempo Perdido");
    }

    #[test]
    fn headings_beat_slugs() {
        let html = "<html><head><title>Cifra Club</title></head><body>\
                    <h1>Índios</h1><h2><a>Legião Urbana</a></h2><pre>C G</pre></body></html>";
        let draft = parse(html, "https://www.cifraclub.com.br/legiao-urbana/indios/").unwrap();
        assert_eq!(draft.song_title, "Índios");
        assert_eq!(draft.artist_name, "Legião Urbana");
    }

    #[test]
    fn tuning_labels() {
        let drop_d = parse_tuning(Some("Drop D"), Instrument::Guitar).unwrap();
        assert_eq!(drop_d.strings, ["D", "A", "D", "G", "B", "E"]);
        assert_eq!(drop_d.name, "Drop D");

        let notes = parse_tuning(Some("D G C F A D"), Instrument::Guitar).unwrap();
        assert!(notes.derived_name);
        assert_eq!(notes.name, "D G C F A D");

        let whole = parse_tuning(Some("Um tom abaixo"), Instrument::Bass).unwrap();
        assert_eq!(whole.strings, ["D", "G", "C", "F"]);

        assert_eq!(
            parse_tuning(Some("???"), Instrument::Ukulele),
            TuningDraft::standard(Instrument::Ukulele)
        );
        assert!(parse_tuning(Some("Drop D"), Instrument::Drums).is_none());
    }

    #[test]
    fn non_latin_names_are_skipped() {
        let html = "<html><head><title>Группа крови - Кино - Cifra Club</title></head>\
                    <body><pre>Am C</pre></body></html>";
        let err = parse(html, "https://www.cifraclub.com.br/kino/gruppa-krovi/").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Skipped);
    }

    #[test]
    fn no_content_and_no_lyrics_is_a_parse_error() {
        let html = "<html><head><title>Tempo Perdido - Legião Urbana - Cifra Club</title></head><body></body></html>";
        let err = parse(html, SONG_URL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn companion_only_when_content_missing() {
        let url = Url::parse(SONG_URL).unwrap();
        assert!(CifraClubParser.companion_url(&chords_page(), &url).is_none());

        let bare = "<html><head><title>Tempo Perdido - Legião Urbana - Cifra Club</title></head><body></body></html>";
        assert_eq!(
            CifraClubParser.companion_url(bare, &url).unwrap().as_str(),
            "https://www.letras.mus.br/legiao-urbana/tempo-perdido/"
        );
    }

    #[tokio::test]
    async fn lyrics_companion_produces_lyrics_draft() {
        let bare = "<html><head><title>Tempo Perdido - Legião Urbana - Cifra Club</title></head><body></body></html>";
        let lyrics = "<html><body><div class=\"lyric-original\">\
                      <p>Todos os dias quando acordo<br>Não tenho mais</p>\
                      <p>O tempo que passou</p></div></body></html>";
        let fetcher = StaticFetcher::default()
            .with_page(SONG_URL, bare)
            .with_page("https://www.letras.mus.br/legiao-urbana/tempo-perdido/", lyrics);

        let draft = scrape_tab(&fetcher, SONG_URL).await.unwrap();
        assert_eq!(draft.tab_type, Some(TabType::Lyrics));
        assert_eq!(
            draft.content,
            "Todos os dias quando acordo\nNão tenho mais\n\nO tempo que passou"
        );
        assert_eq!(draft.tuning, TuningDraft::standard(Instrument::Guitar));
        assert_eq!(fetcher.requested().len(), 2);
    }
}
