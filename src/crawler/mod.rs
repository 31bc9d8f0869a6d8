// src/crawler/mod.rs

mod content;
mod error;
mod fetcher;
pub mod importer;
mod language;
pub mod listing;
mod page_state;
mod parser_cifraclub;
mod parser_ultimate_guitar;
pub mod selector;

pub use error::{CrawlError, ErrorKind};
pub use fetcher::{Fetch, HttpFetcher, Politeness};
pub use language::{is_allowed_script, is_printable_ascii};

use parser_cifraclub::CifraClubParser;
use parser_ultimate_guitar::UltimateGuitarParser;

use serde::{Deserialize, Serialize};
use url::Url;

/// 楽器 (ソースが曖昧な場合もデフォルトで必ず解決する)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Guitar,
    Bass,
    Ukulele,
    Drums,
    Cavaquinho,
}

impl Instrument {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Guitar => "guitar",
            Instrument::Bass => "bass",
            Instrument::Ukulele => "ukulele",
            Instrument::Drums => "drums",
            Instrument::Cavaquinho => "cavaquinho",
        }
    }

    /// 標準チューニング (低音弦 → 高音弦)。ドラムには無い
    pub fn standard_strings(&self) -> Option<&'static [&'static str]> {
        match self {
            Instrument::Guitar => Some(&["E", "A", "D", "G", "B", "E"]),
            Instrument::Bass => Some(&["E", "A", "D", "G"]),
            Instrument::Ukulele => Some(&["G", "C", "E", "A"]),
            Instrument::Cavaquinho => Some(&["D", "G", "B", "D"]),
            Instrument::Drums => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabType {
    Chords,
    Tab,
    Lyrics,
}

impl TabType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TabType::Chords => "chords",
            TabType::Tab => "tab",
            TabType::Lyrics => "lyrics",
        }
    }
}

/// チューニング名 + 弦の音名 (低音 → 高音)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningDraft {
    pub name: String,
    pub strings: Vec<String>,
    /// 名前が人手で付けられたものではなく、弦の並びから自動生成されたもの
    pub derived_name: bool,
}

impl TuningDraft {
    pub fn named(name: impl Into<String>, strings: Vec<String>) -> Self {
        Self {
            name: name.into(),
            strings,
            derived_name: false,
        }
    }

    pub fn derived(strings: Vec<String>) -> Self {
        Self {
            name: strings.join(" "),
            strings,
            derived_name: true,
        }
    }

    pub fn standard(instrument: Instrument) -> Option<Self> {
        instrument.standard_strings().map(|strings| {
            Self::named(
                "Standard",
                strings.iter().map(|s| s.to_string()).collect(),
            )
        })
    }

    /// DB保存用の弦表現 ("E A D G B E")
    pub fn strings_key(&self) -> String {
        self.strings.join(" ")
    }
}

/// 取得したタブページ1件から抽出した正規化済みレコード (永続化はしない)
#[derive(Debug, Clone, PartialEq)]
pub struct TabDraft {
    pub source_url: String,
    pub artist_name: String,
    pub song_title: String,
    pub genre: Option<String>,
    pub instrument: Instrument,
    pub tab_type: Option<TabType>,
    pub content: String,
    pub difficulty: Option<String>,
    pub capo: Option<i64>,
    pub key: Option<String>,
    pub rating: Option<f64>,
    pub rating_count: Option<i64>,
    pub views_count: Option<i64>,
    pub version_name: Option<String>,
    pub tuning: Option<TuningDraft>,
    pub youtube_lesson_url: Option<String>,
    pub youtube_music_url: Option<String>,
}

impl TabDraft {
    /// content は空でなく、ドラム以外はチューニング必須
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.content.trim().is_empty() {
            return Err(CrawlError::Parse(format!(
                "empty tab content for {}",
                self.source_url
            )));
        }
        if self.tuning.is_none() && self.instrument != Instrument::Drums {
            return Err(CrawlError::Contract(format!(
                "missing tuning for {} tab {}",
                self.instrument.as_str(),
                self.source_url
            )));
        }
        Ok(())
    }
}

/// 一覧ページから得た候補 (Selector が即座に消費する)
#[derive(Debug, Clone, PartialEq)]
pub struct ListingCandidate {
    pub song_title: String,
    pub tab_url: String,
    /// 正規化済みの種別ラベル ("chords", "tab", "bass", ...)
    pub kind: String,
    pub rating: f64,
    pub rating_count: u32,
    pub version_name: Option<String>,
}

/// ページネーションの状態。`total_pages` が None なら総ページ数は推定モード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    pub current_page: u32,
    pub total_pages: Option<u32>,
    pub next_url: Option<String>,
}

impl PaginationState {
    pub fn single() -> Self {
        Self {
            current_page: 1,
            total_pages: Some(1),
            next_url: None,
        }
    }

    /// 明示的なシグナルから次ページの有無を判定する (推定モードでは None)
    pub fn has_more(&self) -> Option<bool> {
        if self.next_url.is_some() {
            return Some(true);
        }
        self.total_pages.map(|total| self.current_page < total)
    }
}

/// 対象サイト
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    UltimateGuitar,
    CifraClub,
}

impl Site {
    pub fn from_url(url: &Url) -> Result<Self, CrawlError> {
        let host = url.host_str().unwrap_or_default();
        if host.ends_with("ultimate-guitar.com") {
            Ok(Site::UltimateGuitar)
        } else if host.ends_with("cifraclub.com.br") || host.ends_with("letras.mus.br") {
            Ok(Site::CifraClub)
        } else {
            tracing::warn!("No parser found for host: {}", host);
            Err(CrawlError::NoParserFound(url.to_string()))
        }
    }
}

/// すべてのタブページパーサーのための共通トレイト
trait TabParser
where
    Self: Send + Sync,
{
    /// ページ (と必要なら補助ページ) から TabDraft を抽出する
    fn parse_tab(
        &self,
        html: &str,
        url: &Url,
        companion_html: Option<&str>,
    ) -> Result<TabDraft, CrawlError>;

    /// 本文が無いページに対して取得すべき補助ページ
    fn companion_url(&self, _html: &str, _url: &Url) -> Option<Url> {
        None
    }
}

/// URLのホスト名に基づいて適切なパーサーを選択する
fn get_parser(url: &Url) -> Result<Box<dyn TabParser>, CrawlError> {
    match Site::from_url(url)? {
        Site::UltimateGuitar => {
            tracing::debug!("Using UltimateGuitarParser for: {}", url);
            Ok(Box::new(UltimateGuitarParser))
        }
        Site::CifraClub => {
            tracing::debug!("Using CifraClubParser for: {}", url);
            Ok(Box::new(CifraClubParser))
        }
    }
}

/// タブページを取得してパースし、検証済みの TabDraft を返す
pub async fn scrape_tab<F: Fetch>(fetcher: &F, url_str: &str) -> Result<TabDraft, CrawlError> {
    let url = Url::parse(url_str)?;
    let parser = get_parser(&url)?;

    let html = fetcher.fetch(&url).await?;

    let companion_html = match parser.companion_url(&html, &url) {
        Some(companion) => {
            tracing::info!("No tab content on {}, fetching {}", url, companion);
            Some(fetcher.fetch(&companion).await?)
        }
        None => None,
    };

    let draft = parser.parse_tab(&html, &url, companion_html.as_deref())?;
    draft.validate()?;
    Ok(draft)
}

/// フィールドごとの抽出関数 (フォールバックの各段) を順に試し、最初の空でない結果を返す
pub(crate) fn first_non_empty<C, F>(ctx: &C, extractors: &[F]) -> Option<String>
where
    F: Fn(&C) -> Option<String>,
{
    extractors
        .iter()
        .filter_map(|extract| extract(ctx))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// 空でないパスセグメントの index 番目
pub(crate) fn url_segment(url: &Url, index: usize) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .nth(index)
        .map(str::to_string)
}

/// URLスラッグを表示名に戻す ("red-hot-chili-peppers" → "Red Hot Chili Peppers")
pub(crate) fn humanize_slug(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 比較・照合用のキー: ASCII化 + 小文字化 + 英数字以外を単一空白に
pub fn match_key(s: &str) -> String {
    deunicode::deunicode(s)
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
