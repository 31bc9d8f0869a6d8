// src/crawler/listing.rs
//! 一覧ページ (バンド索引・バンドのタブ一覧) のスクレイパーとページ送り

use super::page_state::{self, f64_at, i64_at, str_at};
use super::parser_ultimate_guitar::page_data;
use super::selector::{normalize_type, split_version};
use super::{
    CrawlError, Fetch, ListingCandidate, PaginationState, Politeness, Site, humanize_slug,
    is_printable_ascii,
};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

const BAND_INDEX_ROOT: &str = "https://www.ultimate-guitar.com/bands/";

/// 数字で始まるバンドのバケット
pub const DIGIT_BUCKET: &str = "0-9";

/// Cifra Club のアーティストページの曲リンク (先に一致したものを使う)
static SONG_LINK_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["#js-a-songs a", "ul.list-links a"]
        .iter()
        .map(|s| Selector::parse(s).expect("Failed to parse song link selector"))
        .collect()
});

/// バンド索引の1エントリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandEntry {
    pub name: String,
    pub url: String,
    pub tab_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandIndexPage {
    pub bands: Vec<BandEntry>,
    pub pagination: PaginationState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabListingPage {
    pub candidates: Vec<ListingCandidate>,
    pub pagination: PaginationState,
}

/// アルファベット巡回のバケット ("0-9", "a" .. "z")
pub fn alphabet_buckets() -> Vec<String> {
    std::iter::once(DIGIT_BUCKET.to_string())
        .chain(('a'..='z').map(String::from))
        .collect()
}

/// `/bands/<bucket>.htm`、2ページ目以降は `/bands/<bucket><N>.htm`
pub fn band_index_url(bucket: &str, page: u32) -> Result<Url, CrawlError> {
    let file = if page <= 1 {
        format!("{}.htm", bucket)
    } else {
        format!("{}{}.htm", bucket, page)
    };
    Ok(Url::parse(BAND_INDEX_ROOT)?.join(&file)?)
}

/// バンドのタブ一覧の N ページ目 (`?page=N`、1ページ目はクエリ無し)
pub fn band_page_url(band_url: &Url, page: u32) -> Url {
    let others: Vec<(String, String)> = band_url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = band_url.clone();
    url.set_query(None);
    if !others.is_empty() || page > 1 {
        let mut pairs = url.query_pairs_mut();
        pairs.extend_pairs(others);
        if page > 1 {
            pairs.append_pair("page", &page.to_string());
        }
    }
    url
}

// --- バンド索引 (Ultimate Guitar) ---

/// 索引ページを取得し、人気度と ASCII 名で絞り込んだバンドを返す
pub async fn scrape_band_index<F: Fetch>(
    fetcher: &F,
    bucket: &str,
    page: u32,
    min_tabs: u32,
) -> Result<BandIndexPage, CrawlError> {
    let url = band_index_url(bucket, page)?;
    let html = fetcher.fetch(&url).await?;
    parse_band_index(&html, &url, page, min_tabs)
}

fn parse_band_index(
    html: &str,
    url: &Url,
    page: u32,
    min_tabs: u32,
) -> Result<BandIndexPage, CrawlError> {
    let state = page_state::extract(html)?;
    let data = page_data(&state)
        .ok_or_else(|| CrawlError::Parse(format!("page data missing on {}", url)))?;
    let artists = data
        .get("artists")
        .and_then(Value::as_array)
        .ok_or_else(|| CrawlError::Parse(format!("artist list missing on {}", url)))?;

    let mut bands = Vec::new();
    for artist in artists {
        let (Some(name), Some(artist_url)) =
            (str_at(artist, "/name"), str_at(artist, "/artist_url"))
        else {
            tracing::warn!("Skipping malformed artist entry on {}", url);
            continue;
        };
        let tab_count = i64_at(artist, "/tabscount").map_or(0, clamp_u32);
        if tab_count < min_tabs {
            continue;
        }
        if !is_printable_ascii(&name) {
            tracing::debug!("Skipping non-ASCII band name: {}", name);
            continue;
        }
        let band_url = match url.join(&artist_url) {
            Ok(joined) => joined.to_string(),
            Err(e) => {
                tracing::warn!("Skipping band {} with bad URL {:?}: {}", name, artist_url, e);
                continue;
            }
        };
        bands.push(BandEntry {
            name,
            url: band_url,
            tab_count,
        });
    }

    let total_pages = i64_at(data, "/page_count")
        .or_else(|| i64_at(data, "/pagination/total"))
        .map(clamp_u32);
    let current_page = i64_at(data, "/pagination/current").map_or(page, clamp_u32);

    Ok(BandIndexPage {
        bands,
        pagination: PaginationState {
            current_page,
            total_pages,
            next_url: None,
        },
    })
}

// --- バンドのタブ一覧 ---

/// バンドのタブ一覧1ページ分をサイトに応じて読む
pub async fn scrape_tab_listing<F: Fetch>(
    fetcher: &F,
    url: &Url,
) -> Result<TabListingPage, CrawlError> {
    let site = Site::from_url(url)?;
    let html = fetcher.fetch(url).await?;
    match site {
        Site::UltimateGuitar => parse_ug_tab_listing(&html, url),
        Site::CifraClub => parse_cifra_tab_listing(&html, url),
    }
}

fn parse_ug_tab_listing(html: &str, url: &Url) -> Result<TabListingPage, CrawlError> {
    let state = page_state::extract(html)?;
    let data = page_data(&state)
        .ok_or_else(|| CrawlError::Parse(format!("page data missing on {}", url)))?;
    let tabs = data
        .get("other_tabs")
        .or_else(|| data.get("tabs"))
        .and_then(Value::as_array)
        .ok_or_else(|| CrawlError::Parse(format!("tab list missing on {}", url)))?;

    let candidates = tabs
        .iter()
        .filter_map(|tab| ug_candidate(tab, url))
        .collect();

    let requested_page = url
        .query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(1);
    let next_url = str_at(data, "/next_page_url")
        .and_then(|next| url.join(&next).ok())
        .map(|next| next.to_string());

    Ok(TabListingPage {
        candidates,
        pagination: PaginationState {
            current_page: i64_at(data, "/pagination/current").map_or(requested_page, clamp_u32),
            total_pages: i64_at(data, "/pagination/total").map(clamp_u32),
            next_url,
        },
    })
}

fn ug_candidate(tab: &Value, base: &Url) -> Option<ListingCandidate> {
    let title = str_at(tab, "/song_name")?;
    let tab_url = base.join(&str_at(tab, "/tab_url")?).ok()?;
    let label = str_at(tab, "/type")
        .or_else(|| str_at(tab, "/type_name"))
        .unwrap_or_default();
    let (song_title, title_version) = split_version(&title);

    Some(ListingCandidate {
        song_title,
        tab_url: tab_url.to_string(),
        kind: normalize_type(&label),
        rating: f64_at(tab, "/rating").unwrap_or(0.0).clamp(0.0, 5.0),
        rating_count: i64_at(tab, "/votes").map_or(0, clamp_u32),
        version_name: title_version.or_else(|| str_at(tab, "/part").map(|p| humanize_slug(&p))),
    })
}

/// Cifra Club は1ページの曲リンク一覧。評価は無いので 0.0 / 0 票
fn parse_cifra_tab_listing(html: &str, url: &Url) -> Result<TabListingPage, CrawlError> {
    let document = Html::parse_document(html);
    let band_path = url.path().trim_end_matches('/').to_string();

    for selector in SONG_LINK_SELECTORS.iter() {
        let mut seen = HashSet::new();
        let candidates: Vec<ListingCandidate> = document
            .select(selector)
            .filter_map(|link| {
                let href = link.value().attr("href")?;
                let song_url = url.join(href).ok()?;
                let song_path = song_url.path().trim_end_matches('/');
                if song_url.host_str() != url.host_str()
                    || song_path == band_path
                    || !song_path.starts_with(&format!("{}/", band_path))
                {
                    return None;
                }
                let text = link.text().collect::<String>();
                let (song_title, version_name) =
                    split_version(&text.split_whitespace().collect::<Vec<_>>().join(" "));
                if song_title.is_empty() || !seen.insert(song_url.to_string()) {
                    return None;
                }
                Some(ListingCandidate {
                    song_title,
                    tab_url: song_url.to_string(),
                    kind: "chords".to_string(),
                    rating: 0.0,
                    rating_count: 0,
                    version_name,
                })
            })
            .collect();
        if !candidates.is_empty() {
            return Ok(TabListingPage {
                candidates,
                pagination: PaginationState::single(),
            });
        }
    }

    Err(CrawlError::Parse(format!("no song links found on {}", url)))
}

/// バンドのタブ一覧を全ページ読み、重複を除いた候補を返す。
///
/// 明示的なページ数/次ページがあればそれに従い、無ければ新しい項目が増える間だけ進む。
/// 先頭項目が既出・空ページ・ページ上限のいずれかで止まる
pub async fn collect_band_tabs<F: Fetch>(
    fetcher: &F,
    band_url: &Url,
    max_pages: u32,
    politeness: &Politeness,
) -> Result<Vec<ListingCandidate>, CrawlError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut collected = Vec::new();
    let mut page = 1;
    let mut url = band_page_url(band_url, page);

    loop {
        let listing = scrape_tab_listing(fetcher, &url).await?;

        let Some(first) = listing.candidates.first() else {
            tracing::info!("Empty listing page {} for {}, stopping", page, band_url);
            break;
        };
        if page > 1 && seen.contains(&first.tab_url) {
            tracing::info!(
                "Listing page {} for {} repeats an earlier page, stopping",
                page,
                band_url
            );
            break;
        }

        let before = seen.len();
        for candidate in listing.candidates {
            if seen.insert(candidate.tab_url.clone()) {
                collected.push(candidate);
            }
        }
        let added = seen.len() - before;

        match listing.pagination.has_more() {
            Some(false) => break,
            None if added == 0 => {
                tracing::info!("Listing page {} for {} added nothing, stopping", page, band_url);
                break;
            }
            _ => {}
        }
        if page >= max_pages {
            tracing::warn!("Reached page ceiling ({}) for {}", max_pages, band_url);
            break;
        }

        politeness.pause().await;
        page += 1;
        url = match listing.pagination.next_url.as_deref().map(Url::parse) {
            Some(Ok(next)) => next,
            _ => band_page_url(band_url, page),
        };
    }

    tracing::info!(
        "Collected {} listing candidates across {} page(s) for {}",
        collected.len(),
        page,
        band_url
    );
    Ok(collected)
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::ErrorKind;
    use crate::crawler::testing::{StaticFetcher, js_store_page};
    use serde_json::json;

    const BAND_URL: &str = "https://www.ultimate-guitar.com/artist/oasis_6764";

    fn tab(title: &str, id: u32, rating: f64, votes: u32) -> Value {
        json!({
            "song_name": title,
            "tab_url": format!("https://tabs.ultimate-guitar.com/tab/oasis/song-chords-{}", id),
            "type": "Chords",
            "rating": rating,
            "votes": votes,
        })
    }

    fn listing_page(tabs: Vec<Value>, pagination: Option<(u32, u32)>) -> String {
        let mut data = json!({ "other_tabs": tabs });
        if let Some((current, total)) = pagination {
            data["pagination"] = json!({ "current": current, "total": total });
        }
        js_store_page(&json!({ "store": { "page": { "data": data } } }))
    }

    #[test]
    fn index_urls() {
        assert_eq!(
            band_index_url("a", 1).unwrap().as_str(),
            "https://www.ultimate-guitar.com/bands/a.htm"
        );
        assert_eq!(
            band_index_url("0-9", 3).unwrap().as_str(),
            "https://www.ultimate-guitar.com/bands/0-93.htm"
        );
        let buckets = alphabet_buckets();
        assert_eq!(buckets.len(), 27);
        assert_eq!(buckets[0], "0-9");
        assert_eq!(buckets[26], "z");
    }

    #[test]
    fn band_page_urls_replace_page_param() {
        let band = Url::parse("https://www.ultimate-guitar.com/artist/oasis_6764?page=4&order=rating")
            .unwrap();
        assert_eq!(
            band_page_url(&band, 2).as_str(),
            "https://www.ultimate-guitar.com/artist/oasis_6764?order=rating&page=2"
        );
        assert_eq!(
            band_page_url(&band, 1).as_str(),
            "https://www.ultimate-guitar.com/artist/oasis_6764?order=rating"
        );
        let plain = Url::parse(BAND_URL).unwrap();
        assert_eq!(band_page_url(&plain, 1), plain);
    }

    #[tokio::test]
    async fn band_index_filters_by_popularity_and_ascii() {
        let page = js_store_page(&json!({
            "store": { "page": { "data": {
                "artists": [
                    { "name": "Oasis", "artist_url": "/artist/oasis_6764", "tabscount": 812 },
                    { "name": "Obscure Band", "artist_url": "/artist/obscure_1", "tabscount": 3 },
                    { "name": "Океан Ельзи", "artist_url": "/artist/okean_2", "tabscount": 300 },
                    { "name": "Beyoncé", "artist_url": "/artist/beyonce_3", "tabscount": 120 },
                    { "name": "Broken" }
                ],
                "page_count": 4
            } } }
        }));
        let fetcher =
            StaticFetcher::default().with_page("https://www.ultimate-guitar.com/bands/o2.htm", page);

        let index = scrape_band_index(&fetcher, "o", 2, 20).await.unwrap();
        assert_eq!(
            index.bands,
            vec![BandEntry {
                name: "Oasis".into(),
                url: BAND_URL.into(),
                tab_count: 812,
            }]
        );
        assert_eq!(index.pagination.current_page, 2);
        assert_eq!(index.pagination.total_pages, Some(4));
        assert_eq!(index.pagination.has_more(), Some(true));
    }

    #[tokio::test]
    async fn ug_listing_reads_candidates() {
        let page = listing_page(
            vec![
                tab("Wonderwall (ver 2)", 1, 4.5, 200),
                tab("Wonderwall (Acoustic)", 2, 4.1, 30),
                json!({ "song_name": "No URL" }),
            ],
            Some((1, 1)),
        );
        let fetcher = StaticFetcher::default().with_page(BAND_URL, page);

        let listing = scrape_tab_listing(&fetcher, &Url::parse(BAND_URL).unwrap())
            .await
            .unwrap();
        assert_eq!(listing.candidates.len(), 2);
        assert_eq!(listing.candidates[0].song_title, "Wonderwall");
        assert_eq!(listing.candidates[0].kind, "chords");
        assert_eq!(listing.candidates[0].rating_count, 200);
        assert_eq!(listing.candidates[1].version_name.as_deref(), Some("Acoustic"));
        assert_eq!(listing.pagination, PaginationState::single());
    }

    #[tokio::test]
    async fn cifra_listing_keeps_band_links_only() {
        let html = r#"<html><body><ul id="js-a-songs">
            <li><a href="/legiao-urbana/tempo-perdido/">Tempo Perdido</a></li>
            <li><a href="/legiao-urbana/indios/"> Índios </a></li>
            <li><a href="/legiao-urbana/tempo-perdido/">Tempo Perdido</a></li>
            <li><a href="/outra-banda/musica/">Outra</a></li>
            <li><a href="https://www.letras.mus.br/legiao-urbana/indios/">Letra</a></li>
        </ul></body></html>"#;
        let band = "https://www.cifraclub.com.br/legiao-urbana/";
        let fetcher = StaticFetcher::default().with_page(band, html);

        let listing = scrape_tab_listing(&fetcher, &Url::parse(band).unwrap())
            .await
            .unwrap();
        let urls: Vec<&str> = listing.candidates.iter().map(|c| c.tab_url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://www.cifraclub.com.br/legiao-urbana/tempo-perdido/",
                "https://www.cifraclub.com.br/legiao-urbana/indios/",
            ]
        );
        assert_eq!(listing.candidates[1].song_title, "Índios");
        assert_eq!(listing.candidates[0].rating, 0.0);
        assert_eq!(listing.pagination.has_more(), Some(false));
    }

    #[tokio::test]
    async fn missing_listing_state_is_a_parse_error() {
        let fetcher = StaticFetcher::default().with_page(BAND_URL, "<html>Just a moment...</html>");
        let err = scrape_tab_listing(&fetcher, &Url::parse(BAND_URL).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn repeated_first_item_stops_pagination() {
        let first = listing_page(vec![tab("A", 1, 4.0, 10), tab("B", 2, 4.0, 10)], None);
        let fetcher = StaticFetcher::default()
            .with_page(BAND_URL, first.clone())
            .with_page(&format!("{}?page=2", BAND_URL), first.clone())
            .with_page(&format!("{}?page=3", BAND_URL), first);

        let band = Url::parse(BAND_URL).unwrap();
        let tabs = collect_band_tabs(&fetcher, &band, 20, &Politeness::none())
            .await
            .unwrap();
        assert_eq!(tabs.len(), 2);
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn explicit_total_is_followed() {
        let fetcher = StaticFetcher::default()
            .with_page(BAND_URL, listing_page(vec![tab("A", 1, 4.0, 10)], Some((1, 2))))
            .with_page(
                &format!("{}?page=2", BAND_URL),
                listing_page(vec![tab("B", 2, 4.0, 10)], Some((2, 2))),
            );

        let band = Url::parse(BAND_URL).unwrap();
        let tabs = collect_band_tabs(&fetcher, &band, 20, &Politeness::none())
            .await
            .unwrap();
        assert_eq!(tabs.len(), 2);
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn page_ceiling_breaks_endless_listings() {
        let mut fetcher = StaticFetcher::default().with_page(
            BAND_URL,
            listing_page(vec![tab("T1", 1, 4.0, 10)], None),
        );
        for page in 2..=5 {
            fetcher = fetcher.with_page(
                &format!("{}?page={}", BAND_URL, page),
                listing_page(vec![tab(&format!("T{}", page), page, 4.0, 10)], None),
            );
        }

        let band = Url::parse(BAND_URL).unwrap();
        let tabs = collect_band_tabs(&fetcher, &band, 3, &Politeness::none())
            .await
            .unwrap();
        assert_eq!(tabs.len(), 3);
        assert_eq!(fetcher.requested().len(), 3);
    }

    #[tokio::test]
    async fn empty_page_ends_inferred_pagination() {
        let fetcher = StaticFetcher::default()
            .with_page(BAND_URL, listing_page(vec![tab("A", 1, 4.0, 10)], None))
            .with_page(&format!("{}?page=2", BAND_URL), listing_page(vec![], None));

        let band = Url::parse(BAND_URL).unwrap();
        let tabs = collect_band_tabs(&fetcher, &band, 20, &Politeness::none())
            .await
            .unwrap();
        assert_eq!(tabs.len(), 1);
    }
}
