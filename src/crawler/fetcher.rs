// src/crawler/fetcher.rs
use super::{CrawlError, Site};
use crate::config::HttpSettings;

use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::future::Future;
use std::time::Duration;
use url::Url;

/// リダイレクト追跡の上限
const MAX_REDIRECTS: usize = 3;

/// 1回の GET でページ本文を取得するもの (テストでは固定ページに差し替える)
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &Url) -> impl Future<Output = Result<String, CrawlError>> + Send;
}

/// reqwest による実装。ビジネスロジックは持たない
pub struct HttpFetcher {
    client: reqwest::Client,
    ultimate_guitar_cookies: Option<HeaderValue>,
    cifraclub_cookies: Option<HeaderValue>,
}

impl HttpFetcher {
    pub fn new(settings: &HttpSettings) -> Result<Self, CrawlError> {
        Self::with_builder(reqwest::Client::builder(), settings)
    }

    fn with_builder(
        builder: reqwest::ClientBuilder,
        settings: &HttpSettings,
    ) -> Result<Self, CrawlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9,pt-BR;q=0.8"),
        );

        // Accept-Encoding は gzip/deflate 有効時に reqwest が付与し、応答も自動で展開する
        let client = builder
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .gzip(true)
            .deflate(true)
            .build()?;

        Ok(Self {
            client,
            ultimate_guitar_cookies: cookie_header(settings.ultimate_guitar_cookies.as_deref()),
            cifraclub_cookies: cookie_header(settings.cifraclub_cookies.as_deref()),
        })
    }

    fn cookies_for(&self, url: &Url) -> Option<&HeaderValue> {
        match Site::from_url(url).ok()? {
            Site::UltimateGuitar => self.ultimate_guitar_cookies.as_ref(),
            Site::CifraClub => self.cifraclub_cookies.as_ref(),
        }
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, CrawlError> {
        ensure_http(url)?;
        tracing::debug!("Fetching HTML from: {}", url);

        let mut request = self
            .client
            .get(url.as_str())
            .header(header::REFERER, referer_for(url));
        if let Some(cookies) = self.cookies_for(url) {
            request = request.header(header::COOKIE, cookies.clone());
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Failed to fetch URL {}: {}", url, status);
            return Err(CrawlError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // 文字コードは Content-Type の charset に従い、不正なバイト列は置換文字になる
        let html_content = response.text().await?;
        tracing::debug!("Fetched {} bytes from: {}", html_content.len(), url);
        Ok(html_content)
    }
}

/// ページ/タブの処理後に挟む上限付きのランダム待機
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Politeness {
    min: Duration,
    max: Duration,
}

impl Politeness {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    #[cfg(test)]
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn next_delay(&self) -> Duration {
        if self.max.is_zero() {
            return Duration::ZERO;
        }
        let min = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tracing::debug!("Politeness delay: {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }
}

fn ensure_http(url: &Url) -> Result<(), CrawlError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(CrawlError::UnsupportedScheme(url.to_string())),
    }
}

/// 対象サイトのルートを Referer にする
fn referer_for(url: &Url) -> String {
    match url.host_str() {
        Some(host) => format!("{}://{}/", url.scheme(), host),
        None => url.to_string(),
    }
}

/// "a=1; b=2" / "a=1;b=2" 形式の設定を1つの Cookie ヘッダーにまとめる
fn cookie_header(raw: Option<&str>) -> Option<HeaderValue> {
    let pairs: Vec<&str> = raw?
        .split(';')
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    match HeaderValue::from_str(&pairs.join("; ")) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring unusable cookie configuration: {}", e);
            None
        }
    }
}
