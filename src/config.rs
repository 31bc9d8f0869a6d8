// src/config.rs
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// 環境変数から読み込むアプリケーション設定
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// 未設定なら管理APIは常に 401 を返す
    pub admin_token: Option<String>,
    pub workers: usize,
    pub crawl: CrawlSettings,
    pub http: HttpSettings,
}

/// クロールの閾値・上限・遅延
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// バンド発見時の人気度 (タブ数) の下限
    pub min_band_tabs: u32,
    /// 2件以上のグループの勝者に課す最低評価
    pub min_rating: f64,
    pub max_listing_pages: u32,
    pub max_band_pages: u32,
    pub stagger: Duration,
    pub politeness_min: Duration,
    pub politeness_max: Duration,
}

/// 外向き HTTP の設定
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub ultimate_guitar_cookies: Option<String>,
    pub cifraclub_cookies: Option<String>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            min_band_tabs: 20,
            min_rating: 3.0,
            max_listing_pages: 50,
            max_band_pages: 20,
            stagger: Duration::from_secs(5),
            politeness_min: Duration::from_millis(500),
            politeness_max: Duration::from_millis(1500),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            ultimate_guitar_cookies: None,
            cifraclub_cookies: None,
        }
    }
}

impl Config {
    /// `.env` 読み込み後の環境変数から設定を構築する (未設定・不正値はデフォルト)
    pub fn from_env() -> Self {
        let crawl_defaults = CrawlSettings::default();
        let http_defaults = HttpSettings::default();

        let crawl = CrawlSettings {
            min_band_tabs: env_parse("MIN_BAND_TABS", crawl_defaults.min_band_tabs),
            min_rating: env_parse("MIN_RATING", crawl_defaults.min_rating),
            max_listing_pages: env_parse("MAX_LISTING_PAGES", crawl_defaults.max_listing_pages),
            max_band_pages: env_parse("MAX_BAND_PAGES", crawl_defaults.max_band_pages),
            stagger: Duration::from_secs(env_parse("STAGGER_SECS", 5)),
            politeness_min: Duration::from_millis(env_parse("POLITENESS_MIN_MS", 500)),
            politeness_max: Duration::from_millis(env_parse("POLITENESS_MAX_MS", 1500)),
        };

        let http = HttpSettings {
            user_agent: std::env::var("USER_AGENT").unwrap_or(http_defaults.user_agent),
            timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 20)),
            connect_timeout: http_defaults.connect_timeout,
            ultimate_guitar_cookies: env_opt("ULTIMATE_GUITAR_COOKIES"),
            cifraclub_cookies: env_opt("CIFRACLUB_COOKIES"),
        };

        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./tabs.sqlite".to_string()),
            port: env_parse("PORT", 3000),
            admin_token: env_opt("ADMIN_TOKEN"),
            workers: env_parse("WORKERS", 4usize).max(1),
            crawl,
            http,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
