// src/crawler/error.rs
use std::error::Error as StdError;
use std::fmt;

/// クローラー / インポーター共通のエラー型
#[derive(Debug)]
pub enum CrawlError {
    Fetch(reqwest::Error),
    Http { url: String, status: u16 },
    UnsupportedScheme(String),
    Parse(String),
    Skipped(String),
    Database(sqlx::Error),
    Url(url::ParseError),
    NoParserFound(String),
    Contract(String),
}

/// 失敗の分類 (リトライ/破棄ポリシーの判定に使う)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// ネットワーク / HTTP の一時的な失敗
    Fetch,
    /// 期待した構造が見つからない、または壊れている
    Parse,
    /// ポリシーにより意図的に除外した
    Skipped,
    /// 一意制約違反 (対象レコードは既に存在する)
    Duplicate,
    /// SQLite のロック競合 (時間をおけば通る)
    Busy,
    /// プログラム / 契約違反
    Fatal,
}

impl CrawlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::Fetch(_) | CrawlError::Http { .. } => ErrorKind::Fetch,
            CrawlError::Parse(_) => ErrorKind::Parse,
            CrawlError::Skipped(_) => ErrorKind::Skipped,
            CrawlError::Database(e) if is_unique_violation(e) => ErrorKind::Duplicate,
            CrawlError::Database(e) if is_busy(e) => ErrorKind::Busy,
            CrawlError::Database(_)
            | CrawlError::UnsupportedScheme(_)
            | CrawlError::Url(_)
            | CrawlError::NoParserFound(_)
            | CrawlError::Contract(_) => ErrorKind::Fatal,
        }
    }
}

/// sqlx のエラーが UNIQUE 制約違反かどうか
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED とその拡張コード、またはプールの取得待ち切れ
pub(crate) fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("5" | "6" | "261" | "262" | "517")
        ),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlError::Fetch(e) => write!(f, "Failed to fetch URL: {}", e),
            CrawlError::Http { url, status } => {
                write!(f, "HTTP error for {}: status {}", url, status)
            }
            CrawlError::UnsupportedScheme(url) => write!(f, "Unsupported URL scheme: {}", url),
            CrawlError::Parse(s) => write!(f, "Parsing error: {}", s),
            CrawlError::Skipped(s) => write!(f, "Skipped: {}", s),
            CrawlError::Database(e) => write!(f, "Database error: {}", e),
            CrawlError::Url(e) => write!(f, "Invalid URL: {}", e),
            CrawlError::NoParserFound(url) => write!(f, "No parser found for URL: {}", url),
            CrawlError::Contract(s) => write!(f, "Contract violation: {}", s),
        }
    }
}

impl StdError for CrawlError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CrawlError::Fetch(e) => Some(e),
            CrawlError::Database(e) => Some(e),
            CrawlError::Url(e) => Some(e),
            _ => None,
        }
    }
}

// --- 便利な From 実装 ---
impl From<reqwest::Error> for CrawlError {
    fn from(e: reqwest::Error) -> Self {
        CrawlError::Fetch(e)
    }
}
impl From<sqlx::Error> for CrawlError {
    fn from(e: sqlx::Error) -> Self {
        CrawlError::Database(e)
    }
}
impl From<url::ParseError> for CrawlError {
    fn from(e: url::ParseError) -> Self {
        CrawlError::Url(e)
    }
}
impl From<serde_json::Error> for CrawlError {
    fn from(e: serde_json::Error) -> Self {
        CrawlError::Parse(format!("invalid JSON: {}", e))
    }
}
impl From<scraper::error::SelectorErrorKind<'_>> for CrawlError {
    fn from(e: scraper::error::SelectorErrorKind) -> Self {
        CrawlError::Parse(e.to_string())
    }
}
