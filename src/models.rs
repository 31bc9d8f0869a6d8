// models.rs
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::crawler::Site;
use crate::jobs::Job;

// 1. クロールの起点の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CrawlKind {
    /// バンド索引をアルファベット順に巡回
    Alphabet,
    /// 1バンドのタブ一覧から
    Band,
    /// タブページ1件だけ
    Tab,
}

// 2. クロール開始 (POST /admin/crawl) のペイロード
#[derive(Debug, Deserialize, ToSchema)]
pub struct CrawlPayload {
    pub kind: CrawlKind,
    /// `band` / `tab` のとき必須
    pub url: Option<String>,
}

impl CrawlPayload {
    /// 起点となるジョブに変換する (URLは対応サイトのものに限る)
    pub fn into_job(self) -> Result<Job, String> {
        if self.kind == CrawlKind::Alphabet {
            return Ok(Job::AlphabetSweep);
        }

        let raw = self
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| "url is required for band and tab crawls".to_string())?;
        let url = Url::parse(&raw).map_err(|e| format!("invalid url {:?}: {}", raw, e))?;
        Site::from_url(&url).map_err(|e| e.to_string())?;

        let url = url.to_string();
        Ok(match self.kind {
            CrawlKind::Band => Job::Band { url },
            _ => Job::TabImport { url },
        })
    }
}

// クロール受付時に返す
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CrawlResponse {
    pub job_id: i64,
    pub job: String,
    pub message: String,
}

// ジョブの状態ごとの件数
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobStatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobStats {
    pub total: i64,
    pub by_status: Vec<JobStatusCount>,
}

// カタログの件数 (GET /admin/catalog)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct CatalogStats {
    pub artists: i64,
    pub songs: i64,
    pub tunings: i64,
    pub tabs: i64,
}
