// src/jobs/mod.rs
//! クロールのジョブ (永続キューに JSON で保存する)

pub mod orchestrator;
pub mod policy;
pub mod queue;
pub mod worker;

use serde::{Deserialize, Serialize};

/// ジョブグラフの各段: AlphabetSweep → ListingPage → Band → PaginatedTabs → TabImport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    AlphabetSweep,
    ListingPage { letter: String, page: u32 },
    Band { url: String },
    PaginatedTabs { url: String },
    TabImport { url: String },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::AlphabetSweep => "alphabet_sweep",
            Job::ListingPage { .. } => "listing_page",
            Job::Band { .. } => "band",
            Job::PaginatedTabs { .. } => "paginated_tabs",
            Job::TabImport { .. } => "tab_import",
        }
    }

    /// 一覧系 (タブ取り込み以外) のジョブか
    pub fn is_listing(&self) -> bool {
        !matches!(self, Job::TabImport { .. })
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::AlphabetSweep => write!(f, "alphabet sweep"),
            Job::ListingPage { letter, page } => write!(f, "listing {} page {}", letter, page),
            Job::Band { url } => write!(f, "band {}", url),
            Job::PaginatedTabs { url } => write!(f, "paginated band {}", url),
            Job::TabImport { url } => write!(f, "tab {}", url),
        }
    }
}

/// キュー上のジョブの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    /// 成功 (重複による破棄も含む)
    Done,
    /// ポリシーにより除外
    Skipped,
    /// 契約違反など、リトライしない失敗
    Failed,
    /// リトライ上限に達した
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Skipped => "skipped",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }
}
