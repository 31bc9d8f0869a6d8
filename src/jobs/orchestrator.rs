// src/jobs/orchestrator.rs
//! クロールのジョブグラフを1ジョブずつ進める。
//!
//! 各段は後続ジョブをずらした遅延付きでキューに積むだけで、
//! ジョブ間でプロセス内の状態は共有しない。

use super::Job;
use super::queue::JobQueue;
use crate::config::CrawlSettings;
use crate::crawler::importer::{already_imported, import};
use crate::crawler::listing::{
    alphabet_buckets, band_page_url, collect_band_tabs, scrape_band_index, scrape_tab_listing,
};
use crate::crawler::selector::select;
use crate::crawler::{CrawlError, Fetch, ListingCandidate, Politeness, is_allowed_script, scrape_tab};
use sqlx::SqlitePool;
use std::time::Duration;
use url::Url;

pub struct Orchestrator<F, Q> {
    fetcher: F,
    queue: Q,
    pool: SqlitePool,
    settings: CrawlSettings,
    politeness: Politeness,
}

impl<F: Fetch, Q: JobQueue> Orchestrator<F, Q> {
    pub fn new(fetcher: F, queue: Q, pool: SqlitePool, settings: CrawlSettings) -> Self {
        let politeness = Politeness::new(settings.politeness_min, settings.politeness_max);
        Self {
            fetcher,
            queue,
            pool,
            settings,
            politeness,
        }
    }

    /// ジョブを1件実行する。失敗の扱いは呼び出し側がポリシー表で決める
    pub async fn run(&self, job: &Job) -> Result<(), CrawlError> {
        match job {
            Job::AlphabetSweep => self.alphabet_sweep().await,
            Job::ListingPage { letter, page } => self.listing_page(letter, *page).await,
            Job::Band { url } => self.band(url).await,
            Job::PaginatedTabs { url } => self.paginated_tabs(url).await,
            Job::TabImport { url } => self.tab_import(url).await,
        }
    }

    /// 同じ段の n 番目のジョブに与える遅延
    fn stagger(&self, index: usize) -> Duration {
        self.settings
            .stagger
            .saturating_mul(u32::try_from(index).unwrap_or(u32::MAX))
    }

    async fn alphabet_sweep(&self) -> Result<(), CrawlError> {
        let buckets = alphabet_buckets();
        for (i, bucket) in buckets.iter().enumerate() {
            let job = Job::ListingPage {
                letter: bucket.clone(),
                page: 1,
            };
            self.queue.enqueue(&job, self.stagger(i)).await?;
        }
        tracing::info!("Alphabet sweep queued {} listing buckets", buckets.len());
        Ok(())
    }

    async fn listing_page(&self, letter: &str, page: u32) -> Result<(), CrawlError> {
        let index =
            scrape_band_index(&self.fetcher, letter, page, self.settings.min_band_tabs).await?;

        for (i, band) in index.bands.iter().enumerate() {
            let job = Job::Band {
                url: band.url.clone(),
            };
            self.queue.enqueue(&job, self.stagger(i)).await?;
        }

        let has_more = index.pagination.has_more().unwrap_or(false);
        if has_more && page < self.settings.max_listing_pages {
            let next = Job::ListingPage {
                letter: letter.to_string(),
                page: page + 1,
            };
            self.queue
                .enqueue(&next, self.stagger(index.bands.len() + 1))
                .await?;
        } else if has_more {
            tracing::info!(
                "Listing {} reached the page cap ({}), stopping",
                letter,
                self.settings.max_listing_pages
            );
        } else {
            tracing::info!("Listing {} finished at page {}", letter, page);
        }

        tracing::info!(
            "Listing {} page {}: queued {} bands",
            letter,
            page,
            index.bands.len()
        );
        self.politeness.pause().await;
        Ok(())
    }

    /// 1ページで収まるバンドはその場で選定し、複数ページなら PaginatedTabs に回す
    async fn band(&self, url: &str) -> Result<(), CrawlError> {
        let band_url = Url::parse(url)?;
        let listing = scrape_tab_listing(&self.fetcher, &band_page_url(&band_url, 1)).await?;

        if listing.pagination.has_more() == Some(false) {
            self.fan_out_tabs(url, listing.candidates).await?;
        } else {
            tracing::info!(
                "Band {} has more than one listing page ({:?} total)",
                url,
                listing.pagination.total_pages
            );
            let job = Job::PaginatedTabs {
                url: url.to_string(),
            };
            self.queue.enqueue(&job, self.settings.stagger).await?;
        }
        self.politeness.pause().await;
        Ok(())
    }

    async fn paginated_tabs(&self, url: &str) -> Result<(), CrawlError> {
        let band_url = Url::parse(url)?;
        let candidates = collect_band_tabs(
            &self.fetcher,
            &band_url,
            self.settings.max_band_pages,
            &self.politeness,
        )
        .await?;
        self.fan_out_tabs(url, candidates).await
    }

    /// 選定 → 取り込み済みの除外 → TabImport をずらして投入
    async fn fan_out_tabs(
        &self,
        band_url: &str,
        candidates: Vec<ListingCandidate>,
    ) -> Result<(), CrawlError> {
        let found = candidates.len();
        let allowed: Vec<ListingCandidate> = candidates
            .into_iter()
            .filter(|candidate| {
                let allowed = is_allowed_script(&candidate.song_title);
                if !allowed {
                    tracing::debug!("Skipping non-Latin title: {}", candidate.song_title);
                }
                allowed
            })
            .collect();

        let selected = select(allowed, self.settings.min_rating);
        let urls: Vec<String> = selected.into_iter().map(|c| c.tab_url).collect();
        let imported = already_imported(&self.pool, &urls).await?;

        let mut queued = 0;
        for url in urls.iter().filter(|url| !imported.contains(*url)) {
            let job = Job::TabImport { url: url.clone() };
            self.queue.enqueue(&job, self.stagger(queued)).await?;
            queued += 1;
        }

        tracing::info!(
            "Band {}: {} candidates, {} selected, {} already imported, {} queued",
            band_url,
            found,
            urls.len(),
            imported.len(),
            queued
        );
        Ok(())
    }

    async fn tab_import(&self, url: &str) -> Result<(), CrawlError> {
        let draft = scrape_tab(&self.fetcher, url).await?;
        import(&self.pool, &draft).await?;
        self.politeness.pause().await;
        Ok(())
    }
}
