// src/jobs/queue.rs
//! SQLite 上の永続ジョブキュー (少なくとも1回の配送)。
//!
//! 取得 (claim) は1文の UPDATE ... RETURNING で行い、試行回数を進めてリースを張る。
//! リースが切れた実行中ジョブは再び取得できる。

use super::{Job, JobStatus};
use crate::crawler::CrawlError;
use chrono::Utc;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::future::Future;
use std::time::Duration;

/// ジョブの投入口 (オーケストレーターはこれだけに依存する)
pub trait JobQueue: Send + Sync {
    /// `delay` 後に実行可能になるジョブを積み、ジョブIDを返す
    fn enqueue(
        &self,
        job: &Job,
        delay: Duration,
    ) -> impl Future<Output = Result<i64, CrawlError>> + Send;
}

/// 取得したジョブ
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedJob {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub attempts: u32,
}

impl ClaimedJob {
    pub fn job(&self) -> Result<Job, CrawlError> {
        serde_json::from_str(&self.payload).map_err(|e| {
            CrawlError::Contract(format!("unreadable {} job payload: {}", self.kind, e))
        })
    }
}

/// 状態ごとの件数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 実行時刻に達したジョブを1件取り、`lease` の間だけ自分のものにする
    pub async fn claim(&self, lease: Duration) -> Result<Option<ClaimedJob>, CrawlError> {
        let now = now_millis();
        let claimed = sqlx::query_as::<_, ClaimedJob>(
            "UPDATE jobs
            SET status = 'running', attempts = attempts + 1, locked_until = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE (status = 'queued' AND run_at <= ?)
                   OR (status = 'running' AND locked_until <= ?)
                ORDER BY run_at ASC, id ASC
                LIMIT 1
            )
            RETURNING id, kind, payload, attempts",
        )
        .bind(now.saturating_add(millis(lease)))
        .bind(Utc::now().to_rfc3339())
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed)
    }

    pub async fn complete(&self, id: i64) -> Result<(), CrawlError> {
        self.finish(id, JobStatus::Done, None).await
    }

    /// 失敗したジョブを `delay` 後に再実行する
    pub async fn reschedule(&self, id: i64, delay: Duration, error: &str) -> Result<(), CrawlError> {
        sqlx::query(
            "UPDATE jobs SET status = 'queued', run_at = ?, locked_until = NULL,
                last_error = ?, updated_at = ?
            WHERE id = ?",
        )
        .bind(now_millis().saturating_add(millis(delay)))
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// リトライせずに終わらせる (skipped / done / failed / dead)
    pub async fn discard(&self, id: i64, status: JobStatus, reason: &str) -> Result<(), CrawlError> {
        self.finish(id, status, Some(reason)).await
    }

    async fn finish(&self, id: i64, status: JobStatus, reason: Option<&str>) -> Result<(), CrawlError> {
        sqlx::query(
            "UPDATE jobs SET status = ?, locked_until = NULL,
                last_error = COALESCE(?, last_error), updated_at = ?
            WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<Vec<StatusCount>, CrawlError> {
        let counts = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM jobs GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }
}

impl JobQueue for SqliteQueue {
    async fn enqueue(&self, job: &Job, delay: Duration) -> Result<i64, CrawlError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| CrawlError::Contract(format!("unserializable job {}: {}", job, e)))?;
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO jobs (kind, payload, status, attempts, run_at, created_at, updated_at)
            VALUES (?, ?, 'queued', 0, ?, ?, ?) RETURNING id",
        )
        .bind(job.kind())
        .bind(&payload)
        .bind(now_millis().saturating_add(millis(delay)))
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        tracing::debug!("Enqueued job {} ({}) in {:?}", id, job, delay);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    async fn status_of(pool: &SqlitePool, id: i64) -> (String, Option<String>) {
        sqlx::query_as("SELECT status, last_error FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn claims_due_jobs_once() {
        let pool = memory_pool().await;
        let queue = SqliteQueue::new(pool);
        let id = queue.enqueue(&Job::AlphabetSweep, Duration::ZERO).await.unwrap();
        queue
            .enqueue(&Job::Band { url: "https://b".into() }, Duration::from_secs(600))
            .await
            .unwrap();

        let claimed = queue.claim(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.job().unwrap(), Job::AlphabetSweep);

        // 期限前のジョブとリース中のジョブは取れない
        assert!(queue.claim(Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_claimable_again() {
        let pool = memory_pool().await;
        let queue = SqliteQueue::new(pool);
        let id = queue.enqueue(&Job::AlphabetSweep, Duration::ZERO).await.unwrap();

        queue.claim(Duration::ZERO).await.unwrap().unwrap();
        let again = queue.claim(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn reschedule_and_discard_record_errors() {
        let pool = memory_pool().await;
        let queue = SqliteQueue::new(pool.clone());
        let retried = queue.enqueue(&Job::AlphabetSweep, Duration::ZERO).await.unwrap();
        let skipped = queue
            .enqueue(&Job::TabImport { url: "https://t".into() }, Duration::ZERO)
            .await
            .unwrap();

        queue
            .reschedule(retried, Duration::from_secs(600), "HTTP error")
            .await
            .unwrap();
        queue
            .discard(skipped, JobStatus::Skipped, "Skipped: official tab")
            .await
            .unwrap();

        assert_eq!(
            status_of(&pool, retried).await,
            ("queued".to_string(), Some("HTTP error".to_string()))
        );
        assert_eq!(status_of(&pool, skipped).await.0, "skipped");
        assert!(queue.claim(Duration::from_secs(60)).await.unwrap().is_none());

        let stats = queue.stats().await.unwrap();
        assert_eq!(
            stats,
            vec![
                StatusCount { status: "queued".into(), count: 1 },
                StatusCount { status: "skipped".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn complete_keeps_last_error() {
        let pool = memory_pool().await;
        let queue = SqliteQueue::new(pool.clone());
        let id = queue.enqueue(&Job::AlphabetSweep, Duration::ZERO).await.unwrap();
        queue.reschedule(id, Duration::ZERO, "timeout").await.unwrap();
        queue.complete(id).await.unwrap();
        assert_eq!(
            status_of(&pool, id).await,
            ("done".to_string(), Some("timeout".to_string()))
        );
    }
}
