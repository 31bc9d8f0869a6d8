// src/jobs/worker.rs
use super::orchestrator::Orchestrator;
use super::policy::{Decision, decide};
use super::queue::{ClaimedJob, JobQueue, SqliteQueue};
use super::JobStatus;
use crate::crawler::Fetch;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// キューが空のときのポーリング間隔
const IDLE_POLL: Duration = Duration::from_secs(2);

/// 1ジョブに許すリース (ページ送りを含むバンド一覧の収集を見込む)
const LEASE: Duration = Duration::from_secs(15 * 60);

/// `count` 本のワーカーを起動する
pub fn spawn_workers<F, Q>(
    count: usize,
    queue: SqliteQueue,
    orchestrator: Arc<Orchestrator<F, Q>>,
) -> Vec<JoinHandle<()>>
where
    F: Fetch + 'static,
    Q: JobQueue + 'static,
{
    (0..count)
        .map(|worker_id| {
            let queue = queue.clone();
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { run_worker(worker_id, queue, orchestrator).await })
        })
        .collect()
}

async fn run_worker<F: Fetch, Q: JobQueue>(
    worker_id: usize,
    queue: SqliteQueue,
    orchestrator: Arc<Orchestrator<F, Q>>,
) {
    tracing::info!("Worker {} started", worker_id);
    loop {
        match queue.claim(LEASE).await {
            Ok(Some(claimed)) => process(&queue, &orchestrator, claimed).await,
            Ok(None) => tokio::time::sleep(IDLE_POLL).await,
            Err(e) => {
                tracing::error!("Worker {} failed to claim a job: {}", worker_id, e);
                tokio::time::sleep(IDLE_POLL).await;
            }
        }
    }
}

/// 取得済みのジョブを1件実行し、結果に応じてキュー上の状態を進める
pub(crate) async fn process<F: Fetch, Q: JobQueue>(
    queue: &SqliteQueue,
    orchestrator: &Orchestrator<F, Q>,
    claimed: ClaimedJob,
) {
    let job = match claimed.job() {
        Ok(job) => job,
        Err(e) => {
            tracing::error!("Job {} failed: {}", claimed.id, e);
            record(queue.discard(claimed.id, JobStatus::Failed, &e.to_string()).await);
            return;
        }
    };

    tracing::info!(
        "Job {} ({}) started, attempt {}",
        claimed.id,
        job,
        claimed.attempts
    );

    let error = match orchestrator.run(&job).await {
        Ok(()) => {
            tracing::info!("Job {} ({}) finished", claimed.id, job);
            record(queue.complete(claimed.id).await);
            return;
        }
        Err(e) => e,
    };

    let reason = error.to_string();
    match decide(&job, error.kind(), claimed.attempts) {
        Decision::Retry(delay) => {
            tracing::warn!(
                "Job {} ({}) failed on attempt {}, retrying in {:?}: {}",
                claimed.id,
                job,
                claimed.attempts,
                delay,
                reason
            );
            record(queue.reschedule(claimed.id, delay, &reason).await);
        }
        Decision::GiveUp(status) => {
            match status {
                JobStatus::Skipped => {
                    tracing::info!("Job {} ({}) discarded: {}", claimed.id, job, reason)
                }
                JobStatus::Done => tracing::info!(
                    "Job {} ({}) hit an existing record, treating as done: {}",
                    claimed.id,
                    job,
                    reason
                ),
                JobStatus::Dead => tracing::error!(
                    "Job {} ({}) gave up after {} attempts: {}",
                    claimed.id,
                    job,
                    claimed.attempts,
                    reason
                ),
                _ => tracing::error!("Job {} ({}) failed: {}", claimed.id, job, reason),
            }
            record(queue.discard(claimed.id, status, &reason).await);
        }
    }
}

fn record(result: Result<(), crate::crawler::CrawlError>) {
    if let Err(e) = result {
        tracing::error!("Failed to update job state: {}", e);
    }
}
