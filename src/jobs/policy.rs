// src/jobs/policy.rs
//! 失敗の分類ごとのリトライ/破棄ポリシー

use super::{Job, JobStatus};
use crate::crawler::ErrorKind;
use std::time::Duration;

const LISTING_FETCH_BASE: Duration = Duration::from_secs(30);
const TAB_FETCH_BASE: Duration = Duration::from_secs(10);
const FETCH_BACKOFF_CAP: Duration = Duration::from_secs(60 * 60);
const FETCH_MAX_ATTEMPTS: u32 = 5;

// マークアップの一時的な変化や途中まで返った応答を想定して長めに待つ
const PARSE_BACKOFF: Duration = Duration::from_secs(15 * 60);
const PARSE_MAX_ATTEMPTS: u32 = 3;

const BUSY_BASE: Duration = Duration::from_secs(5);
const BUSY_BACKOFF_CAP: Duration = Duration::from_secs(5 * 60);
const BUSY_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// base · 2^(attempt-1)、cap で頭打ち
    Exponential { base: Duration, cap: Duration },
    Fixed(Duration),
    None,
}

impl Backoff {
    /// `attempt` 回目 (1始まり) の失敗後に待つ時間
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Exponential { base, cap } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(cap)
            }
            Backoff::Fixed(delay) => delay,
            Backoff::None => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retryable: bool,
    pub backoff: Backoff,
    pub max_attempts: u32,
    /// リトライしないとき (または上限到達時) のジョブの行き先
    pub final_status: JobStatus,
}

/// ジョブ種別と失敗の分類からポリシーを引く
pub fn policy_for(job: &Job, kind: ErrorKind) -> RetryPolicy {
    match kind {
        ErrorKind::Fetch => RetryPolicy {
            retryable: true,
            backoff: Backoff::Exponential {
                base: if job.is_listing() {
                    LISTING_FETCH_BASE
                } else {
                    TAB_FETCH_BASE
                },
                cap: FETCH_BACKOFF_CAP,
            },
            max_attempts: FETCH_MAX_ATTEMPTS,
            final_status: JobStatus::Dead,
        },
        ErrorKind::Parse => RetryPolicy {
            retryable: true,
            backoff: Backoff::Fixed(PARSE_BACKOFF),
            max_attempts: PARSE_MAX_ATTEMPTS,
            final_status: JobStatus::Dead,
        },
        ErrorKind::Busy => RetryPolicy {
            retryable: true,
            backoff: Backoff::Exponential {
                base: BUSY_BASE,
                cap: BUSY_BACKOFF_CAP,
            },
            max_attempts: BUSY_MAX_ATTEMPTS,
            final_status: JobStatus::Dead,
        },
        ErrorKind::Skipped => discard(JobStatus::Skipped),
        // 対象レコードは既にあるので成功扱い
        ErrorKind::Duplicate => discard(JobStatus::Done),
        ErrorKind::Fatal => discard(JobStatus::Failed),
    }
}

fn discard(final_status: JobStatus) -> RetryPolicy {
    RetryPolicy {
        retryable: false,
        backoff: Backoff::None,
        max_attempts: 1,
        final_status,
    }
}

/// 失敗したジョブの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    GiveUp(JobStatus),
}

/// `attempts` はこれまでの実行回数 (今回の失敗を含む)
pub fn decide(job: &Job, kind: ErrorKind, attempts: u32) -> Decision {
    let policy = policy_for(job, kind);
    if policy.retryable && attempts < policy.max_attempts {
        Decision::Retry(policy.backoff.delay(attempts))
    } else {
        Decision::GiveUp(policy.final_status)
    }
}
