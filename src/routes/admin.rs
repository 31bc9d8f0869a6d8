// src/routes/admin.rs
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use std::time::Duration;

use crate::jobs::queue::JobQueue;
use crate::models::{CatalogStats, CrawlPayload, CrawlResponse, JobStats, JobStatusCount};
use crate::state::AppState;

/// 管理用ルート (/admin/...) を構築します
pub fn create_admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/crawl", post(trigger_crawl))
        .route("/admin/jobs", get(get_job_stats))
        .route("/admin/catalog", get(get_catalog_stats))
}

/// クロールの起点ジョブをキューに積む (POST /admin/crawl)
#[utoipa::path(
    post,
    path = "/api/admin/crawl",
    tag = "Admin",
    request_body(
        content = CrawlPayload,
        description = "クロールの起点",
        example = json!({
            "kind": "band",
            "url": "https://www.ultimate-guitar.com/artist/oasis_2213"
        })
    ),
    responses(
        (status = 202, description = "ジョブを受け付けた", body = CrawlResponse),
        (status = 400, description = "URLがない、または対応していないサイト"),
        (status = 401, description = "認証エラー"),
        (status = 500, description = "サーバーエラー")
    ),
    security(("bearer_auth" = []))
)]
pub async fn trigger_crawl(
    State(state): State<AppState>,
    Json(payload): Json<CrawlPayload>,
) -> Result<(StatusCode, Json<CrawlResponse>), (StatusCode, String)> {
    let job = payload
        .into_job()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    // 実際のクロールはワーカーが拾う
    let job_id = state.queue.enqueue(&job, Duration::ZERO).await.map_err(|e| {
        tracing::error!("Failed to enqueue {}: {}", job, e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    tracing::info!("Crawl job {} queued: {}", job_id, job);

    Ok((
        StatusCode::ACCEPTED,
        Json(CrawlResponse {
            job_id,
            job: job.to_string(),
            message: "Crawl queued.".to_string(),
        }),
    ))
}

/// ジョブキューの状態ごとの件数 (GET /admin/jobs)
#[utoipa::path(
    get,
    path = "/api/admin/jobs",
    tag = "Admin",
    responses(
        (status = 200, description = "状態ごとの件数", body = JobStats),
        (status = 401, description = "認証エラー"),
        (status = 500, description = "サーバーエラー")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_job_stats(
    State(state): State<AppState>,
) -> Result<Json<JobStats>, (StatusCode, String)> {
    let counts = state.queue.stats().await.map_err(|e| {
        tracing::error!("Failed to read job stats: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let by_status: Vec<JobStatusCount> = counts
        .into_iter()
        .map(|c| JobStatusCount {
            status: c.status,
            count: c.count,
        })
        .collect();
    let total = by_status.iter().map(|c| c.count).sum();

    Ok(Json(JobStats { total, by_status }))
}

/// 取り込み済みカタログの件数 (GET /admin/catalog)
#[utoipa::path(
    get,
    path = "/api/admin/catalog",
    tag = "Admin",
    responses(
        (status = 200, description = "テーブルごとの件数", body = CatalogStats),
        (status = 401, description = "認証エラー"),
        (status = 500, description = "サーバーエラー")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_catalog_stats(
    State(state): State<AppState>,
) -> Result<Json<CatalogStats>, (StatusCode, String)> {
    let stats = sqlx::query_as::<_, CatalogStats>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM artists) AS artists,
            (SELECT COUNT(*) FROM songs) AS songs,
            (SELECT COUNT(*) FROM tunings) AS tunings,
            (SELECT COUNT(*) FROM tabs) AS tabs
        "#,
    )
    .fetch_one(&state.db_pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to read catalog stats: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(stats))
}
