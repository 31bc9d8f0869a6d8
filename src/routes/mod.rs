// src/routes/mod.rs
use crate::auth::auth_middleware;
use crate::state::AppState;
use axum::{Router, middleware};

mod admin;
mod swagger;

/// アプリケーション全体のルーターを構築
pub fn create_router(app_state: AppState) -> Router {
    let api_router = create_api_router(app_state.clone());
    let swagger_routes = swagger::create_swagger_routes();

    Router::new()
        .merge(swagger_routes)
        // API全体を "/api" パス以下にネスト
        .nest("/api", api_router)
        .with_state(app_state)
}

/// /api 以下のルーター (管理APIはすべて認証必須)
fn create_api_router(app_state: AppState) -> Router<AppState> {
    admin::create_admin_routes().layer(middleware::from_fn_with_state(
        app_state,
        auth_middleware,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::jobs::queue::SqliteQueue;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const TOKEN: &str = "test-admin-token";

    async fn app(admin_token: Option<&str>) -> (Router, sqlx::SqlitePool) {
        let db_pool = memory_pool().await;
        let state = AppState {
            db_pool: db_pool.clone(),
            queue: SqliteQueue::new(db_pool.clone()),
            admin_token: admin_token.map(Arc::from),
        };
        (create_router(state), db_pool)
    }

    fn post_crawl(body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/admin/crawl")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn crawl_requires_token() {
        let (app, _) = app(Some(TOKEN)).await;

        let missing = app
            .clone()
            .oneshot(post_crawl(json!({ "kind": "alphabet" }), None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .oneshot(post_crawl(json!({ "kind": "alphabet" }), Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_api_is_closed_without_configured_token() {
        let (app, _) = app(None).await;
        let response = app
            .oneshot(post_crawl(json!({ "kind": "alphabet" }), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn crawl_enqueues_a_job() {
        let (app, pool) = app(Some(TOKEN)).await;
        let response = app
            .oneshot(post_crawl(
                json!({ "kind": "band", "url": "https://www.ultimate-guitar.com/artist/oasis_2213" }),
                Some(TOKEN),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = json_body(response).await;
        let (kind, status): (String, String) =
            sqlx::query_as("SELECT kind, status FROM jobs WHERE id = ?")
                .bind(body["job_id"].as_i64().unwrap())
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(kind, "band");
        assert_eq!(status, "queued");
    }

    #[tokio::test]
    async fn crawl_rejects_bad_urls() {
        let (app, _) = app(Some(TOKEN)).await;

        let missing = app
            .clone()
            .oneshot(post_crawl(json!({ "kind": "tab" }), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let unsupported = app
            .oneshot(post_crawl(
                json!({ "kind": "tab", "url": "https://example.com/tab/1" }),
                Some(TOKEN),
            ))
            .await
            .unwrap();
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_endpoints_report_counts() {
        let (app, _) = app(Some(TOKEN)).await;
        app.clone()
            .oneshot(post_crawl(json!({ "kind": "alphabet" }), Some(TOKEN)))
            .await
            .unwrap();

        let jobs = app.clone().oneshot(get("/api/admin/jobs")).await.unwrap();
        assert_eq!(jobs.status(), StatusCode::OK);
        let jobs = json_body(jobs).await;
        assert_eq!(jobs["total"], 1);
        assert_eq!(jobs["by_status"][0]["status"], "queued");

        let catalog = app.oneshot(get("/api/admin/catalog")).await.unwrap();
        assert_eq!(catalog.status(), StatusCode::OK);
        assert_eq!(
            json_body(catalog).await,
            json!({ "artists": 0, "songs": 0, "tunings": 0, "tabs": 0 })
        );
    }
}
