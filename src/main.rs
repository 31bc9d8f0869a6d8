// main.rs
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{EnvFilter, fmt};

mod auth;
mod config;
mod crawler;
mod db;
mod jobs;
mod models;
mod routes;
mod state;

use crate::config::Config;
use crate::crawler::HttpFetcher;
use crate::jobs::orchestrator::Orchestrator;
use crate::jobs::queue::SqliteQueue;
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(filter).init();

    let config = Config::from_env();

    let db_pool = db::connect(&config.database_url).await?;
    db::migrate(&db_pool).await?;

    // クロールはすべてキュー経由でワーカーが実行する
    let queue = SqliteQueue::new(db_pool.clone());
    let fetcher = HttpFetcher::new(&config.http)?;
    let orchestrator = Arc::new(Orchestrator::new(
        fetcher,
        queue.clone(),
        db_pool.clone(),
        config.crawl.clone(),
    ));
    let workers = jobs::worker::spawn_workers(config.workers, queue.clone(), orchestrator);
    tracing::info!("Started {} crawl workers", workers.len());

    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set; the admin API will reject every request");
    }
    let app_state = AppState {
        db_pool,
        queue,
        admin_token: config.admin_token.map(Arc::from),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::create_router(app_state).layer(cors);

    // サーバーの起動
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
