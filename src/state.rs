// state.rs
use crate::jobs::queue::SqliteQueue;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: Pool<Sqlite>,
    pub queue: SqliteQueue,
    /// None なら管理APIは無効
    pub admin_token: Option<Arc<str>>,
}
