// src/crawler/importer.rs
//! TabDraft をカタログ (Artist → Song → Tuning → Tab) に冪等に取り込む。
//!
//! 名前の照合は `match_key` (アクセント・大文字小文字を無視) で行い、
//! 同時実行で先に作られた行は一意制約違反の後に取り直す。
//! 書き込みは `BEGIN IMMEDIATE` で始め、ワーカー同士はロック待ちで直列化する。

use super::error::{is_busy, is_unique_violation};
use super::{CrawlError, Instrument, TabDraft, TuningDraft, match_key};
use chrono::Utc;
use sqlx::pool::PoolConnection;
use sqlx::{FromRow, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// IN 句1回あたりのプレースホルダ数
const LOOKUP_CHUNK: usize = 500;

/// ロック競合時のリトライ (この時間を超えたらジョブのリトライに任せる)
const LOCK_MAX_WAIT: Duration = Duration::from_secs(30);
const LOCK_BACKOFF_START: Duration = Duration::from_millis(10);
const LOCK_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ImportOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportOutcome::Created => "created",
            ImportOutcome::Updated => "updated",
            ImportOutcome::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportResult {
    pub tab_id: i64,
    pub outcome: ImportOutcome,
}

#[derive(Debug, FromRow)]
struct TuningRow {
    id: i64,
    name: String,
    derived_name: bool,
}

/// 再取り込みで更新するタブの項目 (曲・楽器・種別は識別情報なので触らない)
#[derive(Debug, Clone, PartialEq, FromRow)]
struct MutableTabFields {
    tuning_id: Option<i64>,
    version_name: Option<String>,
    content: String,
    difficulty: Option<String>,
    capo: Option<i64>,
    song_key: Option<String>,
    rating: Option<f64>,
    rating_count: Option<i64>,
    views_count: Option<i64>,
    youtube_lesson_url: Option<String>,
    youtube_music_url: Option<String>,
}

#[derive(Debug, FromRow)]
struct ExistingTab {
    id: i64,
    #[sqlx(flatten)]
    fields: MutableTabFields,
}

impl MutableTabFields {
    fn from_draft(draft: &TabDraft, tuning_id: Option<i64>) -> Self {
        Self {
            tuning_id,
            version_name: draft.version_name.clone(),
            content: draft.content.clone(),
            difficulty: draft.difficulty.clone(),
            capo: draft.capo,
            song_key: draft.key.clone(),
            rating: draft.rating,
            rating_count: draft.rating_count,
            views_count: draft.views_count,
            youtube_lesson_url: draft.youtube_lesson_url.clone(),
            youtube_music_url: draft.youtube_music_url.clone(),
        }
    }

    /// 今回取れなかった任意項目は既存の値を残す
    fn merged_over(self, previous: &Self) -> Self {
        Self {
            tuning_id: self.tuning_id.or(previous.tuning_id),
            version_name: self.version_name.or_else(|| previous.version_name.clone()),
            content: self.content,
            difficulty: self.difficulty.or_else(|| previous.difficulty.clone()),
            capo: self.capo.or(previous.capo),
            song_key: self.song_key.or_else(|| previous.song_key.clone()),
            rating: self.rating.or(previous.rating),
            rating_count: self.rating_count.or(previous.rating_count),
            views_count: self.views_count.or(previous.views_count),
            youtube_lesson_url: self
                .youtube_lesson_url
                .or_else(|| previous.youtube_lesson_url.clone()),
            youtube_music_url: self
                .youtube_music_url
                .or_else(|| previous.youtube_music_url.clone()),
        }
    }
}

/// 1件のドラフトを1トランザクションで取り込む
pub async fn import(pool: &SqlitePool, draft: &TabDraft) -> Result<ImportResult, CrawlError> {
    draft.validate()?;

    let started = Instant::now();
    let mut backoff = LOCK_BACKOFF_START;
    let result = loop {
        match import_once(pool, draft).await {
            Err(CrawlError::Database(e)) if is_busy(&e) && started.elapsed() < LOCK_MAX_WAIT => {
                tracing::warn!(
                    "Import of {} hit a locked database, retrying in {:?}",
                    draft.source_url,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(LOCK_BACKOFF_MAX);
            }
            other => break other?,
        }
    };

    tracing::info!(
        "Imported {} - {} ({}): tab {} {}",
        draft.artist_name,
        draft.song_title,
        draft.instrument.as_str(),
        result.tab_id,
        result.outcome.as_str()
    );
    Ok(result)
}

async fn import_once(pool: &SqlitePool, draft: &TabDraft) -> Result<ImportResult, CrawlError> {
    let mut conn = pool.acquire().await?;
    // 読み取りより先に書き込みロックを取る (WAL の古いスナップショットからは昇格できない)
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let written = match write_draft(&mut conn, draft).await {
        Ok(result) => sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map(|_| result)
            .map_err(CrawlError::from),
        Err(e) => Err(e),
    };
    if written.is_err() {
        rollback(conn).await;
    }
    written
}

async fn write_draft(
    conn: &mut SqliteConnection,
    draft: &TabDraft,
) -> Result<ImportResult, CrawlError> {
    let artist_id = find_or_create_artist(conn, &draft.artist_name).await?;
    let song_id =
        find_or_create_song(conn, artist_id, &draft.song_title, draft.genre.as_deref()).await?;
    let tuning_id = match &draft.tuning {
        Some(tuning) => Some(find_or_create_tuning(conn, draft.instrument, tuning).await?),
        None => None,
    };
    upsert_tab(conn, song_id, tuning_id, draft).await
}

/// 失敗した取り込みを巻き戻す。戻せなければ接続ごと捨てる
async fn rollback(mut conn: PoolConnection<Sqlite>) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::error!("Failed to roll back import, closing connection: {}", e);
        drop(conn.detach());
    }
}

/// 渡したURLのうち既に取り込み済みのもの
pub async fn already_imported(
    pool: &SqlitePool,
    urls: &[String],
) -> Result<HashSet<String>, CrawlError> {
    let mut found = HashSet::new();
    for chunk in urls.chunks(LOOKUP_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT source_url FROM tabs WHERE source_url IN ({})",
            placeholders
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for url in chunk {
            query = query.bind(url);
        }
        found.extend(query.fetch_all(pool).await?);
    }
    Ok(found)
}

// --- Artist ---

async fn find_artist(
    conn: &mut SqliteConnection,
    name_key: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM artists WHERE name_key = ?")
        .bind(name_key)
        .fetch_optional(&mut *conn)
        .await
}

async fn find_or_create_artist(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<i64, CrawlError> {
    let name_key = match_key(name);
    if name_key.is_empty() {
        return Err(CrawlError::Contract(format!(
            "artist name {:?} has no comparable characters",
            name
        )));
    }
    if let Some(id) = find_artist(conn, &name_key).await? {
        return Ok(id);
    }

    let now = Utc::now().to_rfc3339();
    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO artists (name, name_key, created_at, updated_at)
        VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(&name_key)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(id) => {
            tracing::info!("Created artist: {}", name);
            Ok(id)
        }
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!("Artist {} was created concurrently, re-querying", name);
            find_artist(conn, &name_key)
                .await?
                .ok_or(CrawlError::Database(e))
        }
        Err(e) => Err(e.into()),
    }
}

// --- Song ---

async fn find_song(
    conn: &mut SqliteConnection,
    artist_id: i64,
    title_key: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM songs WHERE artist_id = ? AND title_key = ?")
        .bind(artist_id)
        .bind(title_key)
        .fetch_optional(&mut *conn)
        .await
}

async fn find_or_create_song(
    conn: &mut SqliteConnection,
    artist_id: i64,
    title: &str,
    genre: Option<&str>,
) -> Result<i64, CrawlError> {
    let title_key = match_key(title);
    if title_key.is_empty() {
        return Err(CrawlError::Contract(format!(
            "song title {:?} has no comparable characters",
            title
        )));
    }
    if let Some(id) = find_song(conn, artist_id, &title_key).await? {
        if let Some(genre) = genre {
            sqlx::query("UPDATE songs SET genre = ?, updated_at = ? WHERE id = ? AND genre IS NULL")
                .bind(genre)
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
        return Ok(id);
    }

    let now = Utc::now().to_rfc3339();
    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO songs (artist_id, title, title_key, genre, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(artist_id)
    .bind(title)
    .bind(&title_key)
    .bind(genre)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(id) => Ok(id),
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!("Song {} was created concurrently, re-querying", title);
            find_song(conn, artist_id, &title_key)
                .await?
                .ok_or(CrawlError::Database(e))
        }
        Err(e) => Err(e.into()),
    }
}

// --- Tuning ---

/// 同じ弦の並びのチューニング。人が付けた名前のものを先に返す
async fn tunings_with_strings(
    conn: &mut SqliteConnection,
    instrument: Instrument,
    strings: &str,
) -> Result<Vec<TuningRow>, sqlx::Error> {
    sqlx::query_as::<_, TuningRow>(
        "SELECT id, name, derived_name FROM tunings
        WHERE instrument = ? AND strings = ?
        ORDER BY derived_name ASC, id ASC",
    )
    .bind(instrument.as_str())
    .bind(strings)
    .fetch_all(&mut *conn)
    .await
}

async fn find_or_create_tuning(
    conn: &mut SqliteConnection,
    instrument: Instrument,
    tuning: &TuningDraft,
) -> Result<i64, CrawlError> {
    let strings = tuning.strings_key();
    let existing = tunings_with_strings(conn, instrument, &strings).await?;

    if let Some(best) = existing.first() {
        if best.derived_name && !tuning.derived_name {
            rename_derived_tuning(conn, best, &tuning.name).await?;
        }
        return Ok(best.id);
    }

    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO tunings (instrument, name, strings, derived_name, created_at)
        VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(instrument.as_str())
    .bind(&tuning.name)
    .bind(&strings)
    .bind(tuning.derived_name)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(id) => {
            tracing::info!(
                "Created {} tuning {:?} ({})",
                instrument.as_str(),
                tuning.name,
                strings
            );
            Ok(id)
        }
        Err(e) if is_unique_violation(&e) => {
            if let Some(row) = tunings_with_strings(conn, instrument, &strings).await?.first() {
                return Ok(row.id);
            }
            tracing::warn!(
                "Tuning name {:?} is already used by other strings, reusing it for {}",
                tuning.name,
                strings
            );
            sqlx::query_scalar("SELECT id FROM tunings WHERE instrument = ? AND name = ?")
                .bind(instrument.as_str())
                .bind(&tuning.name)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or(CrawlError::Database(e))
        }
        Err(e) => Err(e.into()),
    }
}

/// 自動生成名のチューニングに人が付けた名前を与える
async fn rename_derived_tuning(
    conn: &mut SqliteConnection,
    row: &TuningRow,
    name: &str,
) -> Result<(), CrawlError> {
    let renamed = sqlx::query("UPDATE tunings SET name = ?, derived_name = 0 WHERE id = ?")
        .bind(name)
        .bind(row.id)
        .execute(&mut *conn)
        .await;
    match renamed {
        Ok(_) => {
            tracing::info!("Renamed tuning {:?} to {:?}", row.name, name);
            Ok(())
        }
        Err(e) if is_unique_violation(&e) => {
            tracing::warn!(
                "Cannot rename tuning {:?} to {:?}: name already used",
                row.name,
                name
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

// --- Tab ---

async fn find_tab(
    conn: &mut SqliteConnection,
    source_url: &str,
) -> Result<Option<ExistingTab>, sqlx::Error> {
    sqlx::query_as::<_, ExistingTab>(
        "SELECT id, tuning_id, version_name, content, difficulty, capo, song_key, rating,
            rating_count, views_count, youtube_lesson_url, youtube_music_url
        FROM tabs WHERE source_url = ?",
    )
    .bind(source_url)
    .fetch_optional(&mut *conn)
    .await
}

async fn upsert_tab(
    conn: &mut SqliteConnection,
    song_id: i64,
    tuning_id: Option<i64>,
    draft: &TabDraft,
) -> Result<ImportResult, CrawlError> {
    let fields = MutableTabFields::from_draft(draft, tuning_id);
    if let Some(existing) = find_tab(conn, &draft.source_url).await? {
        return update_tab(conn, existing, fields).await;
    }

    let now = Utc::now().to_rfc3339();
    let inserted = sqlx::query_scalar::<_, i64>(
        "INSERT INTO tabs (song_id, tuning_id, source_url, instrument, tab_type, version_name,
            content, difficulty, capo, song_key, rating, rating_count, views_count,
            youtube_lesson_url, youtube_music_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(song_id)
    .bind(fields.tuning_id)
    .bind(&draft.source_url)
    .bind(draft.instrument.as_str())
    .bind(draft.tab_type.map(|t| t.as_str()))
    .bind(&fields.version_name)
    .bind(&fields.content)
    .bind(&fields.difficulty)
    .bind(fields.capo)
    .bind(&fields.song_key)
    .bind(fields.rating)
    .bind(fields.rating_count)
    .bind(fields.views_count)
    .bind(&fields.youtube_lesson_url)
    .bind(&fields.youtube_music_url)
    .bind(&now)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(tab_id) => Ok(ImportResult {
            tab_id,
            outcome: ImportOutcome::Created,
        }),
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!("Tab {} was imported concurrently, updating", draft.source_url);
            let existing = find_tab(conn, &draft.source_url)
                .await?
                .ok_or(CrawlError::Database(e))?;
            update_tab(conn, existing, fields).await
        }
        Err(e) => Err(e.into()),
    }
}

async fn update_tab(
    conn: &mut SqliteConnection,
    existing: ExistingTab,
    fields: MutableTabFields,
) -> Result<ImportResult, CrawlError> {
    let merged = fields.merged_over(&existing.fields);
    if merged == existing.fields {
        return Ok(ImportResult {
            tab_id: existing.id,
            outcome: ImportOutcome::Unchanged,
        });
    }

    sqlx::query(
        "UPDATE tabs SET tuning_id = ?, version_name = ?, content = ?, difficulty = ?, capo = ?,
            song_key = ?, rating = ?, rating_count = ?, views_count = ?,
            youtube_lesson_url = ?, youtube_music_url = ?, updated_at = ?
        WHERE id = ?",
    )
    .bind(merged.tuning_id)
    .bind(&merged.version_name)
    .bind(&merged.content)
    .bind(&merged.difficulty)
    .bind(merged.capo)
    .bind(&merged.song_key)
    .bind(merged.rating)
    .bind(merged.rating_count)
    .bind(merged.views_count)
    .bind(&merged.youtube_lesson_url)
    .bind(&merged.youtube_music_url)
    .bind(Utc::now().to_rfc3339())
    .bind(existing.id)
    .execute(&mut *conn)
    .await?;

    Ok(ImportResult {
        tab_id: existing.id,
        outcome: ImportOutcome::Updated,
    })
}
