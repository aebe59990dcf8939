use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{ApiError, ApiResult};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = r2d2::PooledConnection<SqliteConnectionManager>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS reels (
        id TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        file TEXT NOT NULL,
        audio TEXT NOT NULL,
        images TEXT NOT NULL DEFAULT '[]',
        output TEXT,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_reels_user_id ON reels(user_id);
";

fn manager(manager: SqliteConnectionManager) -> SqliteConnectionManager {
    manager.with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"))
}

pub fn open_pool(path: &Path) -> anyhow::Result<DbPool> {
    info!("Opening database at {}", path.display());
    let pool = Pool::builder()
        .max_size(8)
        .build(manager(SqliteConnectionManager::file(path)))?;
    init_schema(&pool)?;
    Ok(pool)
}

/// Single-connection in-memory database. One connection keeps every query on
/// the same database.
pub fn open_memory_pool() -> anyhow::Result<DbPool> {
    let pool = Pool::builder()
        .max_size(1)
        .build(manager(SqliteConnectionManager::memory()))?;
    init_schema(&pool)?;
    Ok(pool)
}

pub fn init_schema(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Runs `f` with a pooled connection on the blocking thread pool.
pub async fn blocking<T, F>(pool: &DbPool, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut DbConn) -> ApiResult<T> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await
    .map_err(ApiError::from)?
}
