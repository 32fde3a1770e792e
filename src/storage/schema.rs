use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the local article cache.
///
/// Cloning is cheap: all clones share one connection pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Migration` if the schema could not be created.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file user-only so it never exists with umask permissions
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_some_and(|p| p.exists()) {
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // SQLite reports the real error at connect_with
            }
        }

        // busy_timeout=5000: wait up to 5 seconds for the writer lock before SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Other(e) => DatabaseError::Migration(e.to_string()),
            locked => locked,
        })?;
        tracing::debug!(path = %path, "Opened article cache");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Articles keyed by URL. The CHECK keeps empty identities out even if
        // a caller bypasses the storage API.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                url TEXT PRIMARY KEY NOT NULL CHECK (url <> ''),
                title TEXT NOT NULL,
                description TEXT,
                image_url TEXT,
                published_at INTEGER,
                content TEXT,
                author TEXT,
                source_name TEXT,
                is_bookmarked INTEGER NOT NULL DEFAULT 0,
                is_top_headline INTEGER NOT NULL DEFAULT 0,
                cached_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // One continuation row per headline article, rebuilt every refresh cycle
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS page_keys (
                article_url TEXT PRIMARY KEY NOT NULL,
                prev_key INTEGER,
                next_key INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Feed reads: WHERE is_top_headline = 1 ORDER BY cached_at ASC
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_headline_cached ON articles(is_top_headline, cached_at)",
        )
        .execute(&mut *tx)
        .await?;

        // Bookmark reads: WHERE is_bookmarked = 1 ORDER BY cached_at DESC
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_bookmarked_cached ON articles(is_bookmarked, cached_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
