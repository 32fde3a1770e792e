use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::schema::Database;
use super::types::{DatabaseError, PageKey};

/// 3 columns * 300 rows = 900 binds, under SQLite's 999 parameter limit
const BATCH_SIZE: usize = 300;

/// Replace-insert page keys on an open connection or transaction.
pub(crate) async fn replace_page_keys(
    conn: &mut SqliteConnection,
    keys: &[PageKey],
) -> Result<usize, sqlx::Error> {
    for chunk in keys.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR REPLACE INTO page_keys (article_url, prev_key, next_key) ");

        builder.push_values(chunk, |mut b, key| {
            b.push_bind(&key.article_url)
                .push_bind(key.prev_key)
                .push_bind(key.next_key);
        });

        builder.build().execute(&mut *conn).await?;
    }

    Ok(keys.len())
}

/// Remove every page key. Runs at the start of each refresh cycle.
pub(crate) async fn delete_all_page_keys(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM page_keys")
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

impl Database {
    // ========================================================================
    // Page Key Operations
    // ========================================================================

    /// Bulk replace-insert page keys.
    pub async fn insert_page_keys(&self, keys: &[PageKey]) -> Result<usize, DatabaseError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let written = replace_page_keys(&mut *tx, keys).await?;
        tx.commit().await?;
        Ok(written)
    }

    /// Page key recorded for an article URL, if any.
    pub async fn page_key_for_url(&self, url: &str) -> Result<Option<PageKey>, DatabaseError> {
        let key = sqlx::query_as::<_, PageKey>(
            "SELECT article_url, prev_key, next_key FROM page_keys WHERE article_url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    /// Delete all page keys, returns the number removed.
    pub async fn clear_page_keys(&self) -> Result<u64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(delete_all_page_keys(&mut *conn).await?)
    }

    /// Every stored page key ordered by article URL.
    pub async fn all_page_keys(&self) -> Result<Vec<PageKey>, DatabaseError> {
        let keys = sqlx::query_as::<_, PageKey>(
            "SELECT article_url, prev_key, next_key FROM page_keys ORDER BY article_url",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }
}
