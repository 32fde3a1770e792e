use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::{HashMap, HashSet};

use super::schema::Database;
use super::types::{Article, DatabaseError, PreservedState};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// 11 columns * 50 rows = 550 binds, under SQLite's 999 parameter limit
const BATCH_SIZE: usize = 50;

/// Batch size for `url IN (...)` lookups
const LOOKUP_BATCH_SIZE: usize = 500;

// ============================================================================
// Transaction-scoped helpers
// ============================================================================

/// Replace-insert articles on an open connection or transaction.
///
/// Last write wins per URL: every column of an existing row is overwritten,
/// so callers that must keep user state copy it into `articles` first.
pub(crate) async fn replace_articles(
    conn: &mut SqliteConnection,
    articles: &[Article],
) -> Result<usize, sqlx::Error> {
    for chunk in articles.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT OR REPLACE INTO articles (url, title, description, image_url, published_at, \
             content, author, source_name, is_bookmarked, is_top_headline, cached_at) ",
        );

        builder.push_values(chunk, |mut b, article| {
            b.push_bind(&article.url)
                .push_bind(&article.title)
                .push_bind(&article.description)
                .push_bind(&article.image_url)
                .push_bind(article.published_at)
                .push_bind(&article.content)
                .push_bind(&article.author)
                .push_bind(&article.source_name)
                .push_bind(article.is_bookmarked)
                .push_bind(article.is_top_headline)
                .push_bind(article.cached_at);
        });

        builder.build().execute(&mut *conn).await?;
    }

    Ok(articles.len())
}

/// Read first-seen time and bookmark flag for every URL that already has a row.
pub(crate) async fn preserved_state(
    conn: &mut SqliteConnection,
    urls: &[&str],
) -> Result<HashMap<String, PreservedState>, sqlx::Error> {
    let mut preserved = HashMap::with_capacity(urls.len());

    for chunk in urls.chunks(LOOKUP_BATCH_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT url, cached_at, is_bookmarked FROM articles WHERE url IN (");
        let mut separated = builder.separated(", ");
        for url in chunk {
            separated.push_bind(*url);
        }
        separated.push_unseparated(")");

        let rows: Vec<(String, i64, bool)> =
            builder.build_query_as().fetch_all(&mut *conn).await?;
        for (url, cached_at, is_bookmarked) in rows {
            preserved.insert(
                url,
                PreservedState {
                    cached_at,
                    is_bookmarked,
                },
            );
        }
    }

    Ok(preserved)
}

/// Delete feed members that nobody bookmarked.
pub(crate) async fn purge_unbookmarked_headlines(
    conn: &mut SqliteConnection,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM articles WHERE is_top_headline = 1 AND is_bookmarked = 0")
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

impl Database {
    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Upsert articles by replacement, returns the number of rows written.
    ///
    /// Idempotent: writing the same batch twice leaves one row per URL.
    /// Articles with an empty URL are skipped and logged.
    pub async fn upsert_articles(&self, articles: &[Article]) -> Result<usize, DatabaseError> {
        let valid: Vec<Article> = articles
            .iter()
            .filter(|a| !a.url.is_empty())
            .cloned()
            .collect();
        let skipped = articles.len() - valid.len();
        if skipped > 0 {
            tracing::warn!(skipped = skipped, "Articles with empty URL skipped");
        }
        if valid.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let written = replace_articles(&mut *tx, &valid).await?;
        tx.commit().await?;
        Ok(written)
    }

    /// Insert an article only if no row exists for its URL.
    ///
    /// Returns `true` if a row was inserted. An existing row is left untouched,
    /// including its bookmark flag and feed membership.
    pub async fn insert_article_if_absent(&self, article: &Article) -> Result<bool, DatabaseError> {
        if article.url.is_empty() {
            return Err(DatabaseError::EmptyUrl);
        }

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO articles (url, title, description, image_url, published_at,
                content, author, source_name, is_bookmarked, is_top_headline, cached_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.image_url)
        .bind(article.published_at)
        .bind(&article.content)
        .bind(&article.author)
        .bind(&article.source_name)
        .bind(article.is_bookmarked)
        .bind(article.is_top_headline)
        .bind(article.cached_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set the bookmark flag of an existing row, returns whether a row matched.
    pub async fn set_bookmarked(&self, url: &str, bookmarked: bool) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE articles SET is_bookmarked = ? WHERE url = ?")
            .bind(bookmarked)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically toggle the bookmark flag, returning the new value.
    ///
    /// A URL without a row is inserted from `article` with the flag flipped
    /// from its absent default (`false`), so the result is `true`. An existing
    /// row only has its flag flipped; its other columns are left as stored.
    pub async fn toggle_bookmark(&self, article: &Article) -> Result<bool, DatabaseError> {
        if article.url.is_empty() {
            return Err(DatabaseError::EmptyUrl);
        }

        let (bookmarked,): (bool,) = sqlx::query_as(
            r#"
            INSERT INTO articles (url, title, description, image_url, published_at,
                content, author, source_name, is_bookmarked, is_top_headline, cached_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(url) DO UPDATE SET is_bookmarked = NOT articles.is_bookmarked
            RETURNING is_bookmarked
        "#,
        )
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.description)
        .bind(&article.image_url)
        .bind(article.published_at)
        .bind(&article.content)
        .bind(&article.author)
        .bind(&article.source_name)
        .bind(article.is_top_headline)
        .bind(article.cached_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(url = %article.url, bookmarked = bookmarked, "Toggled bookmark");
        Ok(bookmarked)
    }

    /// Delete all non-bookmarked feed members, returns the number removed.
    pub async fn delete_unbookmarked_headlines(&self) -> Result<u64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        Ok(purge_unbookmarked_headlines(&mut *conn).await?)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Get a single article by its URL.
    pub async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>, DatabaseError> {
        let article = sqlx::query_as::<_, Article>(
            r#"
            SELECT url, title, description, image_url, published_at, content,
                   author, source_name, is_bookmarked, is_top_headline, cached_at
            FROM articles
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(article)
    }

    /// Bookmark flag for a URL; a URL without a row is not bookmarked.
    pub async fn is_bookmarked(&self, url: &str) -> Result<bool, DatabaseError> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT is_bookmarked FROM articles WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some_and(|(flag,)| flag))
    }

    /// Which of `urls` are bookmarked. Used to stamp flags on transient results.
    pub async fn bookmarked_among(&self, urls: &[&str]) -> Result<HashSet<String>, DatabaseError> {
        let mut bookmarked = HashSet::new();

        for chunk in urls.chunks(LOOKUP_BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT url FROM articles WHERE is_bookmarked = 1 AND url IN (");
            let mut separated = builder.separated(", ");
            for url in chunk {
                separated.push_bind(*url);
            }
            separated.push_unseparated(")");

            let rows: Vec<(String,)> = builder.build_query_as().fetch_all(&self.pool).await?;
            bookmarked.extend(rows.into_iter().map(|(url,)| url));
        }

        Ok(bookmarked)
    }

    /// Feed members, oldest first.
    ///
    /// Rows sharing a `cached_at` (one merge writes a whole page with the same
    /// timestamp) keep their insertion order, which is the remote order.
    pub async fn get_headlines_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let limit = limit.min(MAX_ARTICLES);
        tracing::debug!(limit = limit, offset = offset, "get_headlines_page");

        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT url, title, description, image_url, published_at, content,
                   author, source_name, is_bookmarked, is_top_headline, cached_at
            FROM articles
            WHERE is_top_headline = 1
            ORDER BY cached_at ASC, rowid ASC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(articles)
    }

    /// Number of current feed members.
    pub async fn count_headlines(&self) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE is_top_headline = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// All bookmarked articles, most recently cached first.
    ///
    /// Hard cap at MAX_ARTICLES to prevent unbounded memory allocation.
    pub async fn get_bookmarked_articles(&self) -> Result<Vec<Article>, DatabaseError> {
        self.get_bookmarks_page(MAX_ARTICLES, 0).await
    }

    /// One window of bookmarked articles, most recently cached first.
    pub async fn get_bookmarks_page(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Article>, DatabaseError> {
        let limit = limit.min(MAX_ARTICLES);
        tracing::debug!(limit = limit, offset = offset, "get_bookmarks_page");

        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT url, title, description, image_url, published_at, content,
                   author, source_name, is_bookmarked, is_top_headline, cached_at
            FROM articles
            WHERE is_bookmarked = 1
            ORDER BY cached_at DESC, rowid DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(articles)
    }

    /// Number of bookmarked articles.
    pub async fn count_bookmarks(&self) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE is_bookmarked = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
