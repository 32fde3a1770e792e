use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has the database locked
    #[error("Another instance of newsdesk appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Rows are keyed by URL; an empty key can never be stored
    #[error("Article URL must not be empty")]
    EmptyUrl,

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A cached article, keyed by its URL.
///
/// `is_top_headline` marks current membership in the headlines feed.
/// `cached_at` is the first-seen time in unix milliseconds and is carried
/// forward across merges, so it never moves once a row exists.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Publication time in unix seconds
    pub published_at: Option<i64>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub source_name: Option<String>,
    pub is_bookmarked: bool,
    pub is_top_headline: bool,
    pub cached_at: i64,
}

impl Article {
    /// Minimal article with only identity and title set, first seen now.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            description: None,
            image_url: None,
            published_at: None,
            content: None,
            author: None,
            source_name: None,
            is_bookmarked: false,
            is_top_headline: false,
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Continuation keys recorded against one article of the headlines feed.
///
/// Keys are 1-based page indices of the remote source. `next_key == None`
/// means the page the article came from was the last one.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PageKey {
    pub article_url: String,
    pub prev_key: Option<u32>,
    pub next_key: Option<u32>,
}

/// User state recovered from an existing row before a merge overwrites it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PreservedState {
    pub cached_at: i64,
    pub is_bookmarked: bool,
}

/// One remote page handed to the merge transaction.
#[derive(Debug, Clone)]
pub struct HeadlinePage {
    /// 1-based remote page index that was fetched
    pub page: u32,
    /// Articles as received, already stripped of rows with an empty URL
    pub articles: Vec<Article>,
    /// True when the remote returned no records for this page
    pub end_of_pagination: bool,
    /// True when this page starts a new refresh cycle
    pub is_refresh: bool,
}

/// Counts reported by a committed merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Rows that did not exist before the merge
    pub inserted: usize,
    /// Rows that existed and kept their first-seen time and bookmark flag
    pub preserved: usize,
    /// Stale feed rows deleted by a refresh
    pub purged: u64,
    pub keys_written: usize,
}
