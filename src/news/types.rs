use serde::Deserialize;

use crate::storage::Article;

// ============================================================================
// Wire Types
// ============================================================================

/// Nested source object of a remote article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RecordSource {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// One article as delivered by the remote news API.
///
/// Every field is optional on the wire. Records without a URL cannot be
/// cached and are dropped during mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRecord {
    pub source: Option<RecordSource>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    /// RFC 3339 timestamp, e.g. `2024-05-01T12:30:00Z`
    pub published_at: Option<String>,
    pub content: Option<String>,
}

/// Response envelope shared by every endpoint.
///
/// Successful responses carry `status = "ok"` and `articles`; failures carry
/// `status = "error"` with `code` and `message`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewsResponse {
    pub status: String,
    #[allow(dead_code)] // Not used for paging: an empty page is the only end signal
    pub total_results: Option<u64>,
    #[serde(default)]
    pub articles: Vec<ArticleRecord>,
    pub code: Option<String>,
    pub message: Option<String>,
}

// ============================================================================
// Mapping
// ============================================================================

/// Parse an RFC 3339 publication time into unix seconds.
pub fn parse_published(raw: &str) -> Option<i64> {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.timestamp()),
        Err(e) => {
            tracing::debug!(value = %raw, error = %e, "Unparseable publishedAt, ignoring");
            None
        }
    }
}

impl ArticleRecord {
    /// Record with only identity and title, as the API returns for sparse items.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Map to a cache article first seen at `cached_at`.
    ///
    /// Returns `None` when the record has no usable URL. Flags start out
    /// false; the merge or the search stamp decides their real values.
    pub fn into_article(self, cached_at: i64) -> Option<Article> {
        let url = self.url.filter(|u| !u.trim().is_empty())?;
        Some(Article {
            url,
            title: self.title.unwrap_or_default(),
            description: self.description,
            image_url: self.url_to_image,
            published_at: self.published_at.as_deref().and_then(parse_published),
            content: self.content,
            author: self.author,
            source_name: self.source.and_then(|s| s.name),
            is_bookmarked: false,
            is_top_headline: false,
            cached_at,
        })
    }
}

/// Map a fetched batch, returning the articles and the number of records
/// dropped for lacking an identity.
pub fn articles_from_records(records: Vec<ArticleRecord>) -> (Vec<Article>, usize) {
    let total = records.len();
    let now = chrono::Utc::now().timestamp_millis();
    let articles: Vec<Article> = records
        .into_iter()
        .filter_map(|r| r.into_article(now))
        .collect();
    let dropped = total - articles.len();
    if dropped > 0 {
        tracing::warn!(dropped = dropped, "Remote records without URL dropped from batch");
    }
    (articles, dropped)
}
