//! Remote news source: the fetch capability and its NewsAPI client.

mod client;
mod types;

use std::future::Future;

pub use client::{FetchError, NewsApiClient, DEFAULT_BASE_URL};
pub use types::{articles_from_records, parse_published, ArticleRecord, RecordSource};

/// Capability to fetch one page of articles from a remote source.
///
/// Pages are 1-based. An empty result is the only end-of-pagination signal.
pub trait NewsSource: Send + Sync + 'static {
    fn fetch_headlines(
        &self,
        page: u32,
        page_size: u32,
    ) -> impl Future<Output = Result<Vec<ArticleRecord>, FetchError>> + Send;

    fn fetch_search(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> impl Future<Output = Result<Vec<ArticleRecord>, FetchError>> + Send;
}
