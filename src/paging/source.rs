use std::sync::Arc;

use super::engine::{LoadParams, LoadType, MediatorResult, Page, PageLoader, PagingState};
use super::error::LoadError;
use super::mediator::HeadlinesMediator;
use crate::news::{articles_from_records, NewsSource};
use crate::storage::{Article, Database};

/// The three query classes served from the shared cache.
pub enum FeedSource<S> {
    /// Cached top headlines, filled by the mediator
    Headlines {
        db: Database,
        mediator: HeadlinesMediator<S>,
    },
    /// Remote-only search, stamped with local bookmark flags
    Search {
        db: Database,
        source: Arc<S>,
        query: String,
    },
    /// Bookmarked articles, newest first
    Bookmarks { db: Database },
}

/// Local ordered table a page can be read from.
#[derive(Debug, Clone, Copy)]
enum LocalTable {
    Headlines,
    Bookmarks,
}

/// Page `key` of a local table, with a next key while rows remain.
async fn load_local(
    db: &Database,
    table: LocalTable,
    params: LoadParams,
) -> Result<Page<Article>, LoadError> {
    let key = params.key.unwrap_or(1).max(1);
    let limit = i64::from(params.load_size);
    let offset = i64::from(key - 1) * limit;

    let (items, total) = match table {
        LocalTable::Headlines => (
            db.get_headlines_page(limit, offset).await?,
            db.count_headlines().await?,
        ),
        LocalTable::Bookmarks => (
            db.get_bookmarks_page(limit, offset).await?,
            db.count_bookmarks().await?,
        ),
    };

    let loaded = offset + items.len() as i64;
    Ok(Page {
        prev_key: if key > 1 { Some(key - 1) } else { None },
        next_key: if !items.is_empty() && loaded < total {
            Some(key + 1)
        } else {
            None
        },
        items,
    })
}

/// Remote search page with bookmark flags taken from the cache.
async fn load_search<S: NewsSource>(
    db: &Database,
    source: &S,
    query: &str,
    params: LoadParams,
) -> Result<Page<Article>, LoadError> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Page::empty());
    }

    let position = params.key.unwrap_or(1).max(1);
    let records = match source.fetch_search(query, position, params.load_size).await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(
                query = %query,
                page = position,
                protocol_error = e.is_protocol_error(),
                error = %e,
                "Search fetch failed"
            );
            return Err(e.into());
        }
    };

    let fetched = records.len();
    let (mut articles, _) = articles_from_records(records);

    let urls: Vec<&str> = articles.iter().map(|a| a.url.as_str()).collect();
    let bookmarked = db.bookmarked_among(&urls).await?;
    for article in &mut articles {
        article.is_bookmarked = bookmarked.contains(&article.url);
    }

    Ok(Page {
        items: articles,
        prev_key: if position > 1 { Some(position - 1) } else { None },
        next_key: if fetched == 0 { None } else { position.checked_add(1) },
    })
}

impl<S: NewsSource> PageLoader for FeedSource<S> {
    type Item = Article;

    async fn load(&self, params: LoadParams) -> Result<Page<Article>, LoadError> {
        match self {
            FeedSource::Headlines { db, .. } => load_local(db, LocalTable::Headlines, params).await,
            FeedSource::Bookmarks { db } => load_local(db, LocalTable::Bookmarks, params).await,
            FeedSource::Search { db, source, query } => {
                load_search(db, source.as_ref(), query, params).await
            }
        }
    }

    fn refresh_key(&self, state: &PagingState<'_, Article>) -> Option<u32> {
        match self {
            // The mediator always restarts from the first remote page
            FeedSource::Headlines { .. } => None,
            _ => state.anchor_refresh_key(),
        }
    }

    fn is_mediated(&self) -> bool {
        matches!(self, FeedSource::Headlines { .. })
    }

    async fn mediate(
        &self,
        load_type: LoadType,
        state: &PagingState<'_, Article>,
    ) -> Result<MediatorResult, LoadError> {
        match self {
            FeedSource::Headlines { mediator, .. } => mediator.mediate(load_type, state).await,
            _ => Ok(MediatorResult {
                end_of_pagination: true,
            }),
        }
    }
}
