use std::sync::Arc;

use tokio::sync::Mutex;

use super::engine::{LoadType, MediatorResult, PagingState};
use super::error::LoadError;
use crate::news::{articles_from_records, NewsSource};
use crate::storage::{Article, Database, HeadlinePage, PageKey};

/// Pulls remote headline pages into the local cache.
///
/// Every fetched page is reconciled with the cache in one transaction while
/// holding the headlines write lock, which bookmark writes share.
pub struct HeadlinesMediator<S> {
    source: Arc<S>,
    db: Database,
    write_lock: Arc<Mutex<()>>,
}

impl<S> Clone for HeadlinesMediator<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            db: self.db.clone(),
            write_lock: Arc::clone(&self.write_lock),
        }
    }
}

/// Remote page a mediator run resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Fetch(u32),
    Done(MediatorResult),
}

impl<S: NewsSource> HeadlinesMediator<S> {
    pub fn new(source: Arc<S>, db: Database, write_lock: Arc<Mutex<()>>) -> Self {
        Self {
            source,
            db,
            write_lock,
        }
    }

    async fn resolve(
        &self,
        load_type: LoadType,
        state: &PagingState<'_, Article>,
    ) -> Result<Resolution, LoadError> {
        let done = |end_of_pagination| Resolution::Done(MediatorResult { end_of_pagination });

        match load_type {
            LoadType::Refresh => Ok(Resolution::Fetch(1)),
            LoadType::Prepend => Ok(done(true)),
            LoadType::Append => {
                // Nothing loaded yet, so no key to continue from
                let Some(last) = state.last_item() else {
                    return Ok(done(false));
                };
                match self.db.page_key_for_url(&last.url).await? {
                    None => {
                        tracing::debug!(url = %last.url, "No page key for last headline");
                        Ok(done(false))
                    }
                    Some(PageKey { next_key: None, .. }) => Ok(done(true)),
                    Some(PageKey {
                        next_key: Some(next),
                        ..
                    }) => Ok(Resolution::Fetch(next)),
                }
            }
        }
    }

    /// Fetch the page `load_type` resolves to and merge it into the cache.
    ///
    /// End of pagination is reported when the fetched page was empty. On any
    /// failure the cache is left untouched.
    pub async fn mediate(
        &self,
        load_type: LoadType,
        state: &PagingState<'_, Article>,
    ) -> Result<MediatorResult, LoadError> {
        let page = match self.resolve(load_type, state).await? {
            Resolution::Done(result) => return Ok(result),
            Resolution::Fetch(page) => page,
        };

        let records = match self.source.fetch_headlines(page, state.page_size).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    page = page,
                    protocol_error = e.is_protocol_error(),
                    error = %e,
                    "Headlines fetch failed"
                );
                return Err(e.into());
            }
        };

        // Empty URLs are dropped below, the end decision uses the raw count
        let end_of_pagination = records.is_empty();
        let (articles, _) = articles_from_records(records);

        let headline_page = HeadlinePage {
            page,
            articles,
            end_of_pagination,
            is_refresh: load_type == LoadType::Refresh,
        };

        let _guard = self.write_lock.lock().await;
        self.db.merge_headline_page(&headline_page).await?;

        Ok(MediatorResult { end_of_pagination })
    }
}
