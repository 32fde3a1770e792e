use super::articles::{preserved_state, purge_unbookmarked_headlines, replace_articles};
use super::page_keys::{delete_all_page_keys, replace_page_keys};
use super::schema::Database;
use super::types::{Article, DatabaseError, HeadlinePage, MergeOutcome, PageKey};

/// Continuation keys for every article fetched from `page`.
///
/// Page 1 has no previous page. An empty fetch has no next page.
pub fn continuation_keys(page: u32, end_of_pagination: bool) -> (Option<u32>, Option<u32>) {
    let prev_key = if page <= 1 { None } else { Some(page - 1) };
    let next_key = if end_of_pagination {
        None
    } else {
        page.checked_add(1)
    };
    (prev_key, next_key)
}

impl Database {
    // ========================================================================
    // Headline Merge
    // ========================================================================

    /// Reconcile one remote headlines page with the cache atomically.
    ///
    /// Inside a single transaction:
    /// 1. read `cached_at` and `is_bookmarked` of every incoming URL that
    ///    already has a row
    /// 2. on refresh, clear all page keys and delete feed members that are not
    ///    bookmarked
    /// 3. write one page key per incoming article
    /// 4. replace-insert the incoming articles as feed members, carrying the
    ///    recovered first-seen time and bookmark flag
    ///
    /// If any step fails the transaction is rolled back and the cache is left
    /// exactly as it was. Dropping the returned future before it resolves has
    /// the same effect.
    pub async fn merge_headline_page(
        &self,
        page: &HeadlinePage,
    ) -> Result<MergeOutcome, DatabaseError> {
        let now = chrono::Utc::now().timestamp_millis();
        let incoming: Vec<&Article> = page
            .articles
            .iter()
            .filter(|a| !a.url.is_empty())
            .collect();
        if incoming.len() < page.articles.len() {
            tracing::warn!(
                page = page.page,
                dropped = page.articles.len() - incoming.len(),
                "Headlines with empty URL dropped from merge"
            );
        }

        let mut tx = self.pool.begin().await?;
        let mut outcome = MergeOutcome::default();

        let urls: Vec<&str> = incoming.iter().map(|a| a.url.as_str()).collect();
        let preserved = preserved_state(&mut *tx, &urls).await?;

        if page.is_refresh {
            let cleared = delete_all_page_keys(&mut *tx).await?;
            outcome.purged = purge_unbookmarked_headlines(&mut *tx).await?;
            tracing::debug!(
                cleared_keys = cleared,
                purged = outcome.purged,
                "Refresh cleared previous headline cycle"
            );
        }

        let (prev_key, next_key) = continuation_keys(page.page, page.end_of_pagination);
        let keys: Vec<PageKey> = incoming
            .iter()
            .map(|a| PageKey {
                article_url: a.url.clone(),
                prev_key,
                next_key,
            })
            .collect();
        outcome.keys_written = replace_page_keys(&mut *tx, &keys).await?;

        let mut rows = Vec::with_capacity(incoming.len());
        for article in incoming {
            let mut row = article.clone();
            row.is_top_headline = true;
            match preserved.get(&article.url) {
                Some(state) => {
                    row.cached_at = state.cached_at;
                    row.is_bookmarked = state.is_bookmarked;
                    outcome.preserved += 1;
                }
                None => {
                    row.cached_at = now;
                    row.is_bookmarked = false;
                    outcome.inserted += 1;
                }
            }
            rows.push(row);
        }
        replace_articles(&mut *tx, &rows).await?;

        tx.commit().await?;

        tracing::info!(
            page = page.page,
            refresh = page.is_refresh,
            inserted = outcome.inserted,
            preserved = outcome.preserved,
            purged = outcome.purged,
            end_of_pagination = page.end_of_pagination,
            "Merged headlines page"
        );
        Ok(outcome)
    }
}
