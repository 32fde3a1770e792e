//! Composition root exposing the paging sessions and point operations.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::news::NewsSource;
use crate::paging::{FeedSource, HeadlinesMediator, Pager, PagingConfig};
use crate::storage::{Article, Database, DatabaseError};

/// Paging session over one query class.
pub type NewsPager<S> = Pager<FeedSource<S>>;

/// Entry point to the article cache.
///
/// Each query method returns a fresh, independent session. Bookmark writes
/// share the headlines write lock with the merge transaction, so a toggle is
/// never overwritten by a concurrently recovered flag.
pub struct NewsRepository<S> {
    db: Database,
    source: Arc<S>,
    write_lock: Arc<Mutex<()>>,
    paging: PagingConfig,
}

impl<S: NewsSource> NewsRepository<S> {
    pub fn new(db: Database, source: S) -> Self {
        Self::with_paging_config(db, source, PagingConfig::default())
    }

    pub fn with_paging_config(db: Database, source: S, paging: PagingConfig) -> Self {
        Self {
            db,
            source: Arc::new(source),
            write_lock: Arc::new(Mutex::new(())),
            paging,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Cached top headlines, refreshed from the remote source.
    pub fn headlines(&self) -> NewsPager<S> {
        let mediator = HeadlinesMediator::new(
            Arc::clone(&self.source),
            self.db.clone(),
            Arc::clone(&self.write_lock),
        );
        Pager::new(
            FeedSource::Headlines {
                db: self.db.clone(),
                mediator,
            },
            self.paging,
        )
    }

    /// Remote search. Results carry local bookmark flags but are not cached.
    pub fn search(&self, query: impl Into<String>) -> NewsPager<S> {
        Pager::new(
            FeedSource::Search {
                db: self.db.clone(),
                source: Arc::clone(&self.source),
                query: query.into(),
            },
            self.paging,
        )
    }

    /// Bookmarked articles, most recently cached first.
    pub fn bookmarks(&self) -> NewsPager<S> {
        Pager::new(
            FeedSource::Bookmarks {
                db: self.db.clone(),
            },
            self.paging,
        )
    }

    /// Flip the bookmark flag, inserting the article if it was never seen.
    /// Returns the new flag.
    pub async fn toggle_bookmark(&self, article: &Article) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.db.toggle_bookmark(article).await
    }

    pub async fn is_bookmarked(&self, url: &str) -> Result<bool, DatabaseError> {
        self.db.is_bookmarked(url).await
    }

    pub async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>, DatabaseError> {
        self.db.get_article_by_url(url).await
    }

    /// Cache an article unless a row for its URL already exists.
    /// Returns `true` if it was inserted.
    pub async fn upsert_article(&self, article: &Article) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.db.insert_article_if_absent(article).await
    }

    /// Every bookmarked article, most recently cached first.
    pub async fn bookmarked_articles(&self) -> Result<Vec<Article>, DatabaseError> {
        self.db.get_bookmarked_articles().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::{ArticleRecord, FetchError};
    use std::time::Duration;

    struct NoRemote;

    impl NewsSource for NoRemote {
        async fn fetch_headlines(
            &self,
            _page: u32,
            _page_size: u32,
        ) -> Result<Vec<ArticleRecord>, FetchError> {
            Err(FetchError::Timeout)
        }

        async fn fetch_search(
            &self,
            _query: &str,
            _page: u32,
            _page_size: u32,
        ) -> Result<Vec<ArticleRecord>, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    /// Serves a single headline on page 1.
    struct OneHeadline;

    impl NewsSource for OneHeadline {
        async fn fetch_headlines(
            &self,
            page: u32,
            _page_size: u32,
        ) -> Result<Vec<ArticleRecord>, FetchError> {
            Ok(match page {
                1 => vec![ArticleRecord::new("https://a.example.com", "A")],
                _ => Vec::new(),
            })
        }

        async fn fetch_search(
            &self,
            _query: &str,
            _page: u32,
            _page_size: u32,
        ) -> Result<Vec<ArticleRecord>, FetchError> {
            Ok(Vec::new())
        }
    }

    async fn repo() -> NewsRepository<NoRemote> {
        NewsRepository::new(Database::open(":memory:").await.unwrap(), NoRemote)
    }

    #[tokio::test]
    async fn test_toggle_bookmark_twice() {
        let repo = repo().await;
        let article = Article::new("https://a.example.com", "A");

        assert!(repo.toggle_bookmark(&article).await.unwrap());
        assert!(repo.is_bookmarked(&article.url).await.unwrap());

        assert!(!repo.toggle_bookmark(&article).await.unwrap());
        assert!(!repo.is_bookmarked(&article.url).await.unwrap());
        // Row survives the un-bookmark
        assert!(repo.get_article_by_url(&article.url).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_article_keeps_existing_row() {
        let repo = repo().await;
        let article = Article::new("https://a.example.com", "Original");
        repo.toggle_bookmark(&article).await.unwrap();

        let inserted = repo
            .upsert_article(&Article::new("https://a.example.com", "Replacement"))
            .await
            .unwrap();

        assert!(!inserted);
        let stored = repo.get_article_by_url(&article.url).await.unwrap().unwrap();
        assert_eq!(stored.title, "Original");
        assert!(stored.is_bookmarked);
    }

    #[tokio::test]
    async fn test_seed_then_toggle_bookmarks_uncached_article() {
        let repo = repo().await;
        let seed = Article::new("https://a.example.com", "Seen in search");

        assert!(repo.upsert_article(&seed).await.unwrap());
        let stored = repo.get_article_by_url(&seed.url).await.unwrap().unwrap();
        assert!(!stored.is_bookmarked);
        assert!(!stored.is_top_headline);

        assert!(repo.toggle_bookmark(&stored).await.unwrap());
        let saved = repo.bookmarked_articles().await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].title, "Seen in search");
        assert_eq!(saved[0].cached_at, seed.cached_at);
    }

    #[tokio::test]
    async fn test_upsert_article_rejects_empty_url() {
        let repo = repo().await;
        let err = repo.upsert_article(&Article::new("", "Nothing")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::EmptyUrl));
    }

    #[tokio::test]
    async fn test_bookmarked_articles_newest_first() {
        let repo = repo().await;
        let mut older = Article::new("https://old.example.com", "Old");
        older.cached_at = 1;
        let mut newer = Article::new("https://new.example.com", "New");
        newer.cached_at = 2;
        repo.toggle_bookmark(&older).await.unwrap();
        repo.toggle_bookmark(&newer).await.unwrap();

        let saved = repo.bookmarked_articles().await.unwrap();
        let urls: Vec<&str> = saved.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://new.example.com", "https://old.example.com"]);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let repo = repo().await;
        repo.toggle_bookmark(&Article::new("https://a.example.com", "A"))
            .await
            .unwrap();

        let mut bookmarks = repo.bookmarks();
        let mut headlines = repo.headlines();
        bookmarks.refresh().await;
        headlines.refresh().await;

        assert_eq!(bookmarks.item_count(), 1);
        // Remote is down and nothing is cached as a headline
        assert_eq!(headlines.item_count(), 0);
        assert!(headlines.load_states().refresh.error().is_some());
        assert!(bookmarks.load_states().refresh.error().is_none());
    }

    #[tokio::test]
    async fn test_toggle_and_merge_are_serialized() {
        let repo = NewsRepository::new(Database::open(":memory:").await.unwrap(), OneHeadline);
        let url = "https://a.example.com";
        repo.headlines().refresh().await;
        let a = repo.get_article_by_url(url).await.unwrap().unwrap();
        repo.database().clear_page_keys().await.unwrap();

        // Hold the write lock as an in-flight merge would
        let merge_in_flight = repo.write_lock.lock().await;

        let mut pager = repo.headlines();
        let mut both = std::pin::pin!(async {
            tokio::join!(pager.refresh(), repo.toggle_bookmark(&a))
        });
        let blocked = tokio::time::timeout(Duration::from_millis(50), &mut both).await;
        assert!(blocked.is_err());

        // Neither write reached the store
        assert!(!repo.is_bookmarked(url).await.unwrap());
        assert!(repo.database().page_key_for_url(url).await.unwrap().is_none());

        drop(merge_in_flight);
        let (_, toggled) = both.await;

        assert!(toggled.unwrap());
        let stored = repo.get_article_by_url(url).await.unwrap().unwrap();
        assert!(stored.is_bookmarked);
        assert!(stored.is_top_headline);
        assert_eq!(stored.cached_at, a.cached_at);
        assert!(repo.database().page_key_for_url(url).await.unwrap().is_some());
    }
}
