//! Offline-first news cache.
//!
//! Headlines are fetched from a NewsAPI-compatible service and merged into a
//! local SQLite cache that keeps bookmarks across refreshes. Search results
//! are served straight from the remote, and bookmarks straight from the
//! cache. All three are consumed through [`paging::Pager`] sessions created
//! by [`NewsRepository`].

pub mod config;
pub mod news;
pub mod paging;
pub mod repository;
pub mod storage;

pub use repository::{NewsPager, NewsRepository};
