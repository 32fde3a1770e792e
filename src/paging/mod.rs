//! Paging sessions over the article cache.

mod engine;
mod error;
mod mediator;
mod source;

pub use engine::{
    LoadParams, LoadState, LoadStates, LoadType, MediatorResult, Page, PageLoader, Pager,
    PagerStatus, PagingConfig, PagingState, SessionState, DEFAULT_PAGE_SIZE,
};
pub use error::LoadError;
pub use mediator::HeadlinesMediator;
pub use source::FeedSource;
