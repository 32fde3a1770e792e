mod articles;
mod headlines;
mod page_keys;
mod schema;
mod types;

pub use headlines::continuation_keys;
pub use schema::Database;
pub use types::{Article, DatabaseError, HeadlinePage, MergeOutcome, PageKey};
