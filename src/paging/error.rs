use thiserror::Error;

use crate::news::FetchError;
use crate::storage::DatabaseError;

/// Failure of a single page load.
///
/// Load errors never escape a paging session: they are recorded as the
/// error state of the edge that failed and can be retried.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Remote fetch failed or returned an unusable payload
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Local store read or merge transaction failed
    #[error(transparent)]
    Persistence(#[from] DatabaseError),
}

impl LoadError {
    /// Short classification used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Fetch(e) if e.is_protocol_error() => "remote_protocol",
            LoadError::Fetch(_) => "transient_fetch",
            LoadError::Persistence(_) => "persistence",
        }
    }
}
