//! Cache errors.

use thiserror::Error;

/// Errors returned by [`Cacher`](super::Cacher) lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The key is absent and the cacher has no default factory.
    #[error("key not found in cacher `{cacher}`")]
    KeyNotFound { cacher: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;
