use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// The shared, type-erased error returned by a [`Fetcher`](crate::Fetcher).
type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// A failed lookup, as returned by [`KeyedSingleFlightCache::get`].
///
/// This wraps the error of the underlying [`Fetcher`](crate::Fetcher) with a static context
/// message. Every caller observing the same cache entry receives the same underlying error.
///
/// Only the caller that started the fetch sees the error as-is. All callers that waited for
/// the fetch, or that were served from a cached failure, get it annotated with a
/// `(cached error)` marker, which makes replayed errors stand out in logs.
///
/// [`KeyedSingleFlightCache::get`]: crate::KeyedSingleFlightCache::get
#[derive(Debug, Clone, Error)]
#[error("{}{context}: {source}", cached_marker(.cached))]
pub struct FetchError {
    context: &'static str,
    cached: bool,
    source: SharedError,
}

fn cached_marker(cached: &bool) -> &'static str {
    if *cached { "(cached error): " } else { "" }
}

impl FetchError {
    pub(crate) fn new<E>(context: &'static str, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            context,
            cached: false,
            source: Arc::new(error),
        }
    }

    /// Returns a copy of this error annotated as replayed from the cache.
    pub(crate) fn replayed(&self) -> Self {
        Self {
            cached: true,
            ..self.clone()
        }
    }

    /// Whether this error was replayed from a fetch started by another caller.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// The context message this error was wrapped with.
    pub fn context(&self) -> &'static str {
        self.context
    }

    /// Attempts to downcast the underlying fetch error to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }
}
