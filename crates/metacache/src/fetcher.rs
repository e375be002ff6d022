use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;

use futures::future::{BoxFuture, FutureExt};

/// The default context message wrapped around fetch errors.
const DEFAULT_CONTEXT: &str = "retrieving metadata from source";

/// The expensive lookup that is memoized by the [`KeyedSingleFlightCache`].
///
/// The fetcher owns any timeout or retry behavior. The cache never cancels a fetch, and a fetch
/// that never resolves starves every caller waiting on its key.
///
/// [`KeyedSingleFlightCache`]: crate::KeyedSingleFlightCache
pub trait Fetcher: Send + Sync + 'static {
    /// The parameters of a lookup, used as the cache key.
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    /// The result of a successful lookup.
    ///
    /// This is handed out to every caller, so it should be cheap to clone.
    type Value: Clone + Send + Sync + 'static;
    /// The error of a failed lookup.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Performs the lookup for `key`.
    fn fetch<'a>(&'a self, key: &'a Self::Key) -> BoxFuture<'a, Result<Self::Value, Self::Error>>;

    /// The message that fetch errors are wrapped with.
    fn context(&self) -> &'static str {
        DEFAULT_CONTEXT
    }
}

/// A [`Fetcher`] backed by a closure, see [`fetcher_fn`].
pub struct FetchFn<F, K> {
    f: F,
    context: &'static str,
    _key: PhantomData<fn(&K)>,
}

/// Creates a [`Fetcher`] from a closure returning a future.
///
/// The returned future must not borrow the key, clone whatever it needs out of it.
pub fn fetcher_fn<F, K>(f: F) -> FetchFn<F, K> {
    FetchFn {
        f,
        context: DEFAULT_CONTEXT,
        _key: PhantomData,
    }
}

impl<F, K> FetchFn<F, K> {
    /// Replaces the message that fetch errors are wrapped with.
    pub fn with_context(mut self, context: &'static str) -> Self {
        self.context = context;
        self
    }
}

impl<F, K> fmt::Debug for FetchFn<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchFn")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<F, K, Fut, V, E> Fetcher for FetchFn<F, K>
where
    F: Fn(&K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Key = K;
    type Value = V;
    type Error = E;

    fn fetch<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<V, E>> {
        (self.f)(key).boxed()
    }

    fn context(&self) -> &'static str {
        self.context
    }
}
