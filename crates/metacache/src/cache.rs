use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use sentry::{Hub, SentryFutureExt};
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::FetchError;
use crate::fetcher::Fetcher;

/// How a single fetch ended.
#[derive(Debug, Clone)]
enum Outcome<V> {
    Fetched(Result<V, FetchError>),
    /// The fetcher panicked with this message.
    Panicked(Arc<str>),
}

/// The outcome of a single fetch.
#[derive(Debug, Clone)]
struct Resolved<V> {
    outcome: Outcome<V>,
    /// Set once when the fetch completes, and never touched afterwards.
    expires: Instant,
}

/// The once-only completion gate of a [`CacheEntry`].
///
/// The fetch runs the first time this is polled, and every clone resolves to the same outcome.
type Computation<V> = Shared<BoxFuture<'static, Resolved<V>>>;

/// A cache entry, either pending or resolved.
///
/// Entries are never mutated. An expired entry is replaced in the mapping by a fresh one, while
/// callers still holding the old one observe its original outcome.
struct CacheEntry<V> {
    computation: Computation<V>,
}

impl<V: Clone> CacheEntry<V> {
    /// Pending entries never expire.
    fn is_expired(&self, now: Instant) -> bool {
        self.computation
            .peek()
            .is_some_and(|resolved| now >= resolved.expires)
    }
}

/// A time-expiring cache for lookups with at most one fetch in flight per key.
///
/// On [`get`](Self::get), a fresh entry is served from memory. A missing or expired entry is
/// replaced by a new one, which invokes the [`Fetcher`] exactly once, no matter how many
/// callers are waiting for it. Fetches for different keys run independently of each other.
///
/// The internal lock only guards the lookup of the entry, and is never held across a fetch.
pub struct KeyedSingleFlightCache<F: Fetcher> {
    /// Name of this cache, used to tag metrics and logs.
    name: &'static str,
    config: CacheConfig,
    fetcher: Arc<F>,
    entries: Mutex<HashMap<F::Key, CacheEntry<F::Value>>>,
}

impl<F: Fetcher> fmt::Debug for KeyedSingleFlightCache<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("KeyedSingleFlightCache");
        debug.field("name", &self.name).field("config", &self.config);
        match self.entries.try_lock() {
            Ok(entries) => debug.field("entries", &entries.len()),
            Err(TryLockError::Poisoned(poisoned)) => {
                debug.field("entries", &poisoned.into_inner().len())
            }
            Err(TryLockError::WouldBlock) => debug.field("entries", &format_args!("<locked>")),
        };
        debug.finish()
    }
}

impl<F: Fetcher> KeyedSingleFlightCache<F> {
    /// Creates a new, empty cache.
    pub fn new(name: &'static str, config: CacheConfig, fetcher: F) -> Self {
        Self {
            name,
            config,
            fetcher: Arc::new(fetcher),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up the value for `key`, fetching it if there is no fresh entry.
    ///
    /// If a fetch for `key` is already in flight, this waits for it to complete and returns its
    /// outcome. There is no timeout here, the [`Fetcher`] is responsible for completing
    /// eventually.
    ///
    /// # Errors
    ///
    /// Returns the error of the fetch this call observed. Unless this call started the fetch
    /// itself, the error is annotated as cached, see [`FetchError::is_cached`].
    ///
    /// # Panics
    ///
    /// Panics if the fetch this call observed panicked. Every caller waiting on that fetch panics
    /// with the same message. The entry expires right away, so the next call fetches again.
    pub async fn get(&self, key: F::Key) -> Result<F::Value, FetchError> {
        metric!(counter("caches.access") += 1, "cache" => self.name);

        let (computation, started) = self.entry(key);
        if !started {
            metric!(counter("caches.memory.hit") += 1, "cache" => self.name);
        }

        let result = match computation.await.outcome {
            Outcome::Fetched(result) => result,
            Outcome::Panicked(message) => panic!("fetch panicked: {message}"),
        };

        match result {
            Ok(value) => Ok(value),
            Err(err) if started => Err(err),
            Err(err) => Err(err.replayed()),
        }
    }

    /// Returns the number of entries, including pending and expired ones.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Returns `true` if nothing was ever looked up in this cache.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<F::Key, CacheEntry<F::Value>>> {
        // Nothing can panic while the lock is held, and the map is consistent either way.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the computation to await for `key`, creating a new entry if needed.
    ///
    /// The returned flag is `true` if this call created the entry.
    fn entry(&self, key: F::Key) -> (Computation<F::Value>, bool) {
        let mut entries = self.lock_entries();

        match entries.get(&key) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                tracing::trace!(cache = self.name, "Using existing cache entry");
                return (entry.computation.clone(), false);
            }
            Some(_) => {
                metric!(counter("caches.entry.replaced") += 1, "cache" => self.name);
                tracing::trace!(cache = self.name, "Replacing expired cache entry");
            }
            None => {
                tracing::trace!(cache = self.name, "Creating new cache entry");
            }
        }

        let computation = self.compute(key.clone());
        entries.insert(
            key,
            CacheEntry {
                computation: computation.clone(),
            },
        );
        (computation, true)
    }

    /// Creates the deduplicated fetch for `key`.
    ///
    /// Nothing happens until the returned computation is first polled.
    fn compute(&self, key: F::Key) -> Computation<F::Value> {
        let name = self.name;
        let config = self.config;
        let fetcher = Arc::clone(&self.fetcher);

        let computation = async move {
            metric!(counter("caches.computation") += 1, "cache" => name);
            let start = Instant::now();

            // Covers both the call to `fetch` and polling the future it returns.
            let fetched = AssertUnwindSafe(async { fetcher.fetch(&key).await })
                .catch_unwind()
                .await;

            metric!(timer("caches.computation.duration") = start.elapsed(), "cache" => name);
            let (outcome, ttl) = match fetched {
                Ok(result) => {
                    let result = result.map_err(|err| FetchError::new(fetcher.context(), err));
                    if let Err(err) = &result {
                        metric!(counter("caches.computation.error") += 1, "cache" => name);
                        tracing::debug!(
                            error = err as &dyn std::error::Error,
                            cache = name,
                            "Fetch failed",
                        );
                    }
                    let ttl = config.ttl_for(&result);
                    (Outcome::Fetched(result), ttl)
                }
                Err(payload) => {
                    let message = panic_message(&*payload);
                    metric!(counter("caches.computation.panic") += 1, "cache" => name);
                    tracing::error!(panic = %message, cache = name, "Fetch panicked");
                    (Outcome::Panicked(message), Duration::ZERO)
                }
            };

            let expires = Instant::now() + ttl;
            Resolved { outcome, expires }
        };

        computation
            // Scope changes done by the fetch must not leak into whichever caller polls it.
            .bind_hub(Hub::new_from_top(Hub::current()))
            .boxed()
            .shared()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Arc<str> {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        Arc::from(*message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        Arc::from(message.as_str())
    } else {
        Arc::from("Box<dyn Any>")
    }
}
