//! Caching of expensive, failure-prone remote metadata lookups.
//!
//! The central type is the [`KeyedSingleFlightCache`], which memoizes the result of a
//! [`Fetcher`] per key for a limited time, and makes sure that at most one fetch is in
//! flight for any given key. Callers arriving while a fetch is running wait for it and
//! share its outcome.
//!
//! Successful results are kept for [`CacheConfig::success_ttl`], failures for the much
//! shorter [`CacheConfig::failure_ttl`]. Caching failures briefly bounds the load put on a
//! failing remote, while still surfacing fresh errors periodically. Expiration is checked
//! lazily on access, there is no background eviction and no capacity limit.
//!
//! ```no_run
//! use metacache::{CacheConfig, KeyedSingleFlightCache, fetcher_fn};
//!
//! # #[derive(Debug)] struct LookupError;
//! # impl std::fmt::Display for LookupError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("nope") }
//! # }
//! # impl std::error::Error for LookupError {}
//! # async fn load_metadata(_url: String) -> Result<String, LookupError> { Ok(String::new()) }
//! # async fn example() {
//! let cache = KeyedSingleFlightCache::new(
//!     "provider_metadata",
//!     CacheConfig::default(),
//!     fetcher_fn(|url: &String| load_metadata(url.clone())),
//! );
//!
//! match cache.get("https://idp.example.com/metadata".to_owned()).await {
//!     Ok(metadata) => println!("{metadata}"),
//!     Err(err) => eprintln!("{err}"),
//! }
//! # }
//! ```

#[macro_use]
pub mod metrics;

mod cache;
pub mod config;
mod error;
mod fetcher;
pub mod logging;

pub use cache::KeyedSingleFlightCache;
pub use config::CacheConfig;
pub use error::FetchError;
pub use fetcher::{FetchFn, Fetcher, fetcher_fn};
