//! Helpers for testing the cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - The [`MockFetcher`] is moved into the cache under test. Grab its [`Calls`] handle via
//!    [`MockFetcher::calls`] before doing so, to be able to assert on the number of fetches.
//!
//!  - Latencies are simulated with [`tokio::time::sleep`], so tests should run with a paused
//!    clock (`#[tokio::test(start_paused = true)]`) to be fast and deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use metacache::Fetcher;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `metacache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("metacache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// The error returned by a failing [`MockFetcher`] lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MockError(pub String);

/// The scripted behavior of a [`MockFetcher`] for a single key.
#[derive(Debug, Clone)]
struct Response {
    latency: Duration,
    outcome: Result<String, MockError>,
}

/// Counts the fetches done by a [`MockFetcher`], per key.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<Mutex<HashMap<String, usize>>>);

impl Calls {
    /// The number of fetches for `key`.
    pub fn get(&self, key: &str) -> usize {
        self.0.lock().unwrap().get(key).copied().unwrap_or_default()
    }

    /// The number of fetches for all keys.
    pub fn total(&self) -> usize {
        self.0.lock().unwrap().values().sum()
    }

    fn record(&self, key: &str) {
        *self.0.lock().unwrap().entry(key.to_owned()).or_default() += 1;
    }
}

/// A [`Fetcher`] with scripted responses per key.
///
/// Keys without a scripted response fail immediately with `no response for <key>`.
#[derive(Debug, Default)]
pub struct MockFetcher {
    responses: HashMap<String, Response>,
    calls: Calls,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `key` to `value` after `latency`.
    pub fn respond(mut self, key: &str, latency: Duration, value: &str) -> Self {
        let outcome = Ok(value.to_owned());
        self.responses
            .insert(key.to_owned(), Response { latency, outcome });
        self
    }

    /// Fails `key` with `message` after `latency`.
    pub fn fail(mut self, key: &str, latency: Duration, message: &str) -> Self {
        let outcome = Err(MockError(message.to_owned()));
        self.responses
            .insert(key.to_owned(), Response { latency, outcome });
        self
    }

    /// Returns a handle to the fetch counters, which stays valid after moving the fetcher.
    pub fn calls(&self) -> Calls {
        self.calls.clone()
    }
}

impl Fetcher for MockFetcher {
    type Key = String;
    type Value = String;
    type Error = MockError;

    fn fetch<'a>(&'a self, key: &'a String) -> BoxFuture<'a, Result<String, MockError>> {
        self.calls.record(key);

        Box::pin(async move {
            let Some(response) = self.responses.get(key) else {
                return Err(MockError(format!("no response for {key}")));
            };
            if !response.latency.is_zero() {
                tokio::time::sleep(response.latency).await;
            }
            response.outcome.clone()
        })
    }
}
