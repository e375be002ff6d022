use std::sync::Arc;

use futures::future::join_all;
use metacache_test::MockFetcher;
use tokio::time::{self, Instant};

use crate::{assert_elapsed, cache, ms, setup};

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_share_one_fetch() {
    setup();

    let fetcher = MockFetcher::new().respond("a", ms(100), "V");
    let calls = fetcher.calls();
    let cache = cache(fetcher);

    let start = Instant::now();
    let results = join_all((0..10).map(|_| cache.get("a".to_owned()))).await;

    assert_elapsed(start.elapsed(), ms(100));
    assert_eq!(results.len(), 10);
    for result in results {
        assert_eq!(result.unwrap(), "V");
    }
    assert_eq!(calls.get("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_are_annotated() {
    setup();

    let fetcher = MockFetcher::new().fail("b", ms(100), "network error");
    let calls = fetcher.calls();
    let cache = cache(fetcher);

    let results = join_all((0..5).map(|_| cache.get("b".to_owned()))).await;
    let errors: Vec<_> = results.into_iter().map(Result::unwrap_err).collect();

    // only the caller that started the fetch sees the error as-is
    let fresh: Vec<_> = errors.iter().filter(|err| !err.is_cached()).collect();
    assert_eq!(fresh.len(), 1);
    assert_eq!(
        fresh[0].to_string(),
        "retrieving metadata from source: network error"
    );

    for err in errors.iter().filter(|err| err.is_cached()) {
        assert_eq!(
            err.to_string(),
            "(cached error): retrieving metadata from source: network error"
        );
    }
    assert_eq!(calls.get("b"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_gets_share_one_fetch() {
    setup();

    let fetcher = MockFetcher::new().respond("a", ms(100), "V");
    let calls = fetcher.calls();
    let cache = Arc::new(cache(fetcher));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("a".to_owned()).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "V");
    }
    assert_eq!(calls.get("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_fetch_is_not_restarted() {
    setup();

    let fetcher = MockFetcher::new().respond("a", ms(100), "V");
    let calls = fetcher.calls();
    let cache = cache(fetcher);

    // The caller starting the fetch gives up halfway through.
    let abandoned = time::timeout(ms(50), cache.get("a".to_owned())).await;
    assert!(abandoned.is_err());

    // A later caller picks the very same fetch up, and only waits for the remainder.
    let start = Instant::now();
    assert_eq!(cache.get("a".to_owned()).await.unwrap(), "V");
    assert_elapsed(start.elapsed(), ms(50));
    assert_eq!(calls.get("a"), 1);
}
