use futures::future::join_all;
use metacache_test::MockFetcher;
use tokio::time::Instant;

use crate::{assert_elapsed, cache, ms, setup};

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_do_not_block_each_other() {
    setup();

    let fetcher = MockFetcher::new()
        .respond("a", ms(50), "A")
        .respond("b", ms(500), "B");
    let calls = fetcher.calls();
    let cache = cache(fetcher);

    let start = Instant::now();
    let timed = |key: &'static str| {
        let cache = &cache;
        async move {
            let result = cache.get(key.to_owned()).await;
            (result, start.elapsed())
        }
    };

    let ((a, a_elapsed), (b, b_elapsed)) = futures::join!(timed("a"), timed("b"));

    assert_eq!(a.unwrap(), "A");
    assert_elapsed(a_elapsed, ms(50));
    assert_eq!(b.unwrap(), "B");
    assert_elapsed(b_elapsed, ms(500));
    // the two fetches overlapped
    assert_elapsed(start.elapsed(), ms(500));

    assert_eq!(calls.get("a"), 1);
    assert_eq!(calls.get("b"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_key_does_not_affect_other_keys() {
    setup();

    let fetcher = MockFetcher::new()
        .respond("good", ms(10), "fine")
        .fail("bad", ms(10), "network error");
    let calls = fetcher.calls();
    let cache = cache(fetcher);

    let keys = ["good", "bad", "good", "bad"];
    let results = join_all(keys.iter().map(|key| cache.get((*key).to_owned()))).await;

    assert_eq!(results[0].as_ref().unwrap(), "fine");
    assert_eq!(results[2].as_ref().unwrap(), "fine");
    assert!(results[1].as_ref().unwrap_err().to_string().contains("network error"));
    assert!(results[3].as_ref().unwrap_err().is_cached());

    assert_eq!(calls.total(), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_key() {
    setup();

    let fetcher = MockFetcher::new();
    let calls = fetcher.calls();
    let cache = cache(fetcher);

    let err = cache.get("missing".to_owned()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "retrieving metadata from source: no response for missing"
    );
    assert_eq!(
        err.downcast_ref::<metacache_test::MockError>().unwrap().0,
        "no response for missing"
    );
    assert_eq!(calls.get("missing"), 1);
}
