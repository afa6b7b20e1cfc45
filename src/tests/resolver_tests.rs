use crate::api::ApiError;
use crate::query::parse_query;
use crate::relationship_cache::{RelationshipCache, RelationshipKey};
use crate::resolver::{
    format_failure_message, format_success_message, FollowingPages, ResolveError,
};
use crate::tests::fakes::{test_resolver, FakeGraph};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BOT: &str = "followbot";

fn graph() -> FakeGraph {
    FakeGraph::new()
        .with_user("obbap", 1)
        .with_user("noliaaa", 2)
        .with_user("daveed_kz", 3)
        .with_user("udori", 4)
        .with_user("kezi", 5)
}

#[test]
fn test_format_messages() {
    assert_eq!(
        format_success_message("pbaba", "emeka"),
        "@pbaba is following @emeka"
    );
    assert!(format_failure_message("pbaba", "emeka").contains("is NOT following"));
}

#[tokio::test]
async fn test_single_page_verdicts_in_target_order() {
    let graph = Arc::new(graph().with_following("obbap", vec![vec![9, 4, 2]]));
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));
    let query = parse_query("@obbap following @noliaaa, @daveed_kz, @udori", BOT).unwrap();

    let response = resolver.resolve(&query).await.unwrap();

    assert_eq!(
        response,
        "@obbap is following @noliaaa\n\
         @obbap is NOT following @daveed_kz\n\
         @obbap is following @udori"
    );
    // the first page is shared by all three targets and is the last page
    assert_eq!(graph.page_calls(), vec![("obbap".to_string(), -1)]);
    assert_eq!(graph.lookup_calls().len(), 1);
}

#[tokio::test]
async fn test_walks_pages_until_found() {
    let graph = Arc::new(graph().with_following("obbap", vec![vec![10, 11], vec![12], vec![2]]));
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));
    let query = parse_query("@obbap following @noliaaa", BOT).unwrap();

    let response = resolver.resolve(&query).await.unwrap();

    assert_eq!(response, "@obbap is following @noliaaa");
    assert_eq!(
        graph.page_calls(),
        vec![
            ("obbap".to_string(), -1),
            ("obbap".to_string(), 1),
            ("obbap".to_string(), 2)
        ]
    );
}

#[tokio::test]
async fn test_exhausted_pages_mean_not_following() {
    let graph = Arc::new(graph().with_following("obbap", vec![vec![10], vec![11]]));
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));
    let query = parse_query("@obbap following @noliaaa", BOT).unwrap();

    let response = resolver.resolve(&query).await.unwrap();

    assert_eq!(response, "@obbap is NOT following @noliaaa");
    assert_eq!(graph.page_calls().len(), 2);
}

#[tokio::test]
async fn test_later_target_sees_earlier_pages() {
    // udori (4) is on the first page, noliaaa (2) on the second
    let graph = Arc::new(graph().with_following("obbap", vec![vec![4], vec![2]]));
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));
    let query = parse_query("@obbap following @noliaaa @udori", BOT).unwrap();

    let response = resolver.resolve(&query).await.unwrap();

    assert_eq!(
        response,
        "@obbap is following @noliaaa\n@obbap is following @udori"
    );
    assert_eq!(graph.page_calls().len(), 2);
}

#[tokio::test]
async fn test_subjects_major_order() {
    let graph = Arc::new(
        graph()
            .with_following("obbap", vec![vec![2]])
            .with_following("kezi", vec![vec![4]]),
    );
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));
    let query = parse_query("@obbap @kezi following @noliaaa @udori", BOT).unwrap();

    let response = resolver.resolve(&query).await.unwrap();

    assert_eq!(
        response.lines().collect::<Vec<_>>(),
        vec![
            "@obbap is following @noliaaa",
            "@obbap is NOT following @udori",
            "@kezi is NOT following @noliaaa",
            "@kezi is following @udori",
        ]
    );
}

#[tokio::test]
async fn test_orientation_left_side_list_is_searched() {
    // noliaaa follows obbap, not the other way around
    let graph = Arc::new(
        graph()
            .with_following("obbap", vec![vec![]])
            .with_following("noliaaa", vec![vec![1]]),
    );
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));

    let response = resolver
        .resolve(&parse_query("@obbap following @noliaaa", BOT).unwrap())
        .await
        .unwrap();
    assert_eq!(response, "@obbap is NOT following @noliaaa");

    let response = resolver
        .resolve(&parse_query("@noliaaa following @obbap", BOT).unwrap())
        .await
        .unwrap();
    assert_eq!(response, "@noliaaa is following @obbap");
}

#[tokio::test]
async fn test_repeated_pair_issues_no_second_pagination_call() {
    let graph = Arc::new(graph().with_following("obbap", vec![vec![10], vec![2]]));
    let cache = RelationshipCache::new(100);
    let resolver = test_resolver(graph.clone(), cache.clone());
    let query = parse_query("@obbap following @noliaaa", BOT).unwrap();

    let first = resolver.resolve(&query).await.unwrap();
    let calls_after_first = graph.page_calls().len();
    let second = resolver.resolve(&query).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(calls_after_first, 2);
    assert_eq!(graph.page_calls().len(), calls_after_first);
    assert_eq!(
        cache.get(&RelationshipKey::new("obbap", "noliaaa")).await,
        Some(true)
    );
}

#[tokio::test]
async fn test_cached_verdict_is_used_without_remote_call() {
    let graph = Arc::new(graph().with_following("obbap", vec![vec![2]]));
    let cache = RelationshipCache::new(100);
    // the cache disagrees with the remote list on purpose
    cache.put(RelationshipKey::new("obbap", "noliaaa"), false).await;
    let resolver = test_resolver(graph.clone(), cache);

    let mut pages = FollowingPages::new("obbap");
    let verdict = resolver
        .resolve_pair("obbap", "noliaaa", 2, &mut pages)
        .await
        .unwrap();

    assert!(!verdict);
    assert!(graph.page_calls().is_empty());
    assert!(!pages.is_exhausted());
}

#[tokio::test]
async fn test_unresolved_handles_abandon_query() {
    let graph = Arc::new(graph().with_following("obbap", vec![vec![2]]));
    let cache = RelationshipCache::new(100);
    let resolver = test_resolver(graph.clone(), cache.clone());
    let query = parse_query("@obbap following @noliaaa @ghost", BOT).unwrap();

    let err = resolver.resolve(&query).await.unwrap_err();

    match err {
        ResolveError::UnresolvedHandles { missing, total } => {
            assert_eq!(missing, 1);
            assert_eq!(total, 3);
        }
        e => panic!("Expected UnresolvedHandles, got {:?}", e),
    }
    assert!(graph.page_calls().is_empty());
    assert_eq!(cache.len().await, 0);
}

#[tokio::test]
async fn test_throttled_page_sleeps_and_retries_once() {
    let graph = Arc::new(graph().with_following("obbap", vec![vec![2]]));
    graph.throttle_next_page(Utc::now() + chrono::Duration::milliseconds(250));
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));
    let query = parse_query("@obbap following @noliaaa", BOT).unwrap();

    let started = Instant::now();
    let response = resolver.resolve(&query).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(response, "@obbap is following @noliaaa");
    // the identical call, issued twice
    assert_eq!(
        graph.page_calls(),
        vec![("obbap".to_string(), -1), ("obbap".to_string(), -1)]
    );
}

#[tokio::test]
async fn test_throttling_beyond_retry_budget_fails_task() {
    let graph = Arc::new(graph().with_following("obbap", vec![vec![2]]));
    let past = Utc::now() - chrono::Duration::seconds(1);
    for _ in 0..4 {
        graph.throttle_next_page(past);
    }
    // the test resolver allows three retries
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));
    let query = parse_query("@obbap following @noliaaa", BOT).unwrap();

    let err = resolver.resolve(&query).await.unwrap_err();

    assert!(matches!(err, ResolveError::Api(ApiError::Throttled { .. })));
    assert_eq!(graph.page_calls().len(), 4);
}

#[tokio::test]
async fn test_remote_failure_surfaces_as_error() {
    let graph = Arc::new(graph().with_broken_subject("obbap"));
    let resolver = test_resolver(graph.clone(), RelationshipCache::new(100));
    let query = parse_query("@obbap following @noliaaa", BOT).unwrap();

    let err = resolver.resolve(&query).await.unwrap_err();

    assert!(matches!(err, ResolveError::Api(ApiError::Api { .. })));
    assert!(err.to_string().contains("over capacity"));
}
