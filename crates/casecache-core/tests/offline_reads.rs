//! Read-path behavior: write-through, cache fallback and mutations.

mod common;

use casecache_core::dispatcher::RequestPhase;
use casecache_core::models::paginate;
use casecache_core::{
    ApiError, Config, ConnectivityMonitor, OfflineClient, PaginationMeta, RequestOptions, StoreName,
};
use common::{client, count_requests, start_api};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_failed_read_is_served_from_cache() {
    let server = start_api().await;
    Mock::given(method("GET"))
        .and(path("/api/victime"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/victime"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(&server, dir.path(), true).await;

    let first = client
        .fetch_with_fallback("/victime", RequestOptions::get())
        .await
        .unwrap();
    assert!(!first.from_cache);
    assert!(!first.degraded);
    client.dispatcher().settle().await;

    let second = client
        .fetch_with_fallback("/victime", RequestOptions::get())
        .await
        .unwrap();
    assert!(second.from_cache);
    assert!(second.degraded);
    assert_eq!(second.data, json!([{"id": 1}, {"id": 2}]));
    assert!(second.cached_at.is_some());
    assert_eq!(client.dispatch_state().phase, RequestPhase::SuccessFromCache);
}

#[tokio::test]
async fn test_failed_read_without_cache_keeps_original_error() {
    let server = start_api().await;
    Mock::given(method("GET"))
        .and(path("/api/victime/stats"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(&server, dir.path(), true).await;

    let err = client
        .fetch_with_fallback("/victime/stats", RequestOptions::get())
        .await
        .unwrap_err();
    match err.api() {
        ApiError::RemoteRejected { status, body } => {
            assert_eq!(*status, 502);
            assert_eq!(body, "bad gateway");
        }
        other => panic!("unexpected error: {other}"),
    }
    let state = client.dispatch_state();
    assert_eq!(state.phase, RequestPhase::Failure);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn test_mutation_failure_never_reads_cache() {
    let server = start_api().await;
    Mock::given(method("GET"))
        .and(path("/api/victime/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "nom": "A"})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/victime/9"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(&server, dir.path(), true).await;

    client
        .fetch_with_fallback("/victime/9", RequestOptions::get())
        .await
        .unwrap();
    client.dispatcher().settle().await;

    let err = client
        .fetch_with_fallback("/victime/9", RequestOptions::put(json!({"nom": "B"})))
        .await
        .unwrap_err();
    assert_eq!(err.api().status(), Some(500));

    // The cached copy is untouched by the failed mutation
    let cached = client
        .cache()
        .unwrap()
        .get_from_cache(StoreName::Victims, "/api/victime/9")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.data, json!({"id": 9, "nom": "A"}));
}

#[tokio::test]
async fn test_repeated_reads_keep_one_record() {
    let server = start_api().await;
    Mock::given(method("GET"))
        .and(path("/api/evaluation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 3}])))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(&server, dir.path(), true).await;

    for _ in 0..2 {
        client
            .fetch_with_fallback("/evaluation", RequestOptions::get())
            .await
            .unwrap();
        client.dispatcher().settle().await;
    }
    assert_eq!(count_requests(&server, "GET", "/api/evaluation").await, 2);

    let entries = std::fs::read_dir(dir.path().join("evaluations"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".json"))
        .count();
    assert_eq!(entries, 1);

    let evaluations: Vec<serde_json::Value> = client
        .cache()
        .unwrap()
        .load_evaluations()
        .await
        .unwrap()
        .unwrap()
        .data;
    assert_eq!(evaluations, vec![json!({"id": 3})]);
}

#[tokio::test]
async fn test_cached_collection_pages_client_side() {
    let server = start_api().await;
    let victims: Vec<serde_json::Value> = (1..=45).map(|id| json!({ "id": id })).collect();
    Mock::given(method("GET"))
        .and(path("/api/victime"))
        .respond_with(ResponseTemplate::new(200).set_body_json(victims.clone()))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(&server, dir.path(), false).await;
    client
        .fetch_with_fallback("/victime", RequestOptions::get())
        .await
        .unwrap();
    client.dispatcher().settle().await;

    // Second read fails at the network and is paged from the cached copy
    let outcome = client
        .fetch_with_fallback("/victime", RequestOptions::get())
        .await
        .unwrap();
    assert!(outcome.from_cache);
    let items = outcome.data.as_array().unwrap();

    let second = paginate(items, 2, 20);
    assert_eq!(second.items.len(), 20);
    assert_eq!(
        second.meta,
        PaginationMeta {
            total: 45,
            page: 2,
            limit: 20,
            total_pages: 3,
            has_next_page: true,
            has_previous_page: true,
        }
    );

    let third = paginate(items, 3, 20);
    assert_eq!(third.items.len(), 5);
    assert!(!third.meta.has_next_page);

    let empty = paginate::<serde_json::Value>(&[], 1, 20);
    assert_eq!(empty.meta.total_pages, 1);
    assert!(!empty.meta.has_next_page);
    assert!(!empty.meta.has_previous_page);
}

#[tokio::test]
async fn test_paged_read_leaves_full_list_cached() {
    let server = start_api().await;
    let victims: Vec<serde_json::Value> = (1..=45).map(|id| json!({ "id": id })).collect();
    Mock::given(method("GET"))
        .and(path("/api/victime"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(victims[20..40].to_vec()))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/victime"))
        .respond_with(ResponseTemplate::new(200).set_body_json(victims.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(&server, dir.path(), true).await;
    client
        .fetch_with_fallback("/victime", RequestOptions::get())
        .await
        .unwrap();
    client.dispatcher().settle().await;

    let page = client
        .fetch_with_fallback("/victime?page=2&limit=20", RequestOptions::get())
        .await
        .unwrap();
    assert_eq!(page.data.as_array().unwrap().len(), 20);
    client.dispatcher().settle().await;

    let cache = client.cache().unwrap();
    let full: Vec<serde_json::Value> = cache.load_victims().await.unwrap().unwrap().data;
    assert_eq!(full.len(), 45);

    let cached_page = cache
        .get_from_cache(StoreName::Victims, "/api/victime?page=2&limit=20")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached_page.data.as_array().unwrap().len(), 20);
}

#[tokio::test]
async fn test_long_query_read_is_cached_and_served() {
    let server = start_api().await;
    Mock::given(method("GET"))
        .and(path("/api/victime/12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 12, "docs": [1]})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/victime/12"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let client = client(&server, dir.path(), true).await;
    let url = format!("/victime/12?search={}", "abc%20def".repeat(60));

    client
        .fetch_with_fallback(&url, RequestOptions::get())
        .await
        .unwrap();
    client.dispatcher().settle().await;

    let outcome = client
        .fetch_with_fallback(&url, RequestOptions::get())
        .await
        .unwrap();
    assert!(outcome.degraded);
    assert_eq!(outcome.data, json!({"id": 12, "docs": [1]}));
}

/// Config for an API whose port refuses connections.
fn unreachable_config(data_dir: &std::path::Path) -> Config {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Config {
        base_url: format!("http://127.0.0.1:{}/api", port),
        data_dir: Some(data_dir.to_path_buf()),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_unreachable_api_read_served_from_cache_write_fails() {
    let server = start_api().await;
    Mock::given(method("GET"))
        .and(path("/api/victime"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 4}])))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    {
        let online = client(&server, dir.path(), true).await;
        online
            .fetch_with_fallback("/victime", RequestOptions::get())
            .await
            .unwrap();
        online.shutdown().await;
    }

    let offline = OfflineClient::new(&unreachable_config(dir.path()), ConnectivityMonitor::new(true))
        .await
        .unwrap();

    let read = offline
        .fetch_with_fallback("/victime", RequestOptions::get())
        .await
        .unwrap();
    assert!(read.from_cache);
    assert!(read.degraded);
    assert_eq!(read.data, json!([{"id": 4}]));
    assert_eq!(offline.dispatch_state().phase, RequestPhase::SuccessFromCache);

    let err = offline
        .fetch_with_fallback("/victime", RequestOptions::post(json!({"nom": "C"})))
        .await
        .unwrap_err();
    assert!(matches!(err.api(), ApiError::NetworkFailure(_)));
    assert_eq!(offline.dispatch_state().phase, RequestPhase::Failure);
    offline.shutdown().await;
}
