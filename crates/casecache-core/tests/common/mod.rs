//! Shared helpers for the integration tests
//!
//! - a mock API server with the upload endpoint mounted
//! - a `Config` pointing at it with a temporary data directory
//! - request counting by path

#![allow(dead_code)]

use std::path::Path;

use casecache_core::{Config, ConnectivityMonitor, NewDocument, OfflineClient};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock server whose `/api/upload` answers with a remote url.
pub async fn start_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "url": "https://files.test/blob" })),
        )
        .mount(&server)
        .await;
    server
}

pub fn config(server: &MockServer, data_dir: &Path) -> Config {
    Config {
        base_url: format!("{}/api", server.uri()),
        data_dir: Some(data_dir.to_path_buf()),
        ..Config::default()
    }
}

pub async fn client(server: &MockServer, data_dir: &Path, online: bool) -> OfflineClient {
    OfflineClient::new(&config(server, data_dir), ConnectivityMonitor::new(online))
        .await
        .expect("client")
}

pub fn document(victim_id: i64, name: &str) -> NewDocument {
    NewDocument {
        victim_id,
        label: format!("label {}", name),
        file_name: name.to_string(),
        bytes: name.as_bytes().to_vec(),
        mime_type: Some("application/pdf".to_string()),
    }
}

/// Requests received so far for `method` + `path`.
pub async fn count_requests(server: &MockServer, http_method: &str, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|req| req.method.as_str() == http_method && req.url.path() == request_path)
        .count()
}
