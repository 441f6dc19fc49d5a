//! API client for communicating with the case-management REST API.
//!
//! This module provides the `ApiClient` struct used by the dispatcher for
//! every outbound call, and its `RemoteService` implementation used by the
//! sync service to replay queued documents and photos.

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ApiError;
use crate::config::{Config, Endpoints};

/// Reference to a file held by the remote binary storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub url: String,
}

/// Upload endpoints answer with either `url` or `link`.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: Option<String>,
    link: Option<String>,
}

impl UploadResponse {
    fn into_ref(self) -> Result<RemoteRef, ApiError> {
        self.url
            .or(self.link)
            .filter(|url| !url.is_empty())
            .map(|url| RemoteRef { url })
            .ok_or_else(|| {
                ApiError::InvalidResponse("upload response has neither url nor link".to_string())
            })
    }
}

/// Body of the document-creation call made after an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRegistration {
    pub victim_id: i64,
    pub label: String,
    pub name: String,
    pub url: String,
}

/// The remote operations queued writes are replayed through.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Store a binary payload, returning a reference the service can link to.
    async fn upload_blob(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<RemoteRef, ApiError>;

    async fn create_document(&self, registration: &DocumentRegistration) -> Result<(), ApiError>;

    async fn attach_victim_photo(&self, victim_id: i64, photo_url: &str) -> Result<(), ApiError>;
}

/// API client for the case-management service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    endpoints: Endpoints,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            endpoints: config.endpoints.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `url`; relative paths are joined to the base URL.
    pub fn resolve_url(&self, url: &str) -> Result<Url, ApiError> {
        let absolute = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        };
        Url::parse(&absolute).map_err(|e| ApiError::InvalidRequest(format!("{}: {}", absolute, e)))
    }

    fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap, ApiError> {
        let mut map = HeaderMap::new();
        map.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::InvalidRequest(format!("header {}: {}", name, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Parse a successful response body.
    ///
    /// An empty body is `null`. A body that is not JSON is returned as a JSON
    /// string, unless the server claimed it was JSON.
    async fn parse_body(response: reqwest::Response) -> Result<Value, ApiError> {
        let declared_json = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(e) if declared_json => {
                Err(ApiError::InvalidResponse(format!("malformed JSON body: {}", e)))
            }
            Err(_) => Ok(Value::String(text)),
        }
    }

    /// Send one request and return the parsed body of a 2xx response.
    pub async fn execute(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .headers(Self::build_headers(headers)?);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        debug!(method = %method, url = %url, status = response.status().as_u16(), "Response received");
        let response = Self::check_response(response).await?;
        Self::parse_body(response).await
    }

    /// One-off reachability check: any HTTP response counts as online.
    pub async fn is_reachable(&self) -> bool {
        match self.resolve_url("") {
            Ok(url) => self.client.head(url).send().await.is_ok(),
            Err(_) => false,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.resolve_url(path)
    }
}

#[async_trait]
impl RemoteService for ApiClient {
    async fn upload_blob(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<RemoteRef, ApiError> {
        let url = self.endpoint(&self.endpoints.upload)?;
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| ApiError::InvalidRequest(format!("content type {:?}: {}", content_type, e)))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let body = Self::parse_body(response).await?;

        let upload: UploadResponse = serde_json::from_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("upload response: {}", e)))?;
        upload.into_ref()
    }

    async fn create_document(&self, registration: &DocumentRegistration) -> Result<(), ApiError> {
        let url = self.endpoint(&self.endpoints.documents)?;
        let body = serde_json::to_value(registration)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        self.execute(Method::POST, &url, Some(&body), &[]).await?;
        Ok(())
    }

    async fn attach_victim_photo(&self, victim_id: i64, photo_url: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&format!(
            "{}/{}",
            self.endpoints.victims.trim_end_matches('/'),
            victim_id
        ))?;
        let body = serde_json::json!({ "photo": photo_url });
        self.execute(Method::PATCH, &url, Some(&body), &[]).await?;
        Ok(())
    }
}
