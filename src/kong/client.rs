//! Kong Admin API client implementation.
//!
//! This module defines the [`RestClient`] capability the reconcilers are
//! written against, and [`KongClient`], its HTTP implementation.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ApiError, KongSyncError, Result};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default header carrying the admin token.
pub const DEFAULT_TOKEN_HEADER: &str = "Kong-Admin-Token";

/// HTTP methods used against the Admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

/// A single Admin API request.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Path relative to the admin base URL.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

/// Status and raw body of an Admin API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    /// Numeric HTTP status.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// Capability to issue requests against the Admin API.
///
/// Any HTTP status is a successful round trip; only failures to obtain
/// a response are errors, reported as [`ApiError::Transport`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Sends one request and returns the response without interpreting its status.
    async fn request(&self, request: RestRequest) -> Result<RestResponse>;
}

/// HTTP client for the Kong Admin API.
#[derive(Debug, Clone)]
pub struct KongClient {
    /// HTTP client.
    client: Client,
    /// Admin API base URL without trailing slash.
    base_url: String,
    /// Optional admin token and the header carrying it.
    token: Option<(String, String)>,
}

impl HttpMethod {
    /// Returns the method name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RestRequest {
    /// Creates a request without query or body.
    #[must_use]
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Sets the JSON body from a serializable record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn with_json<T: serde::Serialize>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Serialization {
            message: e.to_string(),
        })?;
        self.body = Some(value);
        Ok(self)
    }
}

impl RestResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Renders the status line, e.g. `404 Not Found`.
    #[must_use]
    pub fn status_line(&self) -> String {
        let reason = StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason());
        match reason {
            Some(reason) => format!("{} {reason}", self.status),
            None => self.status.to_string(),
        }
    }

    /// Returns the body as lossy UTF-8 text.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not the expected JSON shape.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            KongSyncError::Api(ApiError::invalid_response(format!(
                "Failed to parse response ({}): {e}",
                self.status_line()
            )))
        })
    }
}

impl KongClient {
    /// Creates a new Admin API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Sends `token` in `header_name` on every request.
    #[must_use]
    pub fn with_token(mut self, header_name: &str, token: &str) -> Self {
        self.token = Some((header_name.to_string(), token.to_string()));
        self
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RestClient for KongClient {
    async fn request(&self, request: RestRequest) -> Result<RestResponse> {
        let url = self.url_for(&request.path);
        trace!("{} {url} query={:?}", request.method, request.query);

        let mut builder = self.client.request(request.method.to_reqwest(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some((name, value)) = &self.token {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .json(body);
        }

        let response = builder.send().await.map_err(|e| {
            ApiError::transport(format!("{} {url} failed: {e}", request.method))
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            ApiError::transport(format!("Failed to read response body from {url}: {e}"))
        })?;

        debug!("{} {} -> {status}", request.method, request.path);

        Ok(RestResponse {
            status,
            body: body.to_vec(),
        })
    }
}
