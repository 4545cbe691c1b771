//! Thin HTTP layer shared by credentials, key fetchers and services.
//!
//! Every request goes through a `reqwest_middleware` client with transient retries.
//! Responses are buffered so callers can inspect both the raw text and the parsed
//! JSON; any non-2xx status is surfaced as an [`HttpError`] carrying the response.

use crate::app::AccessTokenManager;
use crate::core::middleware::AuthMiddleware;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Default timeout applied to every outbound request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_RETRIES: u32 = 3;

/// A buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
    /// The body parsed as JSON, if it parses.
    pub data: Option<Value>,
}

impl HttpResponse {
    pub fn is_json(&self) -> bool {
        self.data.is_some()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A response with a non-success status code.
#[derive(Debug, Error)]
#[error("Server responded with status {}", .response.status)]
pub struct HttpError {
    pub response: HttpResponse,
}

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Description of a single request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(HeaderName, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Sets an `application/x-www-form-urlencoded` body.
    pub fn form(mut self, pairs: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.body = Some(body.into_bytes());
        self.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: ClientWithMiddleware,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = ClientBuilder::new(base_client(timeout))
            .with(RetryTransientMiddleware::new_with_policy(retry_policy()))
            .build();
        Self { client }
    }

    /// Creates a client that attaches a bearer token from `tokens` to every request.
    pub fn authorized(tokens: AccessTokenManager, timeout: Duration) -> Self {
        let client = ClientBuilder::new(base_client(timeout))
            .with(RetryTransientMiddleware::new_with_policy(retry_policy()))
            .with(AuthMiddleware::new(tokens))
            .build();
        Self { client }
    }

    /// Wraps an already configured middleware client.
    pub fn from_client(client: ClientWithMiddleware) -> Self {
        Self { client }
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let mut builder = self.client.request(request.method, request.url.as_str());
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        let data = serde_json::from_str::<Value>(&text).ok();

        let response = HttpResponse {
            status,
            headers,
            text,
            data,
        };

        if !status.is_success() {
            return Err(HttpError { response }.into());
        }

        Ok(response)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES)
}

fn base_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::warn!(target: "firebase_admin::http", error = %e, "Failed to build HTTP client with custom config, using defaults");
        Client::new()
    })
}
