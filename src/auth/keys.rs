//! Public key fetching for token signature verification.

use crate::core::clock::{Clock, SystemClock};
use crate::core::http::{HttpClient, HttpClientError, HttpRequest, HttpResponse};
use crate::core::provider_error_detail;
use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

pub(crate) const KEY_FETCH_ERROR_PREFIX: &str = "Error fetching public keys for Google certs:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyFetchError {
    #[error("The provided public key certificate URL is not a valid URL: {0}")]
    InvalidUrl(String),
    #[error("Error fetching public keys for Google certs: {0}")]
    Fetch(String),
}

/// Supplies the current map of key id to PEM encoded public key or certificate.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch_public_keys(&self) -> Result<HashMap<String, String>, KeyFetchError>;
}

#[derive(Clone)]
struct CachedKeys {
    keys: HashMap<String, String>,
    /// Epoch millis; `None` keeps the keys until they are replaced.
    expires_at: Option<i64>,
}

impl CachedKeys {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// Fetches public keys from a URL and caches them for as long as the response's
/// `Cache-Control: max-age` allows.
pub struct UrlKeyFetcher {
    url: Url,
    client: HttpClient,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<CachedKeys>>,
}

impl UrlKeyFetcher {
    pub fn new(url: &str, client: HttpClient) -> Result<Self, KeyFetchError> {
        Self::with_clock(url, client, Arc::new(SystemClock))
    }

    pub fn with_clock(
        url: &str,
        client: HttpClient,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeyFetchError> {
        let url = Url::parse(url).map_err(|_| KeyFetchError::InvalidUrl(url.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(KeyFetchError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            url,
            client,
            clock,
            cache: RwLock::new(None),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn refresh(&self) -> Result<HashMap<String, String>, KeyFetchError> {
        debug!(target: "firebase_admin::keys", url = %self.url, "Fetching public keys");
        let response = self
            .client
            .send(HttpRequest::get(self.url.as_str()))
            .await
            .map_err(|err| KeyFetchError::Fetch(fetch_error_detail(err)))?;

        let keys = parse_keys(&response)?;
        let expires_at = max_age(&response)
            .map(|secs| self.clock.now_millis().saturating_add(secs.saturating_mul(1000)));

        *self.cache.write().await = Some(CachedKeys {
            keys: keys.clone(),
            expires_at,
        });
        debug!(target: "firebase_admin::keys", count = keys.len(), ?expires_at, "Cached public keys");
        Ok(keys)
    }
}

#[async_trait]
impl KeyFetcher for UrlKeyFetcher {
    async fn fetch_public_keys(&self) -> Result<HashMap<String, String>, KeyFetchError> {
        {
            let now = self.clock.now_millis();
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(now)) {
                return Ok(cached.keys.clone());
            }
        }
        self.refresh().await
    }
}

fn parse_keys(response: &HttpResponse) -> Result<HashMap<String, String>, KeyFetchError> {
    if let Some(detail) = provider_error_detail(response) {
        return Err(KeyFetchError::Fetch(detail));
    }
    let object = match response.data.as_ref() {
        Some(Value::Object(object)) => object,
        _ => return Err(KeyFetchError::Fetch(response.text.clone())),
    };

    object
        .iter()
        .map(|(kid, pem)| match pem {
            Value::String(pem) => Ok((kid.clone(), pem.clone())),
            _ => Err(KeyFetchError::Fetch(response.text.clone())),
        })
        .collect()
}

fn fetch_error_detail(err: HttpClientError) -> String {
    match err {
        HttpClientError::Http(http_err) => provider_error_detail(&http_err.response)
            .unwrap_or_else(|| http_err.response.text.clone()),
        other => other.to_string(),
    }
}

/// Reads `max-age` (seconds) from a `Cache-Control` header.
fn max_age(response: &HttpResponse) -> Option<i64> {
    response
        .header(CACHE_CONTROL.as_str())?
        .split(',')
        .find_map(|part| {
            let (name, value) = part.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            value.trim().trim_matches('"').parse::<i64>().ok()
        })
}
