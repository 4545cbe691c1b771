//! Credentials that supply Google OAuth2 access tokens.
//!
//! A [`Credential`] is an opaque token supplier: the app's
//! [`AccessTokenManager`](crate::app::AccessTokenManager) decides when to call it and
//! takes care of caching, proactive refresh and error reporting. Built-in
//! implementations cover service account keys, authorized-user refresh tokens, the
//! Compute Engine metadata server and Application Default Credentials discovery.

mod compute_engine;
mod refresh_token;
mod service_account;

#[cfg(test)]
mod tests;

pub use compute_engine::ComputeEngineCredential;
pub use refresh_token::{RefreshTokenCredential, RefreshTokenSecret};
pub use service_account::ServiceAccountCredential;

use crate::app::{AppErrorCode, FirebaseAppError};
use crate::core::http::{HttpClient, HttpClientError, HttpRequest, HttpResponse};
use crate::core::provider_error_detail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const GCLOUD_CREDENTIAL_SUFFIX: &str = "gcloud/application_default_credentials.json";

/// An access token as returned by a Google OAuth2 token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleOAuthAccessToken {
    pub access_token: String,
    /// Lifetime in seconds, relative to the time the token was issued.
    pub expires_in: i64,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    /// The token endpoint answered, but not with a usable token.
    #[error("{0}")]
    InvalidResponse(String),
    #[error("Error fetching access token: {0}")]
    Fetch(String),
    #[error("Failed to sign the token request assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl CredentialError {
    /// True when the failure is a malformed token rather than a failed request.
    pub fn is_malformed_token(&self) -> bool {
        matches!(self, CredentialError::InvalidResponse(_))
    }
}

/// Supplies OAuth2 access tokens used to authenticate outbound calls.
#[async_trait]
pub trait Credential: Send + Sync {
    async fn get_access_token(&self) -> Result<GoogleOAuthAccessToken, CredentialError>;

    /// The project this credential belongs to, when it knows.
    fn project_id(&self) -> Option<String> {
        None
    }
}

/// Credential accepted by the database emulator, which trusts the `owner` token.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmulatorAdminCredential;

#[async_trait]
impl Credential for EmulatorAdminCredential {
    async fn get_access_token(&self) -> Result<GoogleOAuthAccessToken, CredentialError> {
        Ok(GoogleOAuthAccessToken {
            access_token: "owner".to_string(),
            expires_in: 1_000_000,
        })
    }
}

/// Sends a token request and parses the endpoint's answer.
pub(crate) async fn request_access_token(
    client: &HttpClient,
    request: HttpRequest,
) -> Result<GoogleOAuthAccessToken, CredentialError> {
    let response = client.send(request).await.map_err(|err| {
        let detail = fetch_error_detail(&err);
        tracing::debug!(target: "firebase_admin::credential", error = %detail, "Token endpoint request failed");
        CredentialError::Fetch(detail)
    })?;
    parse_access_token(&response)
}

fn parse_access_token(response: &HttpResponse) -> Result<GoogleOAuthAccessToken, CredentialError> {
    let data = response.data.as_ref();
    let access_token = data
        .and_then(|d| d.get("access_token"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty());
    let expires_in = data.and_then(|d| d.get("expires_in")).and_then(|v| {
        v.as_i64().or_else(|| v.as_f64().map(|secs| secs as i64))
    });

    match (access_token, expires_in) {
        (Some(access_token), Some(expires_in)) => Ok(GoogleOAuthAccessToken {
            access_token: access_token.to_string(),
            expires_in,
        }),
        _ => Err(CredentialError::InvalidResponse(format!(
            "Unexpected response while fetching access token: {}",
            response.text
        ))),
    }
}

fn fetch_error_detail(err: &HttpClientError) -> String {
    match err {
        HttpClientError::Http(http_err) => {
            let response = &http_err.response;
            provider_error_detail(response).unwrap_or_else(|| {
                if response.text.is_empty() {
                    "Missing error payload".to_string()
                } else {
                    response.text.clone()
                }
            })
        }
        other => other.to_string(),
    }
}

/// Builds a credential from the JSON contents of a credentials file, dispatching on
/// its `type` field.
pub fn credential_from_json(json: &str) -> Result<Arc<dyn Credential>, FirebaseAppError> {
    let value: Value = serde_json::from_str(json).map_err(|e| {
        FirebaseAppError::new(
            AppErrorCode::InvalidCredential,
            format!("Failed to parse credentials file: {}", e),
        )
    })?;

    match value.get("type").and_then(Value::as_str) {
        Some("service_account") => Ok(Arc::new(ServiceAccountCredential::from_json(json)?)),
        Some("authorized_user") => Ok(Arc::new(RefreshTokenCredential::from_json(json)?)),
        _ => Err(FirebaseAppError::new(
            AppErrorCode::InvalidCredential,
            "Invalid contents in the credentials file",
        )),
    }
}

pub fn credential_from_file(path: impl AsRef<Path>) -> Result<Arc<dyn Credential>, FirebaseAppError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|e| {
        FirebaseAppError::new(
            AppErrorCode::InvalidCredential,
            format!("Failed to read credentials from file {}: {}", path.display(), e),
        )
    })?;
    credential_from_json(&json)
}

/// Discovers Application Default Credentials.
///
/// Checks `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud well-known file, and
/// finally falls back to the Compute Engine metadata server.
pub fn application_default() -> Result<Arc<dyn Credential>, FirebaseAppError> {
    if let Some(path) = env::var_os("GOOGLE_APPLICATION_CREDENTIALS") {
        tracing::debug!(target: "firebase_admin::credential", "Loading credentials from GOOGLE_APPLICATION_CREDENTIALS");
        return credential_from_file(path);
    }

    if let Some(path) = gcloud_credential_path().filter(|p| p.exists()) {
        tracing::debug!(target: "firebase_admin::credential", path = %path.display(), "Loading gcloud application default credentials");
        return credential_from_file(path);
    }

    Ok(Arc::new(ComputeEngineCredential::new()))
}

fn gcloud_credential_path() -> Option<PathBuf> {
    if cfg!(windows) {
        env::var_os("APPDATA").map(|dir| PathBuf::from(dir).join(GCLOUD_CREDENTIAL_SUFFIX))
    } else {
        env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join(GCLOUD_CREDENTIAL_SUFFIX)
        })
    }
}
