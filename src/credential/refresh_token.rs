use super::{request_access_token, Credential, CredentialError, GoogleOAuthAccessToken};
use crate::app::{AppErrorCode, FirebaseAppError};
use crate::core::http::{HttpClient, HttpRequest};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

const REFRESH_TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";

/// Contents of an `authorized_user` credentials file, as written by `gcloud`.
#[derive(Clone, Deserialize)]
pub struct RefreshTokenSecret {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(rename = "type")]
    pub key_type: Option<String>,
}

/// Exchanges a long lived refresh token for access tokens.
pub struct RefreshTokenCredential {
    secret: RefreshTokenSecret,
    token_url: String,
    http_client: HttpClient,
}

impl RefreshTokenCredential {
    pub fn new(secret: RefreshTokenSecret) -> Result<Self, FirebaseAppError> {
        for (field, value) in [
            ("client_id", &secret.client_id),
            ("client_secret", &secret.client_secret),
            ("refresh_token", &secret.refresh_token),
        ] {
            if value.is_empty() {
                return Err(FirebaseAppError::new(
                    AppErrorCode::InvalidCredential,
                    format!("Refresh token must contain a \"{}\" property.", field),
                ));
            }
        }

        Ok(Self {
            secret,
            token_url: REFRESH_TOKEN_URL.to_string(),
            http_client: HttpClient::new(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, FirebaseAppError> {
        let secret: RefreshTokenSecret = serde_json::from_str(json).map_err(|e| {
            FirebaseAppError::new(
                AppErrorCode::InvalidCredential,
                format!("Failed to parse refresh token: {}", e),
            )
        })?;
        Self::new(secret)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FirebaseAppError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            FirebaseAppError::new(
                AppErrorCode::InvalidCredential,
                format!("Failed to read refresh token from file {}: {}", path.display(), e),
            )
        })?;
        Self::from_json(&json)
    }

    /// Overrides the token endpoint.
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn with_http_client(mut self, http_client: HttpClient) -> Self {
        self.http_client = http_client;
        self
    }
}

impl fmt::Debug for RefreshTokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTokenCredential")
            .field("client_id", &self.secret.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[async_trait]
impl Credential for RefreshTokenCredential {
    async fn get_access_token(&self) -> Result<GoogleOAuthAccessToken, CredentialError> {
        let request = HttpRequest::post(self.token_url.as_str()).form(&[
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("refresh_token", self.secret.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]);
        request_access_token(&self.http_client, request).await
    }
}
