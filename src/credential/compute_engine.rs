use super::{request_access_token, Credential, CredentialError, GoogleOAuthAccessToken};
use crate::core::http::{HttpClient, HttpRequest};
use async_trait::async_trait;
use reqwest::header::HeaderName;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const METADATA_FLAVOR: HeaderName = HeaderName::from_static("metadata-flavor");

/// Fetches tokens for the default service account from the metadata server.
#[derive(Clone)]
pub struct ComputeEngineCredential {
    token_url: String,
    http_client: HttpClient,
}

impl ComputeEngineCredential {
    pub fn new() -> Self {
        Self {
            token_url: METADATA_TOKEN_URL.to_string(),
            http_client: HttpClient::new(),
        }
    }

    /// Overrides the metadata server token endpoint.
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }
}

impl Default for ComputeEngineCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Credential for ComputeEngineCredential {
    async fn get_access_token(&self) -> Result<GoogleOAuthAccessToken, CredentialError> {
        let request =
            HttpRequest::get(self.token_url.as_str()).header(METADATA_FLAVOR, "Google");
        request_access_token(&self.http_client, request).await
    }
}
