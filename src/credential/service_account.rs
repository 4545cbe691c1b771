use super::{request_access_token, Credential, CredentialError, GoogleOAuthAccessToken};
use crate::app::{AppErrorCode, FirebaseAppError};
use crate::core::http::{HttpClient, HttpRequest};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use yup_oauth2::ServiceAccountKey;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for the signed assertion.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

const SCOPES: [&str; 5] = [
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/firebase.database",
    "https://www.googleapis.com/auth/firebase.messaging",
    "https://www.googleapis.com/auth/identitytoolkit",
    "https://www.googleapis.com/auth/userinfo.email",
];

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Exchanges a self-signed JWT for an access token (OAuth2 JWT bearer grant).
pub struct ServiceAccountCredential {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    http_client: HttpClient,
}

impl ServiceAccountCredential {
    pub fn new(key: ServiceAccountKey) -> Result<Self, FirebaseAppError> {
        Self::with_http_client(key, HttpClient::new())
    }

    pub fn with_http_client(
        key: ServiceAccountKey,
        http_client: HttpClient,
    ) -> Result<Self, FirebaseAppError> {
        if key.private_key.trim().is_empty() {
            return Err(FirebaseAppError::new(
                AppErrorCode::InvalidCredential,
                "Service account object must contain a string \"private_key\" property.",
            ));
        }
        if key.client_email.trim().is_empty() {
            return Err(FirebaseAppError::new(
                AppErrorCode::InvalidCredential,
                "Service account object must contain a string \"client_email\" property.",
            ));
        }

        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            FirebaseAppError::new(
                AppErrorCode::InvalidCredential,
                format!("Failed to parse private key: {}", e),
            )
        })?;

        Ok(Self {
            key,
            signing_key,
            http_client,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, FirebaseAppError> {
        let key = yup_oauth2::parse_service_account_key(json).map_err(|e| {
            FirebaseAppError::new(
                AppErrorCode::InvalidCredential,
                format!("Failed to parse service account json: {}", e),
            )
        })?;
        Self::new(key)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FirebaseAppError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            FirebaseAppError::new(
                AppErrorCode::InvalidCredential,
                format!("Failed to read service account from file {}: {}", path.display(), e),
            )
        })?;
        Self::from_json(&json)
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn create_assertion(&self) -> Result<String, CredentialError> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SCOPES.join(" "),
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        Ok(encode(&header, &claims, &self.signing_key)?)
    }
}

impl fmt::Debug for ServiceAccountCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredential")
            .field("client_email", &self.key.client_email)
            .field("project_id", &self.key.project_id)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl Credential for ServiceAccountCredential {
    async fn get_access_token(&self) -> Result<GoogleOAuthAccessToken, CredentialError> {
        let assertion = self.create_assertion()?;
        let request = HttpRequest::post(self.key.token_uri.as_str())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())]);
        request_access_token(&self.http_client, request).await
    }

    fn project_id(&self) -> Option<String> {
        self.key.project_id.clone()
    }
}
