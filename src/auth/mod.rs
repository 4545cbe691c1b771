//! The `auth` service: verification of Firebase ID tokens and session cookies.

pub mod jwt;
pub mod keys;
pub mod verifier;


use crate::app::{AppErrorCode, AppService, FirebaseApp, FirebaseAppError};
use crate::core::http::{HttpClient, DEFAULT_HTTP_TIMEOUT};
use std::fmt;
use thiserror::Error;
use tracing::debug;
use verifier::{DecodedIdToken, FirebaseTokenVerifier};

/// Name the auth service is registered under.
pub const AUTH_SERVICE: &str = "auth";

/// When set, tokens are verified as Auth emulator tokens, without signature checks.
pub const AUTH_EMULATOR_HOST_VAR: &str = "FIREBASE_AUTH_EMULATOR_HOST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    ArgumentError,
    IdTokenExpired,
    SessionCookieExpired,
    InvalidArgument,
    InternalError,
    InvalidCredential,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorCode::ArgumentError => "argument-error",
            AuthErrorCode::IdTokenExpired => "id-token-expired",
            AuthErrorCode::SessionCookieExpired => "session-cookie-expired",
            AuthErrorCode::InvalidArgument => "invalid-argument",
            AuthErrorCode::InternalError => "internal-error",
            AuthErrorCode::InvalidCredential => "invalid-credential",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "auth/{}", self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({code})")]
pub struct FirebaseAuthError {
    code: AuthErrorCode,
    message: String,
}

impl FirebaseAuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> AuthErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub struct FirebaseAuth {
    project_id: Option<String>,
    emulator_host: Option<String>,
    id_token_verifier: FirebaseTokenVerifier,
    session_cookie_verifier: FirebaseTokenVerifier,
}

impl FirebaseAuth {
    /// Service factory used by the app registry.
    pub fn from_app(app: &FirebaseApp) -> Result<Self, FirebaseAppError> {
        let timeout = app.options().http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);
        Self::new(app.project_id(), HttpClient::with_timeout(timeout))
            .map_err(|e| FirebaseAppError::new(AppErrorCode::InvalidArgument, e.message))
    }

    /// Creates a verifier for `project_id` that fetches Google's public keys with
    /// `client`. Honors `FIREBASE_AUTH_EMULATOR_HOST`.
    pub fn new(project_id: Option<String>, client: HttpClient) -> Result<Self, FirebaseAuthError> {
        let id_token_verifier = FirebaseTokenVerifier::id_token_verifier(client.clone())?;
        let session_cookie_verifier = FirebaseTokenVerifier::session_cookie_verifier(client)?;
        Ok(Self::with_verifiers(
            project_id,
            id_token_verifier,
            session_cookie_verifier,
        ))
    }

    pub fn with_verifiers(
        project_id: Option<String>,
        id_token_verifier: FirebaseTokenVerifier,
        session_cookie_verifier: FirebaseTokenVerifier,
    ) -> Self {
        let emulator_host = std::env::var(AUTH_EMULATOR_HOST_VAR)
            .ok()
            .filter(|host| !host.is_empty());
        Self {
            project_id,
            emulator_host,
            id_token_verifier,
            session_cookie_verifier,
        }
    }

    /// Overrides the emulator host read from the environment.
    pub fn with_emulator_host(mut self, host: Option<String>) -> Self {
        self.emulator_host = host.filter(|h| !h.is_empty());
        self
    }

    pub fn is_emulator(&self) -> bool {
        self.emulator_host.is_some()
    }

    /// Verifies a Firebase ID token and returns its claims.
    ///
    /// # Errors
    ///
    /// - `auth/argument-error` for malformed tokens or wrong `kid`, `alg`, `aud`, `iss` or `sub`.
    /// - `auth/id-token-expired` when the token has expired.
    /// - `auth/invalid-argument` for bad signatures or unknown signing keys.
    /// - `auth/internal-error` when the public keys cannot be fetched.
    /// - `auth/invalid-credential` when no project id can be determined.
    pub async fn verify_id_token(&self, id_token: &str) -> Result<DecodedIdToken, FirebaseAuthError> {
        let project_id = self.require_project_id()?;
        debug!(target: "firebase_admin::auth", emulator = self.is_emulator(), "Verifying ID token");
        self.id_token_verifier
            .verify(id_token, project_id, self.is_emulator())
            .await
    }

    /// Verifies a session cookie and returns its claims.
    pub async fn verify_session_cookie(
        &self,
        session_cookie: &str,
    ) -> Result<DecodedIdToken, FirebaseAuthError> {
        let project_id = self.require_project_id()?;
        debug!(target: "firebase_admin::auth", emulator = self.is_emulator(), "Verifying session cookie");
        self.session_cookie_verifier
            .verify(session_cookie, project_id, self.is_emulator())
            .await
    }

    fn require_project_id(&self) -> Result<&str, FirebaseAuthError> {
        self.project_id.as_deref().ok_or_else(|| {
            FirebaseAuthError::new(
                AuthErrorCode::InvalidCredential,
                "Must initialize app with a cert credential or set your Firebase project ID as \
                 the GOOGLE_CLOUD_PROJECT environment variable to verify tokens.",
            )
        })
    }
}

impl AppService for FirebaseAuth {}
