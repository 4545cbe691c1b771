//! The `database` service: resolves the Realtime Database URL for an app and
//! hands out HTTP clients authorized for it.
//!
//! When `FIREBASE_DATABASE_EMULATOR_HOST` is set, requests go to the emulator and
//! are authorized with the emulator's fixed `owner` token instead of the app's
//! credential.


use crate::app::{AccessTokenManager, AppErrorCode, AppService, FirebaseApp, FirebaseAppError};
use crate::core::http::{HttpClient, DEFAULT_HTTP_TIMEOUT};
use crate::credential::EmulatorAdminCredential;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

pub const DATABASE_SERVICE: &str = "database";

pub const DATABASE_EMULATOR_HOST_VAR: &str = "FIREBASE_DATABASE_EMULATOR_HOST";

pub struct FirebaseDatabase {
    url: String,
    namespace: String,
    emulator: bool,
    tokens: AccessTokenManager,
    timeout: Duration,
}

impl FirebaseDatabase {
    /// Service factory used by the app registry.
    pub fn from_app(app: &FirebaseApp) -> Result<Self, FirebaseAppError> {
        let database_url = match app.options().database_url.clone() {
            Some(url) => url,
            None => {
                let project_id = app.project_id().ok_or_else(|| {
                    FirebaseAppError::new(
                        AppErrorCode::InvalidArgument,
                        "Can't determine Firebase Database URL. Either set the database_url \
                         option or initialize the app with a project id.",
                    )
                })?;
                format!("https://{}-default-rtdb.firebaseio.com", project_id)
            }
        };

        let emulator_host = std::env::var(DATABASE_EMULATOR_HOST_VAR)
            .ok()
            .filter(|host| !host.is_empty());
        let timeout = app.options().http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);
        Self::new(&database_url, app.internals()?.clone(), timeout, emulator_host)
    }

    /// Resolves `database_url`, redirecting it to `emulator_host` when one is given.
    pub fn new(
        database_url: &str,
        tokens: AccessTokenManager,
        timeout: Duration,
        emulator_host: Option<String>,
    ) -> Result<Self, FirebaseAppError> {
        let parsed = Url::parse(database_url).map_err(|_| invalid_url(database_url))?;
        let host = parsed.host_str().ok_or_else(|| invalid_url(database_url))?;

        // Emulator URLs carry the namespace as `?ns=`; hosted URLs as the first label.
        let explicit_ns = parsed
            .query_pairs()
            .find(|(key, _)| key == "ns")
            .map(|(_, value)| value.into_owned());
        let namespace = explicit_ns
            .clone()
            .or_else(|| host.split('.').next().map(str::to_string))
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| invalid_url(database_url))?;

        let (url, emulator) = match emulator_host {
            Some(emulator_host) => (format!("http://{}?ns={}", emulator_host, namespace), true),
            None if explicit_ns.is_some() && parsed.scheme() == "http" => {
                (database_url.to_string(), true)
            }
            None => (database_url.trim_end_matches('/').to_string(), false),
        };

        let tokens = if emulator {
            AccessTokenManager::new(Arc::new(EmulatorAdminCredential))
        } else {
            tokens
        };

        info!(target: "firebase_admin::database", %url, emulator, "Resolved database URL");
        Ok(Self {
            url,
            namespace,
            emulator,
            tokens,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_emulator(&self) -> bool {
        self.emulator
    }

    /// The bearer token requests to the database are authorized with.
    pub async fn access_token(&self) -> Result<String, FirebaseAppError> {
        Ok(self.tokens.get_token(false).await?.access_token)
    }

    /// An HTTP client that attaches the database access token to every request.
    pub fn client(&self) -> HttpClient {
        HttpClient::authorized(self.tokens.clone(), self.timeout)
    }
}

impl AppService for FirebaseDatabase {
    fn delete(&self) {
        // The app tears down its own token manager; only the emulator one is ours.
        if self.emulator {
            self.tokens.delete();
        }
    }
}

fn invalid_url(database_url: &str) -> FirebaseAppError {
    FirebaseAppError::new(
        AppErrorCode::InvalidArgument,
        format!(
            "Firebase Database URL \"{}\" is invalid. It should be of the form \
             https://<database>.firebaseio.com or http://<host>?ns=<database>.",
            database_url
        ),
    )
}
