use crate::app::error::{AppErrorCode, FirebaseAppError};
use crate::credential::Credential;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding default app options, either inline JSON or a path
/// to a JSON file.
pub const FIREBASE_CONFIG_VAR: &str = "FIREBASE_CONFIG";

/// Options an app is initialized with.
#[derive(Clone, Default)]
pub struct AppOptions {
    /// Supplies access tokens. Application Default Credentials are used when absent.
    pub credential: Option<Arc<dyn Credential>>,
    pub project_id: Option<String>,
    pub database_url: Option<String>,
    pub storage_bucket: Option<String>,
    pub service_account_id: Option<String>,
    /// Timeout for outbound HTTP requests made on behalf of the app.
    pub http_timeout: Option<Duration>,
}

impl AppOptions {
    pub fn with_credential(credential: Arc<dyn Credential>) -> Self {
        Self {
            credential: Some(credential),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn database_url(mut self, database_url: impl Into<String>) -> Self {
        self.database_url = Some(database_url.into());
        self
    }

    #[must_use]
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Reads options from `FIREBASE_CONFIG`; empty options when it is not set.
    pub fn from_env() -> Result<Self, FirebaseAppError> {
        match std::env::var(FIREBASE_CONFIG_VAR) {
            Ok(config) if !config.trim().is_empty() => Self::from_config(&config),
            _ => Ok(Self::default()),
        }
    }

    /// Parses a `FIREBASE_CONFIG` value. Values starting with `{` are JSON, anything
    /// else is a path to a JSON file.
    pub fn from_config(config: &str) -> Result<Self, FirebaseAppError> {
        let contents = if config.trim_start().starts_with('{') {
            config.to_string()
        } else {
            std::fs::read_to_string(config).map_err(|e| {
                FirebaseAppError::new(
                    AppErrorCode::InvalidAppOptions,
                    format!("Failed to read {} file {}: {}", FIREBASE_CONFIG_VAR, config, e),
                )
            })?
        };

        let parsed: FirebaseConfig = serde_json::from_str(&contents).map_err(|e| {
            FirebaseAppError::new(
                AppErrorCode::InvalidAppOptions,
                format!("Failed to parse app options from {}: {}", FIREBASE_CONFIG_VAR, e),
            )
        })?;

        Ok(Self {
            credential: None,
            project_id: parsed.project_id,
            database_url: parsed.database_url,
            storage_bucket: parsed.storage_bucket,
            service_account_id: parsed.service_account_id,
            http_timeout: None,
        })
    }
}

impl fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppOptions")
            .field("credential", &self.credential.as_ref().map(|_| "[CREDENTIAL]"))
            .field("project_id", &self.project_id)
            .field("database_url", &self.database_url)
            .field("storage_bucket", &self.storage_bucket)
            .field("service_account_id", &self.service_account_id)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirebaseConfig {
    #[serde(rename = "databaseURL")]
    database_url: Option<String>,
    project_id: Option<String>,
    storage_bucket: Option<String>,
    service_account_id: Option<String>,
}
