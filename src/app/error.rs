use std::fmt;
use thiserror::Error;

/// Error codes raised by the app, registry and token manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppErrorCode {
    AppDeleted,
    DuplicateApp,
    InvalidArgument,
    InternalError,
    InvalidAppName,
    InvalidAppOptions,
    /// A credential produced a malformed access token.
    InvalidCredential,
    NoApp,
    /// A credential failed to fetch an access token at all.
    TokenFetchFailed,
}

impl AppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppErrorCode::AppDeleted => "app-deleted",
            AppErrorCode::DuplicateApp => "duplicate-app",
            AppErrorCode::InvalidArgument => "invalid-argument",
            AppErrorCode::InternalError => "internal-error",
            AppErrorCode::InvalidAppName => "invalid-app-name",
            AppErrorCode::InvalidAppOptions => "invalid-app-options",
            AppErrorCode::InvalidCredential => "invalid-credential",
            AppErrorCode::NoApp => "no-app",
            AppErrorCode::TokenFetchFailed => "token-fetch-failed",
        }
    }
}

impl fmt::Display for AppErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app/{}", self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({code})")]
pub struct FirebaseAppError {
    code: AppErrorCode,
    message: String,
}

impl FirebaseAppError {
    pub fn new(code: AppErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> AppErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn has_code(&self, code: AppErrorCode) -> bool {
        self.code == code
    }
}
