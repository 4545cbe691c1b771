//! Core of a Firebase Admin SDK.
//!
//! Apps are created through an explicit [`AppRegistry`]. Each [`FirebaseApp`] owns an
//! [`AccessTokenManager`] that fetches OAuth2 access tokens from the app's
//! [`Credential`](credential::Credential), caches them and refreshes them in the
//! background before they expire. The `auth` service verifies Firebase ID tokens
//! and session cookies against Google's rotating public keys.
//!
//! ```no_run
//! use firebase_admin_core::{AppOptions, AppRegistry};
//! use firebase_admin_core::credential::credential_from_file;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = AppRegistry::new();
//! let credential = credential_from_file("service-account.json")?;
//! let app = registry.initialize_app(Some(AppOptions::with_credential(credential)), None)?;
//!
//! let token = app.internals()?.get_token(false).await?;
//! println!("token expires at {}", token.expiration_time);
//!
//! let decoded = app.auth()?.verify_id_token("<id token>").await?;
//! println!("uid: {}", decoded.uid());
//! # Ok(())
//! # }
//! ```

pub mod app;
#[cfg(feature = "auth")]
pub mod auth;
pub mod core;
pub mod credential;
#[cfg(feature = "database")]
pub mod database;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{
    AccessTokenManager, AppErrorCode, AppOptions, AppRegistry, FirebaseAccessToken, FirebaseApp,
    FirebaseAppError,
};
