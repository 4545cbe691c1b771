//! Access token lifecycle for a single app.
//!
//! The [`AccessTokenManager`] owns the app's current OAuth2 access token. It
//! answers `get_token` from cache while the token is valid, serializes calls into
//! the [`Credential`], broadcasts every fresh token to registered listeners and
//! keeps a single background task that refreshes the token before it expires.
//!
//! # Proactive refresh
//!
//! The background refresh is a small state machine:
//!
//! ```text
//! Idle -> Scheduled -> Refreshing -> Scheduled (success, next expiry)
//!                                 -> Scheduled (failure, retry in 60s)
//!                                 -> Idle      (5th consecutive failure)
//! ```
//!
//! Every transition into `Scheduled` aborts the previous task and bumps a
//! generation counter; a timer that wakes up with a stale generation does nothing.
//! Background failures are logged and never reach callers.

use crate::app::error::{AppErrorCode, FirebaseAppError};
use crate::core::clock::{Clock, SystemClock};
use crate::credential::{Credential, CredentialError, GoogleOAuthAccessToken};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_THRESHOLD_MILLIS: i64 = 5 * 60 * 1000;

const MINUTE_MILLIS: i64 = 60 * 1000;

/// Consecutive background failures tolerated before waiting for expiry.
pub const MAX_PROACTIVE_REFRESH_ATTEMPTS: u32 = 5;

const PROACTIVE_RETRY_DELAY: Duration = Duration::from_secs(60);

const INVALID_GRANT_HINT: &str = " There are two likely causes: (1) your server time is not \
    properly synced or (2) your certificate key file has been revoked. To solve (1), re-sync \
    the time on your server. To solve (2), make sure the key ID for your key file is still \
    present at https://console.firebase.google.com/iam-admin/serviceaccounts/project. If not, \
    generate a new key file at \
    https://console.firebase.google.com/project/_/settings/serviceaccounts/adminsdk.";

/// An access token together with its absolute expiration time.
#[derive(Clone, PartialEq, Eq)]
pub struct FirebaseAccessToken {
    pub access_token: String,
    /// Milliseconds since the Unix epoch.
    pub expiration_time: i64,
}

impl FirebaseAccessToken {
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expiration_time <= now_millis
    }
}

impl fmt::Debug for FirebaseAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseAccessToken")
            .field("access_token", &"[REDACTED]")
            .field("expiration_time", &self.expiration_time)
            .finish()
    }
}

/// Callback invoked with every new bearer token.
pub type AuthTokenListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle returned by [`AccessTokenManager::add_auth_token_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum RefreshState {
    Idle,
    Scheduled { generation: u64, task: JoinHandle<()> },
    Refreshing { generation: u64 },
}

struct TokenState {
    cached: Option<FirebaseAccessToken>,
    refresh: RefreshState,
    generation: u64,
    retry_attempts: u32,
    listeners: Vec<(ListenerId, AuthTokenListener)>,
    next_listener_id: u64,
    deleted: bool,
}

impl TokenState {
    fn new() -> Self {
        Self {
            cached: None,
            refresh: RefreshState::Idle,
            generation: 0,
            retry_attempts: 0,
            listeners: Vec::new(),
            next_listener_id: 0,
            deleted: false,
        }
    }

    fn cancel_pending(&mut self) {
        if let RefreshState::Scheduled { task, .. } =
            std::mem::replace(&mut self.refresh, RefreshState::Idle)
        {
            task.abort();
        }
    }

    fn is_refreshing(&self, generation: u64) -> bool {
        matches!(self.refresh, RefreshState::Refreshing { generation: g } if g == generation)
    }
}

impl Drop for TokenState {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Fetches, caches and proactively refreshes an app's access token.
///
/// Cloning is cheap; clones share the same token state.
#[derive(Clone)]
pub struct AccessTokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    credential: Arc<dyn Credential>,
    clock: Arc<dyn Clock>,
    state: Mutex<TokenState>,
    // Serializes credential calls.
    fetch_lock: tokio::sync::Mutex<()>,
}

impl AccessTokenManager {
    pub fn new(credential: Arc<dyn Credential>) -> Self {
        Self::with_clock(credential, Arc::new(SystemClock))
    }

    pub fn with_clock(credential: Arc<dyn Credential>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                credential,
                clock,
                state: Mutex::new(TokenState::new()),
                fetch_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn credential(&self) -> &Arc<dyn Credential> {
        &self.inner.credential
    }

    /// Returns the cached token, or fetches a new one when there is none, it has
    /// expired, or `force_refresh` is set.
    ///
    /// # Errors
    ///
    /// - `AppErrorCode::InvalidCredential` if the credential produced a malformed token.
    /// - `AppErrorCode::TokenFetchFailed` if the credential failed to fetch one.
    /// - `AppErrorCode::AppDeleted` once [`delete`](Self::delete) has been called.
    pub async fn get_token(&self, force_refresh: bool) -> Result<FirebaseAccessToken, FirebaseAppError> {
        if !force_refresh {
            if let Some(token) = self.inner.valid_cached_token()? {
                return Ok(token);
            }
        }
        self.inner.refresh(force_refresh).await
    }

    /// The last successfully fetched token, expired or not.
    pub fn cached_token(&self) -> Option<FirebaseAccessToken> {
        self.inner.lock_state().cached.clone()
    }

    /// Registers a listener for new tokens.
    ///
    /// If a token is already cached the listener is invoked with it right away.
    pub fn add_auth_token_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let listener: AuthTokenListener = Arc::new(listener);
        let (id, current) = {
            let mut state = self.inner.lock_state();
            state.next_listener_id += 1;
            let id = ListenerId(state.next_listener_id);
            if !state.deleted {
                state.listeners.push((id, Arc::clone(&listener)));
            }
            (id, state.cached.as_ref().map(|t| t.access_token.clone()))
        };

        if let Some(token) = current {
            listener(&token);
        }
        id
    }

    /// Returns `false` if no listener was registered under `id`.
    pub fn remove_auth_token_listener(&self, id: ListenerId) -> bool {
        let mut state = self.inner.lock_state();
        let before = state.listeners.len();
        state.listeners.retain(|(other, _)| *other != id);
        state.listeners.len() != before
    }

    /// Cancels the background refresh and drops the token and all listeners.
    pub fn delete(&self) {
        let mut state = self.inner.lock_state();
        state.deleted = true;
        state.cancel_pending();
        state.listeners.clear();
        state.cached = None;
        debug!(target: "firebase_admin::token", "Token manager deleted");
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.lock_state().deleted
    }

    #[cfg(test)]
    pub(crate) fn retry_attempts(&self) -> u32 {
        self.inner.lock_state().retry_attempts
    }

    #[cfg(test)]
    pub(crate) fn has_scheduled_refresh(&self) -> bool {
        matches!(self.inner.lock_state().refresh, RefreshState::Scheduled { .. })
    }
}

impl fmt::Debug for AccessTokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("AccessTokenManager")
            .field("cached", &state.cached)
            .field("retry_attempts", &state.retry_attempts)
            .field("listeners", &state.listeners.len())
            .field("deleted", &state.deleted)
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn valid_cached_token(&self) -> Result<Option<FirebaseAccessToken>, FirebaseAppError> {
        let now = self.clock.now_millis();
        let state = self.lock_state();
        if state.deleted {
            return Err(FirebaseAppError::new(
                AppErrorCode::AppDeleted,
                "The app owning this token manager has already been deleted.",
            ));
        }
        Ok(state.cached.as_ref().filter(|t| !t.is_expired_at(now)).cloned())
    }

    async fn refresh(self: &Arc<Self>, force_refresh: bool) -> Result<FirebaseAccessToken, FirebaseAppError> {
        let _guard = self.fetch_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        let cached = self.valid_cached_token()?;
        if let Some(token) = cached.filter(|_| !force_refresh) {
            return Ok(token);
        }

        self.fetch_and_store().await
    }

    async fn proactive_refresh(self: Arc<Self>, generation: u64) {
        {
            let mut state = self.lock_state();
            let current = matches!(
                state.refresh,
                RefreshState::Scheduled { generation: g, .. } if g == generation
            );
            if state.deleted || !current {
                return;
            }
            state.refresh = RefreshState::Refreshing { generation };
        }

        let _guard = self.fetch_lock.lock().await;
        {
            let state = self.lock_state();
            if state.deleted || !state.is_refreshing(generation) {
                return;
            }
        }

        debug!(target: "firebase_admin::token", "Proactively refreshing access token");
        if let Err(err) = self.fetch_and_store().await {
            self.handle_proactive_failure(generation, &err);
        }
    }

    async fn fetch_and_store(self: &Arc<Self>) -> Result<FirebaseAccessToken, FirebaseAppError> {
        let token = match self.credential.get_access_token().await {
            Ok(result) => self.to_access_token(result)?,
            Err(err) => return Err(credential_failure(&err)),
        };
        self.store(&token);
        Ok(token)
    }

    fn to_access_token(&self, result: GoogleOAuthAccessToken) -> Result<FirebaseAccessToken, FirebaseAppError> {
        if result.access_token.is_empty() || result.expires_in < 0 {
            let access_token = if result.access_token.is_empty() { "empty" } else { "[REDACTED]" };
            let cause = format!(
                "Invalid access token generated: access_token is {}, expires_in is {}. Valid access \
                 tokens must have a non-empty \"access_token\" and a non-negative \"expires_in\".",
                access_token, result.expires_in
            );
            return Err(wrap_cause(AppErrorCode::InvalidCredential, &cause));
        }

        let now = self.clock.now_millis();
        Ok(FirebaseAccessToken {
            access_token: result.access_token,
            expiration_time: now.saturating_add(result.expires_in.saturating_mul(1000)),
        })
    }

    fn store(self: &Arc<Self>, token: &FirebaseAccessToken) {
        let listeners: Vec<AuthTokenListener> = {
            let mut state = self.lock_state();
            if state.deleted {
                debug!(target: "firebase_admin::token", "Discarding token fetched after delete");
                return;
            }
            state.cached = Some(token.clone());
            state.retry_attempts = 0;

            match proactive_refresh_delay(token.expiration_time, self.clock.now_millis()) {
                Some(delay) => self.schedule_locked(&mut state, delay),
                None => state.cancel_pending(),
            }

            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        info!(
            target: "firebase_admin::token",
            expiration_time = token.expiration_time,
            listeners = listeners.len(),
            "Access token refreshed"
        );

        for listener in listeners {
            listener(&token.access_token);
        }
    }

    fn schedule_locked(self: &Arc<Self>, state: &mut TokenState, delay: Duration) {
        state.cancel_pending();
        state.generation += 1;
        let generation = state.generation;

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.proactive_refresh(generation).await;
            }
        });

        state.refresh = RefreshState::Scheduled { generation, task };
        debug!(
            target: "firebase_admin::token",
            delay_ms = delay.as_millis() as u64,
            "Scheduled proactive token refresh"
        );
    }

    fn handle_proactive_failure(self: &Arc<Self>, generation: u64, err: &FirebaseAppError) {
        let mut state = self.lock_state();
        if state.deleted || !state.is_refreshing(generation) {
            return;
        }

        state.retry_attempts += 1;
        let attempt = state.retry_attempts;
        if attempt < MAX_PROACTIVE_REFRESH_ATTEMPTS {
            warn!(target: "firebase_admin::token", attempt, error = %err, "Proactive token refresh failed, retrying");
            self.schedule_locked(&mut state, PROACTIVE_RETRY_DELAY);
        } else {
            warn!(
                target: "firebase_admin::token",
                attempt,
                error = %err,
                "Proactive token refresh failed, waiting for the token to expire"
            );
            state.refresh = RefreshState::Idle;
        }
    }
}

/// Delay until the next proactive refresh of a token expiring at `expiration_time`.
///
/// Long lived tokens refresh five minutes before expiry. Tokens with five minutes
/// or less left refresh at the next whole minute of their remaining lifetime.
pub(crate) fn proactive_refresh_delay(expiration_time: i64, now: i64) -> Option<Duration> {
    let remaining = expiration_time - now;
    if remaining <= 0 {
        return None;
    }

    let delay = if remaining > TOKEN_EXPIRY_THRESHOLD_MILLIS {
        remaining - TOKEN_EXPIRY_THRESHOLD_MILLIS
    } else {
        match remaining % MINUTE_MILLIS {
            0 => MINUTE_MILLIS,
            partial => partial,
        }
    };
    Some(Duration::from_millis(delay as u64))
}

fn credential_failure(err: &CredentialError) -> FirebaseAppError {
    let code = if err.is_malformed_token() {
        AppErrorCode::InvalidCredential
    } else {
        AppErrorCode::TokenFetchFailed
    };
    wrap_cause(code, &err.to_string())
}

fn wrap_cause(code: AppErrorCode, cause: &str) -> FirebaseAppError {
    let mut message = format!(
        "Credential implementation provided to initialize_app() via the \"credential\" property \
         failed to fetch a valid Google OAuth2 access token with the following error: \"{}\".",
        cause
    );
    if cause.contains("invalid_grant") {
        message.push_str(INVALID_GRANT_HINT);
    }
    FirebaseAppError::new(code, message)
}
