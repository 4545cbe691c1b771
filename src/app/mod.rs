//! Apps, their registry, and the access token lifecycle each app owns.

mod error;
mod options;
mod registry;
mod token_manager;


pub use error::{AppErrorCode, FirebaseAppError};
pub use options::{AppOptions, FIREBASE_CONFIG_VAR};
pub use registry::{AppEvent, AppHook, AppRegistry, AppService, DEFAULT_APP_NAME};
pub use token_manager::{
    AccessTokenManager, AuthTokenListener, FirebaseAccessToken, ListenerId,
    MAX_PROACTIVE_REFRESH_ATTEMPTS,
};

use crate::core::http::{HttpClient, DEFAULT_HTTP_TIMEOUT};
use crate::credential::Credential;
use registry::{RegistryShared, ServiceCatalog, ServiceInstance};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info};

/// A named, initialized app: options, credential-backed token manager and the
/// services created for it.
///
/// Cloning is cheap; clones refer to the same app.
#[derive(Clone)]
pub struct FirebaseApp {
    inner: Arc<AppInner>,
}

struct AppInner {
    name: String,
    options: AppOptions,
    internals: AccessTokenManager,
    catalog: Arc<ServiceCatalog>,
    registry: Weak<RegistryShared>,
    services: Mutex<HashMap<String, ServiceInstance>>,
    deleted: AtomicBool,
}

impl FirebaseApp {
    pub(crate) fn new(
        name: &str,
        options: AppOptions,
        credential: Arc<dyn Credential>,
        registry: Weak<RegistryShared>,
        catalog: Arc<ServiceCatalog>,
    ) -> Self {
        Self {
            inner: Arc::new(AppInner {
                name: name.to_string(),
                options,
                internals: AccessTokenManager::new(credential),
                catalog,
                registry,
                services: Mutex::new(HashMap::new()),
                deleted: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &AppOptions {
        &self.inner.options
    }

    /// The app's access token manager.
    pub fn internals(&self) -> Result<&AccessTokenManager, FirebaseAppError> {
        self.check_destroyed()?;
        Ok(&self.inner.internals)
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.load(Ordering::SeqCst)
    }

    /// Resolves the project id from the app options, the credential, or the
    /// `GOOGLE_CLOUD_PROJECT` / `GCLOUD_PROJECT` environment variables.
    pub fn project_id(&self) -> Option<String> {
        self.inner
            .options
            .project_id
            .clone()
            .or_else(|| self.inner.internals.credential().project_id())
            .or_else(|| std::env::var("GOOGLE_CLOUD_PROJECT").ok())
            .or_else(|| std::env::var("GCLOUD_PROJECT").ok())
            .filter(|id| !id.is_empty())
    }

    /// An HTTP client that authenticates requests with this app's access token.
    pub fn authorized_http_client(&self) -> Result<HttpClient, FirebaseAppError> {
        let timeout = self.inner.options.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);
        Ok(HttpClient::authorized(self.internals()?.clone(), timeout))
    }

    /// Returns the service registered under `name`, creating it on first use.
    pub fn get_service<T: AppService>(&self, name: &str) -> Result<Arc<T>, FirebaseAppError> {
        self.check_destroyed()?;

        let existing = self.lock_services().get(name).cloned();
        let instance = match existing {
            Some(instance) => instance,
            None => {
                // Factories may call back into the app, so the lock is not held here.
                let created = self.inner.catalog.instantiate(name, self)?;
                let (instance, lost_race) = match self.lock_services().entry(name.to_string()) {
                    Entry::Occupied(entry) => (entry.get().clone(), Some(created)),
                    Entry::Vacant(entry) => (entry.insert(created).clone(), None),
                };
                if let Some(discarded) = lost_race {
                    debug!(target: "firebase_admin::app", service = name, "Discarding duplicate service instance");
                    discarded.service.delete();
                }
                instance
            }
        };

        instance.any.downcast::<T>().map_err(|_| {
            FirebaseAppError::new(
                AppErrorCode::InvalidArgument,
                format!("Firebase service \"{}\" is not of the requested type.", name),
            )
        })
    }

    #[cfg(feature = "auth")]
    pub fn auth(&self) -> Result<Arc<crate::auth::FirebaseAuth>, FirebaseAppError> {
        self.get_service(crate::auth::AUTH_SERVICE)
    }

    #[cfg(feature = "database")]
    pub fn database(&self) -> Result<Arc<crate::database::FirebaseDatabase>, FirebaseAppError> {
        self.get_service(crate::database::DATABASE_SERVICE)
    }

    /// Deletes the app: removes it from its registry, tears down its services,
    /// cancels the background token refresh and notifies service hooks.
    pub fn delete(&self) -> Result<(), FirebaseAppError> {
        if self.inner.deleted.swap(true, Ordering::SeqCst) {
            return Err(self.deleted_error());
        }

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(self);
        }

        let services: Vec<ServiceInstance> =
            self.lock_services().drain().map(|(_, s)| s).collect();
        for instance in services {
            instance.service.delete();
        }

        self.inner.internals.delete();

        for hook in self.inner.catalog.hooks() {
            hook(AppEvent::Delete, self);
        }

        info!(target: "firebase_admin::app", app = %self.inner.name, "Deleted app");
        Ok(())
    }

    pub(crate) fn ptr_eq(&self, other: &FirebaseApp) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock_services(&self) -> MutexGuard<'_, HashMap<String, ServiceInstance>> {
        self.inner.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_destroyed(&self) -> Result<(), FirebaseAppError> {
        if self.is_deleted() {
            return Err(self.deleted_error());
        }
        Ok(())
    }

    fn deleted_error(&self) -> FirebaseAppError {
        FirebaseAppError::new(
            AppErrorCode::AppDeleted,
            format!("Firebase app named \"{}\" has already been deleted.", self.inner.name),
        )
    }
}

impl fmt::Debug for FirebaseApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseApp")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
