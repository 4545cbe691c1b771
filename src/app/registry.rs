//! Explicit registry of named apps and of the services they can host.
//!
//! Each [`AppRegistry`] is independent, so tests (or processes that need isolated
//! sets of apps) can create as many as they like.

use super::error::{AppErrorCode, FirebaseAppError};
use super::options::AppOptions;
use super::FirebaseApp;
use crate::credential::application_default;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::info;

pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

/// Lifecycle events delivered to service hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    Create,
    Delete,
}

pub type AppHook = Arc<dyn Fn(AppEvent, &FirebaseApp) + Send + Sync>;

/// A service hosted by an app, created lazily on first use.
pub trait AppService: Send + Sync + 'static {
    /// Called once when the owning app is deleted.
    fn delete(&self) {}
}

#[derive(Clone)]
pub(crate) struct ServiceInstance {
    pub(crate) any: Arc<dyn Any + Send + Sync>,
    pub(crate) service: Arc<dyn AppService>,
}

type ServiceFactory =
    Arc<dyn Fn(&FirebaseApp) -> Result<ServiceInstance, FirebaseAppError> + Send + Sync>;

#[derive(Clone)]
struct ServiceRegistration {
    factory: ServiceFactory,
    hook: Option<AppHook>,
}

/// Service factories shared between a registry and its apps.
#[derive(Default)]
pub(crate) struct ServiceCatalog {
    registrations: RwLock<HashMap<String, ServiceRegistration>>,
}

impl ServiceCatalog {
    pub(crate) fn instantiate(
        &self,
        name: &str,
        app: &FirebaseApp,
    ) -> Result<ServiceInstance, FirebaseAppError> {
        let factory = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|r| Arc::clone(&r.factory))
            .ok_or_else(|| {
                FirebaseAppError::new(
                    AppErrorCode::InvalidArgument,
                    format!("Firebase service named \"{}\" has not been registered.", name),
                )
            })?;
        factory(app)
    }

    pub(crate) fn hooks(&self) -> Vec<AppHook> {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|r| r.hook.clone())
            .collect()
    }
}

pub(crate) struct RegistryShared {
    apps: Mutex<HashMap<String, FirebaseApp>>,
    catalog: Arc<ServiceCatalog>,
}

impl RegistryShared {
    fn lock_apps(&self) -> MutexGuard<'_, HashMap<String, FirebaseApp>> {
        self.apps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn remove(&self, app: &FirebaseApp) {
        let mut apps = self.lock_apps();
        if apps.get(app.name()).is_some_and(|stored| stored.ptr_eq(app)) {
            apps.remove(app.name());
        }
    }
}

#[derive(Clone)]
pub struct AppRegistry {
    shared: Arc<RegistryShared>,
}

impl AppRegistry {
    /// Creates a registry with the built-in services registered.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_default_services();
        registry
    }

    /// Creates a registry without any services.
    pub fn empty() -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                apps: Mutex::new(HashMap::new()),
                catalog: Arc::new(ServiceCatalog::default()),
            }),
        }
    }

    fn register_default_services(&self) {
        #[cfg(feature = "auth")]
        self.insert_registration(
            crate::auth::AUTH_SERVICE,
            typed_factory(crate::auth::FirebaseAuth::from_app),
            None,
        );
        #[cfg(feature = "database")]
        self.insert_registration(
            crate::database::DATABASE_SERVICE,
            typed_factory(crate::database::FirebaseDatabase::from_app),
            None,
        );
    }

    /// Registers a service factory under `name`.
    ///
    /// The factory runs at most once per app, the first time the service is
    /// requested. `hook` is told about every app created or deleted afterwards.
    ///
    /// # Errors
    ///
    /// Returns `AppErrorCode::InvalidArgument` if `name` is empty or already taken.
    pub fn register_service<T, F>(
        &self,
        name: &str,
        factory: F,
        hook: Option<AppHook>,
    ) -> Result<(), FirebaseAppError>
    where
        T: AppService,
        F: Fn(&FirebaseApp) -> Result<T, FirebaseAppError> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(FirebaseAppError::new(
                AppErrorCode::InvalidArgument,
                "Service name must be a non-empty string.",
            ));
        }
        let registered = self
            .shared
            .catalog
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name);
        if registered {
            return Err(FirebaseAppError::new(
                AppErrorCode::InvalidArgument,
                format!("Firebase service named \"{}\" has already been registered.", name),
            ));
        }

        self.insert_registration(name, typed_factory(factory), hook);
        Ok(())
    }

    fn insert_registration(&self, name: &str, factory: ServiceFactory, hook: Option<AppHook>) {
        self.shared
            .catalog
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), ServiceRegistration { factory, hook });
    }

    /// Creates and registers a new app.
    ///
    /// `None` options are read from `FIREBASE_CONFIG`; a missing credential falls
    /// back to Application Default Credentials. `None` name means the default app.
    pub fn initialize_app(
        &self,
        options: Option<AppOptions>,
        name: Option<&str>,
    ) -> Result<FirebaseApp, FirebaseAppError> {
        let name = name.unwrap_or(DEFAULT_APP_NAME);
        if name.is_empty() {
            return Err(FirebaseAppError::new(
                AppErrorCode::InvalidAppName,
                format!(
                    "Invalid Firebase app name \"{}\" provided. App name must be a non-empty string.",
                    name
                ),
            ));
        }

        let mut options = match options {
            Some(options) => options,
            None => AppOptions::from_env()?,
        };
        let credential = match options.credential.clone() {
            Some(credential) => credential,
            None => application_default().map_err(|e| {
                FirebaseAppError::new(
                    AppErrorCode::InvalidAppOptions,
                    format!(
                        "Failed to resolve a credential for app \"{}\": {}",
                        name,
                        e.message()
                    ),
                )
            })?,
        };
        options.credential = Some(Arc::clone(&credential));

        let app = {
            let mut apps = self.shared.lock_apps();
            if apps.contains_key(name) {
                return Err(duplicate_app_error(name));
            }
            let app = FirebaseApp::new(
                name,
                options,
                credential,
                Arc::downgrade(&self.shared),
                Arc::clone(&self.shared.catalog),
            );
            apps.insert(name.to_string(), app.clone());
            app
        };

        for hook in self.shared.catalog.hooks() {
            hook(AppEvent::Create, &app);
        }
        info!(target: "firebase_admin::app", app = name, "Initialized app");
        Ok(app)
    }

    /// Looks up an app by name, `None` meaning the default app.
    pub fn app(&self, name: Option<&str>) -> Result<FirebaseApp, FirebaseAppError> {
        let name = name.unwrap_or(DEFAULT_APP_NAME);
        self.shared
            .lock_apps()
            .get(name)
            .cloned()
            .ok_or_else(|| no_app_error(name))
    }

    pub fn apps(&self) -> Vec<FirebaseApp> {
        self.shared.lock_apps().values().cloned().collect()
    }

    pub fn delete_app(&self, name: Option<&str>) -> Result<(), FirebaseAppError> {
        self.app(name)?.delete()
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn typed_factory<T, F>(factory: F) -> ServiceFactory
where
    T: AppService,
    F: Fn(&FirebaseApp) -> Result<T, FirebaseAppError> + Send + Sync + 'static,
{
    Arc::new(move |app: &FirebaseApp| {
        let service = Arc::new(factory(app)?);
        let any: Arc<dyn Any + Send + Sync> = service.clone();
        Ok(ServiceInstance { any, service })
    })
}

fn duplicate_app_error(name: &str) -> FirebaseAppError {
    let message = if name == DEFAULT_APP_NAME {
        "The default Firebase app already exists. This means you called initialize_app() more \
         than once without providing an app name as the second argument. In most cases you only \
         need to call initialize_app() once. But if you do want to initialize multiple apps, \
         pass a second argument to initialize_app() to give each app a unique name."
            .to_string()
    } else {
        format!(
            "Firebase app named \"{}\" already exists. This means you called initialize_app() \
             more than once with the same app name as the second argument. Make sure you provide \
             a unique name every time you call initialize_app().",
            name
        )
    };
    FirebaseAppError::new(AppErrorCode::DuplicateApp, message)
}

fn no_app_error(name: &str) -> FirebaseAppError {
    let message = if name == DEFAULT_APP_NAME {
        "The default Firebase app does not exist. Make sure you call initialize_app() before \
         using any of the Firebase services."
            .to_string()
    } else {
        format!(
            "Firebase app named \"{}\" does not exist. Make sure you call initialize_app() before \
             using any of the Firebase services.",
            name
        )
    };
    FirebaseAppError::new(AppErrorCode::NoApp, message)
}
