//! Worker lifecycle: registration, install, activation, supersession.
//!
//! This is the host side. It decides when a worker installs and activates
//! and which worker sees a request; the [`FetchInterceptor`] only acts while
//! its worker is `Installing` or `Activated`.

use crate::cache::Caches;
use crate::config::WorkerConfig;
use crate::interceptor::{FetchInterceptor, FetchOutcome};
use crate::network::Network;
use crate::request::FetchRequest;
use crate::ServiceWorkerError;
use hashbrown::HashMap;
use offline_common::retry::{retry_if, RetryConfig};
use offline_common::OptionExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Registered, script not yet installing.
    #[default]
    Parsed,
    /// Pre-cache in flight.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    Activating,
    /// Active and intercepting fetches.
    Activated,
    /// Superseded, unregistered, or failed to install.
    Redundant,
}

// ==================== Service Worker ====================

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Install failure, if any.
    pub error: Option<String>,

    interceptor: Arc<FetchInterceptor>,
}

impl ServiceWorker {
    fn new(interceptor: FetchInterceptor) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            state: ServiceWorkerState::Parsed,
            error: None,
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn script_url(&self) -> &Url {
        &self.interceptor.config().script_url
    }

    pub fn config(&self) -> &WorkerConfig {
        self.interceptor.config()
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Start installing a new worker. Returns a worker it displaced.
    pub fn begin_install(&mut self, mut worker: ServiceWorker) -> Option<ServiceWorker> {
        worker.set_state(ServiceWorkerState::Installing);
        self.installing.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Transition installing to waiting. Returns a waiting worker it displaced.
    pub fn install_complete(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        self.waiting.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        })
    }

    /// Discard the installing worker after a failed install.
    pub fn install_failed(&mut self, error: String) -> Option<ServiceWorker> {
        let mut worker = self.installing.take()?;
        worker.error = Some(error);
        worker.set_state(ServiceWorkerState::Redundant);
        Some(worker)
    }

    /// Activate waiting worker. Returns the worker it superseded.
    pub fn activate(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);

        let superseded = self.active.take().map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            old
        });

        worker.set_state(ServiceWorkerState::Activated);
        self.active = Some(worker);
        superseded
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Mark every worker redundant and return them.
    pub fn unregister(&mut self) -> Vec<ServiceWorker> {
        [self.active.take(), self.waiting.take(), self.installing.take()]
            .into_iter()
            .flatten()
            .map(|mut worker| {
                worker.set_state(ServiceWorkerState::Redundant);
                worker
            })
            .collect()
    }

    fn controls(&self, url: &Url) -> bool {
        self.active.is_some() && url.as_str().starts_with(self.scope.as_str())
    }
}

// ==================== Container ====================

/// Service worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        scope: String,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A new worker started installing.
    UpdateFound { scope: String },
    /// A different worker now controls the scope.
    ControllerChange {
        scope: String,
        worker_id: ServiceWorkerId,
    },
}

/// Service worker container: owns registrations and routes fetches.
pub struct ServiceWorkerContainer {
    /// Registrations by scope.
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,

    /// Cache storage shared by every worker.
    pub caches: Caches,

    network: Arc<dyn Network>,

    install_retry: RetryConfig,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        caches: Caches,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registrations: Arc::new(RwLock::new(HashMap::new())),
                caches,
                network,
                install_retry: RetryConfig::none(),
                event_tx,
            },
            event_rx,
        )
    }

    /// Retry policy applied to failed installs.
    pub fn with_install_retry(mut self, retry: RetryConfig) -> Self {
        self.install_retry = retry;
        self
    }

    /// Register a worker and run its install.
    ///
    /// A worker that installs while no other worker is active activates
    /// immediately; otherwise it waits for [`activate`](Self::activate).
    pub async fn register(
        &self,
        config: WorkerConfig,
    ) -> Result<ServiceWorkerId, ServiceWorkerError> {
        config
            .validate()
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        let scope = config.scope_url();
        let scope_str = scope.to_string();
        let worker = ServiceWorker::new(FetchInterceptor::new(
            config,
            self.caches.clone(),
            self.network.clone(),
        ));
        let worker_id = worker.id;
        let interceptor = worker.interceptor.clone();

        {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope_str.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope));
            if let Some(old) = registration.begin_install(worker) {
                self.emit_state(&scope_str, &old);
            }
        }

        self.emit(ServiceWorkerEvent::UpdateFound {
            scope: scope_str.clone(),
        });
        self.emit(ServiceWorkerEvent::StateChange {
            scope: scope_str.clone(),
            worker_id,
            new_state: ServiceWorkerState::Installing,
        });
        info!(scope = %scope_str, ?worker_id, "Installing worker");

        let installed = retry_if(
            &self.install_retry,
            || interceptor.handle_install(),
            ServiceWorkerError::is_retryable,
        )
        .await;

        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .get_mut(&scope_str)
            .ok_or_not_found(scope_str.clone())?;

        if registration.installing.as_ref().map(|w| w.id) != Some(worker_id) {
            return Err(ServiceWorkerError::StateError(format!(
                "worker {worker_id:?} was superseded during install"
            )));
        }

        if let Err(e) = installed {
            warn!(scope = %scope_str, ?worker_id, error = %e, "Install failed");
            if let Some(failed) = registration.install_failed(e.to_string()) {
                self.emit_state(&scope_str, &failed);
            }
            return Err(e);
        }

        if let Some(displaced) = registration.install_complete() {
            self.emit_state(&scope_str, &displaced);
        }
        self.emit(ServiceWorkerEvent::StateChange {
            scope: scope_str.clone(),
            worker_id,
            new_state: ServiceWorkerState::Installed,
        });

        if registration.active.is_none() {
            self.activate_registration(&scope_str, registration);
        }

        Ok(worker_id)
    }

    /// Activate the waiting worker of `scope`, superseding the active one.
    pub async fn activate(&self, scope: &str) -> Result<(), ServiceWorkerError> {
        let mut registrations = self.registrations.write().await;
        let registration = registrations.get_mut(scope).ok_or_not_found(scope)?;

        if registration.waiting.is_none() {
            return Err(ServiceWorkerError::StateError(format!(
                "no waiting worker for {scope}"
            )));
        }

        self.activate_registration(scope, registration);
        Ok(())
    }

    /// Activate the waiting worker of `scope` without waiting for clients.
    pub async fn skip_waiting(&self, scope: &str) -> Result<(), ServiceWorkerError> {
        self.activate(scope).await
    }

    fn activate_registration(&self, scope: &str, registration: &mut ServiceWorkerRegistration) {
        if let Some(old) = registration.activate() {
            self.emit_state(scope, &old);
        }
        if let Some(active) = registration.get_active() {
            info!(scope, worker_id = ?active.id, "Worker activated");
            self.emit_state(scope, active);
            self.emit(ServiceWorkerEvent::ControllerChange {
                scope: scope.to_string(),
                worker_id: active.id,
            });
        }
    }

    /// Route a request to the worker controlling its URL.
    ///
    /// Requests outside every active scope go straight to the network.
    pub async fn fetch(&self, request: FetchRequest) -> FetchOutcome {
        let interceptor = {
            let registrations = self.registrations.read().await;
            registrations
                .values()
                .filter(|r| r.controls(&request.url))
                .max_by_key(|r| r.scope.as_str().len())
                .and_then(|r| r.get_active())
                .map(|w| w.interceptor.clone())
        };

        match interceptor {
            Some(interceptor) => interceptor.handle_fetch(request).await,
            None => {
                debug!(url = %request.url, "No controlling worker");
                FetchOutcome::passthrough(self.network.fetch(&request).await)
            }
        }
    }

    /// Scope of the registration controlling `url`.
    pub async fn get_registration(&self, url: &Url) -> Option<String> {
        let registrations = self.registrations.read().await;
        registrations
            .values()
            .filter(|r| url.as_str().starts_with(r.scope.as_str()))
            .max_by_key(|r| r.scope.as_str().len())
            .map(|r| r.scope.to_string())
    }

    /// Get all registration scopes.
    pub async fn get_registrations(&self) -> Vec<String> {
        self.registrations.read().await.keys().cloned().collect()
    }

    /// Snapshot of the active worker of `scope`.
    pub async fn active_worker(&self, scope: &str) -> Option<ServiceWorker> {
        let registrations = self.registrations.read().await;
        registrations.get(scope).and_then(|r| r.active.clone())
    }

    /// Snapshot of the waiting worker of `scope`.
    pub async fn waiting_worker(&self, scope: &str) -> Option<ServiceWorker> {
        let registrations = self.registrations.read().await;
        registrations.get(scope).and_then(|r| r.waiting.clone())
    }

    /// Unregister a scope. Its caches are left in place.
    pub async fn unregister(&self, scope: &str) -> bool {
        let removed = self.registrations.write().await.remove(scope);
        match removed {
            Some(mut registration) => {
                for worker in registration.unregister() {
                    self.emit_state(scope, &worker);
                }
                true
            }
            None => false,
        }
    }

    fn emit_state(&self, scope: &str, worker: &ServiceWorker) {
        self.emit(ServiceWorkerEvent::StateChange {
            scope: scope.to_string(),
            worker_id: worker.id,
            new_state: worker.state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}
