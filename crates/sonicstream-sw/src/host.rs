//! Dispatches lifecycle and fetch events to the offline worker.

use sonicstream_common::HostConfig;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::error::Result;
use crate::fetch::{Fetcher, Request, Response};
use crate::registration::{
    ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState,
};
use crate::worker::{OfflineWorker, WorkerContext};
use crate::ServiceWorkerError;

/// Events published by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// A new version started installing.
    UpdateFound { scope: String },
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// Install failed; the version is redundant.
    InstallFailed {
        worker_id: ServiceWorkerId,
        error: ServiceWorkerError,
    },
}

/// Runs one offline worker: drives install, then routes fetches to it.
pub struct WorkerHost<F> {
    registration: RwLock<ServiceWorkerRegistration>,
    context: WorkerContext,
    worker: OfflineWorker<F>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl<F: Fetcher> WorkerHost<F> {
    /// Create a host from configuration, opening persisted caches if a
    /// storage directory is set.
    pub fn new(
        config: &HostConfig,
        worker: OfflineWorker<F>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>)> {
        let caches = match config.storage_dir {
            Some(ref dir) => CacheStorage::open_persistent(dir)?,
            None => CacheStorage::in_memory(),
        };
        Ok(Self::with_storage(config.script_url.clone(), caches, worker))
    }

    /// Create a host over existing cache storage.
    pub fn with_storage(
        script_url: Url,
        caches: CacheStorage,
        worker: OfflineWorker<F>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let scope = ServiceWorkerRegistration::scope_for(&script_url);

        (
            Self {
                registration: RwLock::new(ServiceWorkerRegistration::new(scope)),
                context: WorkerContext::new(caches, script_url),
                worker,
                event_tx,
            },
            event_rx,
        )
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub fn worker(&self) -> &OfflineWorker<F> {
        &self.worker
    }

    pub async fn scope(&self) -> Url {
        self.registration.read().await.scope.clone()
    }

    /// Snapshot of the active worker.
    pub async fn active_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.get_active().cloned()
    }

    /// Snapshot of any worker this host has created.
    pub async fn find_worker(&self, id: ServiceWorkerId) -> Option<ServiceWorker> {
        self.registration.read().await.find(id).cloned()
    }

    /// Install a new worker version and activate it if install succeeds.
    ///
    /// On failure the new version becomes redundant and the previously
    /// active version, if any, keeps handling fetches.
    pub async fn install(&self) -> Result<usize> {
        let (worker_id, superseded, scope) = {
            let mut registration = self.registration.write().await;
            let (id, superseded) = registration.update(self.context.script_url().clone());
            (id, superseded, registration.scope.to_string())
        };

        if let Some(old) = superseded {
            debug!(worker = old.raw(), "Superseded while installing");
            self.emit_state(old, ServiceWorkerState::Redundant);
        }
        info!(worker = worker_id.raw(), scope = %scope, "Installing worker");
        self.emit(ServiceWorkerEvent::UpdateFound { scope });
        self.emit_state(worker_id, ServiceWorkerState::Installing);

        let result = self.worker.handle_install(&self.context).await;

        let mut registration = self.registration.write().await;
        match result {
            Ok(stored) => {
                if !registration.install_complete(worker_id) {
                    return Err(ServiceWorkerError::State(format!(
                        "worker {} was superseded during install",
                        worker_id.raw()
                    )));
                }
                self.emit_state(worker_id, ServiceWorkerState::Installed);

                let replaced = registration.activate();
                self.emit_state(worker_id, ServiceWorkerState::Activating);
                if let Some(old) = replaced {
                    self.emit_state(old, ServiceWorkerState::Redundant);
                }
                self.emit_state(worker_id, ServiceWorkerState::Activated);

                info!(worker = worker_id.raw(), stored, "Worker activated");
                Ok(stored)
            }
            Err(error) => {
                warn!(worker = worker_id.raw(), error = %error, "Install failed");
                if registration.install_failed(worker_id, &error.to_string()) {
                    self.emit_state(worker_id, ServiceWorkerState::Redundant);
                }
                self.emit(ServiceWorkerEvent::InstallFailed {
                    worker_id,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Fetch issued by a page this host controls.
    ///
    /// Goes through the worker once one is active, straight to the network
    /// before that.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        let active = self.registration.read().await.active.is_some();
        if active {
            self.worker.handle_fetch(&self.context, request).await
        } else {
            trace!(url = %request.url, "No active worker, using network");
            self.worker.network().fetch(&request).await
        }
    }

    /// Fetch issued by the page at `client_url`. Pages outside the scope
    /// are not controlled and always use the network.
    pub async fn fetch_from(&self, client_url: &Url, request: Request) -> Result<Response> {
        let controlled = self.registration.read().await.controls(client_url);
        if controlled {
            self.fetch(request).await
        } else {
            trace!(client = %client_url, url = %request.url, "Uncontrolled client");
            self.worker.network().fetch(&request).await
        }
    }

    /// Retire all worker versions. Cache stores are kept.
    pub async fn unregister(&self) -> bool {
        let retired = self.registration.write().await.unregister();
        for id in &retired {
            self.emit_state(*id, ServiceWorkerState::Redundant);
        }
        debug!(retired = retired.len(), "Unregistered");
        !retired.is_empty()
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}
