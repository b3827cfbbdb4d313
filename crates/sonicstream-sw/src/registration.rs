//! Worker identity, lifecycle state and the registration record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Registered, install not yet dispatched.
    #[default]
    Parsed,
    /// Install handler running.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Taking over from the previous version.
    Activating,
    /// Active and handling fetches.
    Activated,
    /// Replaced, unregistered, or install failed.
    Redundant,
}

/// A worker version.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub script_url: Url,
    pub state: ServiceWorkerState,
    /// Why install failed, if it did.
    pub error: Option<String>,
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(script_url: Url) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// Installing, waiting and active slots for one scope.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    pub scope: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
    /// Workers that left a slot, most recent last.
    pub retired: Vec<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            retired: Vec::new(),
        }
    }

    /// Default scope for a script: the directory it is served from.
    pub fn scope_for(script_url: &Url) -> Url {
        script_url.join("./").unwrap_or_else(|_| script_url.clone())
    }

    /// Whether a page at `client_url` falls under this registration.
    pub fn controls(&self, client_url: &Url) -> bool {
        client_url.as_str().starts_with(self.scope.as_str())
    }

    /// Start installing a new version. Any version still installing is
    /// superseded and becomes redundant; its id is returned alongside the
    /// new one.
    pub fn update(&mut self, script_url: Url) -> (ServiceWorkerId, Option<ServiceWorkerId>) {
        let superseded = self.installing.take().map(|previous| {
            let id = previous.id;
            self.retire(previous);
            id
        });
        let mut worker = ServiceWorker::new(script_url);
        worker.set_state(ServiceWorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        (id, superseded)
    }

    /// Move the installing worker `id` to the waiting slot.
    ///
    /// Returns `false` if `id` is no longer the installing worker.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> bool {
        match self.installing.take() {
            Some(mut worker) if worker.id == id => {
                worker.set_state(ServiceWorkerState::Installed);
                if let Some(previous) = self.waiting.replace(worker) {
                    self.retire(previous);
                }
                true
            }
            other => {
                self.installing = other;
                false
            }
        }
    }

    /// Mark the installing worker `id` as failed. The active worker, if
    /// any, is untouched.
    pub fn install_failed(&mut self, id: ServiceWorkerId, error: &str) -> bool {
        match self.installing.take() {
            Some(mut worker) if worker.id == id => {
                worker.error = Some(error.to_string());
                self.retire(worker);
                true
            }
            other => {
                self.installing = other;
                false
            }
        }
    }

    /// Promote the waiting worker to active. Returns the replaced worker's id.
    pub fn activate(&mut self) -> Option<ServiceWorkerId> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);

        let replaced = self.active.take().map(|old| {
            let id = old.id;
            self.retire(old);
            id
        });

        worker.set_state(ServiceWorkerState::Activated);
        self.active = Some(worker);
        replaced
    }

    /// Retire every slot.
    pub fn unregister(&mut self) -> Vec<ServiceWorkerId> {
        let workers: Vec<ServiceWorker> = [
            self.active.take(),
            self.waiting.take(),
            self.installing.take(),
        ]
        .into_iter()
        .flatten()
        .collect();

        let ids = workers.iter().map(|w| w.id).collect();
        for worker in workers {
            self.retire(worker);
        }
        ids
    }

    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Look a worker up in any slot, including retired ones.
    pub fn find(&self, id: ServiceWorkerId) -> Option<&ServiceWorker> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .chain(self.retired.iter().rev())
            .find(|w| w.id == id)
    }

    fn retire(&mut self, mut worker: ServiceWorker) {
        worker.set_state(ServiceWorkerState::Redundant);
        self.retired.push(worker);
    }
}
