use futures::future::{join_all, BoxFuture};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builds the future of a worker for a user; the future must return once
/// the token is cancelled.
pub type WorkerLauncher =
    Arc<dyn Fn(String, CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

struct WorkerHandle {
    id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type WorkerMap = Arc<Mutex<HashMap<String, WorkerHandle>>>;

fn lock_workers(workers: &WorkerMap) -> MutexGuard<'_, HashMap<String, WorkerHandle>> {
    workers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Workers to start and stop to turn the running set into the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_start: Vec<String>,
    pub to_stop: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.to_start.is_empty() && self.to_stop.is_empty()
    }
}

/// Diff the desired users against the running ones. Output is sorted.
pub fn plan_reconciliation(desired: &HashSet<String>, running: &HashSet<String>) -> ReconcilePlan {
    let mut to_start: Vec<String> = desired.difference(running).cloned().collect();
    let mut to_stop: Vec<String> = running.difference(desired).cloned().collect();
    to_start.sort();
    to_stop.sort();
    ReconcilePlan { to_start, to_stop }
}

/// Owns the running workers, at most one per user.
pub struct Supervisor {
    launcher: WorkerLauncher,
    workers: WorkerMap,
    stop_timeout: Duration,
}

impl Supervisor {
    pub fn new(launcher: WorkerLauncher, stop_timeout: Duration) -> Self {
        Self {
            launcher,
            workers: Arc::new(Mutex::new(HashMap::new())),
            stop_timeout,
        }
    }

    pub fn running_users(&self) -> Vec<String> {
        let mut users: Vec<String> = lock_workers(&self.workers).keys().cloned().collect();
        users.sort();
        users
    }

    pub fn is_running(&self, user_id: &str) -> bool {
        lock_workers(&self.workers).contains_key(user_id)
    }

    /// Start a worker unless one is already registered for the user.
    pub fn start(&self, user_id: &str) -> bool {
        let mut workers = lock_workers(&self.workers);
        if workers.contains_key(user_id) {
            return false;
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let worker = (self.launcher)(user_id.to_string(), cancel.clone());
        let registry = Arc::clone(&self.workers);
        let owner = user_id.to_string();
        let handle = tokio::spawn(async move {
            worker.await;
            // a newer worker may already own the slot
            let mut workers = lock_workers(&registry);
            if workers.get(&owner).map(|w| w.id) == Some(id) {
                workers.remove(&owner);
            }
        });

        debug!(user_id = %user_id, worker_id = %id, "Started TV sync worker");
        workers.insert(user_id.to_string(), WorkerHandle { id, cancel, handle });
        true
    }

    /// Stop the user's worker, waiting at most the stop timeout.
    pub async fn stop(&self, user_id: &str) -> bool {
        let worker = lock_workers(&self.workers).remove(user_id);
        match worker {
            Some(worker) => {
                self.shutdown(user_id.to_string(), worker).await;
                true
            }
            None => false,
        }
    }

    /// Start and stop workers so that exactly `desired` are running.
    pub async fn reconcile(&self, desired: &HashSet<String>) -> ReconcilePlan {
        let (plan, stopping) = {
            let mut workers = lock_workers(&self.workers);
            let running: HashSet<String> = workers.keys().cloned().collect();
            let plan = plan_reconciliation(desired, &running);
            let stopping: Vec<(String, WorkerHandle)> = plan
                .to_stop
                .iter()
                .filter_map(|user_id| workers.remove(user_id).map(|w| (user_id.clone(), w)))
                .collect();
            (plan, stopping)
        };

        for user_id in &plan.to_start {
            self.start(user_id);
        }
        join_all(
            stopping
                .into_iter()
                .map(|(user_id, worker)| self.shutdown(user_id, worker)),
        )
        .await;

        if !plan.is_noop() {
            info!(
                started = plan.to_start.len(),
                stopped = plan.to_stop.len(),
                running = self.running_users().len(),
                "Reconciled TV sync workers"
            );
        }
        plan
    }

    pub async fn stop_all(&self) {
        let stopping: Vec<(String, WorkerHandle)> =
            lock_workers(&self.workers).drain().collect();
        join_all(
            stopping
                .into_iter()
                .map(|(user_id, worker)| self.shutdown(user_id, worker)),
        )
        .await;
    }

    async fn shutdown(&self, user_id: String, worker: WorkerHandle) {
        worker.cancel.cancel();
        if timeout(self.stop_timeout, worker.handle).await.is_err() {
            warn!(
                user_id = %user_id,
                worker_id = %worker.id,
                "TV sync worker did not stop in time, abandoning"
            );
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for worker in lock_workers(&self.workers).values() {
            worker.cancel.cancel();
        }
    }
}
