use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::LoungeClient;
use crate::crypto::TokenCipher;
use crate::error::{StoreError, SyncError};
use crate::metrics::{MetricsSnapshot, SyncMetrics};
use crate::settings::Settings;
use crate::sponsor::{SegmentSource, SponsorBlockClient};
use crate::state::{ConnectionState, REASON_USER_INACTIVE};
use crate::store::{StateUpdate, SyncStore};
use crate::supervisor::{ReconcilePlan, Supervisor, WorkerLauncher};
use crate::worker::{publish_state, run_worker, WorkerContext};

const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What the UI gets to see about a user's TV sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub available: bool,
    pub enabled: bool,
    pub connected: bool,
    pub connection_state: ConnectionState,
    pub state_reason: String,
    pub screen_name: String,
    pub last_error: String,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_disconnect_at: Option<DateTime<Utc>>,
    pub last_user_activity_at: Option<DateTime<Utc>>,
}

struct ServiceInner {
    ctx: Arc<WorkerContext>,
    supervisor: Supervisor,
}

/// Entry point of the TV sync engine: pairing, enabling, status, and the
/// periodic connection and lifecycle ticks.
///
/// Cheap to clone. Construct one per process (or per test) and pass it
/// where it is needed.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<ServiceInner>,
}

impl SyncService {
    /// Build a service from settings, using the bundled lounge client and,
    /// when `sponsorblock_api_url` is set, the SponsorBlock client.
    pub fn new(
        store: Arc<dyn SyncStore>,
        cipher: TokenCipher,
        settings: Settings,
    ) -> Result<Self, SyncError> {
        let lounge = LoungeClient::new(&settings)?;
        let segments = match settings.sponsorblock_api_url.as_deref() {
            Some(url) => Some(Arc::new(SponsorBlockClient::new(url)?) as Arc<dyn SegmentSource>),
            None => {
                info!("Sponsor skipping disabled: SPONSORBLOCK_API_URL is not set");
                None
            }
        };

        Ok(Self::from_context(WorkerContext {
            store,
            cipher,
            lounge,
            segments,
            settings: Arc::new(settings),
            metrics: Arc::new(SyncMetrics::new()),
        }))
    }

    pub fn from_context(ctx: WorkerContext) -> Self {
        let ctx = Arc::new(ctx);
        let launch_ctx = Arc::clone(&ctx);
        let launcher: WorkerLauncher = Arc::new(move |user_id, cancel| {
            run_worker(Arc::clone(&launch_ctx), user_id, cancel).boxed()
        });
        let supervisor = Supervisor::new(launcher, ctx.settings.worker_stop_timeout);

        Self {
            inner: Arc::new(ServiceInner { ctx, supervisor }),
        }
    }

    fn ctx(&self) -> &WorkerContext {
        &self.inner.ctx
    }

    fn store(&self) -> &dyn SyncStore {
        self.inner.ctx.store.as_ref()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx().metrics.snapshot()
    }

    /// Current status; a user without an account gets the default status.
    pub async fn status(&self, user_id: &str) -> Result<SyncStatus, SyncError> {
        let mut status = SyncStatus {
            available: true,
            ..SyncStatus::default()
        };
        let Some(account) = self.store().get_account(user_id).await? else {
            return Ok(status);
        };

        status.enabled = account.sync_enabled;
        status.connected = account.connection_state == ConnectionState::Connected;
        status.connection_state = account.connection_state;
        status.state_reason = account.state_reason;
        status.screen_name = account.screen_name;
        status.last_error = account.last_error;
        status.last_connected_at = account.last_connected_at;
        status.last_event_at = account.last_event_at;
        status.last_disconnect_at = account.last_disconnect_at;
        status.last_user_activity_at = account.last_user_activity_at;
        Ok(status)
    }

    /// Pair the user with a TV and start syncing.
    pub async fn pair_with_code(
        &self,
        user_id: &str,
        pairing_code: &str,
    ) -> Result<(), SyncError> {
        let pairing_code = pairing_code.trim();
        if pairing_code.is_empty() {
            return Err(SyncError::InvalidInput("pairing code is required".to_string()));
        }

        let ctx = self.ctx();
        let screen = ctx.lounge.pair_with_code(pairing_code).await?;
        let encrypted = ctx.cipher.encrypt_token(&screen.lounge_token, user_id)?;
        self.store()
            .upsert_credentials(
                user_id,
                &screen.screen_id,
                screen.name.as_deref().unwrap_or_default(),
                &encrypted,
                ctx.cipher.secret_hash(),
            )
            .await?;

        info!(user_id = %user_id, screen_id = %screen.screen_id, "TV paired");
        self.kick_connection_tick();
        Ok(())
    }

    /// Stop syncing and forget the pairing. Unknown users are not an error.
    pub async fn disconnect(&self, user_id: &str) -> Result<(), SyncError> {
        self.supervisor().stop(user_id).await;
        match self.store().delete_account(user_id).await {
            Ok(()) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set_enabled(&self, user_id: &str, enabled: bool) -> Result<(), SyncError> {
        self.store().set_enabled(user_id, enabled).await?;

        let state = if enabled {
            ConnectionState::Disconnected
        } else {
            ConnectionState::DisabledByUser
        };
        match self
            .store()
            .update_connection_state(user_id, StateUpdate::new(state))
            .await
        {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        if enabled {
            self.kick_connection_tick();
        } else {
            self.supervisor().stop(user_id).await;
        }
        Ok(())
    }

    /// Reconcile running workers with the enabled, non-paused accounts.
    pub async fn run_connection_tick(&self) -> Result<ReconcilePlan, SyncError> {
        let accounts = self
            .store()
            .list_enabled_accounts(self.ctx().settings.max_users_per_tick)
            .await?;

        let desired: HashSet<String> = accounts
            .into_iter()
            .filter(|a| {
                a.sync_enabled && a.connection_state != ConnectionState::PausedInactiveUser
            })
            .map(|a| a.user_id)
            .collect();

        Ok(self.supervisor().reconcile(&desired).await)
    }

    /// Pause users without recent activity and resume the ones that came back.
    pub async fn run_lifecycle_tick(&self) -> Result<(), SyncError> {
        let accounts = self
            .store()
            .list_enabled_accounts(self.ctx().settings.max_users_per_tick)
            .await?;
        let cutoff = Utc::now()
            .checked_sub_signed(self.ctx().settings.user_inactive_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        for account in accounts {
            let user_id = account.user_id.as_str();
            let last_activity = match self.store().last_user_activity(user_id).await {
                Ok(activity) => activity,
                Err(StoreError::NotFound) => None,
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        error = %e,
                        "Failed to fetch session activity for TV sync"
                    );
                    continue;
                }
            };

            let inactive = last_activity.map_or(true, |at| at < cutoff);
            let paused = account.connection_state == ConnectionState::PausedInactiveUser;

            if inactive {
                if !paused {
                    info!(user_id = %user_id, "Pausing TV sync for inactive user");
                    publish_state(
                        self.store(),
                        user_id,
                        StateUpdate::new(ConnectionState::PausedInactiveUser)
                            .reason(REASON_USER_INACTIVE)
                            .user_activity_at(last_activity),
                    )
                    .await;
                }
                self.supervisor().stop(user_id).await;
                continue;
            }

            if paused {
                info!(user_id = %user_id, "Resuming TV sync for active user");
                publish_state(
                    self.store(),
                    user_id,
                    StateUpdate::new(ConnectionState::Disconnected).user_activity_at(last_activity),
                )
                .await;
                self.kick_connection_tick();
                continue;
            }

            // refresh the activity timestamp, keep everything else
            publish_state(
                self.store(),
                user_id,
                StateUpdate::new(account.connection_state)
                    .reason(account.state_reason.clone())
                    .error(account.last_error.clone())
                    .user_activity_at(last_activity),
            )
            .await;
        }

        Ok(())
    }

    /// Run a connection tick in the background, bounded by the kick timeout.
    pub fn kick_connection_tick(&self) -> JoinHandle<()> {
        let service = self.clone();
        let limit = self.ctx().settings.connection_kick_timeout;
        tokio::spawn(async move {
            match timeout(limit, service.run_connection_tick()).await {
                Ok(Ok(plan)) => debug!(?plan, "TV sync connection kick finished"),
                Ok(Err(e)) => warn!(error = %e, "Failed to run TV sync connection kick"),
                Err(_) => warn!("TV sync connection kick timed out"),
            }
        })
    }

    /// Run the connection and lifecycle ticks periodically until `cancel`
    /// fires, then stop every worker.
    pub fn spawn_background(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();
        let settings = Arc::clone(&self.ctx().settings);
        tokio::spawn(async move {
            let mut lifecycle = interval(settings.lifecycle_tick_interval.max(MIN_TICK_INTERVAL));
            let mut connection = interval(settings.connection_tick_interval.max(MIN_TICK_INTERVAL));
            lifecycle.set_missed_tick_behavior(MissedTickBehavior::Skip);
            connection.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = lifecycle.tick() => {
                        if let Err(e) = service.run_lifecycle_tick().await {
                            warn!(error = %e, "TV sync lifecycle tick failed");
                        }
                    }
                    _ = connection.tick() => {
                        if let Err(e) = service.run_connection_tick().await {
                            warn!(error = %e, "TV sync connection tick failed");
                        }
                    }
                }
            }

            service.shutdown().await;
        })
    }

    /// Stop all running workers.
    pub async fn shutdown(&self) {
        self.supervisor().stop_all().await;
        info!("TV sync service stopped");
    }
}
