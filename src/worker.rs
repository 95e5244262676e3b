use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::LoungeClient;
use crate::crypto::TokenCipher;
use crate::error::{LoungeError, StoreError, SyncError};
use crate::metrics::SyncMetrics;
use crate::processor::{EventProcessor, PlayerRemote, SessionRemote};
use crate::runtime::{VideoRuntimes, WorkerRuntime};
use crate::session::Session;
use crate::settings::Settings;
use crate::sponsor::{categories_from_preferences, SegmentSource, SponsorCategory};
use crate::state::{
    ConnectionState, REASON_CONNECTING, REASON_CONNECT_FAILED, REASON_NO_EVENTS,
    REASON_SESSION_ENDED,
};
use crate::store::{Account, StateUpdate, SyncStore};
use crate::utils::sanitize_error;

const DEFAULT_WATCHDOG_POLL: Duration = Duration::from_secs(5);

/// Everything a worker needs, shared by all workers of a service.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn SyncStore>,
    pub cipher: TokenCipher,
    pub lounge: LoungeClient,
    pub segments: Option<Arc<dyn SegmentSource>>,
    pub settings: Arc<Settings>,
    pub metrics: Arc<SyncMetrics>,
}

/// Reconnect delay: doubles on every failure up to `ceiling`, back to
/// `floor` after a successful run.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn on_success(&mut self) -> Duration {
        self.current = self.floor;
        self.current
    }

    pub fn on_failure(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        self.current
    }
}

/// Best effort state write; failures are logged and never stop the caller.
pub(crate) async fn publish_state(store: &dyn SyncStore, user_id: &str, update: StateUpdate) {
    let state = update.connection_state;
    if let Err(e) = store.update_connection_state(user_id, update).await {
        warn!(user_id = %user_id, state = %state, error = %e, "Failed to persist TV sync state");
    }
}

// Returns false when cancelled before the delay elapsed.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

/// Drive one user's connection until the account goes away, is disabled or
/// paused for inactivity, or `cancel` fires.
pub async fn run_worker(ctx: Arc<WorkerContext>, user_id: String, cancel: CancellationToken) {
    let mut backoff = Backoff::new(ctx.settings.reconnect_min, ctx.settings.reconnect_max);
    let mut videos = VideoRuntimes::default();
    info!(user_id = %user_id, "TV sync worker started");

    while !cancel.is_cancelled() {
        let account = match ctx.store.get_account(&user_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                info!(user_id = %user_id, "TV sync account removed");
                break;
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "TV sync failed to load account");
                let delay = backoff.on_failure();
                if !sleep_or_cancel(&cancel, delay).await {
                    break;
                }
                continue;
            }
        };
        if !account.sync_enabled || account.connection_state == ConnectionState::PausedInactiveUser
        {
            debug!(
                user_id = %user_id,
                state = %account.connection_state,
                "TV sync no longer wanted"
            );
            break;
        }

        publish_state(
            ctx.store.as_ref(),
            &user_id,
            StateUpdate::new(ConnectionState::Connecting).reason(REASON_CONNECTING),
        )
        .await;

        let delay = match connect_and_run_once(&ctx, account, &mut videos, &cancel).await {
            Ok(()) => backoff.on_success(),
            Err(_) if cancel.is_cancelled() => break,
            Err(e) => {
                let delay = backoff.on_failure();
                ctx.metrics
                    .record_reconnect(&user_id, &sanitize_error(&e));
                warn!(
                    user_id = %user_id,
                    error = %e,
                    retry_in = ?delay,
                    "TV sync worker loop ended"
                );
                delay
            }
        };

        if !sleep_or_cancel(&cancel, delay).await {
            break;
        }
    }

    info!(user_id = %user_id, "TV sync worker stopped");
}

/// One connect, subscribe, teardown cycle.
///
/// `videos` carries the per-video state across the cycles of one worker.
/// `Ok(())` only when the server ended the subscription cleanly.
pub async fn connect_and_run_once(
    ctx: &WorkerContext,
    account: Account,
    videos: &mut VideoRuntimes,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    let user_id = account.user_id.clone();
    let store = ctx.store.as_ref();

    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        result = connect_session(ctx, account) => result,
    };
    let (session, account) = match connected {
        Ok(connected) => connected,
        Err(e) => {
            publish_state(
                store,
                &user_id,
                StateUpdate::new(ConnectionState::Error)
                    .reason(REASON_CONNECT_FAILED)
                    .error(sanitize_error(&e))
                    .disconnected_at(Utc::now()),
            )
            .await;
            return Err(e);
        }
    };
    let session = Arc::new(session);
    let categories = load_sponsor_categories(ctx, &account.user_id).await;

    let now = Utc::now();
    publish_state(
        store,
        &user_id,
        StateUpdate::new(ConnectionState::Connected)
            .connected_at(now)
            .event_at(now),
    )
    .await;
    ctx.metrics.record_connect(&user_id);

    let runtime = Arc::new(WorkerRuntime::new());
    let scope = cancel.child_token();
    let timed_out = Arc::new(AtomicBool::new(false));
    let remote: Arc<dyn PlayerRemote> =
        Arc::new(SessionRemote::new(ctx.lounge.clone(), Arc::clone(&session)));

    let watchdog = tokio::spawn(run_watchdog(
        Arc::clone(&runtime),
        scope.clone(),
        Arc::clone(&timed_out),
        ctx.settings.watchdog_poll_interval,
        ctx.settings.no_event_timeout,
    ));
    let poller = tokio::spawn(run_now_playing_poller(
        Arc::clone(&remote),
        Arc::clone(&runtime),
        scope.clone(),
        ctx.settings.now_playing_poll_interval,
        user_id.clone(),
    ));

    let mut processor = EventProcessor::new(
        &user_id,
        Arc::clone(&ctx.store),
        remote,
        runtime,
        Arc::clone(&ctx.settings),
        Arc::clone(&ctx.metrics),
    )
    .with_videos(std::mem::take(videos));
    if let Some(segments) = &ctx.segments {
        processor = processor.with_sponsor_skipping(Arc::clone(segments), categories);
    }

    let subscribe_result = ctx.lounge.subscribe(&session, &scope, &mut processor).await;
    *videos = processor.into_videos();

    scope.cancel();
    let join_limit = ctx.settings.task_join_timeout;
    join_bounded(watchdog, join_limit, &user_id, "watchdog").await;
    let poller_error = join_bounded(poller, join_limit, &user_id, "now playing poller")
        .await
        .flatten();

    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    let now = Utc::now();
    if timed_out.load(Ordering::SeqCst) {
        publish_state(
            store,
            &user_id,
            StateUpdate::new(ConnectionState::PausedNoEvents)
                .reason(REASON_NO_EVENTS)
                .disconnected_at(now),
        )
        .await;
        ctx.metrics
            .record_disconnect(&user_id, ConnectionState::PausedNoEvents, None);
        return Err(SyncError::NoEvents);
    }

    // A poller session error is what cancelled the subscription
    let outcome = match (subscribe_result, poller_error) {
        (Err(LoungeError::Cancelled), Some(poller_error)) => Err(poller_error),
        (result, _) => result,
    };

    match outcome {
        Ok(()) => {
            publish_state(
                store,
                &user_id,
                StateUpdate::new(ConnectionState::Disconnected)
                    .reason(REASON_SESSION_ENDED)
                    .disconnected_at(now),
            )
            .await;
            ctx.metrics
                .record_disconnect(&user_id, ConnectionState::Disconnected, None);
            Ok(())
        }
        Err(e) => {
            let state = if e.is_framing() {
                ConnectionState::Error
            } else {
                ConnectionState::Disconnected
            };
            let message = sanitize_error(&e);
            publish_state(
                store,
                &user_id,
                StateUpdate::new(state)
                    .reason(REASON_SESSION_ENDED)
                    .error(message.clone())
                    .disconnected_at(now),
            )
            .await;
            ctx.metrics.record_disconnect(&user_id, state, Some(&message));
            Err(e.into())
        }
    }
}

/// Decrypt the stored token and bind. An expired token is refreshed,
/// persisted and the bind retried once.
async fn connect_session(
    ctx: &WorkerContext,
    account: Account,
) -> Result<(Session, Account), SyncError> {
    let device_name = ctx.settings.device_name.as_str();
    let token = ctx.cipher.decrypt_token(&account)?;

    match ctx
        .lounge
        .connect(&account.screen_id, &token, device_name)
        .await
    {
        Ok(session) => return Ok((session, account)),
        Err(e) if e.is_auth_expired() => {
            info!(user_id = %account.user_id, "Lounge token expired, refreshing");
        }
        Err(e) => return Err(e.into()),
    }

    let refreshed = ctx.lounge.refresh_token(&account.screen_id).await?;
    let encrypted = ctx
        .cipher
        .encrypt_token(&refreshed.lounge_token, &account.user_id)?;
    let screen_name = match refreshed.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => account.screen_name.clone(),
    };
    ctx.store
        .update_lounge_token(
            &account.user_id,
            &refreshed.screen_id,
            &screen_name,
            &encrypted,
            ctx.cipher.secret_hash(),
        )
        .await?;

    let account = ctx
        .store
        .get_account(&account.user_id)
        .await?
        .ok_or(SyncError::Store(StoreError::NotFound))?;
    let token = ctx.cipher.decrypt_token(&account)?;
    let session = ctx
        .lounge
        .connect(&account.screen_id, &token, device_name)
        .await?;
    Ok((session, account))
}

async fn load_sponsor_categories(ctx: &WorkerContext, user_id: &str) -> Vec<SponsorCategory> {
    if ctx.segments.is_none() {
        return Vec::new();
    }
    match ctx.store.sponsor_preferences(user_id).await {
        Ok(preferences) => categories_from_preferences(&preferences),
        Err(e) => {
            debug!(user_id = %user_id, error = %e, "Failed to load sponsor preferences");
            Vec::new()
        }
    }
}

/// Cancel `scope` once no event has been seen for longer than `limit`.
async fn run_watchdog(
    runtime: Arc<WorkerRuntime>,
    scope: CancellationToken,
    timed_out: Arc<AtomicBool>,
    poll_interval: Duration,
    limit: Duration,
) {
    let poll_interval = if poll_interval.is_zero() {
        DEFAULT_WATCHDOG_POLL
    } else {
        poll_interval
    };
    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => return,
            _ = ticker.tick() => {
                if runtime.event_age(Instant::now()) > limit {
                    timed_out.store(true, Ordering::SeqCst);
                    scope.cancel();
                    return;
                }
            }
        }
    }
}

/// While something is playing, ask the screen for its position every
/// `poll_interval`. Returns the session error that made it cancel `scope`.
async fn run_now_playing_poller(
    remote: Arc<dyn PlayerRemote>,
    runtime: Arc<WorkerRuntime>,
    scope: CancellationToken,
    poll_interval: Duration,
    user_id: String,
) -> Option<LoungeError> {
    if poll_interval.is_zero() {
        return None;
    }
    let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => return None,
            _ = ticker.tick() => {}
        }
        if !runtime.is_playing() {
            continue;
        }

        let result = tokio::select! {
            biased;
            _ = scope.cancelled() => return None,
            result = remote.get_now_playing() => result,
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_auth_expired() || e.is_session_fatal() => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "Now playing poll failed with session error"
                );
                scope.cancel();
                return Some(e);
            }
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "Now playing poll failed");
            }
        }
    }
}

async fn join_bounded<T>(
    mut handle: JoinHandle<T>,
    limit: Duration,
    user_id: &str,
    task: &str,
) -> Option<T> {
    match timeout(limit, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(user_id = %user_id, task = task, error = %e, "TV sync task failed");
            None
        }
        Err(_) => {
            warn!(user_id = %user_id, task = task, "TV sync task did not stop in time");
            handle.abort();
            None
        }
    }
}
