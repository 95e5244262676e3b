use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::{EventSink, LoungeClient};
use crate::error::LoungeError;
use crate::events::EventKind;
use crate::metrics::SyncMetrics;
use crate::models::{Event, PlaybackEvent, PlayerState};
use crate::runtime::{VideoRuntime, VideoRuntimes, WorkerRuntime};
use crate::session::Session;
use crate::settings::Settings;
use crate::sponsor::{normalize_segments, SegmentSource, SkipSegment, SponsorCategory};
use crate::state::ConnectionState;
use crate::store::{StateUpdate, SyncStore};

/// Commands the processor can send back to the screen.
#[async_trait]
pub trait PlayerRemote: Send + Sync {
    async fn seek_to(&self, seconds: f64) -> Result<(), LoungeError>;
    async fn get_now_playing(&self) -> Result<(), LoungeError>;
}

/// [`PlayerRemote`] bound to a live lounge session.
pub struct SessionRemote {
    client: LoungeClient,
    session: Arc<Session>,
}

impl SessionRemote {
    pub fn new(client: LoungeClient, session: Arc<Session>) -> Self {
        Self { client, session }
    }
}

#[async_trait]
impl PlayerRemote for SessionRemote {
    async fn seek_to(&self, seconds: f64) -> Result<(), LoungeError> {
        self.client.seek_to(&self.session, seconds).await
    }

    async fn get_now_playing(&self) -> Result<(), LoungeError> {
        self.client.get_now_playing(&self.session).await
    }
}

/// Progress is only written for playing, paused and ended states (or when
/// the event carries no state), and at most once per `interval`.
pub fn should_write_progress(
    state: Option<&PlayerState>,
    now: Instant,
    last_write: Option<Instant>,
    interval: Duration,
) -> bool {
    if state.is_some_and(|s| !s.is_countable()) {
        return false;
    }
    match last_write {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= interval,
    }
}

/// A resume seek is considered for a video that just appeared near its
/// start, or when playback resumes from another state.
pub fn should_attempt_resume_seek(
    is_new_video: bool,
    playback: &PlaybackEvent,
    state: Option<&PlayerState>,
    last_state: Option<&PlayerState>,
    start_window_secs: u32,
) -> bool {
    let Some(current_second) = playback.current_second() else {
        return false;
    };
    if is_new_video && current_second <= start_window_secs {
        return true;
    }
    state == Some(&PlayerState::Playing)
        && last_state.is_some_and(|last| *last != PlayerState::Playing)
}

/// Seek to the stored position only if the screen is still near the start
/// or the stored position is clearly ahead of where the screen is.
pub fn should_apply_resume_seek(
    saved_progress: u32,
    playback: &PlaybackEvent,
    start_window_secs: u32,
    ahead_threshold_secs: u32,
) -> bool {
    if saved_progress == 0 {
        return false;
    }
    let Some(current_second) = playback.current_second() else {
        return false;
    };
    if current_second <= start_window_secs {
        return true;
    }
    u64::from(saved_progress) >= u64::from(current_second) + u64::from(ahead_threshold_secs)
}

/// Reacts to the events of one subscription: resume seeks, sponsor skips
/// and throttled progress writes.
///
/// Events are handled one at a time in arrival order, so the per-video
/// state needs no locking.
pub struct EventProcessor {
    user_id: String,
    store: Arc<dyn SyncStore>,
    remote: Arc<dyn PlayerRemote>,
    segments: Option<Arc<dyn SegmentSource>>,
    sponsor_categories: Vec<SponsorCategory>,
    runtime: Arc<WorkerRuntime>,
    videos: VideoRuntimes,
    settings: Arc<Settings>,
    metrics: Arc<SyncMetrics>,
}

impl EventProcessor {
    pub fn new(
        user_id: &str,
        store: Arc<dyn SyncStore>,
        remote: Arc<dyn PlayerRemote>,
        runtime: Arc<WorkerRuntime>,
        settings: Arc<Settings>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            store,
            remote,
            segments: None,
            sponsor_categories: Vec::new(),
            runtime,
            videos: VideoRuntimes::default(),
            settings,
            metrics,
        }
    }

    /// Enable sponsor skipping for the given categories. An empty category
    /// list keeps skipping off.
    pub fn with_sponsor_skipping(
        mut self,
        segments: Arc<dyn SegmentSource>,
        categories: Vec<SponsorCategory>,
    ) -> Self {
        self.segments = Some(segments);
        self.sponsor_categories = categories;
        self
    }

    /// Continue from the per-video state of an earlier connection.
    pub fn with_videos(mut self, videos: VideoRuntimes) -> Self {
        self.videos = videos;
        self
    }

    /// Hand the per-video state back once the connection is over.
    pub fn into_videos(self) -> VideoRuntimes {
        self.videos
    }

    pub fn video_runtime(&self, video_id: &str) -> Option<&VideoRuntime> {
        self.videos.get(video_id)
    }

    fn sponsor_enabled(&self) -> bool {
        self.segments.is_some() && !self.sponsor_categories.is_empty()
    }

    /// Handle one event. Errors are fatal for the current connection.
    pub async fn process(&mut self, event: &Event) -> Result<(), LoungeError> {
        match event.kind() {
            EventKind::ScreenDisconnected => return Err(LoungeError::ScreenDisconnected),
            EventKind::PlaybackSpeedChanged => {
                if let Err(e) = self.remote.get_now_playing().await {
                    self.command_failed(e, None, "now playing request after speed change")?;
                }
            }
            _ => {}
        }

        let Some(playback) = PlaybackEvent::from_event(event) else {
            return Ok(());
        };
        let Some(video_id) = playback
            .video_id
            .clone()
            .or_else(|| self.runtime.current_video())
        else {
            return Ok(());
        };

        let is_new_video = self.runtime.set_current_video(&video_id);
        if is_new_video {
            debug!(user_id = %self.user_id, video_id = %video_id, "New video on screen");
            self.persist_state(StateUpdate::new(ConnectionState::Connected).video(&video_id))
                .await;
            if !playback.has_current_time() {
                if let Err(e) = self.remote.get_now_playing().await {
                    self.command_failed(e, Some(&video_id), "now playing request for new video")?;
                }
            }
        }

        let mut video = self.videos.remove(&video_id).unwrap_or_default();
        let result = self
            .process_playback(&video_id, &mut video, &playback, is_new_video)
            .await;
        self.videos.insert(video_id, video);
        result
    }

    async fn process_playback(
        &self,
        video_id: &str,
        video: &mut VideoRuntime,
        playback: &PlaybackEvent,
        is_new_video: bool,
    ) -> Result<(), LoungeError> {
        let now = Instant::now();
        let state = playback.state.as_ref();
        if let Some(state) = state {
            self.runtime.set_current_state(state.clone());
        }

        if !video.resume_applied
            && should_attempt_resume_seek(
                is_new_video,
                playback,
                state,
                video.last_state.as_ref(),
                self.settings.resume_start_window_secs,
            )
        {
            video.resume_applied = true;
            let saved = self.stored_progress(video_id).await;
            if should_apply_resume_seek(
                saved,
                playback,
                self.settings.resume_start_window_secs,
                self.settings.resume_ahead_threshold_secs,
            ) {
                match self.remote.seek_to(f64::from(saved)).await {
                    Ok(()) => {
                        video.last_sponsor_skip_at = Some(now);
                        debug!(
                            user_id = %self.user_id,
                            video_id = %video_id,
                            saved_progress = saved,
                            "Applied resume seek"
                        );
                    }
                    Err(e) => self.command_failed(e, Some(video_id), "resume seek")?,
                }
                if let Some(state) = state {
                    video.last_state = Some(state.clone());
                }
                // the position in this event predates the seek
                return Ok(());
            }
        }

        if let Some(current_time) = playback.current_time {
            let observed = playback.current_second().unwrap_or(0);

            if self.sponsor_enabled() {
                self.process_sponsor_skip(video_id, video, current_time, now)
                    .await?;
            }

            if should_write_progress(
                state,
                now,
                video.last_progress_write,
                self.settings.progress_write_interval,
            ) && self.ensure_video_cached(video_id, video, now).await
            {
                self.write_progress(video_id, video, observed, now).await;
            }
        }

        if let Some(state) = state {
            video.last_state = Some(state.clone());
        }
        if state == Some(&PlayerState::Ended) {
            self.runtime.clear_current_video();
        }
        Ok(())
    }

    async fn process_sponsor_skip(
        &self,
        video_id: &str,
        video: &mut VideoRuntime,
        current_time: f64,
        now: Instant,
    ) -> Result<(), LoungeError> {
        if !video.sponsor_loaded {
            video.sponsor_loaded = true;
            video.sponsor_segments = self.load_segments(video_id).await;
        }
        if video.sponsor_segments.is_empty() {
            return Ok(());
        }
        if let Some(last) = video.last_sponsor_skip_at {
            if now.saturating_duration_since(last) < self.settings.skip_cooldown {
                return Ok(());
            }
        }

        let Some((idx, segment)) = video
            .sponsor_segments
            .iter()
            .copied()
            .enumerate()
            .find(|(idx, segment)| {
                !video.skipped_segments.contains(idx) && segment.contains(current_time)
            })
        else {
            return Ok(());
        };

        match self.remote.seek_to(segment.end).await {
            Ok(()) => {
                video.skipped_segments.insert(idx);
                video.last_sponsor_skip_at = Some(now);
                self.metrics
                    .record_sponsor_skip(&self.user_id, video_id, segment.start, segment.end);
            }
            Err(e) => self.command_failed(e, Some(video_id), "sponsor skip")?,
        }
        Ok(())
    }

    async fn load_segments(&self, video_id: &str) -> Vec<SkipSegment> {
        let Some(source) = &self.segments else {
            return Vec::new();
        };
        match source
            .video_segments(video_id, &self.sponsor_categories)
            .await
        {
            Ok(raw) => normalize_segments(&raw, self.settings.min_skip_length_secs),
            Err(e) => {
                debug!(
                    user_id = %self.user_id,
                    video_id = %video_id,
                    error = %e,
                    "Sponsor segment lookup failed, skipping disabled for video"
                );
                Vec::new()
            }
        }
    }

    async fn stored_progress(&self, video_id: &str) -> u32 {
        match self.store.stored_progress(&self.user_id, video_id).await {
            Ok(progress) => progress.unwrap_or(0),
            Err(e) => {
                debug!(
                    user_id = %self.user_id,
                    video_id = %video_id,
                    error = %e,
                    "Failed to load stored progress"
                );
                0
            }
        }
    }

    /// At most one attempt per retry interval until the video row exists.
    async fn ensure_video_cached(
        &self,
        video_id: &str,
        video: &mut VideoRuntime,
        now: Instant,
    ) -> bool {
        if video.video_cached {
            return true;
        }
        if let Some(last) = video.last_video_cache_attempt {
            if now.saturating_duration_since(last) < self.settings.video_cache_retry_interval {
                return false;
            }
        }
        video.last_video_cache_attempt = Some(now);

        match self.store.ensure_video_cached(video_id).await {
            Ok(()) => {
                video.video_cached = true;
                true
            }
            Err(e) => {
                warn!(
                    user_id = %self.user_id,
                    video_id = %video_id,
                    error = %e,
                    "Failed to cache video before progress sync"
                );
                false
            }
        }
    }

    async fn write_progress(
        &self,
        video_id: &str,
        video: &mut VideoRuntime,
        observed: u32,
        now: Instant,
    ) {
        let resolved = match self
            .store
            .update_progress(&self.user_id, video_id, observed)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(
                    user_id = %self.user_id,
                    video_id = %video_id,
                    error = %e,
                    "Failed to sync TV progress"
                );
                return;
            }
        };

        video.last_progress_write = Some(now);
        self.metrics
            .record_progress_update(&self.user_id, video_id, observed, resolved);

        if let Err(e) = self
            .store
            .remove_from_watch_later_if_watched(&self.user_id, video_id, resolved)
            .await
        {
            debug!(
                user_id = %self.user_id,
                video_id = %video_id,
                error = %e,
                "Watch later cleanup failed"
            );
        }
    }

    async fn persist_state(&self, update: StateUpdate) {
        if let Err(e) = self
            .store
            .update_connection_state(&self.user_id, update)
            .await
        {
            warn!(user_id = %self.user_id, error = %e, "Failed to persist TV sync state");
        }
    }

    // Session errors end the connection, anything else is only logged.
    fn command_failed(
        &self,
        err: LoungeError,
        video_id: Option<&str>,
        what: &str,
    ) -> Result<(), LoungeError> {
        if err.is_session_fatal() || err.is_auth_expired() {
            warn!(
                user_id = %self.user_id,
                error = %err,
                "Lounge {} failed with session error",
                what
            );
            return Err(err);
        }
        debug!(
            user_id = %self.user_id,
            video_id = video_id.unwrap_or(""),
            error = %err,
            "Lounge {} failed",
            what
        );
        Ok(())
    }
}

#[async_trait]
impl EventSink for EventProcessor {
    async fn on_event(&mut self, event: Event) -> Result<(), LoungeError> {
        let now = Instant::now();
        self.runtime.mark_event(now);

        if self
            .runtime
            .should_persist_status(now, self.settings.status_update_interval)
        {
            let mut update = StateUpdate::new(ConnectionState::Connected).event_at(Utc::now());
            if let Some(video_id) = self.runtime.current_video() {
                update = update.video(video_id);
            }
            self.persist_state(update).await;
        }

        self.process(&event).await
    }
}
