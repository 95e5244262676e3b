use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::PlayerState;
use crate::sponsor::SkipSegment;

struct RuntimeInner {
    last_event_at: Instant,
    last_status_persist_at: Option<Instant>,
    current_video_id: Option<String>,
    current_state: Option<PlayerState>,
}

/// State of one connection attempt shared by the subscribe loop, the
/// watchdog and the now-playing poller.
pub struct WorkerRuntime {
    inner: Mutex<RuntimeInner>,
}

impl Default for WorkerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RuntimeInner {
                last_event_at: Instant::now(),
                last_status_persist_at: None,
                current_video_id: None,
                current_state: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_event(&self, at: Instant) {
        self.lock().last_event_at = at;
    }

    pub fn event_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.lock().last_event_at)
    }

    /// True at most once per `interval`; the first call always passes.
    pub fn should_persist_status(&self, now: Instant, interval: Duration) -> bool {
        let mut inner = self.lock();
        let due = match inner.last_status_persist_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        };
        if due {
            inner.last_status_persist_at = Some(now);
        }
        due
    }

    /// Track `video_id` as the current video. Returns true if it changed.
    pub fn set_current_video(&self, video_id: &str) -> bool {
        let mut inner = self.lock();
        if inner.current_video_id.as_deref() == Some(video_id) {
            return false;
        }
        inner.current_video_id = Some(video_id.to_string());
        inner.current_state = None;
        true
    }

    pub fn current_video(&self) -> Option<String> {
        self.lock().current_video_id.clone()
    }

    pub fn clear_current_video(&self) {
        let mut inner = self.lock();
        inner.current_video_id = None;
        inner.current_state = None;
    }

    pub fn set_current_state(&self, state: PlayerState) {
        self.lock().current_state = Some(state);
    }

    /// A video is loaded and the screen last reported it as playing.
    pub fn is_playing(&self) -> bool {
        let inner = self.lock();
        inner.current_video_id.is_some() && inner.current_state == Some(PlayerState::Playing)
    }
}

/// Per-video state of one worker, keyed by video id. It outlives the
/// individual connections so that a rebind does not repeat resume seeks or
/// segment lookups.
pub type VideoRuntimes = HashMap<String, VideoRuntime>;

/// Decisions already taken for one video during a worker's lifetime.
#[derive(Debug, Default)]
pub struct VideoRuntime {
    pub last_progress_write: Option<Instant>,
    pub last_video_cache_attempt: Option<Instant>,
    pub last_state: Option<PlayerState>,
    pub resume_applied: bool,
    pub sponsor_loaded: bool,
    pub sponsor_segments: Vec<SkipSegment>,
    pub skipped_segments: HashSet<usize>,
    pub last_sponsor_skip_at: Option<Instant>,
    pub video_cached: bool,
}
