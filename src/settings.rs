use std::{env, time::Duration};

use crate::client::{DEFAULT_DEVICE_NAME, DEFAULT_LOUNGE_API_BASE_URL};

const MAX_USER_INACTIVE_DAYS: i64 = 3650;

/// Holds all tunables of the sync engine.
///
/// `Settings::default()` gives the built-in values; `Settings::from_env()`
/// overrides them from the environment (and an optional `.env` file).
#[derive(Debug, Clone)]
pub struct Settings {
    pub lounge_base_url: String,
    pub device_name: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,

    pub no_event_timeout: Duration,
    pub watchdog_poll_interval: Duration,
    /// Zero disables the now-playing poller.
    pub now_playing_poll_interval: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub task_join_timeout: Duration,

    pub progress_write_interval: Duration,
    pub resume_start_window_secs: u32,
    pub resume_ahead_threshold_secs: u32,
    pub min_skip_length_secs: f64,
    pub skip_cooldown: Duration,
    pub status_update_interval: Duration,
    pub video_cache_retry_interval: Duration,

    pub worker_stop_timeout: Duration,
    pub connection_kick_timeout: Duration,
    pub user_inactive_after: chrono::Duration,
    pub max_users_per_tick: usize,
    pub connection_tick_interval: Duration,
    pub lifecycle_tick_interval: Duration,

    pub sponsorblock_api_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            lounge_base_url: DEFAULT_LOUNGE_API_BASE_URL.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            request_timeout: Duration::from_secs(12),
            connect_timeout: Duration::from_secs(10),
            no_event_timeout: Duration::from_secs(60),
            watchdog_poll_interval: Duration::from_secs(5),
            now_playing_poll_interval: Duration::from_secs(15),
            reconnect_min: Duration::from_secs(10),
            reconnect_max: Duration::from_secs(5 * 60),
            task_join_timeout: Duration::from_secs(2),
            progress_write_interval: Duration::from_secs(10),
            resume_start_window_secs: 90,
            resume_ahead_threshold_secs: 8,
            min_skip_length_secs: 1.0,
            skip_cooldown: Duration::from_millis(1200),
            status_update_interval: Duration::from_secs(15),
            video_cache_retry_interval: Duration::from_secs(60),
            worker_stop_timeout: Duration::from_secs(2),
            connection_kick_timeout: Duration::from_secs(15),
            user_inactive_after: chrono::Duration::days(14),
            max_users_per_tick: 100,
            connection_tick_interval: Duration::from_secs(60),
            lifecycle_tick_interval: Duration::from_secs(15 * 60),
            sponsorblock_api_url: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        // optionally load .env
        let _ = dotenvy::dotenv();

        fn parse<T: std::str::FromStr>(var: &str, default: T) -> T {
            env::var(var)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        // helper to parse seconds into Duration
        fn parse_secs(var: &str, default: Duration) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        }

        // helper to parse millis into Duration
        fn parse_millis(var: &str, default: Duration) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        }

        // whole days in 1..=MAX_USER_INACTIVE_DAYS
        fn parse_days(var: &str, default: chrono::Duration) -> chrono::Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|days| (1..=MAX_USER_INACTIVE_DAYS).contains(days))
                .and_then(chrono::Duration::try_days)
                .unwrap_or(default)
        }

        fn parse_string(var: &str, default: String) -> String {
            env::var(var)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        }

        let d = Settings::default();
        Settings {
            lounge_base_url: parse_string("LOUNGE_API_BASE_URL", d.lounge_base_url),
            device_name: parse_string("LOUNGE_DEVICE_NAME", d.device_name),
            request_timeout: parse_secs("LOUNGE_REQUEST_TIMEOUT_SECS", d.request_timeout),
            connect_timeout: parse_secs("LOUNGE_CONNECT_TIMEOUT_SECS", d.connect_timeout),
            no_event_timeout: parse_secs("SYNC_NO_EVENT_TIMEOUT_SECS", d.no_event_timeout),
            watchdog_poll_interval: parse_millis("SYNC_WATCHDOG_POLL_MS", d.watchdog_poll_interval),
            now_playing_poll_interval: parse_secs(
                "SYNC_NOW_PLAYING_POLL_SECS",
                d.now_playing_poll_interval,
            ),
            reconnect_min: parse_secs("SYNC_RECONNECT_MIN_SECS", d.reconnect_min),
            reconnect_max: parse_secs("SYNC_RECONNECT_MAX_SECS", d.reconnect_max),
            task_join_timeout: parse_millis("SYNC_TASK_JOIN_TIMEOUT_MS", d.task_join_timeout),
            progress_write_interval: parse_secs(
                "SYNC_PROGRESS_WRITE_INTERVAL_SECS",
                d.progress_write_interval,
            ),
            resume_start_window_secs: parse(
                "SYNC_RESUME_START_WINDOW_SECS",
                d.resume_start_window_secs,
            ),
            resume_ahead_threshold_secs: parse(
                "SYNC_RESUME_AHEAD_THRESHOLD_SECS",
                d.resume_ahead_threshold_secs,
            ),
            min_skip_length_secs: parse("SYNC_MIN_SKIP_LENGTH_SECS", d.min_skip_length_secs),
            skip_cooldown: parse_millis("SYNC_SKIP_COOLDOWN_MS", d.skip_cooldown),
            status_update_interval: parse_secs(
                "SYNC_STATUS_UPDATE_INTERVAL_SECS",
                d.status_update_interval,
            ),
            video_cache_retry_interval: parse_secs(
                "SYNC_VIDEO_CACHE_RETRY_SECS",
                d.video_cache_retry_interval,
            ),
            worker_stop_timeout: parse_millis("SYNC_WORKER_STOP_TIMEOUT_MS", d.worker_stop_timeout),
            connection_kick_timeout: parse_secs(
                "SYNC_CONNECTION_KICK_TIMEOUT_SECS",
                d.connection_kick_timeout,
            ),
            user_inactive_after: parse_days("SYNC_USER_INACTIVE_DAYS", d.user_inactive_after),
            max_users_per_tick: parse("SYNC_MAX_USERS_PER_TICK", d.max_users_per_tick),
            connection_tick_interval: parse_secs(
                "SYNC_CONNECTION_TICK_SECS",
                d.connection_tick_interval,
            ),
            lifecycle_tick_interval: parse_secs(
                "SYNC_LIFECYCLE_TICK_SECS",
                d.lifecycle_tick_interval,
            ),
            sponsorblock_api_url: env::var("SPONSORBLOCK_API_URL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        }
    }
}
