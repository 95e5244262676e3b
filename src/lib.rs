//! Keeps watch progress in sync with the YouTube app on a user's TV.
//!
//! Each opted-in user gets a background worker that holds a YouTube Lounge
//! remote-control session to their paired screen, consumes its event stream
//! and reacts to it: resume seeks to the stored position, skips sponsor
//! segments and persists watch progress. A [`Supervisor`] keeps exactly one
//! worker per enabled user running; [`SyncService`] is the entry point.
//!
//! # Logging
//!
//! This library uses the `tracing` crate for logging. To enable logs, you'll need to
//! initialize a tracing subscriber in your application.
//!
//! Example using `tracing_subscriber`:
//! ```no_run
//! use tracing::Level;
//! use tracing_subscriber::FmtSubscriber;
//!
//! // Create a subscriber with the desired log level
//! let subscriber = FmtSubscriber::builder()
//!     .with_max_level(Level::DEBUG) // Set to DEBUG, INFO, WARN, or ERROR
//!     .finish();
//!
//! // Initialize the global subscriber
//! tracing::subscriber::set_global_default(subscriber)
//!     .expect("Failed to set tracing subscriber");
//! ```
//!
//! The log levels control what information is displayed:
//! - `TRACE`: Raw stream traffic and chunk decoding
//! - `DEBUG`: Lounge commands, progress writes, sponsor skips
//! - `INFO`: Pairing, connects, disconnects and scheduled reconnects
//! - `WARN`: Recoverable failures such as persistence errors
//! - `ERROR`: Not used for per-user failures; those end up in the account state

mod client;
pub use client::{
    check_response_status, EventSink, LoungeClient, DEFAULT_DEVICE_NAME,
    DEFAULT_LOUNGE_API_BASE_URL,
};
mod codec;
pub use codec::{parse_chunk_payload, parse_event_chunks, LoungeCodec};
mod commands;
pub use commands::PlaybackCommand;
mod crypto;
pub use crypto::{hash_secret, TokenCipher, ENCRYPTION_SECRET_ENV};
mod error;
pub use error::{CryptoError, LoungeError, StoreError, SyncError};
mod events;
pub use events::EventKind;
mod metrics;
pub use metrics::{MetricsSnapshot, SyncMetrics};
mod models;
pub use models::{
    clamp_playback_second, Event, PlaybackEvent, PlayerState, Screen, ScreenResponse,
    ScreensResponse,
};
mod processor;
pub use processor::{
    should_apply_resume_seek, should_attempt_resume_seek, should_write_progress, EventProcessor,
    PlayerRemote, SessionRemote,
};
mod runtime;
pub use runtime::{VideoRuntime, VideoRuntimes, WorkerRuntime};
mod service;
pub use service::{SyncService, SyncStatus};
mod session;
pub use session::Session;
mod settings;
pub use settings::Settings;
mod sponsor;
pub use sponsor::{
    categories_from_preferences, normalize_segments, Segment, SegmentSource, SkipSegment,
    SponsorBlockClient, SponsorCategory,
};
mod state;
pub use state::{
    ConnectionState, REASON_CONNECTING, REASON_CONNECT_FAILED, REASON_NO_EVENTS,
    REASON_SESSION_ENDED, REASON_USER_INACTIVE,
};
mod store;
pub use store::{Account, AccountStore, PlaybackStore, SponsorPreferences, StateUpdate, SyncStore};
mod supervisor;
pub use supervisor::{plan_reconciliation, ReconcilePlan, Supervisor, WorkerLauncher};
mod utils;
pub use utils::{sanitize_error, truncate_body, youtube_parse};
mod worker;
pub use worker::{connect_and_run_once, run_worker, Backoff, WorkerContext};
