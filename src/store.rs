use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::state::ConnectionState;

/// A user's paired TV and the persisted state of its sync connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub screen_id: String,
    pub screen_name: String,
    pub lounge_token_enc: Vec<u8>,
    pub enc_secret_hash: String,
    pub sync_enabled: bool,
    pub connection_state: ConnectionState,
    pub state_reason: String,
    pub last_error: String,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_disconnect_at: Option<DateTime<Utc>>,
    pub last_user_activity_at: Option<DateTime<Utc>>,
    pub last_video_id: Option<String>,
}

/// Connection state write. State, reason and error always overwrite;
/// the optional columns are only written when set.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub connection_state: ConnectionState,
    pub state_reason: String,
    pub last_error: String,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_disconnect_at: Option<DateTime<Utc>>,
    pub last_user_activity_at: Option<DateTime<Utc>>,
    pub last_video_id: Option<String>,
}

impl StateUpdate {
    pub fn new(connection_state: ConnectionState) -> Self {
        Self {
            connection_state,
            state_reason: String::new(),
            last_error: String::new(),
            last_connected_at: None,
            last_event_at: None,
            last_disconnect_at: None,
            last_user_activity_at: None,
            last_video_id: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.state_reason = reason.into();
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.last_error = error.into();
        self
    }

    pub fn connected_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_connected_at = Some(at);
        self
    }

    pub fn event_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_event_at = Some(at);
        self
    }

    pub fn disconnected_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_disconnect_at = Some(at);
        self
    }

    pub fn user_activity_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_user_activity_at = at;
        self
    }

    pub fn video(mut self, video_id: impl Into<String>) -> Self {
        self.last_video_id = Some(video_id.into());
        self
    }

    /// Apply the update to an in-memory account row.
    pub fn apply_to(&self, account: &mut Account) {
        account.connection_state = self.connection_state;
        account.state_reason = self.state_reason.clone();
        account.last_error = self.last_error.clone();
        if let Some(at) = self.last_connected_at {
            account.last_connected_at = Some(at);
        }
        if let Some(at) = self.last_event_at {
            account.last_event_at = Some(at);
        }
        if let Some(at) = self.last_disconnect_at {
            account.last_disconnect_at = Some(at);
        }
        if let Some(at) = self.last_user_activity_at {
            account.last_user_activity_at = Some(at);
        }
        if let Some(video_id) = &self.last_video_id {
            account.last_video_id = Some(video_id.clone());
        }
    }
}

/// The user's SponsorBlock settings, as raw category values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorPreferences {
    pub enabled: bool,
    pub categories: Vec<String>,
}

/// Persistence of sync accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError>;

    /// Create or replace the pairing of a user, enabling sync.
    async fn upsert_credentials(
        &self,
        user_id: &str,
        screen_id: &str,
        screen_name: &str,
        lounge_token_enc: &[u8],
        secret_hash: &str,
    ) -> Result<(), StoreError>;

    async fn update_lounge_token(
        &self,
        user_id: &str,
        screen_id: &str,
        screen_name: &str,
        lounge_token_enc: &[u8],
        secret_hash: &str,
    ) -> Result<(), StoreError>;

    /// `StoreError::NotFound` when the user has no account.
    async fn set_enabled(&self, user_id: &str, enabled: bool) -> Result<(), StoreError>;

    async fn delete_account(&self, user_id: &str) -> Result<(), StoreError>;

    async fn list_enabled_accounts(&self, limit: usize) -> Result<Vec<Account>, StoreError>;

    async fn update_connection_state(
        &self,
        user_id: &str,
        update: StateUpdate,
    ) -> Result<(), StoreError>;

    /// Most recent application session activity of the user, if any.
    async fn last_user_activity(&self, user_id: &str)
        -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Watch progress, video cache and user preference collaborators.
#[async_trait]
pub trait PlaybackStore: Send + Sync {
    async fn stored_progress(&self, user_id: &str, video_id: &str)
        -> Result<Option<u32>, StoreError>;

    /// Record observed progress and return the value actually stored.
    async fn update_progress(
        &self,
        user_id: &str,
        video_id: &str,
        progress: u32,
    ) -> Result<u32, StoreError>;

    /// Make sure a video row exists before progress is written against it.
    async fn ensure_video_cached(&self, video_id: &str) -> Result<(), StoreError>;

    async fn remove_from_watch_later_if_watched(
        &self,
        user_id: &str,
        video_id: &str,
        progress: u32,
    ) -> Result<(), StoreError>;

    async fn sponsor_preferences(&self, user_id: &str) -> Result<SponsorPreferences, StoreError>;
}

/// Everything the sync engine persists.
pub trait SyncStore: AccountStore + PlaybackStore {}

impl<T: AccountStore + PlaybackStore + ?Sized> SyncStore for T {}
