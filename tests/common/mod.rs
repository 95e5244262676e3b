#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lounge_sync::{
    Account, AccountStore, ConnectionState, PlaybackStore, Settings, SponsorPreferences,
    StateUpdate, StoreError, TokenCipher,
};

pub const TEST_SECRET: &str = "test-encryption-secret";

/// In-memory stand-in for the database, recording every write.
#[derive(Default)]
pub struct MemoryStore {
    pub accounts: Mutex<HashMap<String, Account>>,
    pub progress: Mutex<HashMap<(String, String), u32>>,
    pub progress_writes: Mutex<Vec<(String, u32)>>,
    pub cached_videos: Mutex<Vec<String>>,
    pub watch_later_checks: Mutex<Vec<(String, u32)>>,
    pub state_history: Mutex<Vec<(String, ConnectionState)>>,
    pub activity: Mutex<HashMap<String, DateTime<Utc>>>,
    pub sponsor: Mutex<HashMap<String, SponsorPreferences>>,
    pub fail_cache: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&self, account: Account) {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.user_id.clone(), account);
    }

    pub fn account(&self, user_id: &str) -> Option<Account> {
        self.accounts.lock().unwrap().get(user_id).cloned()
    }

    pub fn set_progress(&self, user_id: &str, video_id: &str, progress: u32) {
        self.progress
            .lock()
            .unwrap()
            .insert((user_id.to_string(), video_id.to_string()), progress);
    }

    pub fn set_activity(&self, user_id: &str, at: DateTime<Utc>) {
        self.activity
            .lock()
            .unwrap()
            .insert(user_id.to_string(), at);
    }

    pub fn progress_writes(&self) -> Vec<(String, u32)> {
        self.progress_writes.lock().unwrap().clone()
    }

    pub fn states(&self, user_id: &str) -> Vec<ConnectionState> {
        self.state_history
            .lock()
            .unwrap()
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, state)| *state)
            .collect()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.account(user_id))
    }

    async fn upsert_credentials(
        &self,
        user_id: &str,
        screen_id: &str,
        screen_name: &str,
        lounge_token_enc: &[u8],
        secret_hash: &str,
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .entry(user_id.to_string())
            .or_insert_with(|| Account {
                user_id: user_id.to_string(),
                ..Account::default()
            });
        account.screen_id = screen_id.to_string();
        account.screen_name = screen_name.to_string();
        account.lounge_token_enc = lounge_token_enc.to_vec();
        account.enc_secret_hash = secret_hash.to_string();
        account.sync_enabled = true;
        account.connection_state = ConnectionState::Disconnected;
        account.last_error.clear();
        Ok(())
    }

    async fn update_lounge_token(
        &self,
        user_id: &str,
        screen_id: &str,
        screen_name: &str,
        lounge_token_enc: &[u8],
        secret_hash: &str,
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.get_mut(user_id).ok_or(StoreError::NotFound)?;
        account.screen_id = screen_id.to_string();
        account.screen_name = screen_name.to_string();
        account.lounge_token_enc = lounge_token_enc.to_vec();
        account.enc_secret_hash = secret_hash.to_string();
        Ok(())
    }

    async fn set_enabled(&self, user_id: &str, enabled: bool) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.get_mut(user_id).ok_or(StoreError::NotFound)?;
        account.sync_enabled = enabled;
        Ok(())
    }

    async fn delete_account(&self, user_id: &str) -> Result<(), StoreError> {
        self.accounts
            .lock()
            .unwrap()
            .remove(user_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list_enabled_accounts(&self, limit: usize) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .accounts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.sync_enabled)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        accounts.truncate(limit);
        Ok(accounts)
    }

    async fn update_connection_state(
        &self,
        user_id: &str,
        update: StateUpdate,
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.get_mut(user_id).ok_or(StoreError::NotFound)?;
        update.apply_to(account);
        self.state_history
            .lock()
            .unwrap()
            .push((user_id.to_string(), update.connection_state));
        Ok(())
    }

    async fn last_user_activity(
        &self,
        user_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.activity.lock().unwrap().get(user_id).copied())
    }
}

#[async_trait]
impl PlaybackStore for MemoryStore {
    async fn stored_progress(
        &self,
        user_id: &str,
        video_id: &str,
    ) -> Result<Option<u32>, StoreError> {
        Ok(self
            .progress
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), video_id.to_string()))
            .copied())
    }

    async fn update_progress(
        &self,
        user_id: &str,
        video_id: &str,
        progress: u32,
    ) -> Result<u32, StoreError> {
        self.set_progress(user_id, video_id, progress);
        self.progress_writes
            .lock()
            .unwrap()
            .push((video_id.to_string(), progress));
        Ok(progress)
    }

    async fn ensure_video_cached(&self, video_id: &str) -> Result<(), StoreError> {
        if self.fail_cache.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("video metadata unavailable".to_string()));
        }
        self.cached_videos.lock().unwrap().push(video_id.to_string());
        Ok(())
    }

    async fn remove_from_watch_later_if_watched(
        &self,
        _user_id: &str,
        video_id: &str,
        progress: u32,
    ) -> Result<(), StoreError> {
        self.watch_later_checks
            .lock()
            .unwrap()
            .push((video_id.to_string(), progress));
        Ok(())
    }

    async fn sponsor_preferences(&self, user_id: &str) -> Result<SponsorPreferences, StoreError> {
        Ok(self
            .sponsor
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Settings with short timings, pointed at `base_url`.
pub fn test_settings(base_url: &str) -> Settings {
    Settings {
        lounge_base_url: base_url.to_string(),
        device_name: "TestRemote".to_string(),
        request_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        watchdog_poll_interval: Duration::from_millis(20),
        task_join_timeout: Duration::from_millis(500),
        worker_stop_timeout: Duration::from_millis(500),
        ..Settings::default()
    }
}

pub fn test_cipher() -> TokenCipher {
    TokenCipher::new(TEST_SECRET).unwrap()
}

/// An enabled account whose lounge token is sealed with [`test_cipher`].
pub fn paired_account(cipher: &TokenCipher, user_id: &str, token: &str) -> Account {
    Account {
        user_id: user_id.to_string(),
        screen_id: "screen-1".to_string(),
        screen_name: "Living Room".to_string(),
        lounge_token_enc: cipher.encrypt_token(token, user_id).unwrap(),
        enc_secret_hash: cipher.secret_hash().to_string(),
        sync_enabled: true,
        ..Account::default()
    }
}

/// Frame a single-line payload the way the bind endpoint does.
pub fn chunk(payload: &str) -> String {
    format!("{}\n{}\n", payload.len() + 1, payload)
}

/// Bind response carrying the bootstrap SID and gsessionid.
pub fn bind_body(sid: &str, gsessionid: &str) -> String {
    chunk(&format!(
        r#"[[0,["c","{}","",8]],[1,["S","{}"]]]"#,
        sid, gsessionid
    ))
}

/// Accept every command sent on the bind channel.
pub async fn mount_commands(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(body_string_contains("req0__sc"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Mount a bind that always hands out the same session.
pub async fn mount_session(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bind_body("sid-1", "gs-1")))
        .mount(server)
        .await;
}

async fn count_requests(
    server: &MockServer,
    matches: impl Fn(&wiremock::Request) -> bool,
) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| matches(request))
        .count()
}

pub async fn seek_requests(server: &MockServer) -> usize {
    count_requests(server, |request| {
        String::from_utf8_lossy(&request.body).contains("req0__sc=seekTo")
    })
    .await
}

pub async fn bind_requests(server: &MockServer) -> usize {
    count_requests(server, |request| {
        request
            .url
            .query_pairs()
            .any(|(key, value)| key == "RID" && value == "1")
    })
    .await
}
