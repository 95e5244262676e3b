use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::events::EventKind;
use crate::models::Event;
use crate::utils::youtube_parse;

struct SessionIds {
    sid: Option<String>,
    gsessionid: Option<String>,
    last_event_id: i64,
    command_offset: u64,
}

/// State of one bound lounge connection.
///
/// The identifiers are assigned once from the bootstrap events and never
/// change afterwards. Counters and identifiers share one lock.
pub struct Session {
    screen_id: String,
    lounge_token: String,
    device_name: String,
    ids: Mutex<SessionIds>,
}

impl Session {
    pub fn new(screen_id: &str, lounge_token: &str, device_name: &str) -> Self {
        Self {
            screen_id: screen_id.to_string(),
            lounge_token: lounge_token.to_string(),
            device_name: device_name.to_string(),
            ids: Mutex::new(SessionIds {
                sid: None,
                gsessionid: None,
                last_event_id: 0,
                // RID 1 is taken by the bind request itself
                command_offset: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionIds> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sid(&self) -> Option<String> {
        self.lock().sid.clone()
    }

    pub fn gsessionid(&self) -> Option<String> {
        self.lock().gsessionid.clone()
    }

    pub fn last_event_id(&self) -> i64 {
        self.lock().last_event_id
    }

    /// Both identifiers are known, so the session can subscribe and send commands.
    pub fn is_connected(&self) -> bool {
        let ids = self.lock();
        ids.sid.is_some() && ids.gsessionid.is_some()
    }

    /// Fold a decoded batch into the session: advance the last seen event id
    /// and pick up SID / gsessionid from bootstrap events.
    pub fn apply_events(&self, events: &[Event]) {
        let mut ids = self.lock();
        for event in events {
            ids.last_event_id = event.id;

            let slot = match event.kind() {
                EventKind::SessionId => &mut ids.sid,
                EventKind::GroupSessionId => &mut ids.gsessionid,
                _ => continue,
            };
            if slot.is_some() {
                continue;
            }
            let value = event
                .args
                .first()
                .map(youtube_parse::as_string)
                .unwrap_or_default();
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
    }

    /// Allocate the next (RID, offset) pair for an outgoing command.
    pub fn next_command_rid(&self) -> (u64, u64) {
        let mut ids = self.lock();
        let ofs = ids.command_offset;
        ids.command_offset += 1;
        (ids.command_offset, ofs)
    }

    /// Query parameters shared by subscribe and command requests.
    pub fn common_params(&self) -> Vec<(&'static str, String)> {
        let ids = self.lock();
        vec![
            ("name", self.device_name.clone()),
            ("loungeIdToken", self.lounge_token.clone()),
            ("SID", ids.sid.clone().unwrap_or_default()),
            ("AID", ids.last_event_id.to_string()),
            ("gsessionid", ids.gsessionid.clone().unwrap_or_default()),
            ("device", "REMOTE_CONTROL".to_string()),
            ("app", "youtube-desktop".to_string()),
            ("VER", "8".to_string()),
            ("v", "2".to_string()),
        ]
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = self.lock();
        f.debug_struct("Session")
            .field("screen_id", &self.screen_id)
            .field("device_name", &self.device_name)
            .field("sid", &ids.sid)
            .field("gsessionid", &ids.gsessionid)
            .field("last_event_id", &ids.last_event_id)
            .finish_non_exhaustive()
    }
}
