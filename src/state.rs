use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

pub const REASON_CONNECTING: &str = "Establishing TV session";
pub const REASON_NO_EVENTS: &str = "No TV events received";
pub const REASON_CONNECT_FAILED: &str = "Could not connect to TV";
pub const REASON_SESSION_ENDED: &str = "Session ended";
pub const REASON_USER_INACTIVE: &str = "No recent login activity";

/// Persisted connection state of a sync account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    PausedNoEvents,
    PausedInactiveUser,
    DisabledByUser,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::PausedNoEvents => "paused_no_events",
            ConnectionState::PausedInactiveUser => "paused_inactive_user",
            ConnectionState::DisabledByUser => "disabled_by_user",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(ConnectionState::Disconnected),
            "connecting" => Ok(ConnectionState::Connecting),
            "connected" => Ok(ConnectionState::Connected),
            "paused_no_events" => Ok(ConnectionState::PausedNoEvents),
            "paused_inactive_user" => Ok(ConnectionState::PausedInactiveUser),
            "disabled_by_user" => Ok(ConnectionState::DisabledByUser),
            "error" => Ok(ConnectionState::Error),
            other => Err(StoreError::Backend(format!(
                "unknown connection state {:?}",
                other
            ))),
        }
    }
}
