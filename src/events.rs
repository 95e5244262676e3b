// Event type names seen on the bind stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// "c", carries the SID during bootstrap
    SessionId,
    /// "S", carries the group session id during bootstrap
    GroupSessionId,
    NowPlaying,
    StateChange,
    PlaybackSpeedChanged,
    ScreenDisconnected,
    LoungeStatus,
    AdStateChange,
    Noop,
    Other,
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "c" => EventKind::SessionId,
            "S" => EventKind::GroupSessionId,
            "nowPlaying" => EventKind::NowPlaying,
            "onStateChange" => EventKind::StateChange,
            "onPlaybackSpeedChanged" => EventKind::PlaybackSpeedChanged,
            "loungeScreenDisconnected" => EventKind::ScreenDisconnected,
            "loungeStatus" => EventKind::LoungeStatus,
            "onAdStateChange" => EventKind::AdStateChange,
            "noop" => EventKind::Noop,
            _ => EventKind::Other,
        }
    }

    /// Bootstrap events only update the session and are never handed to callers.
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, EventKind::SessionId | EventKind::GroupSessionId)
    }
}
