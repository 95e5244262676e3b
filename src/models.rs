use serde::Deserialize;
use serde_json::Value;

use crate::events::EventKind;
use crate::utils::youtube_parse;

// Response types for the pairing API calls
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Screen {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "screenId", default)]
    pub screen_id: String,
    #[serde(rename = "loungeToken", default)]
    pub lounge_token: String,
}

impl Screen {
    /// A screen is usable only when both the id and the token are present.
    pub fn is_complete(&self) -> bool {
        !self.screen_id.trim().is_empty() && !self.lounge_token.trim().is_empty()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

#[derive(Debug, Deserialize)]
pub struct ScreenResponse {
    pub screen: Screen,
}

#[derive(Debug, Deserialize)]
pub struct ScreensResponse {
    #[serde(default)]
    pub screens: Vec<Screen>,
}

/// One parsed unit of the bind event stream: `[id, [type, ...args]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    pub event_type: String,
    pub args: Vec<Value>,
}

impl Event {
    pub fn new(id: i64, event_type: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            args,
        }
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.event_type)
    }
}

/// Player state codes reported by the screen in `nowPlaying` / `onStateChange`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerState {
    /// -1, nothing loaded yet
    Unstarted,
    /// 0, the video ended or the player was stopped
    Ended,
    /// 1
    Playing,
    /// 2
    Paused,
    /// 3
    Buffering,
    /// 5
    Cued,
    /// 1081
    Advertisement,
    Unknown(String),
}

impl PlayerState {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "-1" => PlayerState::Unstarted,
            "0" => PlayerState::Ended,
            "1" => PlayerState::Playing,
            "2" => PlayerState::Paused,
            "3" => PlayerState::Buffering,
            "5" => PlayerState::Cued,
            "1081" => PlayerState::Advertisement,
            other => PlayerState::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            PlayerState::Unstarted => "-1",
            PlayerState::Ended => "0",
            PlayerState::Playing => "1",
            PlayerState::Paused => "2",
            PlayerState::Buffering => "3",
            PlayerState::Cued => "5",
            PlayerState::Advertisement => "1081",
            PlayerState::Unknown(raw) => raw,
        }
    }

    /// States whose reported position is real watch progress.
    pub fn is_countable(&self) -> bool {
        matches!(
            self,
            PlayerState::Playing | PlayerState::Paused | PlayerState::Ended
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Unstarted => "UNSTARTED",
            PlayerState::Ended => "ENDED",
            PlayerState::Playing => "PLAYING",
            PlayerState::Paused => "PAUSED",
            PlayerState::Buffering => "BUFFERING",
            PlayerState::Cued => "CUED",
            PlayerState::Advertisement => "ADVERTISEMENT",
            PlayerState::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Playback snapshot derived from a `nowPlaying` or `onStateChange` event.
///
/// Missing fields stay `None` so that an absent position is never mistaken
/// for "position 0".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackEvent {
    pub video_id: Option<String>,
    pub state: Option<PlayerState>,
    pub current_time: Option<f64>,
    pub duration: Option<f64>,
}

impl PlaybackEvent {
    pub fn from_event(event: &Event) -> Option<Self> {
        if !matches!(event.kind(), EventKind::NowPlaying | EventKind::StateChange) {
            return None;
        }
        let payload = event.args.first()?.as_object()?;

        let video_id = payload
            .get("videoId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let state = payload
            .get("state")
            .map(youtube_parse::as_string)
            .filter(|s| !s.trim().is_empty())
            .map(|s| PlayerState::from_code(&s));
        let current_time = youtube_parse::parse_float(payload.get("currentTime"));
        let duration = youtube_parse::parse_float(payload.get("duration"));

        let playback = Self {
            video_id,
            state,
            current_time,
            duration,
        };
        if playback == Self::default() {
            return None;
        }
        Some(playback)
    }

    pub fn has_current_time(&self) -> bool {
        self.current_time.is_some()
    }

    /// Reported position as whole seconds, see [`clamp_playback_second`].
    pub fn current_second(&self) -> Option<u32> {
        self.current_time
            .map(|current| clamp_playback_second(current, self.duration))
    }
}

/// Floor a position to whole seconds, never below zero and never past a
/// known positive duration.
pub fn clamp_playback_second(current: f64, duration: Option<f64>) -> u32 {
    let mut seconds = current.floor().max(0.0);
    if let Some(duration) = duration {
        let limit = duration.floor();
        if limit > 0.0 && seconds > limit {
            seconds = limit;
        }
    }
    seconds.min(u32::MAX as f64) as u32
}
