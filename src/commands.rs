use std::collections::BTreeMap;

// Commands sent to the screen over the bind channel
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    SeekTo {
        new_time: f64,
    },
    GetNowPlaying,
    /// Any other `req0__sc` command; params are sent as `req0_<key>=<value>`.
    Custom {
        name: String,
        params: BTreeMap<String, String>,
    },
}

impl PlaybackCommand {
    /// Seek command with the target clamped at zero.
    pub fn seek_to(seconds: f64) -> Self {
        let new_time = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        PlaybackCommand::SeekTo { new_time }
    }

    pub fn name(&self) -> &str {
        match self {
            PlaybackCommand::SeekTo { .. } => "seekTo",
            PlaybackCommand::GetNowPlaying => "getNowPlaying",
            PlaybackCommand::Custom { name, .. } => name,
        }
    }

    /// Command specific parameters, without the `req0_` prefix.
    pub fn params(&self) -> Vec<(String, String)> {
        match self {
            PlaybackCommand::SeekTo { new_time } => {
                vec![("newTime".to_string(), format!("{:.3}", new_time))]
            }
            PlaybackCommand::GetNowPlaying => Vec::new(),
            PlaybackCommand::Custom { params, .. } => params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Form body for a single-command bind POST.
    pub fn form_fields(&self, offset: u64) -> Vec<(String, String)> {
        let mut form_fields = Vec::with_capacity(4);
        form_fields.push(("count".to_string(), "1".to_string()));
        form_fields.push(("ofs".to_string(), offset.to_string()));
        form_fields.push(("req0__sc".to_string(), self.name().to_string()));
        for (key, value) in self.params() {
            form_fields.push((format!("req0_{}", key), value));
        }
        form_fields
    }
}
