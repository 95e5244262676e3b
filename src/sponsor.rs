use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::SyncError;
use crate::store::SponsorPreferences;

const SPONSORBLOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// SponsorBlock segment categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SponsorCategory {
    SelfPromo,
    Interaction,
    Sponsor,
    Preview,
    Intro,
    Outro,
    Music,
    Filler,
}

impl SponsorCategory {
    pub const ALL: [SponsorCategory; 8] = [
        SponsorCategory::SelfPromo,
        SponsorCategory::Interaction,
        SponsorCategory::Sponsor,
        SponsorCategory::Preview,
        SponsorCategory::Intro,
        SponsorCategory::Outro,
        SponsorCategory::Music,
        SponsorCategory::Filler,
    ];

    /// Categories looked up when none are given.
    pub const DEFAULT: [SponsorCategory; 3] = [
        SponsorCategory::Sponsor,
        SponsorCategory::SelfPromo,
        SponsorCategory::Interaction,
    ];

    /// Wire value used by the SponsorBlock API and stored in user settings.
    pub fn value(&self) -> &'static str {
        match self {
            SponsorCategory::SelfPromo => "selfpromo",
            SponsorCategory::Interaction => "interaction",
            SponsorCategory::Sponsor => "sponsor",
            SponsorCategory::Preview => "preview",
            SponsorCategory::Intro => "intro",
            SponsorCategory::Outro => "outro",
            SponsorCategory::Music => "music_offtopic",
            SponsorCategory::Filler => "filler",
        }
    }

    pub fn from_value(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.value() == value)
    }
}

/// Categories a user wants skipped; empty when skipping is off.
/// Unknown stored values are ignored.
pub fn categories_from_preferences(preferences: &SponsorPreferences) -> Vec<SponsorCategory> {
    if !preferences.enabled {
        return Vec::new();
    }
    preferences
        .categories
        .iter()
        .filter_map(|value| SponsorCategory::from_value(value))
        .collect()
}

// Segment as returned by GET /api/skipSegments
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Segment {
    #[serde(default)]
    pub segment: Vec<f64>,
    #[serde(rename = "UUID", default)]
    pub uuid: String,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "videoDuration", default)]
    pub video_duration: f64,
    #[serde(rename = "actionType", default)]
    pub action_type: String,
    #[serde(default)]
    pub locked: i64,
    #[serde(default)]
    pub votes: i64,
    #[serde(default)]
    pub description: String,
}

impl Segment {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            segment: vec![start, end],
            ..Self::default()
        }
    }
}

/// A time range the player should jump over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkipSegment {
    pub start: f64,
    pub end: f64,
}

impl SkipSegment {
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

/// Drop malformed and too short segments, sort by start and merge
/// overlapping or touching ranges.
pub fn normalize_segments(segments: &[Segment], min_length: f64) -> Vec<SkipSegment> {
    let mut normalized: Vec<SkipSegment> = segments
        .iter()
        .filter_map(|segment| match segment.segment.as_slice() {
            &[start, end] if end > start && end - start >= min_length => {
                Some(SkipSegment { start, end })
            }
            _ => None,
        })
        .collect();
    normalized.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<SkipSegment> = Vec::with_capacity(normalized.len());
    for segment in normalized {
        match merged.last_mut() {
            Some(last) if segment.start <= last.end => {
                last.end = last.end.max(segment.end);
            }
            _ => merged.push(segment),
        }
    }
    merged
}

/// Source of sponsor segments for a video.
#[async_trait]
pub trait SegmentSource: Send + Sync {
    async fn video_segments(
        &self,
        video_id: &str,
        categories: &[SponsorCategory],
    ) -> Result<Vec<Segment>, SyncError>;
}

/// SponsorBlock HTTP API client.
#[derive(Clone, Debug)]
pub struct SponsorBlockClient {
    http: Client,
    api_url: String,
}

impl SponsorBlockClient {
    pub fn new(api_url: &str) -> Result<Self, SyncError> {
        let api_url = api_url.trim().trim_end_matches('/');
        if api_url.is_empty() {
            return Err(SyncError::InvalidInput(
                "sponsorblock api url is required".to_string(),
            ));
        }
        let http = Client::builder()
            .timeout(SPONSORBLOCK_TIMEOUT)
            .build()
            .map_err(|e| SyncError::SponsorLookup(e.to_string()))?;
        Ok(Self {
            http,
            api_url: api_url.to_string(),
        })
    }
}

#[async_trait]
impl SegmentSource for SponsorBlockClient {
    async fn video_segments(
        &self,
        video_id: &str,
        categories: &[SponsorCategory],
    ) -> Result<Vec<Segment>, SyncError> {
        let categories = if categories.is_empty() {
            &SponsorCategory::DEFAULT[..]
        } else {
            categories
        };

        let mut request = self
            .http
            .get(format!("{}/skipSegments/", self.api_url))
            .query(&[("videoID", video_id)]);
        for category in categories {
            request = request.query(&[("category", category.value())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::SponsorLookup(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                let segments = response
                    .json::<Vec<Segment>>()
                    .await
                    .map_err(|e| SyncError::SponsorLookup(e.to_string()))?;
                debug!(video_id = %video_id, count = segments.len(), "Loaded sponsor segments");
                Ok(segments)
            }
            404 => Ok(Vec::new()),
            status => Err(SyncError::SponsorLookup(format!(
                "unexpected status code {}",
                status
            ))),
        }
    }
}
