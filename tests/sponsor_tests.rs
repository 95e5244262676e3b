use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lounge_sync::{
    categories_from_preferences, normalize_segments, Segment, SegmentSource, SkipSegment,
    SponsorBlockClient, SponsorCategory, SponsorPreferences, SyncError,
};

// Test overlapping segments are merged
#[test]
fn test_normalize_merges_overlaps() {
    let segments = vec![Segment::new(19.5, 30.0), Segment::new(10.0, 20.0)];
    assert_eq!(
        normalize_segments(&segments, 1.0),
        vec![SkipSegment {
            start: 10.0,
            end: 30.0
        }]
    );

    // touching ranges merge as well
    let segments = vec![Segment::new(0.0, 5.0), Segment::new(5.0, 8.0)];
    assert_eq!(normalize_segments(&segments, 1.0).len(), 1);
}

// Test short and malformed segments are dropped
#[test]
fn test_normalize_filters() {
    let segments = vec![
        Segment::new(5.0, 5.5),
        Segment::new(8.0, 4.0),
        Segment {
            segment: vec![3.0],
            ..Segment::default()
        },
        Segment::new(40.0, 60.0),
        Segment::new(12.0, 14.0),
    ];

    assert_eq!(
        normalize_segments(&segments, 1.0),
        vec![
            SkipSegment {
                start: 12.0,
                end: 14.0
            },
            SkipSegment {
                start: 40.0,
                end: 60.0
            },
        ]
    );
}

// Test segment bounds
#[test]
fn test_skip_segment_contains() {
    let segment = SkipSegment {
        start: 10.0,
        end: 20.0,
    };
    assert!(segment.contains(10.0));
    assert!(segment.contains(19.9));
    assert!(!segment.contains(20.0));
    assert!(!segment.contains(9.9));
}

// Test stored preferences become categories
#[test]
fn test_categories_from_preferences() {
    let disabled = SponsorPreferences {
        enabled: false,
        categories: vec!["sponsor".to_string()],
    };
    assert!(categories_from_preferences(&disabled).is_empty());

    let enabled = SponsorPreferences {
        enabled: true,
        categories: vec![
            "sponsor".to_string(),
            "music_offtopic".to_string(),
            "not-a-category".to_string(),
        ],
    };
    assert_eq!(
        categories_from_preferences(&enabled),
        vec![SponsorCategory::Sponsor, SponsorCategory::Music]
    );

    for category in SponsorCategory::ALL {
        assert_eq!(SponsorCategory::from_value(category.value()), Some(category));
    }
}

// Test segment lookup against the SponsorBlock API
#[tokio::test]
async fn test_sponsorblock_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/skipSegments/"))
        .and(query_param("videoID", "abc123"))
        .and(query_param("category", "sponsor"))
        .and(query_param("category", "intro"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "segment": [12.5, 48.0],
                "UUID": "seg-1",
                "category": "sponsor",
                "videoDuration": 600.0,
                "actionType": "skip",
                "locked": 0,
                "votes": 3,
                "description": ""
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = SponsorBlockClient::new(&format!("{}/api/", server.uri())).unwrap();
    let segments = client
        .video_segments("abc123", &[SponsorCategory::Sponsor, SponsorCategory::Intro])
        .await
        .unwrap();

    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].segment, vec![12.5, 48.0]);
    assert_eq!(segments[0].uuid, "seg-1");
}

// Test default categories are sent when none are given
#[tokio::test]
async fn test_sponsorblock_default_categories() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/skipSegments/"))
        .and(query_param("category", "selfpromo"))
        .and(query_param("category", "interaction"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = SponsorBlockClient::new(&server.uri()).unwrap();
    assert!(client.video_segments("abc123", &[]).await.unwrap().is_empty());
}

// Test a video without segments and a failing API
#[tokio::test]
async fn test_sponsorblock_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/skipSegments/"))
        .and(query_param("videoID", "unknown"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/skipSegments/"))
        .and(query_param("videoID", "broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = SponsorBlockClient::new(&server.uri()).unwrap();
    assert!(client
        .video_segments("unknown", &[SponsorCategory::Sponsor])
        .await
        .unwrap()
        .is_empty());

    let err = client
        .video_segments("broken", &[SponsorCategory::Sponsor])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SponsorLookup(_)));
}

// Test the API URL is required
#[test]
fn test_sponsorblock_requires_url() {
    assert!(matches!(
        SponsorBlockClient::new("  "),
        Err(SyncError::InvalidInput(_))
    ));
}
