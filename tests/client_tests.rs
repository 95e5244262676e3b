use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lounge_sync::{Event, EventSink, LoungeClient, LoungeError, Session, Settings};

mod common;
use common::{bind_body, chunk, test_settings};

// Collects events and fails on a screen disconnect, like the processor does
#[derive(Default)]
struct CollectingSink {
    events: Vec<Event>,
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn on_event(&mut self, event: Event) -> Result<(), LoungeError> {
        let disconnected = event.event_type == "loungeScreenDisconnected";
        self.events.push(event);
        if disconnected {
            return Err(LoungeError::ScreenDisconnected);
        }
        Ok(())
    }
}

async fn client_for(server: &MockServer) -> LoungeClient {
    LoungeClient::new(&test_settings(&server.uri())).unwrap()
}

fn bound_session() -> Session {
    let session = Session::new("screen-1", "tok-1", "TestRemote");
    session.apply_events(&[
        Event::new(0, "c", vec![json!("sid-1")]),
        Event::new(1, "S", vec![json!("gs-1")]),
    ]);
    session
}

// Test the base URL is taken from settings
#[test]
fn test_client_base_url() {
    let settings = Settings {
        lounge_base_url: "http://localhost:9000/api/lounge/".to_string(),
        ..Settings::default()
    };
    let client = LoungeClient::new(&settings).unwrap();
    assert_eq!(client.base_url(), "http://localhost:9000/api/lounge");

    let client = client.with_base_url("   ");
    assert_eq!(client.base_url(), "http://localhost:9000/api/lounge");
}

// Test pairing with a TV code
#[tokio::test]
async fn test_pair_with_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_screen"))
        .and(body_string_contains("pairing_code=123456789012"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "screen": {
                "name": "Living Room",
                "screenId": "screen-1",
                "loungeToken": "tok-1",
                "expiration": 1700000000000u64
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let screen = client.pair_with_code(" 123456789012 ").await.unwrap();

    assert_eq!(screen.screen_id, "screen-1");
    assert_eq!(screen.lounge_token, "tok-1");
    assert_eq!(screen.name.as_deref(), Some("Living Room"));
}

// Test pairing input and response validation
#[tokio::test]
async fn test_pair_with_code_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_screen"))
        .and(body_string_contains("pairing_code=111"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"screen": {"screenId": "screen-1"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_screen"))
        .and(body_string_contains("pairing_code=222"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;

    let err = client.pair_with_code("   ").await.unwrap_err();
    assert!(matches!(err, LoungeError::InvalidInput(_)));

    let err = client.pair_with_code("111").await.unwrap_err();
    assert!(matches!(err, LoungeError::InvalidResponse(_)));

    let err = client.pair_with_code("222").await.unwrap_err();
    assert!(matches!(err, LoungeError::Status { status: 404, .. }));
}

// Test refreshing the lounge token of a paired screen
#[tokio::test]
async fn test_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_lounge_token_batch"))
        .and(body_string_contains("screen_ids=screen-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "screens": [{"screenId": "screen-1", "loungeToken": "tok-2"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pairing/get_lounge_token_batch"))
        .and(body_string_contains("screen_ids=screen-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"screens": []})))
        .mount(&server)
        .await;

    let client = client_for(&server).await;

    let screen = client.refresh_token("screen-1").await.unwrap();
    assert_eq!(screen.lounge_token, "tok-2");
    assert_eq!(screen.name, None);

    let err = client.refresh_token("screen-2").await.unwrap_err();
    assert!(matches!(err, LoungeError::InvalidResponse(_)));

    let err = client.refresh_token("").await.unwrap_err();
    assert!(matches!(err, LoungeError::InvalidInput(_)));
}

// Test binding a session picks up SID and gsessionid
#[tokio::test]
async fn test_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "1"))
        .and(query_param("VER", "8"))
        .and(query_param("CVER", "1"))
        .and(query_param("auth_failure_option", "send_error"))
        .and(body_string_contains("loungeIdToken=tok-1"))
        .and(body_string_contains("device=REMOTE_CONTROL"))
        .and(body_string_contains("id=screen-1"))
        .and(body_string_contains("name=TestRemote"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "{}{}",
            bind_body("sid-1", "gs-1"),
            chunk(r#"[[2,["loungeStatus",{"devices":"[]"}]]]"#)
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let session = client.connect("screen-1", "tok-1", "").await.unwrap();

    assert!(session.is_connected());
    assert_eq!(session.sid().as_deref(), Some("sid-1"));
    assert_eq!(session.gsessionid().as_deref(), Some("gs-1"));
    assert_eq!(session.last_event_id(), 2);
    assert_eq!(session.device_name(), "TestRemote");
}

// Test bind failures
#[tokio::test]
async fn test_connect_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(body_string_contains("loungeIdToken=no-ids"))
        .respond_with(ResponseTemplate::new(200).set_body_string(chunk(r#"[[0,["noop"]]]"#)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(body_string_contains("loungeIdToken=expired"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;

    let err = client.connect("screen-1", "no-ids", "Remote").await.unwrap_err();
    assert!(matches!(err, LoungeError::MissingSessionIds));

    let err = client.connect("screen-1", "expired", "Remote").await.unwrap_err();
    assert!(err.is_auth_expired());

    let err = client.connect("", "tok-1", "Remote").await.unwrap_err();
    assert!(matches!(err, LoungeError::InvalidInput(_)));
}

// Test commands carry increasing RID and offset values
#[tokio::test]
async fn test_commands() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "2"))
        .and(query_param("SID", "sid-1"))
        .and(query_param("gsessionid", "gs-1"))
        .and(body_string_contains("ofs=1"))
        .and(body_string_contains("req0__sc=seekTo"))
        .and(body_string_contains("req0_newTime=12.500"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "3"))
        .and(body_string_contains("ofs=2"))
        .and(body_string_contains("req0__sc=getNowPlaying"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let session = bound_session();

    client.seek_to(&session, 12.5).await.unwrap();
    client.get_now_playing(&session).await.unwrap();
}

// Test command failures map to session errors
#[tokio::test]
async fn test_command_session_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "2"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Unknown SID"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "3"))
        .respond_with(ResponseTemplate::new(410).set_body_string("Gone"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let session = bound_session();

    let err = client.get_now_playing(&session).await.unwrap_err();
    assert!(matches!(err, LoungeError::UnknownSid(_)));
    let err = client.get_now_playing(&session).await.unwrap_err();
    assert!(matches!(err, LoungeError::SessionGone(_)));

    let unbound = Session::new("screen-1", "tok-1", "TestRemote");
    let err = client.get_now_playing(&unbound).await.unwrap_err();
    assert!(matches!(err, LoungeError::NotConnected));
}

// Test the subscription forwards everything except bootstrap events
#[tokio::test]
async fn test_subscribe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .and(query_param("RID", "rpc"))
        .and(query_param("CI", "0"))
        .and(query_param("TYPE", "xmlhttp"))
        .and(query_param("SID", "sid-1"))
        .and(query_param("AID", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "{}{}",
            chunk(r#"[[2,["nowPlaying",{"videoId":"v1","currentTime":"5"}]]]"#),
            chunk(r#"[[3,["c","sid-2"]],[4,["onStateChange",{"state":"1"}]]]"#)
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let session = bound_session();
    let mut sink = CollectingSink::default();

    client
        .subscribe(&session, &CancellationToken::new(), &mut sink)
        .await
        .unwrap();

    let ids: Vec<i64> = sink.events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![2, 4]);
    assert_eq!(session.sid().as_deref(), Some("sid-1"));
    assert_eq!(session.last_event_id(), 4);
}

// Test a sink error ends the subscription
#[tokio::test]
async fn test_subscribe_sink_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "{}{}",
            chunk(r#"[[2,["loungeScreenDisconnected",{}]]]"#),
            chunk(r#"[[3,["noop"]]]"#)
        )))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let session = bound_session();
    let mut sink = CollectingSink::default();

    let err = client
        .subscribe(&session, &CancellationToken::new(), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, LoungeError::ScreenDisconnected));
    assert_eq!(sink.events.len(), 1);
}

// Test subscription failures
#[tokio::test]
async fn test_subscribe_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .and(query_param("SID", "sid-1"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Unknown SID"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .and(query_param("SID", "sid-bad"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not-a-size\n[]\n"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let mut sink = CollectingSink::default();

    let err = client
        .subscribe(&bound_session(), &CancellationToken::new(), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, LoungeError::UnknownSid(_)));

    let session = Session::new("screen-1", "tok-1", "TestRemote");
    session.apply_events(&[
        Event::new(0, "c", vec![json!("sid-bad")]),
        Event::new(1, "S", vec![json!("gs-1")]),
    ]);
    let err = client
        .subscribe(&session, &CancellationToken::new(), &mut sink)
        .await
        .unwrap_err();
    assert!(err.is_framing());

    let unbound = Session::new("screen-1", "tok-1", "TestRemote");
    let err = client
        .subscribe(&unbound, &CancellationToken::new(), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, LoungeError::NotConnected));
}

// Test cancelling a subscription that is still waiting on the server
#[tokio::test]
async fn test_subscribe_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bc/bind"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let session = bound_session();
    let mut sink = CollectingSink::default();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.subscribe(&session, &cancel, &mut sink),
    )
    .await
    .expect("subscribe should return once cancelled");
    assert!(matches!(result, Err(LoungeError::Cancelled)));
}
