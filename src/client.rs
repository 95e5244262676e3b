use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{parse_event_chunks, LoungeCodec};
use crate::commands::PlaybackCommand;
use crate::error::LoungeError;
use crate::models::{Event, Screen, ScreenResponse, ScreensResponse};
use crate::session::Session;
use crate::settings::Settings;
use crate::utils::truncate_body;

pub const DEFAULT_LOUNGE_API_BASE_URL: &str = "https://www.youtube.com/api/lounge";
pub const DEFAULT_DEVICE_NAME: &str = "Lounge Sync";

const BUFFER_CAPACITY: usize = 16 * 1024; // 16KB initial stream buffer
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const DEVICE_CONTEXT: &str =
    "user_agent=lounge-sync&window_width_points=&window_height_points=&os_name=macos";

/// Receives the events of a subscription, in arrival order.
///
/// Returning an error ends the subscription with that error.
#[async_trait]
pub trait EventSink: Send {
    async fn on_event(&mut self, event: Event) -> Result<(), LoungeError>;
}

/// Client for the lounge pairing and bind endpoints.
///
/// Cheap to clone; all clones share one connection pool, so a single client
/// can serve every worker.
#[derive(Clone, Debug)]
pub struct LoungeClient {
    http: Client,
    base_url: String,
    default_device_name: String,
    request_timeout: Duration,
}

impl LoungeClient {
    /// Build a client from the configured base URL and timeouts.
    ///
    /// No overall timeout is set on the underlying client because the
    /// subscribe request is a long poll; every other request gets
    /// `request_timeout` individually.
    pub fn new(settings: &Settings) -> Result<Self, LoungeError> {
        let http = Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(600)))
            .connect_timeout(settings.connect_timeout)
            .build()?;
        Ok(Self::with_client(http, settings).with_base_url(&settings.lounge_base_url))
    }

    /// Reuse an existing reqwest client.
    pub fn with_client(http: Client, settings: &Settings) -> Self {
        let default_device_name = match settings.device_name.trim() {
            "" => DEFAULT_DEVICE_NAME.to_string(),
            name => name.to_string(),
        };
        Self {
            http,
            base_url: DEFAULT_LOUNGE_API_BASE_URL.to_string(),
            default_device_name,
            request_timeout: settings.request_timeout,
        }
    }

    /// Point the client at another host, used against mock servers.
    /// A blank value keeps the current base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base_url = base_url.trim();
        if !base_url.is_empty() {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn bind_url(&self) -> String {
        format!("{}/bc/bind", self.base_url)
    }

    fn form_post(&self, url: String, body: String) -> RequestBuilder {
        self.http
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
            .timeout(self.request_timeout)
    }

    /// Pair with a TV using the code shown on its "Link with TV code" screen.
    pub async fn pair_with_code(&self, pairing_code: &str) -> Result<Screen, LoungeError> {
        let code = pairing_code.trim();
        if code.is_empty() {
            return Err(LoungeError::InvalidInput(
                "pairing code is required".to_string(),
            ));
        }

        let body = serde_urlencoded::to_string([("pairing_code", code)])?;
        let response = self
            .form_post(format!("{}/pairing/get_screen", self.base_url), body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        check_response_status(status, &body)?;

        let payload: ScreenResponse = serde_json::from_str(&body)?;
        if !payload.screen.is_complete() {
            return Err(LoungeError::InvalidResponse(
                "invalid lounge pair response".to_string(),
            ));
        }

        info!(
            screen_id = %payload.screen.screen_id,
            screen_name = %payload.screen.display_name(),
            "Paired with screen"
        );
        Ok(payload.screen)
    }

    /// Obtain a fresh lounge token for an already paired screen.
    pub async fn refresh_token(&self, screen_id: &str) -> Result<Screen, LoungeError> {
        let screen_id = screen_id.trim();
        if screen_id.is_empty() {
            return Err(LoungeError::InvalidInput(
                "screen id is required".to_string(),
            ));
        }

        let body = serde_urlencoded::to_string([("screen_ids", screen_id)])?;
        let response = self
            .form_post(
                format!("{}/pairing/get_lounge_token_batch", self.base_url),
                body,
            )
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        check_response_status(status, &body)?;

        let payload: ScreensResponse = serde_json::from_str(&body)?;
        let screen = payload.screens.into_iter().next().ok_or_else(|| {
            LoungeError::InvalidResponse("refresh lounge token returned no screens".to_string())
        })?;
        if !screen.is_complete() {
            return Err(LoungeError::InvalidResponse(
                "refresh lounge token response missing fields".to_string(),
            ));
        }

        debug!(screen_id = %screen.screen_id, "Lounge token refreshed");
        Ok(screen)
    }

    /// Bind a new remote-control session to the screen.
    pub async fn connect(
        &self,
        screen_id: &str,
        lounge_token: &str,
        device_name: &str,
    ) -> Result<Session, LoungeError> {
        let screen_id = screen_id.trim();
        let lounge_token = lounge_token.trim();
        if screen_id.is_empty() || lounge_token.is_empty() {
            return Err(LoungeError::InvalidInput(
                "screen id and lounge token are required".to_string(),
            ));
        }
        let device_name = match device_name.trim() {
            "" => self.default_device_name.as_str(),
            name => name,
        };

        let form = build_connect_form(screen_id, lounge_token, device_name)?;
        let response = self
            .form_post(self.bind_url(), form)
            .query(&[
                ("RID", "1"),
                ("VER", "8"),
                ("CVER", "1"),
                ("auth_failure_option", "send_error"),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        check_response_status(status, &String::from_utf8_lossy(&body))?;

        let session = Session::new(screen_id, lounge_token, device_name);
        let events = parse_event_chunks(&body)?;
        session.apply_events(&events);
        if !session.is_connected() {
            return Err(LoungeError::MissingSessionIds);
        }

        info!(
            screen_id = %screen_id,
            device = %session.device_name(),
            sid = ?session.sid(),
            "Lounge session bound"
        );
        Ok(session)
    }

    /// Long poll the bind endpoint and hand every non-bootstrap event to `sink`.
    ///
    /// Returns `Ok(())` when the server ends the stream cleanly and
    /// `LoungeError::Cancelled` when `cancel` fires first.
    pub async fn subscribe(
        &self,
        session: &Session,
        cancel: &CancellationToken,
        sink: &mut dyn EventSink,
    ) -> Result<(), LoungeError> {
        if !session.is_connected() {
            return Err(LoungeError::NotConnected);
        }

        let mut params = session.common_params();
        params.push(("RID", "rpc".to_string()));
        params.push(("CI", "0".to_string()));
        params.push(("TYPE", "xmlhttp".to_string()));

        let request = self.http.get(self.bind_url()).query(&params);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoungeError::Cancelled),
            result = request.send() => result?,
        };

        let status = response.status().as_u16();
        if status != 200 {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LoungeError::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };
            return Err(status_error(status, &body));
        }

        let mut stream = response.bytes_stream();
        let mut codec = LoungeCodec::new();
        let mut buffer = BytesMut::with_capacity(BUFFER_CAPACITY);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Subscription cancelled");
                    return Err(LoungeError::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    trace!("Received {} bytes on subscription", bytes.len());
                    buffer.extend_from_slice(&bytes);
                    while let Some(events) = codec.decode(&mut buffer)? {
                        dispatch_batch(session, events, sink).await?;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Subscription stream failed");
                    return Err(LoungeError::RequestFailed(e));
                }
                None => {
                    while let Some(events) = codec.decode_eof(&mut buffer)? {
                        dispatch_batch(session, events, sink).await?;
                    }
                    debug!("Subscription stream ended");
                    return Ok(());
                }
            }
        }
    }

    /// Send one command on the session's bind channel.
    pub async fn command(
        &self,
        session: &Session,
        command: &PlaybackCommand,
    ) -> Result<(), LoungeError> {
        if !session.is_connected() {
            return Err(LoungeError::NotConnected);
        }

        let (rid, ofs) = session.next_command_rid();
        let mut params = session.common_params();
        params.push(("RID", rid.to_string()));

        let form_fields = command.form_fields(ofs);
        debug!(
            command = command.name(),
            rid = rid,
            offset = ofs,
            "Sending lounge command"
        );

        let body = serde_urlencoded::to_string(&form_fields)?;
        let response = self
            .form_post(self.bind_url(), body)
            .query(&params)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    pub async fn seek_to(&self, session: &Session, seconds: f64) -> Result<(), LoungeError> {
        self.command(session, &PlaybackCommand::seek_to(seconds))
            .await
    }

    pub async fn get_now_playing(&self, session: &Session) -> Result<(), LoungeError> {
        self.command(session, &PlaybackCommand::GetNowPlaying).await
    }
}

async fn dispatch_batch(
    session: &Session,
    events: Vec<Event>,
    sink: &mut dyn EventSink,
) -> Result<(), LoungeError> {
    session.apply_events(&events);
    for event in events {
        if event.kind().is_bootstrap() {
            continue;
        }
        sink.on_event(event).await?;
    }
    Ok(())
}

fn build_connect_form(
    screen_id: &str,
    lounge_token: &str,
    device_name: &str,
) -> Result<String, LoungeError> {
    let form_fields: [(&str, &str); 11] = [
        ("app", "web"),
        ("mdx-version", "3"),
        ("name", device_name),
        ("id", screen_id),
        ("device", "REMOTE_CONTROL"),
        ("capabilities", "que,dsdtr,atp,vsp"),
        ("magnaKey", "cloudPairedDevice"),
        ("ui", "false"),
        ("deviceContext", DEVICE_CONTEXT),
        ("theme", "cl"),
        ("loungeIdToken", lounge_token),
    ];

    serde_urlencoded::to_string(form_fields).map_err(LoungeError::UrlEncodingFailed)
}

/// Map a non-200 lounge response onto the error taxonomy.
pub fn check_response_status(status: u16, body: &str) -> Result<(), LoungeError> {
    if status == 200 {
        return Ok(());
    }
    Err(status_error(status, body))
}

fn status_error(status: u16, body: &str) -> LoungeError {
    let trimmed = body.trim();
    match status {
        401 => LoungeError::AuthExpired(trimmed.to_string()),
        400 if body.contains("Unknown SID") => LoungeError::UnknownSid(trimmed.to_string()),
        410 if body.contains("Gone") => LoungeError::SessionGone(trimmed.to_string()),
        _ => LoungeError::Status {
            status,
            body: truncate_body(body),
        },
    }
}
