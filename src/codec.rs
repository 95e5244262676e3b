// Custom codec for the YouTube Lounge bind stream
// Handles the format: <byte count>\n<json array>\n, where the byte count
// covers the payload lines including their newlines.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::error::LoungeError;
use crate::models::Event;
use crate::utils::youtube_parse;

// The declared size comes from the server, so it only hints the allocation
const MAX_PAYLOAD_RESERVE: usize = 64 * 1024;

pub struct LoungeCodec {
    // Current parsing state
    state: LoungeCodecState,
}

enum LoungeCodecState {
    // Waiting for a line containing the size
    ReadingSize,
    // Found size, accumulating payload lines until `remaining` hits zero
    ReadingContent { remaining: i64, payload: Vec<u8> },
}

impl Default for LoungeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LoungeCodec {
    pub fn new() -> Self {
        Self {
            state: LoungeCodecState::ReadingSize,
        }
    }

    /// True while a chunk has been announced but not fully received.
    pub fn is_mid_chunk(&self) -> bool {
        matches!(self.state, LoungeCodecState::ReadingContent { .. })
    }
}

impl Decoder for LoungeCodec {
    type Item = Vec<Event>;
    type Error = LoungeError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Everything is line oriented, so wait for a full line first
            let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line = buf.split_to(newline_pos + 1);
            let content = line[..newline_pos]
                .strip_suffix(b"\r")
                .unwrap_or(&line[..newline_pos]);

            match &mut self.state {
                LoungeCodecState::ReadingSize => {
                    let size_str = std::str::from_utf8(content)
                        .map_err(|_| {
                            LoungeError::Framing("invalid UTF-8 in chunk size".to_string())
                        })?
                        .trim();
                    if size_str.is_empty() {
                        continue;
                    }

                    let expected_size = size_str.parse::<u32>().map_err(|_| {
                        LoungeError::Framing(format!("invalid lounge chunk length {:?}", size_str))
                    })?;
                    if expected_size == 0 {
                        continue;
                    }

                    let reserve = (expected_size as usize).min(MAX_PAYLOAD_RESERVE);
                    self.state = LoungeCodecState::ReadingContent {
                        remaining: i64::from(expected_size),
                        payload: Vec::with_capacity(reserve),
                    };
                }

                LoungeCodecState::ReadingContent { remaining, payload } => {
                    payload.extend_from_slice(content);
                    *remaining -= content.len() as i64 + 1;

                    if *remaining > 0 {
                        continue;
                    }
                    if *remaining < 0 {
                        return Err(LoungeError::Framing(
                            "chunk body overran its declared length".to_string(),
                        ));
                    }

                    let payload = std::mem::take(payload);
                    self.state = LoungeCodecState::ReadingSize;
                    trace!("Decoded chunk of {} bytes", payload.len());
                    return parse_chunk_payload(&payload).map(Some);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(events) = self.decode(buf)? {
            return Ok(Some(events));
        }
        if !buf.is_empty() {
            // The last line may arrive without its newline
            buf.extend_from_slice(b"\n");
            if let Some(events) = self.decode(buf)? {
                return Ok(Some(events));
            }
        }
        if self.is_mid_chunk() {
            return Err(LoungeError::IncompleteChunk);
        }
        Ok(None)
    }
}

/// Parse one chunk payload of the form `[[id,[type, ...args]], ...]`.
///
/// Entries that are not well formed are skipped; only a payload that is not
/// a JSON array at all is an error.
pub fn parse_chunk_payload(payload: &[u8]) -> Result<Vec<Event>, LoungeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let entries: Vec<Value> = serde_json::from_slice(payload)?;
    let events = entries
        .iter()
        .filter_map(|entry| {
            let entry = entry.as_array().filter(|e| e.len() >= 2)?;
            let id = youtube_parse::parse_int(&entry[0])?;
            let tuple = entry[1].as_array().filter(|t| !t.is_empty())?;
            let event_type = tuple[0].as_str().filter(|t| !t.is_empty())?;
            Some(Event::new(id, event_type, tuple[1..].to_vec()))
        })
        .collect();
    Ok(events)
}

/// Decode a complete chunk-framed body, e.g. the response to a bind request.
pub fn parse_event_chunks(body: &[u8]) -> Result<Vec<Event>, LoungeError> {
    let mut codec = LoungeCodec::new();
    let mut buffer = BytesMut::from(body);
    let mut events = Vec::new();

    while let Some(batch) = codec.decode(&mut buffer)? {
        events.extend(batch);
    }
    while let Some(batch) = codec.decode_eof(&mut buffer)? {
        events.extend(batch);
    }
    Ok(events)
}
