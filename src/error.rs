use thiserror::Error;

// Errors raised by the lounge protocol client
#[derive(Error, Debug)]
pub enum LoungeError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseFailed(#[from] serde_json::Error),

    #[error("URL encoding failed: {0}")]
    UrlEncodingFailed(#[from] serde_urlencoded::ser::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Lounge auth expired: {0}")]
    AuthExpired(String), // HTTP 401, caller refreshes the token and retries once

    #[error("Lounge unknown SID: {0}")]
    UnknownSid(String),

    #[error("Lounge session gone: {0}")]
    SessionGone(String),

    #[error("Lounge request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Lounge connect missing session identifiers")]
    MissingSessionIds,

    #[error("Lounge is not connected")]
    NotConnected,

    #[error("Invalid lounge chunk framing: {0}")]
    Framing(String),

    #[error("Incomplete lounge chunk")]
    IncompleteChunk,

    #[error("Screen disconnected")]
    ScreenDisconnected,

    #[error("Connection explicitly closed or terminated")]
    Cancelled,
}

impl LoungeError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, LoungeError::AuthExpired(_))
    }

    /// True when the current bind session cannot be used any more and the
    /// worker has to reconnect from scratch.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            LoungeError::UnknownSid(_) | LoungeError::SessionGone(_) | LoungeError::ScreenDisconnected
        )
    }

    /// True for malformed event streams (bad chunk lengths, truncated chunks, bad JSON).
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            LoungeError::Framing(_) | LoungeError::IncompleteChunk | LoungeError::ParseFailed(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Ciphertext payload is empty")]
    EmptyPayload,

    #[error("Unsupported ciphertext version {0}")]
    UnsupportedVersion(u8),

    #[error("Ciphertext payload is malformed")]
    Malformed,

    #[error("Lounge token secret mismatch")]
    SecretMismatch,

    #[error("Authenticated encryption failed")]
    Aead,

    #[error("Decrypted token is not valid UTF-8")]
    InvalidUtf8,

    #[error("Encryption secret is not configured")]
    MissingSecret,
}

// Errors surfaced by the sync service, workers and processor
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Lounge(#[from] LoungeError),

    #[error("Persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error("Token protection failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Sponsor segment lookup failed: {0}")]
    SponsorLookup(String),

    #[error("TV sync subscription paused: no events")]
    NoEvents,

    #[error("Worker cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Store(StoreError::NotFound))
    }
}
