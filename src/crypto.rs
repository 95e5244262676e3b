use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::store::Account;

const CIPHER_VERSION: u8 = 1;
const NONCE_SIZE: usize = 12;

pub const ENCRYPTION_SECRET_ENV: &str = "SYNC_ENCRYPTION_SECRET";

/// Hex encoded SHA-256 of `input`.
pub fn hash_secret(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Authenticated encryption of lounge tokens at rest.
///
/// Payload layout is `[version][12 byte nonce][ciphertext + tag]`. The user
/// id is bound as associated data, so a ciphertext copied onto another
/// account fails to open.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
    secret_hash: String,
}

impl TokenCipher {
    pub fn new(secret: &str) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::MissingSecret);
        }
        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
            secret_hash: hash_secret(secret),
        })
    }

    /// Read the secret from `SYNC_ENCRYPTION_SECRET` (a `.env` file is honoured).
    pub fn from_env() -> Result<Self, CryptoError> {
        let _ = dotenvy::dotenv();
        let secret = std::env::var(ENCRYPTION_SECRET_ENV).map_err(|_| CryptoError::MissingSecret)?;
        Self::new(&secret)
    }

    /// Stored next to every ciphertext to detect a rotated secret.
    pub fn secret_hash(&self) -> &str {
        &self.secret_hash
    }

    pub fn encrypt(&self, plaintext: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Aead)?;

        let mut payload = Vec::with_capacity(1 + NONCE_SIZE + sealed.len());
        payload.push(CIPHER_VERSION);
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&sealed);
        Ok(payload)
    }

    pub fn decrypt(&self, payload: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError> {
        let (&version, rest) = payload.split_first().ok_or(CryptoError::EmptyPayload)?;
        if version != CIPHER_VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        if rest.len() < NONCE_SIZE {
            return Err(CryptoError::Malformed);
        }

        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Aead)
    }

    pub fn encrypt_token(&self, token: &str, user_id: &str) -> Result<Vec<u8>, CryptoError> {
        self.encrypt(token.as_bytes(), user_id)
    }

    /// Open the lounge token stored on `account`, refusing tokens sealed
    /// under a different secret.
    pub fn decrypt_token(&self, account: &Account) -> Result<String, CryptoError> {
        if account.enc_secret_hash != self.secret_hash {
            return Err(CryptoError::SecretMismatch);
        }
        let plaintext = self.decrypt(&account.lounge_token_enc, &account.user_id)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("secret_hash", &self.secret_hash)
            .finish_non_exhaustive()
    }
}
