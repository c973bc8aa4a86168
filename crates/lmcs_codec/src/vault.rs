//! Envelope encryption keyed by a user-supplied password.

use crate::error::{CodecError, CodecResult};
use aes::Aes256;
use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::AesGcm;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Size of the derived AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the per-payload salt in bytes.
pub const SALT_SIZE: usize = 32;
/// Size of the GCM IV in bytes.
///
/// The on-disk format uses a 16-byte IV rather than GCM's conventional
/// 12 bytes, so the cipher is instantiated with an explicit nonce size.
pub const IV_SIZE: usize = 16;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// PBKDF2-HMAC-SHA256 iteration count used for new payloads.
pub const PBKDF2_ITERATIONS: u32 = 100_000;
/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// AES-256-GCM with the format's 16-byte IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// A self-describing encrypted record.
///
/// Every payload carries its own salt and iteration count, so a single
/// envelope can be decrypted with nothing but the password. This keeps
/// encrypted log lines individually portable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Hex-encoded ciphertext (without the auth tag).
    pub ciphertext: String,
    /// Hex-encoded 16-byte IV.
    pub iv: String,
    /// Hex-encoded 16-byte GCM authentication tag.
    #[serde(rename = "authTag")]
    pub auth_tag: String,
    /// Hex-encoded 32-byte PBKDF2 salt.
    pub salt: String,
    /// PBKDF2 iteration count used to derive the key.
    pub iterations: u32,
    /// Envelope format version.
    pub version: u32,
}

impl EncryptedPayload {
    /// Heuristic check whether a parsed JSON value is an envelope.
    ///
    /// Readers use this to distinguish encrypted lines from plaintext
    /// entry lines without attempting a decode.
    #[must_use]
    pub fn looks_encrypted(value: &serde_json::Value) -> bool {
        value.get("ciphertext").is_some()
            && value.get("authTag").is_some()
            && value.get("salt").is_some()
    }
}

/// Authenticated symmetric encryption over text payloads.
///
/// Keys are derived per payload with PBKDF2-HMAC-SHA256 over a fresh
/// random salt; encryption is AES-256-GCM. Wrong passwords and corrupted
/// ciphertext both manifest as authentication-tag failures.
pub struct CryptoVault {
    password: Zeroizing<String>,
}

impl CryptoVault {
    /// Creates a vault from a password.
    ///
    /// # Errors
    ///
    /// Returns an error if the password is empty.
    pub fn new(password: impl Into<String>) -> CodecResult<Self> {
        let password = password.into();
        if password.is_empty() {
            return Err(CodecError::crypto("encryption key must not be empty"));
        }
        Ok(Self {
            password: Zeroizing::new(password),
        })
    }

    fn derive_key(&self, salt: &[u8], iterations: u32) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), salt, iterations, &mut *key);
        key
    }

    /// Encrypts a text payload into a self-describing envelope.
    ///
    /// A fresh salt and IV are drawn for every call, so encrypting the
    /// same plaintext twice yields different envelopes.
    pub fn encrypt(&self, plaintext: &str) -> CodecResult<EncryptedPayload> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let key = self.derive_key(&salt, PBKDF2_ITERATIONS);
        let cipher = Aes256Gcm16::new(GenericArray::from_slice(&*key));

        let sealed = cipher
            .encrypt(GenericArray::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CodecError::crypto("encryption failed"))?;

        // The AEAD output is ciphertext || tag; the envelope stores them
        // as separate fields.
        let split = sealed.len() - TAG_SIZE;
        Ok(EncryptedPayload {
            ciphertext: hex::encode(&sealed[..split]),
            iv: hex::encode(iv),
            auth_tag: hex::encode(&sealed[split..]),
            salt: hex::encode(salt),
            iterations: PBKDF2_ITERATIONS,
            version: ENVELOPE_VERSION,
        })
    }

    /// Decrypts an envelope back into its text payload.
    ///
    /// The stored iteration count is honored, so payloads written under
    /// a different cost parameter remain readable.
    ///
    /// # Errors
    ///
    /// Returns a crypto error on malformed envelopes (bad hex, wrong
    /// version, short fields) and on authentication failure (corrupted
    /// data or wrong password).
    pub fn decrypt(&self, payload: &EncryptedPayload) -> CodecResult<String> {
        if payload.version != ENVELOPE_VERSION {
            return Err(CodecError::crypto(format!(
                "unsupported envelope version: {}",
                payload.version
            )));
        }
        if payload.iterations == 0 {
            return Err(CodecError::crypto("invalid iteration count"));
        }

        let salt = decode_field(&payload.salt, "salt")?;
        let iv = decode_field(&payload.iv, "iv")?;
        let ciphertext = decode_field(&payload.ciphertext, "ciphertext")?;
        let auth_tag = decode_field(&payload.auth_tag, "authTag")?;

        if iv.len() != IV_SIZE {
            return Err(CodecError::crypto("invalid IV length"));
        }
        if auth_tag.len() != TAG_SIZE {
            return Err(CodecError::crypto("invalid auth tag length"));
        }

        let key = self.derive_key(&salt, payload.iterations);
        let cipher = Aes256Gcm16::new(GenericArray::from_slice(&*key));

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&auth_tag);

        let plaintext = cipher
            .decrypt(GenericArray::from_slice(&iv), sealed.as_slice())
            .map_err(|_| CodecError::crypto("authentication failed: wrong key or corrupted data"))?;

        String::from_utf8(plaintext).map_err(|_| CodecError::crypto("plaintext is not valid UTF-8"))
    }
}

fn decode_field(hex_str: &str, field: &str) -> CodecResult<Vec<u8>> {
    hex::decode(hex_str).map_err(|_| CodecError::crypto(format!("malformed hex in {field}")))
}

impl std::fmt::Debug for CryptoVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoVault")
            .field("password", &"[REDACTED]")
            .finish()
    }
}
