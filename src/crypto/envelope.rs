//! Wire envelopes for encrypted sync records.
//!
//! An outer `SyncEnvelope` carries a JSON-stringified inner payload of
//! `{ ciphertext, IV, hmac }`. `EncryptedJson` pairs that payload string
//! with a key bundle and lazily verifies and decrypts it; both results
//! are computed once and memoized.
use std::cell::OnceCell;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroize;

use crate::crypto::bundle::KeyBundle;
use crate::error::{CoreError, Result};

/// The inner payload of an encrypted record.
///
/// `ciphertext` and `IV` are standard base64; `hmac` is 64 lowercase hex
/// characters of the HMAC-SHA256 over the UTF-8 bytes of the base64
/// ciphertext string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    #[serde(rename = "IV")]
    pub iv: String,
    pub hmac: String,
}

impl EncryptedPayload {
    pub fn from_json_str(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    /// Verify and decrypt under `bundle`, reporting the failure cause.
    ///
    /// The `EncryptedJson` codec collapses every failure to `None`;
    /// this is the strict form for callers that distinguish an HMAC
    /// mismatch from a malformed record.
    pub fn open(&self, bundle: &KeyBundle) -> Result<Value> {
        let expected =
            hex::decode(&self.hmac).map_err(|e| CoreError::MalformedInput(e.to_string()))?;
        if !bundle.verify(&expected, self.ciphertext.as_bytes()) {
            return Err(CoreError::IntegrityFailure);
        }
        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .map_err(|e| CoreError::MalformedInput(e.to_string()))?;
        let iv = BASE64
            .decode(&self.iv)
            .map_err(|e| CoreError::MalformedInput(e.to_string()))?;
        let mut plaintext = bundle.decrypt(&ciphertext, &iv)?;
        let parsed =
            serde_json::from_str(&plaintext).map_err(|e| CoreError::MalformedInput(e.to_string()));
        plaintext.zeroize();
        parsed
    }
}

/// The outer record envelope exchanged with the sync server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// JSON-stringified `EncryptedPayload`.
    pub payload: String,
    /// Server modification time in decimal seconds, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<f64>,
}

impl SyncEnvelope {
    pub fn from_json_str(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

/// A raw payload string paired with the bundle that should decrypt it.
///
/// `is_valid` and `cleartext` each run their HMAC/AES pass at most once.
pub struct EncryptedJson<'a> {
    body: String,
    bundle: &'a KeyBundle,
    payload: OnceCell<Option<EncryptedPayload>>,
    valid: OnceCell<bool>,
    cleartext: OnceCell<Option<Value>>,
}

impl<'a> EncryptedJson<'a> {
    pub fn new(body: &str, bundle: &'a KeyBundle) -> Self {
        Self {
            body: body.to_owned(),
            bundle,
            payload: OnceCell::new(),
            valid: OnceCell::new(),
            cleartext: OnceCell::new(),
        }
    }

    fn payload(&self) -> Option<&EncryptedPayload> {
        self.payload
            .get_or_init(|| EncryptedPayload::from_json_str(&self.body))
            .as_ref()
    }

    /// True when the payload parses and its HMAC matches the base64
    /// ciphertext under the bundle's HMAC key.
    pub fn is_valid(&self) -> bool {
        *self.valid.get_or_init(|| {
            let Some(payload) = self.payload() else {
                return false;
            };
            let Ok(expected) = hex::decode(&payload.hmac) else {
                return false;
            };
            self.bundle.verify(&expected, payload.ciphertext.as_bytes())
        })
    }

    /// The decrypted payload as a JSON value.
    ///
    /// Only meaningful after `is_valid`; returns `None` on HMAC
    /// mismatch, undecodable ciphertext or IV, decryption failure, or
    /// non-JSON plaintext.
    pub fn cleartext(&self) -> Option<&Value> {
        self.cleartext
            .get_or_init(|| {
                if !self.is_valid() {
                    return None;
                }
                let payload = self.payload()?;
                let ciphertext = BASE64.decode(&payload.ciphertext).ok()?;
                let iv = BASE64.decode(&payload.iv).ok()?;
                let mut plaintext = self.bundle.decrypt(&ciphertext, &iv).ok()?;
                let parsed = serde_json::from_str(&plaintext).ok();
                plaintext.zeroize();
                parsed
            })
            .as_ref()
    }
}
