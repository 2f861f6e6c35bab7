//! Symmetric key bundles for sync record cryptography.
//!
//! A bundle is a pair of 32-byte keys: one for AES-256-CBC encryption,
//! one for HMAC-SHA256 authentication. The master bundle is derived from
//! the account-level `kB` secret via HKDF-SHA256; per-collection bundles
//! are delivered inside an encrypted keys record.
//!
//! The HMAC is computed over the base64-encoded ciphertext, not the raw
//! ciphertext bytes. That convention is part of the wire protocol.
use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::crypto::envelope::{EncryptedJson, EncryptedPayload};
use crate::crypto::sensitive::SecretBytes;
use crate::error::{CoreError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// Key-wrapping namespace shared with the account server.
const KW_NAMESPACE: &str = "identity.mozilla.com/picl/v1/";

/// HKDF info string for a named key; `kw("oldsync")` yields the sync
/// key bundle info. The namespace and the empty salt are wire contract.
fn kw(name: &str) -> Vec<u8> {
    format!("{KW_NAMESPACE}{name}").into_bytes()
}

/// An encryption key and an HMAC key for one class of sync records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyBundle {
    enc_key: SecretBytes,
    hmac_key: SecretBytes,
}

impl KeyBundle {
    /// Build a bundle from explicit key bytes.
    pub fn new(enc_key: Vec<u8>, hmac_key: Vec<u8>) -> Self {
        Self {
            enc_key: SecretBytes::new(enc_key),
            hmac_key: SecretBytes::new(hmac_key),
        }
    }

    /// Derive the bundle from the 32-byte account master secret `kB`.
    ///
    /// HKDF-SHA256 with empty salt and info `identity.mozilla.com/picl/v1/oldsync`
    /// produces 64 bytes; the first half is the encryption key, the
    /// second half the HMAC key.
    pub fn from_master_key(kb: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, kb);
        let mut okm = [0u8; 2 * KEY_LEN];
        hkdf.expand(&kw("oldsync"), &mut okm)
            .expect("64 bytes is a valid HKDF-SHA256 output length");
        let bundle = Self::new(okm[..KEY_LEN].to_vec(), okm[KEY_LEN..].to_vec());
        okm.zeroize();
        bundle
    }

    /// Generate a fresh random bundle from the OS CSPRNG.
    pub fn random() -> Self {
        let mut enc_key = vec![0u8; KEY_LEN];
        let mut hmac_key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut enc_key);
        OsRng.fill_bytes(&mut hmac_key);
        Self::new(enc_key, hmac_key)
    }

    /// Decode a bundle from standard-base64 key strings.
    ///
    /// Malformed base64 yields the `invalid` sentinel bundle rather than
    /// an error; callers that need strict keys must check lengths
    /// themselves.
    pub fn from_base64(enc_key_b64: &str, hmac_key_b64: &str) -> Self {
        match (BASE64.decode(enc_key_b64), BASE64.decode(hmac_key_b64)) {
            (Ok(enc_key), Ok(hmac_key)) => Self::new(enc_key, hmac_key),
            _ => Self::invalid(),
        }
    }

    /// Sentinel bundle for error paths. Its keys decode from a bogus
    /// base64 string and can never decrypt or authenticate a valid
    /// record.
    pub fn invalid() -> Self {
        // "deadbeef" is valid base64 but decodes to six bytes, so AES
        // key setup always fails for this bundle.
        let bogus = BASE64.decode("deadbeef").unwrap_or_default();
        Self::new(bogus.clone(), bogus)
    }

    pub fn enc_key(&self) -> &[u8] {
        self.enc_key.as_bytes()
    }

    pub fn hmac_key(&self) -> &[u8] {
        self.hmac_key.as_bytes()
    }

    /// HMAC-SHA256 digest of `data` under the bundle's HMAC key.
    pub fn hmac(&self, data: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(self.hmac_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// The same digest as `hmac`, rendered as 64 lowercase hex characters.
    pub fn hmac_hex(&self, data: &[u8]) -> String {
        hex::encode(self.hmac(data))
    }

    /// Check an expected HMAC against the digest of the base64-encoded
    /// ciphertext. The comparison is constant-time.
    pub fn verify(&self, expected: &[u8], ciphertext_b64: &[u8]) -> bool {
        let digest = self.hmac(ciphertext_b64);
        expected.ct_eq(&digest).into()
    }

    /// AES-256-CBC encrypt with PKCS#7 padding. A random 16-byte IV is
    /// drawn when the caller does not supply one.
    ///
    /// The encryption key must be 32 bytes; anything else fails key
    /// setup and surfaces as `CryptoFailure`.
    pub fn encrypt(&self, cleartext: &[u8], iv: Option<&[u8; IV_LEN]>) -> Result<(Vec<u8>, [u8; IV_LEN])> {
        let iv = match iv {
            Some(iv) => *iv,
            None => {
                let mut iv = [0u8; IV_LEN];
                OsRng.fill_bytes(&mut iv);
                iv
            }
        };
        let cipher = Aes256CbcEnc::new_from_slices(self.enc_key.as_bytes(), &iv)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(cleartext);
        Ok((ciphertext, iv))
    }

    /// AES-256-CBC decrypt with PKCS#7 unpadding, returning the UTF-8
    /// plaintext.
    ///
    /// There is no integrity check here; callers verify the HMAC first.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> Result<String> {
        let cipher = Aes256CbcDec::new_from_slices(self.enc_key.as_bytes(), iv)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| {
            let mut rejected = e.into_bytes();
            rejected.zeroize();
            CoreError::InvalidUtf8
        })
    }

    /// Build a decryptor for payload envelopes encrypted under this
    /// bundle. The returned closure yields `None` on a malformed
    /// envelope, HMAC mismatch, decryption failure, or unparseable
    /// cleartext.
    pub fn factory<'a, T, F>(&'a self, parse: F) -> impl Fn(&str) -> Option<T> + 'a
    where
        F: Fn(&Value) -> Option<T> + 'a,
    {
        move |body: &str| {
            let envelope = EncryptedJson::new(body, self);
            if !envelope.is_valid() {
                return None;
            }
            let cleartext = envelope.cleartext()?;
            parse(cleartext)
        }
    }

    /// Encrypt a cleartext JSON value into a payload envelope, the
    /// outbound dual of `factory`. The HMAC covers the base64-encoded
    /// ciphertext.
    pub fn seal(&self, cleartext: &Value) -> Result<EncryptedPayload> {
        let mut body = serde_json::to_string(cleartext)
            .map_err(|e| CoreError::MalformedInput(e.to_string()))?;
        let result = self.encrypt(body.as_bytes(), None);
        body.zeroize();
        let (ciphertext, iv) = result?;
        let ciphertext_b64 = BASE64.encode(&ciphertext);
        let hmac = self.hmac_hex(ciphertext_b64.as_bytes());
        Ok(EncryptedPayload {
            ciphertext: ciphertext_b64,
            iv: BASE64.encode(iv),
            hmac,
        })
    }
}
