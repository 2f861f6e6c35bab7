//! RSA key pairs for BrowserID certification.
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use zeroize::Zeroize;

use crate::error::{CoreError, Result};

/// Modulus size the certification server expects.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// An RSA key pair with a JSON representation suitable for state
/// persistence and a private-key handle for assertion signing.
#[derive(Clone)]
pub struct RsaBrowserIdKeyPair {
    private: RsaPrivateKey,
}

impl RsaBrowserIdKeyPair {
    /// Generate a fresh key pair from the OS CSPRNG.
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        Ok(Self { private })
    }

    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        Self { private }
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// JSON representation: `{"algorithm": "RS", "privateKey": "<base64 PKCS#8 DER>"}`.
    pub fn to_json(&self) -> Result<Value> {
        let der = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        Ok(json!({
            "algorithm": "RS",
            "privateKey": BASE64.encode(der.as_bytes()),
        }))
    }

    /// Rebuild a key pair from its JSON representation; any other shape
    /// yields `None`.
    pub fn from_json(json: &Value) -> Option<Self> {
        if json.get("algorithm")?.as_str()? != "RS" {
            return None;
        }
        let mut der = BASE64.decode(json.get("privateKey")?.as_str()?).ok()?;
        let private = RsaPrivateKey::from_pkcs8_der(&der).ok();
        der.zeroize();
        private.map(|private| Self { private })
    }
}

impl PartialEq for RsaBrowserIdKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.private.n() == other.private.n()
            && self.private.e() == other.private.e()
            && self.private.d() == other.private.d()
    }
}

impl Eq for RsaBrowserIdKeyPair {}

impl fmt::Debug for RsaBrowserIdKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaBrowserIdKeyPair")
            .field("private", &"[REDACTED]")
            .finish()
    }
}
