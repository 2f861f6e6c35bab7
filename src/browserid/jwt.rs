//! BrowserID assertion construction.
//!
//! An assertion is the server-issued certificate joined with a short-
//! lived RS256 JWT signed by the certified key pair:
//! `certificate ~ header.payload.signature`, each JWT segment
//! base64url-encoded without padding.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use serde::Serialize;
use sha2::Sha256;

use crate::browserid::rsa::RsaBrowserIdKeyPair;
use crate::error::{CoreError, Result};

/// Assertions outlive their issuing call by a few minutes only.
pub const ASSERTION_DURATION_MS: i64 = 15 * 60 * 1000;

/// Self-issued assertions carry a fixed local issuer.
const ASSERTION_ISSUER: &str = "127.0.0.1";

#[derive(Serialize)]
struct AssertionClaims<'a> {
    aud: &'a str,
    iss: &'a str,
    exp: i64,
    iat: i64,
}

/// Sign an assertion for `audience` with the key pair's private key,
/// attaching `certificate`. Timestamps are epoch milliseconds.
pub fn create_assertion(
    key_pair: &RsaBrowserIdKeyPair,
    certificate: &str,
    audience: &str,
    now: i64,
) -> Result<String> {
    let claims = AssertionClaims {
        aud: audience,
        iss: ASSERTION_ISSUER,
        exp: now + ASSERTION_DURATION_MS,
        iat: now,
    };
    let header = URL_SAFE_NO_PAD.encode("{\"alg\":\"RS256\"}");
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_string(&claims).map_err(|e| CoreError::MalformedInput(e.to_string()))?,
    );
    let signing_input = format!("{header}.{payload}");

    let signing_key = SigningKey::<Sha256>::new(key_pair.private_key().clone());
    let signature = signing_key
        .try_sign(signing_input.as_bytes())
        .map_err(|e| CoreError::CryptoFailure(format!("Assertion signing failed: {e}")))?;

    let token = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()));
    Ok(format!("{certificate}~{token}"))
}
