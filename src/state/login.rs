//! Login lifecycle of a signed-in account.
//!
//! A signed-in account is always in exactly one of seven states, named
//! for how much material the client has gathered: engaged (tokens but
//! no account keys), cohabiting (account keys but no usable identity
//! material), married (able to produce assertions), plus the two
//! recovery states separated (password required) and doghouse (client
//! upgrade required).
//!
//! States are immutable values; every transition produces a new state.
//! Forward transitions add material, the explicit backward transitions
//! (`without_key_pair`, `without_certificate`) and the recovery
//! transitions drop it.
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::browserid::jwt;
use crate::browserid::rsa::RsaBrowserIdKeyPair;
use crate::error::Result;

/// How long a freshly generated key pair stays usable.
pub const KEY_PAIR_DURATION_MS: i64 = 30 * 24 * 3600 * 1000;

/// How long a signed certificate stays usable.
pub const CERTIFICATE_DURATION_MS: i64 = 24 * 3600 * 1000;

/// Raw state labels, shared with the persistence schema.
pub(crate) mod labels {
    pub const ENGAGED_BEFORE_VERIFIED: &str = "engagedBeforeVerified";
    pub const ENGAGED_AFTER_VERIFIED: &str = "engagedAfterVerified";
    pub const COHABITING_BEFORE_KEY_PAIR: &str = "cohabitingBeforeKeyPair";
    pub const COHABITING_AFTER_KEY_PAIR: &str = "cohabitingAfterKeyPair";
    pub const MARRIED: &str = "married";
    pub const SEPARATED: &str = "separated";
    pub const DOGHOUSE: &str = "doghouse";
}

/// The next thing the surrounding application must obtain from the user
/// (or the server) before sync can proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionNeeded {
    None,
    NeedsVerification,
    NeedsPassword,
    NeedsUpgrade,
}

/// Token material held while waiting to fetch the account keys.
#[derive(Clone, Debug, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct ReadyForKeysState {
    pub(crate) session_token: Vec<u8>,
    pub(crate) key_fetch_token: Vec<u8>,
    pub(crate) unwrap_kb: Vec<u8>,
}

impl ReadyForKeysState {
    pub fn new(session_token: Vec<u8>, key_fetch_token: Vec<u8>, unwrap_kb: Vec<u8>) -> Self {
        Self {
            session_token,
            key_fetch_token,
            unwrap_kb,
        }
    }

    fn replace_unwrap_kb(&mut self, unwrap_kb: Vec<u8>) {
        self.unwrap_kb.zeroize();
        self.unwrap_kb = unwrap_kb;
    }
}

/// Signed in, keys not yet fetched, account e-mail not yet verified.
#[derive(Clone, Debug, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct EngagedBeforeVerifiedState {
    pub(crate) tokens: ReadyForKeysState,
    pub(crate) known_unverified_at: i64,
    pub(crate) last_notified_user_at: i64,
}

impl EngagedBeforeVerifiedState {
    pub fn new(tokens: ReadyForKeysState, known_unverified_at: i64, last_notified_user_at: i64) -> Self {
        Self {
            tokens,
            known_unverified_at,
            last_notified_user_at,
        }
    }

    pub fn session_token(&self) -> &[u8] {
        &self.tokens.session_token
    }

    pub fn key_fetch_token(&self) -> &[u8] {
        &self.tokens.key_fetch_token
    }

    pub fn unwrap_kb(&self) -> &[u8] {
        &self.tokens.unwrap_kb
    }

    pub fn known_unverified_at(&self) -> i64 {
        self.known_unverified_at
    }

    pub fn last_notified_user_at(&self) -> i64 {
        self.last_notified_user_at
    }

    /// The account's e-mail has been observed verified; the tokens carry
    /// over unchanged.
    pub fn verified(self) -> EngagedAfterVerifiedState {
        EngagedAfterVerifiedState::new(self.tokens.clone())
    }

    /// Replace the unwrap key in place, e.g. after a password change
    /// observed before verification.
    pub fn with_unwrap_key(mut self, unwrap_kb: Vec<u8>) -> Self {
        self.tokens.replace_unwrap_kb(unwrap_kb);
        self
    }
}

/// Signed in and verified, keys not yet fetched.
#[derive(Clone, Debug, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct EngagedAfterVerifiedState {
    pub(crate) tokens: ReadyForKeysState,
}

impl EngagedAfterVerifiedState {
    pub fn new(tokens: ReadyForKeysState) -> Self {
        Self { tokens }
    }

    pub fn session_token(&self) -> &[u8] {
        &self.tokens.session_token
    }

    pub fn key_fetch_token(&self) -> &[u8] {
        &self.tokens.key_fetch_token
    }

    pub fn unwrap_kb(&self) -> &[u8] {
        &self.tokens.unwrap_kb
    }

    /// Account keys fetched and unwrapped; the key-fetch token and
    /// unwrap key are dropped.
    pub fn with_keys(self, ka: Vec<u8>, kb: Vec<u8>) -> CohabitingBeforeKeyPairState {
        CohabitingBeforeKeyPairState::new(self.tokens.session_token.clone(), ka, kb)
    }

    pub fn with_unwrap_key(mut self, unwrap_kb: Vec<u8>) -> Self {
        self.tokens.replace_unwrap_kb(unwrap_kb);
        self
    }
}

/// Account keys in hand, no identity key pair yet.
#[derive(Clone, Debug, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct CohabitingBeforeKeyPairState {
    pub(crate) session_token: Vec<u8>,
    pub(crate) ka: Vec<u8>,
    pub(crate) kb: Vec<u8>,
}

impl CohabitingBeforeKeyPairState {
    pub fn new(session_token: Vec<u8>, ka: Vec<u8>, kb: Vec<u8>) -> Self {
        Self {
            session_token,
            ka,
            kb,
        }
    }

    pub fn session_token(&self) -> &[u8] {
        &self.session_token
    }

    pub fn ka(&self) -> &[u8] {
        &self.ka
    }

    pub fn kb(&self) -> &[u8] {
        &self.kb
    }

    /// A key pair has been generated; `key_pair_expires_at` is absolute
    /// epoch milliseconds.
    pub fn with_key_pair(
        self,
        key_pair: RsaBrowserIdKeyPair,
        key_pair_expires_at: i64,
    ) -> CohabitingAfterKeyPairState {
        CohabitingAfterKeyPairState {
            token_and_keys: self,
            key_pair,
            key_pair_expires_at,
        }
    }
}

/// Account keys and a key pair, certificate not yet signed.
#[derive(Clone, Debug, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct CohabitingAfterKeyPairState {
    pub(crate) token_and_keys: CohabitingBeforeKeyPairState,
    #[zeroize(skip)]
    pub(crate) key_pair: RsaBrowserIdKeyPair,
    pub(crate) key_pair_expires_at: i64,
}

impl CohabitingAfterKeyPairState {
    pub fn session_token(&self) -> &[u8] {
        &self.token_and_keys.session_token
    }

    pub fn ka(&self) -> &[u8] {
        &self.token_and_keys.ka
    }

    pub fn kb(&self) -> &[u8] {
        &self.token_and_keys.kb
    }

    pub fn key_pair(&self) -> &RsaBrowserIdKeyPair {
        &self.key_pair
    }

    pub fn key_pair_expires_at(&self) -> i64 {
        self.key_pair_expires_at
    }

    pub fn is_key_pair_expired(&self, now: i64) -> bool {
        now > self.key_pair_expires_at
    }

    /// The server signed our public key; `certificate_expires_at` is
    /// absolute epoch milliseconds.
    pub fn with_certificate(self, certificate: String, certificate_expires_at: i64) -> MarriedState {
        MarriedState {
            token_keys_and_key_pair: self,
            certificate,
            certificate_expires_at,
        }
    }

    /// Discard the key pair, e.g. once it has expired.
    pub fn without_key_pair(self) -> CohabitingBeforeKeyPairState {
        self.token_and_keys.clone()
    }
}

/// Fully provisioned: able to sign assertions until the certificate or
/// key pair expires.
#[derive(Clone, Debug, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct MarriedState {
    pub(crate) token_keys_and_key_pair: CohabitingAfterKeyPairState,
    pub(crate) certificate: String,
    pub(crate) certificate_expires_at: i64,
}

impl MarriedState {
    pub fn session_token(&self) -> &[u8] {
        self.token_keys_and_key_pair.session_token()
    }

    pub fn ka(&self) -> &[u8] {
        self.token_keys_and_key_pair.ka()
    }

    pub fn kb(&self) -> &[u8] {
        self.token_keys_and_key_pair.kb()
    }

    pub fn key_pair(&self) -> &RsaBrowserIdKeyPair {
        self.token_keys_and_key_pair.key_pair()
    }

    pub fn key_pair_expires_at(&self) -> i64 {
        self.token_keys_and_key_pair.key_pair_expires_at
    }

    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    pub fn certificate_expires_at(&self) -> i64 {
        self.certificate_expires_at
    }

    pub fn is_key_pair_expired(&self, now: i64) -> bool {
        self.token_keys_and_key_pair.is_key_pair_expired(now)
    }

    pub fn is_certificate_expired(&self, now: i64) -> bool {
        now > self.certificate_expires_at
    }

    /// Drop the expired certificate, keeping the key pair.
    pub fn without_certificate(self) -> CohabitingAfterKeyPairState {
        info!("Certificate dropped; back to cohabiting with key pair");
        self.token_keys_and_key_pair.clone()
    }

    /// Drop both the key pair and the certificate.
    pub fn without_key_pair(self) -> CohabitingBeforeKeyPairState {
        info!("Key pair and certificate dropped; back to cohabiting");
        self.token_keys_and_key_pair.token_and_keys.clone()
    }

    /// Sign a BrowserID assertion for `audience`; `now` is epoch
    /// milliseconds.
    pub fn generate_assertion(&self, audience: &str, now: i64) -> Result<String> {
        jwt::create_assertion(self.key_pair(), &self.certificate, audience, now)
    }
}

/// The closed set of login states.
#[derive(Clone, Debug, PartialEq)]
pub enum AccountState {
    EngagedBeforeVerified(EngagedBeforeVerifiedState),
    EngagedAfterVerified(EngagedAfterVerifiedState),
    CohabitingBeforeKeyPair(CohabitingBeforeKeyPairState),
    CohabitingAfterKeyPair(CohabitingAfterKeyPairState),
    Married(MarriedState),
    Separated,
    Doghouse,
}

impl AccountState {
    /// Entry transition after a successful password sign-in. `verified`
    /// is the server's word on the account e-mail; an unverified account
    /// is stamped with `now` for both notification timestamps.
    pub fn sign_in(
        session_token: Vec<u8>,
        key_fetch_token: Vec<u8>,
        unwrap_kb: Vec<u8>,
        verified: bool,
        now: i64,
    ) -> AccountState {
        let tokens = ReadyForKeysState::new(session_token, key_fetch_token, unwrap_kb);
        if verified {
            info!("Signed in to a verified account");
            AccountState::EngagedAfterVerified(EngagedAfterVerifiedState::new(tokens))
        } else {
            info!("Signed in to an unverified account");
            AccountState::EngagedBeforeVerified(EngagedBeforeVerifiedState::new(tokens, now, now))
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AccountState::EngagedBeforeVerified(_) => labels::ENGAGED_BEFORE_VERIFIED,
            AccountState::EngagedAfterVerified(_) => labels::ENGAGED_AFTER_VERIFIED,
            AccountState::CohabitingBeforeKeyPair(_) => labels::COHABITING_BEFORE_KEY_PAIR,
            AccountState::CohabitingAfterKeyPair(_) => labels::COHABITING_AFTER_KEY_PAIR,
            AccountState::Married(_) => labels::MARRIED,
            AccountState::Separated => labels::SEPARATED,
            AccountState::Doghouse => labels::DOGHOUSE,
        }
    }

    /// The next required user action, a pure function of the label.
    pub fn action_needed(&self) -> ActionNeeded {
        match self {
            AccountState::EngagedBeforeVerified(_) => ActionNeeded::NeedsVerification,
            AccountState::EngagedAfterVerified(_)
            | AccountState::CohabitingBeforeKeyPair(_)
            | AccountState::CohabitingAfterKeyPair(_)
            | AccountState::Married(_) => ActionNeeded::None,
            AccountState::Separated => ActionNeeded::NeedsPassword,
            AccountState::Doghouse => ActionNeeded::NeedsUpgrade,
        }
    }

    /// The session token, when the state holds one.
    pub fn session_token(&self) -> Option<&[u8]> {
        match self {
            AccountState::EngagedBeforeVerified(state) => Some(state.session_token()),
            AccountState::EngagedAfterVerified(state) => Some(state.session_token()),
            AccountState::CohabitingBeforeKeyPair(state) => Some(state.session_token()),
            AccountState::CohabitingAfterKeyPair(state) => Some(state.session_token()),
            AccountState::Married(state) => Some(state.session_token()),
            AccountState::Separated | AccountState::Doghouse => None,
        }
    }

    /// The session no longer authenticates; all material is dropped and
    /// the user must re-enter their password.
    pub fn into_separated(self) -> AccountState {
        info!(from = self.label(), "Session rejected; account separated");
        AccountState::Separated
    }

    /// The server no longer supports this client version.
    pub fn into_doghouse(self) -> AccountState {
        info!(from = self.label(), "Client unsupported; account in the doghouse");
        AccountState::Doghouse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> ReadyForKeysState {
        ReadyForKeysState::new(vec![0x01; 32], vec![0x02; 32], vec![0x03; 32])
    }

    fn married() -> MarriedState {
        let key_pair = RsaBrowserIdKeyPair::generate(1024).unwrap();
        CohabitingBeforeKeyPairState::new(vec![0x01; 32], vec![0x0A; 32], vec![0x0B; 32])
            .with_key_pair(key_pair, 2_000)
            .with_certificate("cert-blob".to_string(), 1_000)
    }

    #[test]
    fn test_action_needed_per_state() {
        let before = AccountState::EngagedBeforeVerified(EngagedBeforeVerifiedState::new(tokens(), 5, 5));
        let after = AccountState::EngagedAfterVerified(EngagedAfterVerifiedState::new(tokens()));
        assert_eq!(before.action_needed(), ActionNeeded::NeedsVerification);
        assert_eq!(after.action_needed(), ActionNeeded::None);
        assert_eq!(AccountState::Separated.action_needed(), ActionNeeded::NeedsPassword);
        assert_eq!(AccountState::Doghouse.action_needed(), ActionNeeded::NeedsUpgrade);
        assert_eq!(AccountState::Married(married()).action_needed(), ActionNeeded::None);
    }

    #[test]
    fn test_sign_in_selects_engaged_variant() {
        let verified = AccountState::sign_in(vec![1], vec![2], vec![3], true, 99);
        assert_eq!(verified.label(), labels::ENGAGED_AFTER_VERIFIED);

        let unverified = AccountState::sign_in(vec![1], vec![2], vec![3], false, 99);
        let AccountState::EngagedBeforeVerified(state) = unverified else {
            panic!("expected engagedBeforeVerified");
        };
        assert_eq!(state.known_unverified_at(), 99);
        assert_eq!(state.last_notified_user_at(), 99);
    }

    #[test]
    fn test_verified_preserves_tokens() {
        let before = EngagedBeforeVerifiedState::new(tokens(), 5, 6);
        let after = before.verified();
        assert_eq!(after.session_token(), &[0x01; 32]);
        assert_eq!(after.key_fetch_token(), &[0x02; 32]);
        assert_eq!(after.unwrap_kb(), &[0x03; 32]);
    }

    #[test]
    fn test_with_unwrap_key_replaces_in_place() {
        let state = EngagedAfterVerifiedState::new(tokens()).with_unwrap_key(vec![0x0F; 32]);
        assert_eq!(state.unwrap_kb(), &[0x0F; 32]);
        assert_eq!(state.session_token(), &[0x01; 32]);

        let state = EngagedBeforeVerifiedState::new(tokens(), 5, 6).with_unwrap_key(vec![0x0E; 32]);
        assert_eq!(state.unwrap_kb(), &[0x0E; 32]);
        assert_eq!(state.known_unverified_at(), 5);
    }

    #[test]
    fn test_with_keys_drops_fetch_material() {
        let state = EngagedAfterVerifiedState::new(tokens()).with_keys(vec![0x0A; 32], vec![0x0B; 32]);
        assert_eq!(state.session_token(), &[0x01; 32]);
        assert_eq!(state.ka(), &[0x0A; 32]);
        assert_eq!(state.kb(), &[0x0B; 32]);
    }

    #[test]
    fn test_certificate_expiry_and_backward_transition() {
        let married = married();
        assert!(!married.is_certificate_expired(1_000));
        assert!(married.is_certificate_expired(1_001));

        let key_pair = married.key_pair().clone();
        let cohabiting = married.without_certificate();
        assert_eq!(cohabiting.key_pair(), &key_pair);
        assert_eq!(cohabiting.key_pair_expires_at(), 2_000);
    }

    #[test]
    fn test_key_pair_expiry_drops_everything_identity() {
        let married = married();
        assert!(!married.is_key_pair_expired(2_000));
        assert!(married.is_key_pair_expired(2_001));

        let cohabiting = married.without_key_pair();
        assert_eq!(cohabiting.session_token(), &[0x01; 32]);
        assert_eq!(cohabiting.ka(), &[0x0A; 32]);
        assert_eq!(cohabiting.kb(), &[0x0B; 32]);
    }

    #[test]
    fn test_any_state_separates() {
        assert_eq!(
            AccountState::Married(married()).into_separated(),
            AccountState::Separated
        );
        assert_eq!(
            AccountState::sign_in(vec![1], vec![2], vec![3], true, 0).into_separated(),
            AccountState::Separated
        );
        assert_eq!(AccountState::Separated.into_separated(), AccountState::Separated);
    }

    #[test]
    fn test_any_state_enters_doghouse() {
        assert_eq!(
            AccountState::Married(married()).into_doghouse(),
            AccountState::Doghouse
        );
        assert_eq!(AccountState::Doghouse.into_doghouse(), AccountState::Doghouse);
    }

    #[test]
    fn test_married_generates_assertion() {
        let married = married();
        let assertion = married.generate_assertion("https://token.server", 500).unwrap();
        assert!(assertion.starts_with("cert-blob~"));
        assert_eq!(assertion.matches('.').count(), 2);
    }

    #[test]
    fn test_session_token_access_across_states() {
        assert!(AccountState::Separated.session_token().is_none());
        assert_eq!(
            AccountState::Married(married()).session_token(),
            Some(&[0x01u8; 32][..])
        );
    }
}
