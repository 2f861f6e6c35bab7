//! Versioned dictionary persistence for account states.
//!
//! The schema is a flat JSON-compatible mapping: `version` (integer),
//! `label` (raw state label), then the label's fields. Byte fields are
//! lowercase hex, timestamps are signed epoch milliseconds, the key
//! pair is a nested object owned by the RSA utility. A record with an
//! unknown version or label, or with any declared field missing or
//! ill-typed, is rejected whole.
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::browserid::rsa::RsaBrowserIdKeyPair;
use crate::error::{CoreError, Result};
use crate::state::login::{
    labels, AccountState, CohabitingBeforeKeyPairState, EngagedAfterVerifiedState,
    EngagedBeforeVerifiedState, ReadyForKeysState,
};

pub const SCHEMA_VERSION: i64 = 1;

impl AccountState {
    /// Serialize to the versioned persistence dictionary.
    pub fn as_dictionary(&self) -> Result<Map<String, Value>> {
        let mut dict = Map::new();
        dict.insert("version".to_string(), json!(SCHEMA_VERSION));
        dict.insert("label".to_string(), json!(self.label()));
        match self {
            AccountState::EngagedBeforeVerified(state) => {
                put_hex(&mut dict, "sessionToken", &state.tokens.session_token);
                put_hex(&mut dict, "keyFetchToken", &state.tokens.key_fetch_token);
                put_hex(&mut dict, "unwrapkB", &state.tokens.unwrap_kb);
                dict.insert("knownUnverifiedAt".to_string(), json!(state.known_unverified_at));
                dict.insert(
                    "lastNotifiedUserAt".to_string(),
                    json!(state.last_notified_user_at),
                );
            }
            AccountState::EngagedAfterVerified(state) => {
                put_hex(&mut dict, "sessionToken", &state.tokens.session_token);
                put_hex(&mut dict, "keyFetchToken", &state.tokens.key_fetch_token);
                put_hex(&mut dict, "unwrapkB", &state.tokens.unwrap_kb);
            }
            AccountState::CohabitingBeforeKeyPair(state) => {
                put_hex(&mut dict, "sessionToken", &state.session_token);
                put_hex(&mut dict, "kA", &state.ka);
                put_hex(&mut dict, "kB", &state.kb);
            }
            AccountState::CohabitingAfterKeyPair(state) => {
                put_hex(&mut dict, "sessionToken", &state.token_and_keys.session_token);
                put_hex(&mut dict, "kA", &state.token_and_keys.ka);
                put_hex(&mut dict, "kB", &state.token_and_keys.kb);
                dict.insert("keyPair".to_string(), state.key_pair.to_json()?);
                dict.insert("keyPairExpiresAt".to_string(), json!(state.key_pair_expires_at));
            }
            AccountState::Married(state) => {
                let inner = &state.token_keys_and_key_pair;
                put_hex(&mut dict, "sessionToken", &inner.token_and_keys.session_token);
                put_hex(&mut dict, "kA", &inner.token_and_keys.ka);
                put_hex(&mut dict, "kB", &inner.token_and_keys.kb);
                dict.insert("keyPair".to_string(), inner.key_pair.to_json()?);
                dict.insert("keyPairExpiresAt".to_string(), json!(inner.key_pair_expires_at));
                dict.insert("certificate".to_string(), json!(state.certificate));
                dict.insert(
                    "certificateExpiresAt".to_string(),
                    json!(state.certificate_expires_at),
                );
            }
            AccountState::Separated | AccountState::Doghouse => {}
        }
        Ok(dict)
    }

    /// Parse a persistence dictionary back into a state.
    ///
    /// Unknown versions and labels, and partial field sets, all yield
    /// `None`; the caller treats that as "re-enter password".
    pub fn from_dictionary(dict: &Map<String, Value>) -> Option<AccountState> {
        let version = dict.get("version")?.as_i64()?;
        if version != SCHEMA_VERSION {
            debug!(version, "Rejecting persisted state with unknown schema version");
            return None;
        }
        let label = dict.get("label")?.as_str()?;
        match label {
            labels::ENGAGED_BEFORE_VERIFIED => {
                let tokens = ready_for_keys(dict)?;
                let known_unverified_at = ms_field(dict, "knownUnverifiedAt")?;
                let last_notified_user_at = ms_field(dict, "lastNotifiedUserAt")?;
                Some(AccountState::EngagedBeforeVerified(
                    EngagedBeforeVerifiedState::new(tokens, known_unverified_at, last_notified_user_at),
                ))
            }
            labels::ENGAGED_AFTER_VERIFIED => {
                let tokens = ready_for_keys(dict)?;
                Some(AccountState::EngagedAfterVerified(EngagedAfterVerifiedState::new(tokens)))
            }
            labels::COHABITING_BEFORE_KEY_PAIR => {
                Some(AccountState::CohabitingBeforeKeyPair(cohabitation(dict)?))
            }
            labels::COHABITING_AFTER_KEY_PAIR => {
                let key_pair = key_pair_field(dict, "keyPair")?;
                let key_pair_expires_at = ms_field(dict, "keyPairExpiresAt")?;
                Some(AccountState::CohabitingAfterKeyPair(
                    cohabitation(dict)?.with_key_pair(key_pair, key_pair_expires_at),
                ))
            }
            labels::MARRIED => {
                let key_pair = key_pair_field(dict, "keyPair")?;
                let key_pair_expires_at = ms_field(dict, "keyPairExpiresAt")?;
                let certificate = str_field(dict, "certificate")?;
                let certificate_expires_at = ms_field(dict, "certificateExpiresAt")?;
                Some(AccountState::Married(
                    cohabitation(dict)?
                        .with_key_pair(key_pair, key_pair_expires_at)
                        .with_certificate(certificate, certificate_expires_at),
                ))
            }
            labels::SEPARATED => Some(AccountState::Separated),
            labels::DOGHOUSE => Some(AccountState::Doghouse),
            _ => {
                debug!(label, "Rejecting persisted state with unknown label");
                None
            }
        }
    }

    /// Serialize to the JSON string form of the persistence dictionary.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(&Value::Object(self.as_dictionary()?))
            .map_err(|e| CoreError::MalformedInput(e.to_string()))
    }

    /// Parse a persisted state from its JSON string form, reporting the
    /// failure cause instead of collapsing it to `None`.
    pub fn from_json_str(body: &str) -> Result<AccountState> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| CoreError::MalformedInput(e.to_string()))?;
        let dict = value
            .as_object()
            .ok_or_else(|| CoreError::SchemaMismatch("persisted state is not an object".into()))?;
        Self::from_dictionary(dict).ok_or_else(|| {
            CoreError::SchemaMismatch("unknown version, unknown label, or missing fields".into())
        })
    }
}

fn ready_for_keys(dict: &Map<String, Value>) -> Option<ReadyForKeysState> {
    Some(ReadyForKeysState::new(
        hex_field(dict, "sessionToken")?,
        hex_field(dict, "keyFetchToken")?,
        hex_field(dict, "unwrapkB")?,
    ))
}

fn cohabitation(dict: &Map<String, Value>) -> Option<CohabitingBeforeKeyPairState> {
    Some(CohabitingBeforeKeyPairState::new(
        hex_field(dict, "sessionToken")?,
        hex_field(dict, "kA")?,
        hex_field(dict, "kB")?,
    ))
}

fn put_hex(dict: &mut Map<String, Value>, key: &str, bytes: &[u8]) {
    dict.insert(key.to_string(), json!(hex::encode(bytes)));
}

fn hex_field(dict: &Map<String, Value>, key: &str) -> Option<Vec<u8>> {
    hex::decode(dict.get(key)?.as_str()?).ok()
}

fn ms_field(dict: &Map<String, Value>, key: &str) -> Option<i64> {
    dict.get(key)?.as_i64()
}

fn str_field(dict: &Map<String, Value>, key: &str) -> Option<String> {
    Some(dict.get(key)?.as_str()?.to_owned())
}

fn key_pair_field(dict: &Map<String, Value>, key: &str) -> Option<RsaBrowserIdKeyPair> {
    RsaBrowserIdKeyPair::from_json(dict.get(key)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(state: &AccountState) -> Option<AccountState> {
        AccountState::from_dictionary(&state.as_dictionary().unwrap())
    }

    fn married_state() -> AccountState {
        let key_pair = RsaBrowserIdKeyPair::generate(1024).unwrap();
        AccountState::Married(
            CohabitingBeforeKeyPairState::new(vec![0x01; 32], vec![0x0A; 32], vec![0x0B; 32])
                .with_key_pair(key_pair, 2_000)
                .with_certificate("cert-blob".to_string(), 1_000),
        )
    }

    #[test]
    fn test_roundtrip_every_label() {
        let states = vec![
            AccountState::sign_in(vec![1; 32], vec![2; 32], vec![3; 32], false, 77),
            AccountState::sign_in(vec![1; 32], vec![2; 32], vec![3; 32], true, 77),
            AccountState::CohabitingBeforeKeyPair(CohabitingBeforeKeyPairState::new(
                vec![1; 32],
                vec![0xA; 32],
                vec![0xB; 32],
            )),
            AccountState::CohabitingAfterKeyPair(
                CohabitingBeforeKeyPairState::new(vec![1; 32], vec![0xA; 32], vec![0xB; 32])
                    .with_key_pair(RsaBrowserIdKeyPair::generate(1024).unwrap(), 5_000),
            ),
            married_state(),
            AccountState::Separated,
            AccountState::Doghouse,
        ];
        for state in states {
            assert_eq!(roundtrip(&state), Some(state));
        }
    }

    #[test]
    fn test_byte_fields_are_lowercase_hex() {
        let state = AccountState::sign_in(vec![0xAB; 4], vec![0xCD; 4], vec![0xEF; 4], true, 0);
        let dict = state.as_dictionary().unwrap();
        assert_eq!(dict["sessionToken"], "abababab");
        assert_eq!(dict["keyFetchToken"], "cdcdcdcd");
        assert_eq!(dict["unwrapkB"], "efefefef");
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut dict = Map::new();
        dict.insert("version".to_string(), json!(2));
        dict.insert("label".to_string(), json!("separated"));
        assert_eq!(AccountState::from_dictionary(&dict), None);
    }

    #[test]
    fn test_non_integer_version_rejected() {
        let mut dict = Map::new();
        dict.insert("version".to_string(), json!("1"));
        dict.insert("label".to_string(), json!("separated"));
        assert_eq!(AccountState::from_dictionary(&dict), None);
    }

    #[test]
    fn test_unknown_label_rejected() {
        let mut dict = Map::new();
        dict.insert("version".to_string(), json!(1));
        dict.insert("label".to_string(), json!("divorced"));
        assert_eq!(AccountState::from_dictionary(&dict), None);
    }

    #[test]
    fn test_missing_field_rejects_whole_record() {
        let state = AccountState::sign_in(vec![1; 32], vec![2; 32], vec![3; 32], false, 77);
        let mut dict = state.as_dictionary().unwrap();
        dict.remove("lastNotifiedUserAt");
        assert_eq!(AccountState::from_dictionary(&dict), None);
    }

    #[test]
    fn test_ill_typed_field_rejects_whole_record() {
        let state = AccountState::sign_in(vec![1; 32], vec![2; 32], vec![3; 32], true, 77);
        let mut dict = state.as_dictionary().unwrap();
        dict.insert("sessionToken".to_string(), json!("not hex!"));
        assert_eq!(AccountState::from_dictionary(&dict), None);

        let mut dict = state.as_dictionary().unwrap();
        dict.insert("sessionToken".to_string(), json!(42));
        assert_eq!(AccountState::from_dictionary(&dict), None);
    }

    #[test]
    fn test_married_missing_certificate_rejected() {
        let mut dict = married_state().as_dictionary().unwrap();
        dict.remove("certificate");
        assert_eq!(AccountState::from_dictionary(&dict), None);
    }

    #[test]
    fn test_married_corrupt_key_pair_rejected() {
        let mut dict = married_state().as_dictionary().unwrap();
        dict.insert("keyPair".to_string(), json!({"algorithm": "RS"}));
        assert_eq!(AccountState::from_dictionary(&dict), None);
    }

    #[test]
    fn test_bare_labels_need_only_version_and_label() {
        for label in ["separated", "doghouse"] {
            let mut dict = Map::new();
            dict.insert("version".to_string(), json!(1));
            dict.insert("label".to_string(), json!(label));
            let state = AccountState::from_dictionary(&dict).unwrap();
            assert_eq!(state.label(), label);
        }
    }

    #[test]
    fn test_json_string_roundtrip() {
        let state = AccountState::sign_in(vec![1; 32], vec![2; 32], vec![3; 32], false, 77);
        let body = state.to_json_string().unwrap();
        assert_eq!(AccountState::from_json_str(&body).unwrap(), state);
    }

    #[test]
    fn test_from_json_str_reports_causes() {
        assert!(matches!(
            AccountState::from_json_str("not json"),
            Err(CoreError::MalformedInput(_))
        ));
        assert!(matches!(
            AccountState::from_json_str("[1, 2]"),
            Err(CoreError::SchemaMismatch(_))
        ));
        assert!(matches!(
            AccountState::from_json_str("{\"version\": 2, \"label\": \"separated\"}"),
            Err(CoreError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_married_expiry_survives_roundtrip() {
        let AccountState::Married(married) = married_state() else {
            panic!("expected married");
        };
        let dict = AccountState::Married(married.clone()).as_dictionary().unwrap();
        let AccountState::Married(restored) = AccountState::from_dictionary(&dict).unwrap() else {
            panic!("expected married");
        };
        assert!(restored.is_certificate_expired(1_001));
        assert!(!restored.is_certificate_expired(999));
        assert_eq!(restored.key_pair(), married.key_pair());
    }
}
