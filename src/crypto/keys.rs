//! Key bundle registry built from the downloaded keys record.
//!
//! The keys record's cleartext holds a default bundle plus optional
//! per-collection bundles. Lookups for a collection without its own
//! bundle fall back to the default.
use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::crypto::bundle::KeyBundle;

/// Cleartext of a decrypted keys record.
///
/// Shape: `{ "default": [encB64, hmacB64], "collections": { name: [encB64, hmacB64] } }`.
pub struct KeysPayload {
    json: Value,
}

impl KeysPayload {
    /// Wrap a decrypted cleartext object. Non-object cleartext is not a
    /// keys payload at all.
    pub fn new(json: &Value) -> Option<Self> {
        json.is_object().then(|| Self { json: json.clone() })
    }

    /// A payload is valid when its default key pair is present and both
    /// halves decode.
    pub fn is_valid(&self) -> bool {
        self.default_keys().is_some()
    }

    pub fn default_keys(&self) -> Option<KeyBundle> {
        bundle_from_pair(self.json.get("default")?)
    }

    /// Per-collection bundles; entries that fail to decode are skipped.
    pub fn collection_keys(&self) -> HashMap<String, KeyBundle> {
        let mut bundles = HashMap::new();
        if let Some(collections) = self.json.get("collections").and_then(Value::as_object) {
            for (collection, pair) in collections {
                match bundle_from_pair(pair) {
                    Some(bundle) => {
                        bundles.insert(collection.clone(), bundle);
                    }
                    None => warn!(%collection, "Skipping undecodable collection key pair"),
                }
            }
        }
        bundles
    }
}

fn bundle_from_pair(pair: &Value) -> Option<KeyBundle> {
    let pair = pair.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    let enc_b64 = pair[0].as_str()?;
    let hmac_b64 = pair[1].as_str()?;
    let bundle = KeyBundle::from_base64(enc_b64, hmac_b64);
    (bundle != KeyBundle::invalid()).then_some(bundle)
}

/// The bundles in effect for every sync collection.
pub struct Keys {
    valid: bool,
    default_bundle: KeyBundle,
    collection_keys: HashMap<String, KeyBundle>,
}

impl Keys {
    /// A registry that encrypts everything under one default bundle.
    pub fn new(default_bundle: KeyBundle) -> Self {
        Self {
            valid: true,
            default_bundle,
            collection_keys: HashMap::new(),
        }
    }

    /// Rebuild the registry from a downloaded keys record payload,
    /// decrypted with the master bundle.
    ///
    /// A record that does not decrypt at all yields `valid == true` with
    /// the invalid sentinel as default; only a decrypted payload whose
    /// default keys are unusable yields `valid == false`.
    pub fn from_keys_record(master: &KeyBundle, payload_body: &str) -> Self {
        let parse = master.factory(KeysPayload::new);
        match parse(payload_body) {
            None => {
                warn!("Keys record failed to decrypt; registry falls back to the invalid bundle");
                Self {
                    valid: true,
                    default_bundle: KeyBundle::invalid(),
                    collection_keys: HashMap::new(),
                }
            }
            Some(payload) => match payload.default_keys() {
                Some(default_bundle) => Self {
                    valid: true,
                    default_bundle,
                    collection_keys: payload.collection_keys(),
                },
                None => {
                    warn!("Keys record payload has no usable default key pair");
                    Self {
                        valid: false,
                        default_bundle: KeyBundle::invalid(),
                        collection_keys: HashMap::new(),
                    }
                }
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn default_bundle(&self) -> &KeyBundle {
        &self.default_bundle
    }

    /// The bundle for a collection, falling back to the default when the
    /// collection has no bundle of its own.
    pub fn for_collection(&self, collection: &str) -> &KeyBundle {
        self.collection_keys
            .get(collection)
            .unwrap_or(&self.default_bundle)
    }

    /// A payload decryptor bound to the collection's bundle.
    pub fn factory<'a, T, F>(&'a self, collection: &str, parse: F) -> impl Fn(&str) -> Option<T> + 'a
    where
        F: Fn(&Value) -> Option<T> + 'a,
    {
        self.for_collection(collection).factory(parse)
    }
}
