//! End-to-end flow: derive the master bundle from kB, seal a keys
//! record under it, rebuild the registry, and decrypt a collection
//! record through the registry's factory.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use fxa_core::crypto::bundle::KeyBundle;
use fxa_core::crypto::envelope::SyncEnvelope;
use fxa_core::crypto::keys::Keys;
use serde_json::{json, Value};

fn pair_json(bundle: &KeyBundle) -> Value {
    json!([BASE64.encode(bundle.enc_key()), BASE64.encode(bundle.hmac_key())])
}

fn parse_title(v: &Value) -> Option<String> {
    v.get("title")?.as_str().map(String::from)
}

#[test]
fn master_key_to_collection_record_decrypt() {
    let kb = [0x5Au8; 32];
    let master = KeyBundle::from_master_key(&kb);
    let default = KeyBundle::random();
    let bookmarks = KeyBundle::random();

    // The keys record as the server would store it.
    let keys_cleartext = json!({
        "id": "keys",
        "collection": "crypto",
        "default": pair_json(&default),
        "collections": { "bookmarks": pair_json(&bookmarks) },
    });
    let keys_payload = master.seal(&keys_cleartext).unwrap();
    let keys_envelope = SyncEnvelope {
        id: "keys".to_string(),
        collection: Some("crypto".to_string()),
        payload: serde_json::to_string(&keys_payload).unwrap(),
        modified: Some(1_700_000_000.12),
    };
    let wire = serde_json::to_string(&keys_envelope).unwrap();

    // Client side: parse the envelope and rebuild the registry.
    let downloaded = SyncEnvelope::from_json_str(&wire).unwrap();
    let keys = Keys::from_keys_record(&master, &downloaded.payload);
    assert!(keys.is_valid());
    assert_eq!(keys.for_collection("bookmarks"), &bookmarks);
    assert_eq!(keys.for_collection("history"), &default);

    // A bookmarks record sealed under the collection bundle.
    let record_payload = bookmarks
        .seal(&json!({"id": "rec1", "title": "example"}))
        .unwrap();
    let record_envelope = SyncEnvelope {
        id: "rec1".to_string(),
        collection: Some("bookmarks".to_string()),
        payload: serde_json::to_string(&record_payload).unwrap(),
        modified: None,
    };
    let record_wire = serde_json::to_string(&record_envelope).unwrap();
    let record = SyncEnvelope::from_json_str(&record_wire).unwrap();

    let decrypt = keys.factory("bookmarks", parse_title);
    assert_eq!(decrypt(&record.payload), Some("example".to_string()));

    // The default bundle must not authenticate the bookmarks record.
    let decrypt_with_default = keys.factory("history", parse_title);
    assert_eq!(decrypt_with_default(&record.payload), None);
}

#[test]
fn rederived_master_bundle_reads_old_records() {
    let kb = [0xC3u8; 32];
    let sealed = KeyBundle::from_master_key(&kb)
        .seal(&json!({"title": "persisted"}))
        .unwrap();
    let body = serde_json::to_string(&sealed).unwrap();

    // A later session re-derives the same bundle from the same kB.
    let rederived = KeyBundle::from_master_key(&kb);
    let decrypt = rederived.factory(parse_title);
    assert_eq!(decrypt(&body), Some("persisted".to_string()));
}
