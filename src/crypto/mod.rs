//! Record cryptography for the sync protocol.
//!
//! Key material flows one way: the account master secret `kB` derives
//! the master `KeyBundle` (HKDF-SHA256), the master bundle decrypts the
//! keys record, and the resulting `Keys` registry hands out per-
//! collection bundles for record encryption and decryption.
pub mod bundle;
pub mod envelope;
pub mod keys;
pub mod sensitive;

pub use bundle::KeyBundle;
pub use envelope::{EncryptedJson, EncryptedPayload, SyncEnvelope};
pub use keys::{Keys, KeysPayload};
