pub mod browserid;
pub mod crypto;
pub mod error;
pub mod state;
pub mod util;

pub use crypto::bundle::KeyBundle;
pub use crypto::envelope::{EncryptedJson, EncryptedPayload, SyncEnvelope};
pub use crypto::keys::Keys;
pub use error::{CoreError, Result};
pub use state::login::{AccountState, ActionNeeded};
