//! Account state machine.
//!
//! Tracks a signed-in account through the login lifecycle and persists
//! it across restarts:
//! - Seven labelled states with typed transitions (`login`)
//! - Versioned dictionary serialization (`persist`)
pub mod login;
pub mod persist;

pub use login::{
    AccountState, ActionNeeded, CohabitingAfterKeyPairState, CohabitingBeforeKeyPairState,
    EngagedAfterVerifiedState, EngagedBeforeVerifiedState, MarriedState, ReadyForKeysState,
};
pub use persist::SCHEMA_VERSION;
