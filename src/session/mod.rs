//! Verification Session Lifecycle
//!
//! Ephemeral, in-memory session state: the guarded store every transition
//! commits through, the per-session message trail, and the sweeper that
//! expires abandoned sessions. Nothing here is persisted; a restart drops
//! in-flight verifications and affected members re-enter through a fresh
//! join or entry command.

pub mod store;
pub mod sweeper;
pub mod trail;

pub use store::{
    now_unix, BeginOutcome, SessionState, SessionStore, VerificationSession, PENDING_STATES,
};
pub use sweeper::TimeoutSweeper;
pub use trail::{delete_trail, MessageTrail, TrailEntry};
