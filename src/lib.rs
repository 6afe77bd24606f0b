//! Shared presence for two friends: who is in the shared space, and whether
//! both are holding the surface at once.

pub mod args;
pub mod blend;
pub mod client;
pub mod config;
pub mod documents;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod presence;
pub mod presence_message;
pub mod reconciler;
pub mod remote;
pub mod server;
pub mod session;
pub mod state;
pub mod store;
pub mod touch;
pub mod writer;

pub use error::{PresenceError, Result};
pub use lifecycle::PresenceSession;
pub use presence::{PresenceRecord, PresenceUpdate, SessionSnapshot};
pub use reconciler::{DisplayState, PresenceView, Reconciler, TouchState};
pub use session::SessionKey;
pub use store::{MemoryStore, PresenceStore, Subscription};
pub use touch::TouchHandler;
