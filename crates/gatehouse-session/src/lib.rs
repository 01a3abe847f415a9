//! Login session management for Gatehouse.
//!
//! This crate tracks whether each connected player has logged in:
//!
//! 1. **Storage**: one [`Session`] per [`Username`] in a concurrent
//!    [`SessionStore`]
//! 2. **Lifecycle**: create / start / end / destroy on the
//!    [`SessionManager`], each announced to cancellable [`Observers`]
//!    before it commits
//! 3. **Reconciliation**: [`SessionManager::sweep`], run once per tick,
//!    which keeps sessions alive, logs out idle players, kicks players who
//!    never log in, and drops sessions of players who left
//!
//! # How it fits in the stack
//!
//! ```text
//! Service layer (gatehouse)        ← wiring, tick loop, restart handling
//!     ↕
//! Session layer (this crate)       ← login state and policy
//!     ↕
//! Host (the game server)           ← who is online, kick, messages
//! ```

mod error;
mod event;
mod host;
mod manager;
mod policy;
mod session;
mod store;
mod sweep;
mod username;

#[cfg(test)]
mod testing;

pub use error::SessionError;
pub use event::{
    ObserverId, ObserverPriority, Observers, Outcome, SessionEvent, SessionEventKind,
    SessionObserver,
};
pub use host::Host;
pub use manager::SessionManager;
pub use policy::{AutomaticLogoutPolicy, ForceLoginPolicy, LoginTimeout, Messages, SessionPolicy};
pub use session::{HEARTBEAT_STATUS, LOGGED_OUT_STATUS, Session, SessionPhase};
pub use store::{SessionIter, SessionStore};
pub use sweep::SweepReport;
pub use username::Username;
