//! The session manager: the login lifecycle on top of the store.
//!
//! It is responsible for:
//! - Creating a session when a player connects
//! - Starting it when they log in, ending it when they log out
//! - Destroying it once it is no longer needed
//! - Telling whether a player is logged in (with the IP check)
//! - Sweeping every session once per tick (see `sweep.rs`)
//!
//! # Concurrency note
//!
//! `SessionManager` is `Send + Sync` and is meant to be shared behind an
//! `Arc` between foreground handlers and the reconciliation task. The
//! store tolerates concurrent access, but each operation's
//! check → notify → mutate sequence is NOT atomic, and nothing here
//! serializes two operations on the same player. Callers must route all
//! transitions for one player through a single owner (e.g. that player's
//! connection task).

use std::sync::RwLock;

use tracing::{debug, warn};

use crate::{
    Host, Observers, Outcome, Session, SessionError, SessionEvent, SessionEventKind,
    SessionPolicy, SessionStore, Username,
};
use crate::session::{HEARTBEAT_STATUS, LOGGED_OUT_STATUS};

/// Tracks the login session of every connected player.
///
/// ## Lifecycle
///
/// ```text
///            create()            start()             end()
///  (absent) ─────────→ LoggedOut ───────→ LoggedIn ───────→ LoggedOut
///                          │                 │                  │
///                          │    destroy()    │    destroy()     │
///                          └───────┬─────────┴──(ends first)────┘
///                                  ▼
///                              (absent)
/// ```
///
/// Every transition first notifies the registered [`Observers`], any of
/// which may cancel it.
pub struct SessionManager<H: Host> {
    pub(crate) store: SessionStore,
    pub(crate) observers: Observers,
    pub(crate) policy: RwLock<SessionPolicy>,
    pub(crate) host: H,
}

impl<H: Host> SessionManager<H> {
    /// Creates a manager with an empty store and no observers.
    pub fn new(host: H, policy: SessionPolicy) -> Self {
        Self {
            store: SessionStore::new(),
            observers: Observers::new(),
            policy: RwLock::new(policy),
            host,
        }
    }

    /// The observer registry. Register lifecycle observers here.
    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// The underlying store, for the snapshot bridge.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// A copy of the policy the next sweep will use.
    pub fn policy(&self) -> SessionPolicy {
        self.policy
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replaces the sweep policy, e.g. after a config reload.
    pub fn set_policy(&self, policy: SessionPolicy) {
        *self
            .policy
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = policy;
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// A copy of the session stored for `username`.
    ///
    /// # Errors
    /// [`SessionError::InvalidArgument`] if `username` is empty.
    pub fn get(&self, username: &str) -> Result<Option<Session>, SessionError> {
        let username = Username::parse(username)?;
        Ok(self.store.get(&username))
    }

    /// `true` if `username` is logged in.
    ///
    /// That means a session exists, its status is non-negative, and, if
    /// the player is online right now, they are connected from the IP the
    /// session was created with. A different IP makes the session report
    /// as not alive without touching it, so a second client using the
    /// same name can't ride on someone else's login.
    pub fn is_alive(&self, username: &str) -> Result<bool, SessionError> {
        let username = Username::parse(username)?;
        Ok(self.is_alive_for(&username))
    }

    pub(crate) fn is_alive_for(&self, username: &Username) -> bool {
        let Some(session) = self.store.get(username) else {
            return false;
        };
        if !session.is_alive() {
            return false;
        }
        match self.host.player_ip(username.as_str()) {
            Some(ip) => ip == session.ip(),
            None => true,
        }
    }

    /// Marks `username` as active, restarting the idle-logout clock.
    ///
    /// Returns `false` if they have no session.
    pub fn reset_inactivity(&self, username: &str) -> Result<bool, SessionError> {
        let username = Username::parse(username)?;
        Ok(self
            .store
            .update(&username, Session::reset_inactivity)
            .is_some())
    }

    /// Lazy, weakly-consistent pass over all sessions.
    pub fn sessions(&self) -> crate::SessionIter<'_> {
        self.store.iter()
    }

    /// Number of sessions (any phase).
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drops every session without notifying observers. Used when the
    /// service shuts down.
    pub fn clear(&self) {
        self.store.clear();
    }

    // =====================================================================
    // Transitions
    // =====================================================================

    /// Creates a logged-out session for `username` bound to `ip`.
    ///
    /// Does nothing (and emits no event) if a session already exists.
    ///
    /// # Errors
    /// [`SessionError::InvalidArgument`] if `username` is empty.
    pub fn create(&self, username: &str, ip: &str) -> Result<Outcome, SessionError> {
        let username = Username::parse(username)?;
        Ok(self.create_session(&username, ip.to_string()))
    }

    /// Logs `username` in.
    ///
    /// Creates the session first if there is none, using the player's
    /// current IP (or an empty one if they are offline). Does nothing if
    /// the session is already logged in. The IP is never changed.
    ///
    /// Returns [`Outcome::Cancelled`] if either the implicit create or the
    /// start itself was vetoed.
    pub fn start(&self, username: &str) -> Result<Outcome, SessionError> {
        let username = Username::parse(username)?;
        Ok(self.start_session(&username))
    }

    /// Logs `username` out, keeping the session.
    ///
    /// Does nothing if there is no session or it is not logged in.
    pub fn end(&self, username: &str) -> Result<Outcome, SessionError> {
        let username = Username::parse(username)?;
        Ok(self.end_session(&username))
    }

    /// Removes the session of `username`.
    ///
    /// A logged-in session is ended first. That end commits on its own: if
    /// an observer then cancels the destroy, the session stays, logged
    /// out.
    pub fn destroy(&self, username: &str) -> Result<Outcome, SessionError> {
        let username = Username::parse(username)?;
        Ok(self.destroy_session(&username))
    }

    pub(crate) fn create_session(&self, username: &Username, ip: String) -> Outcome {
        if self.store.contains(username) {
            return Outcome::NotCancelled;
        }

        if self.emit(SessionEventKind::Create, username, None) {
            return Outcome::Cancelled;
        }

        self.store.insert_if_absent(username.clone(), Session::new(ip));
        debug!(%username, "session created");
        Outcome::NotCancelled
    }

    pub(crate) fn start_session(&self, username: &Username) -> Outcome {
        let session = match self.store.get(username) {
            Some(session) => session,
            None => {
                let ip = self.host.player_ip(username.as_str()).unwrap_or_default();
                if self.create_session(username, ip).is_cancelled() {
                    return Outcome::Cancelled;
                }
                match self.store.get(username) {
                    Some(session) => session,
                    // Destroyed by someone else in between.
                    None => return Outcome::NotCancelled,
                }
            }
        };

        if session.is_alive() {
            return Outcome::NotCancelled;
        }

        if self.emit(SessionEventKind::Start, username, Some(session)) {
            return Outcome::Cancelled;
        }

        self.store
            .update(username, |s| s.set_status(HEARTBEAT_STATUS));
        debug!(%username, "session started");
        Outcome::NotCancelled
    }

    pub(crate) fn end_session(&self, username: &Username) -> Outcome {
        let Some(session) = self.store.get(username) else {
            return Outcome::NotCancelled;
        };
        if !session.is_alive() {
            return Outcome::NotCancelled;
        }

        if self.emit(SessionEventKind::End, username, Some(session)) {
            return Outcome::Cancelled;
        }

        self.store
            .update(username, |s| s.set_status(LOGGED_OUT_STATUS));
        debug!(%username, "session ended");
        Outcome::NotCancelled
    }

    pub(crate) fn destroy_session(&self, username: &Username) -> Outcome {
        let Some(mut session) = self.store.get(username) else {
            return Outcome::NotCancelled;
        };

        let mut ended_first = false;
        if session.is_alive() {
            ended_first = !self.end_session(username).is_cancelled();
            // Observers of the destroy see the session as the end left it.
            match self.store.get(username) {
                Some(current) => session = current,
                None => return Outcome::NotCancelled,
            }
        }

        if self.emit(SessionEventKind::Destroy, username, Some(session)) {
            if ended_first {
                warn!(
                    %username,
                    "destroy cancelled after the session was already ended"
                );
            }
            return Outcome::Cancelled;
        }

        self.store.remove(username);
        debug!(%username, "session destroyed");
        Outcome::NotCancelled
    }

    /// Runs the observers for one transition. Returns `true` if cancelled.
    fn emit(
        &self,
        kind: SessionEventKind,
        username: &Username,
        session: Option<Session>,
    ) -> bool {
        let mut event = SessionEvent::new(kind, username.clone(), session);
        self.observers.dispatch(&mut event);
        if event.is_cancelled() {
            debug!(%username, %kind, "session transition cancelled by observer");
        }
        event.is_cancelled()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for the lifecycle transitions.
    //!
    //! Naming convention: `test_{operation}_{scenario}_{expected}`.
    //! Sweep behaviour is tested in `sweep.rs`.

    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::testing::MockHost;

    // -- Helpers ----------------------------------------------------------

    fn manager() -> (SessionManager<Arc<MockHost>>, Arc<MockHost>) {
        let host = Arc::new(MockHost::new());
        let mgr = SessionManager::new(Arc::clone(&host), SessionPolicy::default());
        (mgr, host)
    }

    /// Registers an observer that counts events of every kind.
    fn count_events(mgr: &SessionManager<Arc<MockHost>>) -> Arc<Mutex<Vec<SessionEventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        mgr.observers()
            .register(move |e: &mut SessionEvent| sink.lock().unwrap().push(e.kind()));
        seen
    }

    fn cancel(mgr: &SessionManager<Arc<MockHost>>, kind: SessionEventKind) {
        mgr.observers()
            .register_for(kind, |e: &mut SessionEvent| e.cancel());
    }

    // =====================================================================
    // create()
    // =====================================================================

    #[test]
    fn test_create_new_user_stores_logged_out_session() {
        let (mgr, _) = manager();

        let outcome = mgr.create("Alice", "10.0.0.1").unwrap();

        assert_eq!(outcome, Outcome::NotCancelled);
        let session = mgr.get("alice").unwrap().expect("session stored");
        assert_eq!(session.ip(), "10.0.0.1");
        assert_eq!(session.status(), LOGGED_OUT_STATUS);
        assert!(!mgr.is_alive("alice").unwrap());
    }

    #[test]
    fn test_create_twice_mutates_and_notifies_once() {
        let (mgr, _) = manager();
        let events = count_events(&mgr);

        mgr.create("alice", "10.0.0.1").unwrap();
        let second = mgr.create("alice", "10.0.0.2").unwrap();

        assert_eq!(second, Outcome::NotCancelled);
        assert_eq!(*events.lock().unwrap(), vec![SessionEventKind::Create]);
        assert_eq!(mgr.get("alice").unwrap().unwrap().ip(), "10.0.0.1");
    }

    #[test]
    fn test_create_cancelled_stores_nothing() {
        let (mgr, _) = manager();
        cancel(&mgr, SessionEventKind::Create);

        let outcome = mgr.create("alice", "10.0.0.1").unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert!(mgr.get("alice").unwrap().is_none());
    }

    #[test]
    fn test_create_empty_username_returns_invalid_argument() {
        let (mgr, _) = manager();
        assert!(matches!(
            mgr.create("", "10.0.0.1"),
            Err(SessionError::InvalidArgument(_))
        ));
    }

    // =====================================================================
    // start()
    // =====================================================================

    #[test]
    fn test_start_absent_user_creates_then_starts() {
        let (mgr, host) = manager();
        host.connect("alice", "10.0.0.1");
        let events = count_events(&mgr);

        let outcome = mgr.start("alice").unwrap();

        assert_eq!(outcome, Outcome::NotCancelled);
        assert!(mgr.is_alive("alice").unwrap());
        assert_eq!(mgr.get("alice").unwrap().unwrap().ip(), "10.0.0.1");
        assert_eq!(
            *events.lock().unwrap(),
            vec![SessionEventKind::Create, SessionEventKind::Start]
        );
    }

    #[test]
    fn test_start_offline_user_uses_empty_ip() {
        let (mgr, _) = manager();

        mgr.start("alice").unwrap();

        let session = mgr.get("alice").unwrap().unwrap();
        assert_eq!(session.ip(), "");
        assert!(mgr.is_alive("alice").unwrap());
    }

    #[test]
    fn test_start_already_alive_is_noop() {
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();
        let events = count_events(&mgr);

        assert_eq!(mgr.start("alice").unwrap(), Outcome::NotCancelled);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_start_cancelled_create_returns_cancelled() {
        let (mgr, _) = manager();
        cancel(&mgr, SessionEventKind::Create);

        assert_eq!(mgr.start("alice").unwrap(), Outcome::Cancelled);
        assert!(mgr.get("alice").unwrap().is_none());
    }

    #[test]
    fn test_start_cancelled_keeps_session_logged_out() {
        let (mgr, _) = manager();
        mgr.create("alice", "10.0.0.1").unwrap();
        cancel(&mgr, SessionEventKind::Start);

        assert_eq!(mgr.start("alice").unwrap(), Outcome::Cancelled);
        assert!(!mgr.is_alive("alice").unwrap());
    }

    #[test]
    fn test_start_keeps_creation_ip() {
        let (mgr, host) = manager();
        mgr.create("alice", "10.0.0.1").unwrap();
        host.connect("alice", "10.0.0.9");

        mgr.start("alice").unwrap();

        assert_eq!(mgr.get("alice").unwrap().unwrap().ip(), "10.0.0.1");
    }

    // =====================================================================
    // end()
    // =====================================================================

    #[test]
    fn test_end_alive_session_keeps_entry_logged_out() {
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();

        assert_eq!(mgr.end("alice").unwrap(), Outcome::NotCancelled);

        assert!(!mgr.is_alive("alice").unwrap());
        let session = mgr.get("alice").unwrap().expect("still stored");
        assert_eq!(session.status(), LOGGED_OUT_STATUS);
    }

    #[test]
    fn test_end_not_alive_or_missing_is_noop() {
        let (mgr, _) = manager();
        let events = count_events(&mgr);

        assert_eq!(mgr.end("ghost").unwrap(), Outcome::NotCancelled);
        mgr.create("alice", "1").unwrap();
        assert_eq!(mgr.end("alice").unwrap(), Outcome::NotCancelled);

        assert_eq!(*events.lock().unwrap(), vec![SessionEventKind::Create]);
    }

    #[test]
    fn test_end_cancelled_keeps_session_alive() {
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();
        cancel(&mgr, SessionEventKind::End);

        assert_eq!(mgr.end("alice").unwrap(), Outcome::Cancelled);
        assert!(mgr.is_alive("alice").unwrap());
    }

    // =====================================================================
    // destroy()
    // =====================================================================

    #[test]
    fn test_destroy_logged_out_session_removes_it() {
        let (mgr, _) = manager();
        mgr.create("alice", "1").unwrap();

        assert_eq!(mgr.destroy("alice").unwrap(), Outcome::NotCancelled);
        assert!(mgr.get("alice").unwrap().is_none());
    }

    #[test]
    fn test_destroy_missing_session_is_noop() {
        let (mgr, _) = manager();
        let events = count_events(&mgr);

        assert_eq!(mgr.destroy("ghost").unwrap(), Outcome::NotCancelled);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_destroy_alive_session_ends_first() {
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();
        let events = count_events(&mgr);

        mgr.destroy("alice").unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![SessionEventKind::End, SessionEventKind::Destroy]
        );
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_destroy_event_sees_ended_session() {
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();
        let status = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&status);
        mgr.observers()
            .register_for(SessionEventKind::Destroy, move |e: &mut SessionEvent| {
                *sink.lock().unwrap() = e.session().map(Session::status);
            });

        mgr.destroy("alice").unwrap();

        assert_eq!(*status.lock().unwrap(), Some(LOGGED_OUT_STATUS));
    }

    #[test]
    fn test_destroy_cancelled_does_not_roll_back_end() {
        // The cascading end commits on its own. A vetoed destroy leaves
        // the session in place but logged out.
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();
        cancel(&mgr, SessionEventKind::Destroy);

        assert_eq!(mgr.destroy("alice").unwrap(), Outcome::Cancelled);

        let session = mgr.get("alice").unwrap().expect("not removed");
        assert!(!session.is_alive());
    }

    #[test]
    fn test_destroy_with_cancelled_end_still_destroys() {
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();
        cancel(&mgr, SessionEventKind::End);

        assert_eq!(mgr.destroy("alice").unwrap(), Outcome::NotCancelled);
        assert!(mgr.get("alice").unwrap().is_none());
    }

    // =====================================================================
    // is_alive()
    // =====================================================================

    #[test]
    fn test_is_alive_requires_matching_ip_when_online() {
        let (mgr, host) = manager();
        host.connect("alice", "10.0.0.1");
        mgr.start("alice").unwrap();
        assert!(mgr.is_alive("alice").unwrap());

        // Someone else connects under the same name from elsewhere.
        host.connect("alice", "192.168.1.50");
        assert!(!mgr.is_alive("alice").unwrap());
        // The stored session itself is untouched.
        assert!(mgr.get("alice").unwrap().unwrap().is_alive());
    }

    #[test]
    fn test_is_alive_offline_uses_status_only() {
        let (mgr, host) = manager();
        host.connect("alice", "10.0.0.1");
        mgr.start("alice").unwrap();
        host.disconnect("alice");

        assert!(mgr.is_alive("alice").unwrap());
    }

    #[test]
    fn test_is_alive_unknown_user_is_false() {
        let (mgr, _) = manager();
        assert!(!mgr.is_alive("ghost").unwrap());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let (mgr, _) = manager();
        mgr.start("Alice").unwrap();
        assert!(mgr.is_alive("ALICE").unwrap());
        assert_eq!(mgr.end("aLiCe").unwrap(), Outcome::NotCancelled);
        assert!(!mgr.is_alive("alice").unwrap());
    }

    // =====================================================================
    // reset_inactivity() / clear() / policy
    // =====================================================================

    #[test]
    fn test_reset_inactivity_zeroes_counter() {
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();
        let alice = Username::parse("alice").unwrap();
        mgr.store.update(&alice, |s| s.advance_inactivity(50));

        assert!(mgr.reset_inactivity("alice").unwrap());
        assert_eq!(mgr.get("alice").unwrap().unwrap().inactivity(), 0);
        assert!(!mgr.reset_inactivity("ghost").unwrap());
    }

    #[test]
    fn test_clear_skips_observers() {
        let (mgr, _) = manager();
        mgr.start("alice").unwrap();
        let events = count_events(&mgr);

        mgr.clear();

        assert!(mgr.is_empty());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_set_policy_replaces_policy() {
        let (mgr, _) = manager();
        let mut policy = SessionPolicy::default();
        policy.automatic_logout.enabled = true;

        mgr.set_policy(policy.clone());

        assert_eq!(mgr.policy(), policy);
    }
}
