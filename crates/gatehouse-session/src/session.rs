//! Session types: the per-user login record.
//!
//! A session tracks three things about a connected user:
//! - WHERE they logged in from (the IP, used to catch hijacked names)
//! - WHETHER they are logged in, encoded in a signed tick counter
//! - HOW LONG they have been idle

// ---------------------------------------------------------------------------
// Status encoding
// ---------------------------------------------------------------------------

/// Status of a session that is logged in and was just confirmed by a sweep.
pub const HEARTBEAT_STATUS: i64 = 0;

/// Status given to a freshly created session and to one that has just
/// been ended. Every sweep while the user stays connected and logged out
/// moves it further below zero.
pub const LOGGED_OUT_STATUS: i64 = -1;

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// The coarse state a stored session is in, derived from its status.
///
/// ```text
///   (absent) ──create──→ LoggedOut ──start──→ LoggedIn
///                            ↑                   │
///                            └───────end─────────┘
/// ```
///
/// A session that was never started and one that was ended look the
/// same: both count down below zero until the user logs in, leaves, or
/// is kicked for taking too long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// `status >= 0`: the user is authenticated.
    LoggedIn,
    /// `status < 0`: the user is connected (or was) but not authenticated.
    LoggedOut,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A single user's login session.
///
/// Sessions are owned by the [`SessionStore`](crate::SessionStore); what
/// callers receive from it is always a copy. Mutations go back through the
/// store so the store stays the single source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    ip: String,

    /// Signed tick counter.
    ///
    /// - `>= 0` → logged in. Reset to `0` every sweep while connected.
    /// - `< 0`  → logged out; the magnitude is how many ticks the user has
    ///   spent connected without logging in.
    status: i64,

    /// Ticks since the user last did something.
    inactivity: u64,
}

impl Session {
    /// A new, logged-out session bound to `ip`.
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            status: LOGGED_OUT_STATUS,
            inactivity: 0,
        }
    }

    /// Rebuilds a session from persisted fields.
    pub fn restore(ip: impl Into<String>, status: i64) -> Self {
        Self {
            ip: ip.into(),
            status,
            inactivity: 0,
        }
    }

    /// The IP address recorded when the session was created.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// The raw status counter.
    pub fn status(&self) -> i64 {
        self.status
    }

    /// Ticks since the last activity reset.
    pub fn inactivity(&self) -> u64 {
        self.inactivity
    }

    /// `true` if the status denotes an authenticated user.
    ///
    /// This only looks at the counter; the IP check against the live
    /// connection is done by
    /// [`SessionManager::is_alive`](crate::SessionManager::is_alive).
    pub fn is_alive(&self) -> bool {
        self.status >= 0
    }

    /// The phase this session is in.
    pub fn phase(&self) -> SessionPhase {
        if self.is_alive() {
            SessionPhase::LoggedIn
        } else {
            SessionPhase::LoggedOut
        }
    }

    pub(crate) fn set_status(&mut self, status: i64) {
        self.status = status;
    }

    /// Moves a logged-out countdown further below zero. Saturates rather
    /// than wrapping when the timeout is disabled and a user idles at the
    /// login prompt for an absurdly long time.
    pub(crate) fn deepen_countdown(&mut self, ticks: u64) {
        let ticks = i64::try_from(ticks).unwrap_or(i64::MAX);
        self.status = self.status.saturating_sub(ticks);
    }

    pub(crate) fn advance_inactivity(&mut self, ticks: u64) {
        self.inactivity = self.inactivity.saturating_add(ticks);
    }

    pub(crate) fn reset_inactivity(&mut self) {
        self.inactivity = 0;
    }
}
