//! Cancellable lifecycle events and the observers that receive them.
//!
//! Before a lifecycle operation commits anything, it builds a
//! [`SessionEvent`] and hands it to every registered observer, one after
//! another, on the caller's own thread. Any observer may veto the
//! transition by calling [`SessionEvent::cancel`]. Once cancelled an event
//! stays cancelled, so the result is the OR of every observer's decision.
//!
//! ```text
//! create/start/end/destroy
//!     │
//!     ├─ build SessionEvent
//!     ├─ Lowest → Low → Normal → High → Highest   (registration order within a level)
//!     │
//!     ├─ cancelled? ──yes──→ return Outcome::Cancelled   (nothing mutated)
//!     └─ no ──→ mutate store ──→ return Outcome::NotCancelled
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::{Session, Username};

// ---------------------------------------------------------------------------
// SessionEventKind / Outcome
// ---------------------------------------------------------------------------

/// Which transition an event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    Create,
    Start,
    End,
    Destroy,
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Result of a lifecycle operation.
///
/// Being cancelled is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation committed, or had nothing to do.
    NotCancelled,
    /// An observer vetoed the operation; its own mutation was not applied.
    Cancelled,
}

impl Outcome {
    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// A pending lifecycle transition, as seen by observers.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    kind: SessionEventKind,
    username: Username,
    session: Option<Session>,
    cancelled: bool,
}

impl SessionEvent {
    pub(crate) fn new(
        kind: SessionEventKind,
        username: Username,
        session: Option<Session>,
    ) -> Self {
        Self {
            kind,
            username,
            session,
            cancelled: false,
        }
    }

    pub fn kind(&self) -> SessionEventKind {
        self.kind
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    /// The session as it was when the event was built. `None` for
    /// [`SessionEventKind::Create`], since nothing exists yet.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Vetoes the transition. There is no way to undo this.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Receives lifecycle events before they commit.
///
/// Observers run synchronously inside the lifecycle call, possibly on the
/// reconciliation thread, so they should be quick and must not block.
/// Any `Fn(&mut SessionEvent)` closure that is `Send + Sync` is an
/// observer.
pub trait SessionObserver: Send + Sync + 'static {
    fn on_event(&self, event: &mut SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(&mut SessionEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &mut SessionEvent) {
        self(event)
    }
}

/// Dispatch level. Lower levels see the event first; `Highest` gets the
/// last word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ObserverPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

struct Registration {
    id: ObserverId,
    priority: ObserverPriority,
    kind: Option<SessionEventKind>,
    observer: Arc<dyn SessionObserver>,
}

/// The ordered observer list.
///
/// Registrations are kept sorted by priority; a stable insert keeps
/// registration order within one priority level.
#[derive(Default)]
pub struct Observers {
    registrations: RwLock<Vec<Registration>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` for every kind of event at
    /// [`ObserverPriority::Normal`].
    pub fn register(&self, observer: impl SessionObserver) -> ObserverId {
        self.insert(ObserverPriority::Normal, None, Arc::new(observer))
    }

    /// Registers `observer` for one kind of event.
    pub fn register_for(
        &self,
        kind: SessionEventKind,
        observer: impl SessionObserver,
    ) -> ObserverId {
        self.insert(ObserverPriority::Normal, Some(kind), Arc::new(observer))
    }

    /// Registers `observer` with an explicit priority, optionally limited
    /// to one kind.
    pub fn register_with_priority(
        &self,
        priority: ObserverPriority,
        kind: Option<SessionEventKind>,
        observer: impl SessionObserver,
    ) -> ObserverId {
        self.insert(priority, kind, Arc::new(observer))
    }

    /// Removes a registration. Returns `false` if `id` was unknown.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut regs = write_lock(&self.registrations);
        let before = regs.len();
        regs.retain(|r| r.id != id);
        regs.len() != before
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        read_lock(&self.registrations).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every interested observer in dispatch order.
    ///
    /// The list is copied out before the first observer runs, so an
    /// observer may register or unregister others without deadlocking;
    /// such changes apply from the next event on.
    pub fn dispatch(&self, event: &mut SessionEvent) {
        let targets: Vec<Arc<dyn SessionObserver>> = read_lock(&self.registrations)
            .iter()
            .filter(|r| r.kind.is_none_or(|k| k == event.kind()))
            .map(|r| Arc::clone(&r.observer))
            .collect();

        for observer in targets {
            observer.on_event(event);
        }
    }

    fn insert(
        &self,
        priority: ObserverPriority,
        kind: Option<SessionEventKind>,
        observer: Arc<dyn SessionObserver>,
    ) -> ObserverId {
        let id = ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed));
        let mut regs = write_lock(&self.registrations);
        // First slot whose priority is strictly higher.
        let at = regs.partition_point(|r| r.priority <= priority);
        regs.insert(
            at,
            Registration {
                id,
                priority,
                kind,
                observer,
            },
        );
        id
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("len", &self.len()).finish()
    }
}

// Observers run with no lock held, so the list is never left half-edited
// and a poisoned lock is safe to keep using.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
