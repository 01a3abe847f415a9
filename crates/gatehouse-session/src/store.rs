//! The session store: a concurrent map from username to session.
//!
//! The store is shared between foreground handlers (join, quit, login and
//! logout commands) and the reconciliation sweep, which may run on a
//! different thread. It is backed by [`DashMap`], a sharded hash map that
//! locks one shard at a time, so readers and writers of different users
//! rarely contend.
//!
//! # Iteration
//!
//! A `DashMap` iterator holds a shard read lock for as long as it sits on
//! that shard. The sweep calls lifecycle operations (which write to the
//! map) for the entry it is visiting, so iterating the map directly would
//! deadlock. [`SessionStore::iter`] therefore copies the key set up front
//! and looks each entry up lazily as it is reached:
//!
//! - an entry removed before it is reached is skipped,
//! - an entry added after the iterator was created is not visited,
//! - calling `iter()` again starts a fresh pass.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::{Session, Username};

/// Concurrency-safe mapping from [`Username`] to [`Session`].
///
/// All reads return copies. There is no cross-entry atomicity: two
/// operations on different users are independent, and a check followed
/// by a write on the same user can interleave with another writer.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<Username, Session>,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the session stored for `username`.
    pub fn get(&self, username: &Username) -> Option<Session> {
        self.sessions.get(username).map(|entry| entry.value().clone())
    }

    /// `true` if a session is stored for `username`.
    pub fn contains(&self, username: &Username) -> bool {
        self.sessions.contains_key(username)
    }

    /// Stores `session`, replacing any previous one. Returns the replaced
    /// session.
    pub fn put(&self, username: Username, session: Session) -> Option<Session> {
        self.sessions.insert(username, session)
    }

    /// Stores `session` only if no session exists for `username`.
    ///
    /// Returns `true` if it was inserted. The check and the insert happen
    /// under the same shard lock.
    pub fn insert_if_absent(&self, username: Username, session: Session) -> bool {
        match self.sessions.entry(username) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Removes and returns the session for `username`.
    pub fn remove(&self, username: &Username) -> Option<Session> {
        self.sessions.remove(username).map(|(_, session)| session)
    }

    /// Applies `f` to the stored session in place.
    ///
    /// Returns `None` (and does not call `f`) if the entry is gone, which
    /// is how callers notice a concurrent removal.
    pub fn update<R>(
        &self,
        username: &Username,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        self.sessions
            .get_mut(username)
            .map(|mut entry| f(entry.value_mut()))
    }

    /// Starts a weakly-consistent pass over the stored sessions.
    ///
    /// See the module docs for what the iterator guarantees.
    pub fn iter(&self) -> SessionIter<'_> {
        let keys: Vec<Username> =
            self.sessions.iter().map(|entry| entry.key().clone()).collect();
        SessionIter {
            store: self,
            keys: keys.into_iter(),
        }
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` if the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops every session.
    pub fn clear(&self) {
        self.sessions.clear();
    }
}

/// Lazy iterator returned by [`SessionStore::iter`].
pub struct SessionIter<'a> {
    store: &'a SessionStore,
    keys: std::vec::IntoIter<Username>,
}

impl Iterator for SessionIter<'_> {
    type Item = (Username, Session);

    fn next(&mut self) -> Option<Self::Item> {
        // Keys whose entry disappeared since the pass began are skipped.
        for username in self.keys.by_ref() {
            if let Some(session) = self.store.get(&username) {
                return Some((username, session));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len()))
    }
}
