//! Session snapshots for Gatehouse.
//!
//! Before the host restarts, the live session table is written to a
//! SQLite file; on the next start it is read back and the file deleted,
//! so players who were logged in stay logged in.
//!
//! ```text
//! export_sessions(store, path)    store  ──► sessions.db
//! consume_snapshot(store, path)   sessions.db ──► store, then rm
//! ```
//!
//! The SQL lives behind the [`Storage`] trait; the bridge functions only
//! deal in units and entries.

mod bridge;
mod error;
mod storage;

pub use bridge::{
    SESSIONS_UNIT, consume_snapshot, export_sessions, import_sessions, read_sessions,
    write_sessions,
};
pub use error::SnapshotError;
pub use storage::{DataType, Entry, SqliteStorage, Storage};
