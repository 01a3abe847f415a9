//! Moves the session table in and out of a snapshot file so logins
//! survive a restart.

use std::fs;
use std::io;
use std::path::Path;

use gatehouse_session::{Session, SessionStore, Username};
use tracing::{info, warn};

use crate::storage::{DataType, Entry, SqliteStorage, Storage};
use crate::SnapshotError;

/// Name of the unit holding one entry per session.
pub const SESSIONS_UNIT: &str = "sessions";

const USERNAME: &str = "username";
const STATUS: &str = "status";
const IP: &str = "ip";

const COLUMNS: [(&str, DataType); 3] = [
    (USERNAME, DataType::Text),
    (STATUS, DataType::Integer),
    (IP, DataType::Text),
];

// ---------------------------------------------------------------------------
// File-level operations
// ---------------------------------------------------------------------------

/// Writes every session in `store` to a fresh snapshot at `path`.
///
/// Any existing file at `path` is replaced. Returns the number of sessions
/// written.
pub fn export_sessions(store: &SessionStore, path: &Path) -> Result<usize, SnapshotError> {
    check_path(path)?;
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut storage = SqliteStorage::open(path);
    storage.connect()?;
    let written = write_sessions(store, &mut storage);
    let closed = storage.close();
    let written = written?;
    closed?;

    info!(path = %path.display(), count = written, "sessions exported");
    Ok(written)
}

/// Merges the sessions stored at `path` into `store`.
///
/// Usernames already present in `store` keep their current session.
/// Inactivity counters start from zero. Returns the number of sessions
/// added.
pub fn import_sessions(store: &SessionStore, path: &Path) -> Result<usize, SnapshotError> {
    check_path(path)?;
    if !path.exists() {
        return Err(SnapshotError::NotFound(path.to_path_buf()));
    }

    let mut storage = SqliteStorage::open_read_only(path);
    storage.connect()?;
    let imported = read_sessions(store, &mut storage);
    let closed = storage.close();
    let imported = imported?;
    closed?;

    info!(path = %path.display(), count = imported, "sessions imported");
    Ok(imported)
}

/// Imports the snapshot at `path`, if there is one, then deletes the file.
///
/// Returns `Ok(None)` when there is nothing to import. The file is removed
/// even when the import fails so a bad snapshot is not retried on every
/// start.
pub fn consume_snapshot(
    store: &SessionStore,
    path: &Path,
) -> Result<Option<usize>, SnapshotError> {
    check_path(path)?;
    if !path.exists() {
        return Ok(None);
    }

    let result = import_sessions(store, path);
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not delete consumed snapshot");
    }
    result.map(Some)
}

// ---------------------------------------------------------------------------
// Storage-level operations
// ---------------------------------------------------------------------------

/// Writes every session in `store` through a connected `storage`, in one
/// batch. Returns the number of entries written.
pub fn write_sessions<S: Storage>(
    store: &SessionStore,
    storage: &mut S,
) -> Result<usize, SnapshotError> {
    storage.create_unit(SESSIONS_UNIT, &COLUMNS, USERNAME)?;
    storage.set_autobatch(true);

    let queued = store.iter().try_for_each(|(username, session)| {
        storage.add_entry(
            SESSIONS_UNIT,
            Entry::new()
                .with(USERNAME, username.as_str())
                .with(STATUS, session.status().to_string())
                .with(IP, session.ip()),
        )
    });
    let written = match queued {
        Ok(()) => storage.execute_batch(),
        Err(e) => {
            storage.clear_batch();
            Err(e)
        }
    };

    storage.set_autobatch(false);
    written
}

/// Reads every entry of the sessions unit from a connected `storage` and
/// adds the ones whose username is not yet in `store`.
///
/// All rows are parsed before anything is inserted, so a corrupt row
/// leaves `store` untouched. Rows with an unusable username are skipped.
pub fn read_sessions<S: Storage>(
    store: &SessionStore,
    storage: &mut S,
) -> Result<usize, SnapshotError> {
    let entries = storage.select_entries(SESSIONS_UNIT, &[USERNAME, STATUS, IP])?;

    let mut restored = Vec::with_capacity(entries.len());
    for entry in &entries {
        let raw = entry.get(USERNAME).unwrap_or_default();
        let Ok(username) = Username::parse(raw) else {
            warn!(username = raw, "skipping snapshot row with unusable username");
            continue;
        };
        let value = entry.get(STATUS).unwrap_or_default();
        let status = value.trim().parse::<i64>().map_err(|_| SnapshotError::Corrupt {
            username: username.to_string(),
            value: value.to_string(),
        })?;
        let ip = entry.get(IP).unwrap_or_default();
        restored.push((username, Session::restore(ip, status)));
    }

    let mut added = 0;
    for (username, session) in restored {
        if store.insert_if_absent(username, session) {
            added += 1;
        }
    }
    Ok(added)
}

fn check_path(path: &Path) -> Result<(), SnapshotError> {
    if path.as_os_str().is_empty() {
        return Err(SnapshotError::InvalidArgument(
            "snapshot path must not be empty".into(),
        ));
    }
    Ok(())
}
