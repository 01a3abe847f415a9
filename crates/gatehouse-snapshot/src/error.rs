use std::path::PathBuf;

/// Errors raised while writing or reading a session snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The caller passed an unusable path or identifier.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// There is no snapshot file at the given path.
    #[error("snapshot not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The storage was used before `connect` or after `close`.
    #[error("storage is not connected")]
    NotConnected,

    /// Filesystem failure around the snapshot file.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing database rejected an operation.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A stored row could not be turned back into a session.
    #[error("corrupt snapshot row for '{username}': status {value:?} is not an integer")]
    Corrupt { username: String, value: String },
}
