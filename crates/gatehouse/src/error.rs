//! Unified error type for the Gatehouse service.

use gatehouse_session::SessionError;
use gatehouse_snapshot::SnapshotError;

use crate::config::ConfigError;

/// Top-level error that wraps every crate-specific error.
///
/// Callers of the `gatehouse` meta-crate deal with this one type instead
/// of importing errors from each sub-crate. The `#[from]` attribute on
/// each variant generates the `From` impl, so `?` converts automatically.
#[derive(Debug, thiserror::Error)]
pub enum GatehouseError {
    /// A lifecycle call was given an unusable username.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Writing or reading the restart snapshot failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The configuration file could not be read or parsed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
