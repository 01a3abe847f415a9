//! Error types for the session layer.

/// Errors that can occur during session management.
///
/// The lifecycle operations are deliberately forgiving: transitions on a
/// missing session or in an already-satisfied state are no-ops, and a
/// vetoed transition is reported through [`Outcome`](crate::Outcome), not
/// through this type. What remains are caller defects.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A public operation was handed an empty (or whitespace-only)
    /// username.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
