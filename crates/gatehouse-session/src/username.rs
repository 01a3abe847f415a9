//! The identity key every session is stored under.

use std::fmt;

use crate::SessionError;

/// A normalized username: trimmed of surrounding whitespace and
/// lower-cased.
///
/// Hosts report names with whatever capitalization the player typed
/// ("Notch", "notch", "NOTCH" are the same account), so the store never
/// sees a raw name. Every public entry point goes through
/// [`Username::parse`], which is also where empty names are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Username(String);

impl Username {
    /// Normalizes `raw` into a username.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidArgument`] if `raw` is empty after
    /// trimming.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SessionError::InvalidArgument(
                "username must not be empty".into(),
            ));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// The normalized form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a raw name, e.g. an entry in
    /// an exemption list.
    pub fn matches(&self, raw: &str) -> bool {
        raw.trim().to_lowercase() == self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
