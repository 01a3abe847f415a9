//! Timeout and idle-logout policy read by the reconciliation sweep.
//!
//! The field names mirror the configuration keys (`forceLogin.timeout.*`,
//! `automaticLogout.*`, `messages.*`), so a policy deserializes straight
//! out of the config file. Every value is optional in the file and falls
//! back to the defaults below. All durations are in host ticks.

use serde::{Deserialize, Serialize};

/// Everything the sweep needs to decide what to do with a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionPolicy {
    pub force_login: ForceLoginPolicy,
    pub automatic_logout: AutomaticLogoutPolicy,
    pub messages: Messages,
}

impl SessionPolicy {
    /// `true` if `username` is on the timeout exemption list. The list is
    /// matched case-insensitively.
    pub fn is_exempt_from_timeout(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        self.force_login
            .timeout
            .disable_for_players
            .iter()
            .any(|name| name.to_lowercase() == username)
    }
}

/// `forceLogin.*`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ForceLoginPolicy {
    pub timeout: LoginTimeout,
}

/// `forceLogin.timeout.*`: kick players who sit at the login prompt for
/// too long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginTimeout {
    pub enabled: bool,
    /// Ticks a logged-out player may stay connected.
    pub value: u64,
    /// Names never kicked for timing out.
    pub disable_for_players: Vec<String>,
}

impl Default for LoginTimeout {
    fn default() -> Self {
        Self {
            enabled: true,
            // One minute at 20 ticks per second.
            value: 1_200,
            disable_for_players: Vec::new(),
        }
    }
}

/// `automaticLogout.*`: log out players who have been idle for too long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomaticLogoutPolicy {
    pub enabled: bool,
    /// Idle ticks before an automatic logout.
    pub inactivity_time: u64,
}

impl Default for AutomaticLogoutPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            // Five minutes at 20 ticks per second.
            inactivity_time: 6_000,
        }
    }
}

/// `messages.*`: texts shown to players by the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Messages {
    pub automatically_logged_out: String,
    pub forced_login_timeout: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            automatically_logged_out: "You have been automatically logged out.".into(),
            forced_login_timeout: "You took too long to log in.".into(),
        }
    }
}
