//! The hook into the server that hosts the players.
//!
//! Gatehouse does not own connections. The game server does: it knows who
//! is online, from which address, and it is the only thing that can kick a
//! player or put a message on their screen. The [`Host`] trait is the
//! narrow view of the server that the session layer needs.

/// Connectivity and messaging for connected players.
///
/// Every name passed in is a normalized (lower-case) username; lookups
/// must therefore be case-insensitive on the host side.
///
/// All side effects are fire-and-forget: the session layer never waits for
/// a kick or a message to be delivered.
///
/// # Trait bounds
///
/// - `Send + Sync` → the host is called both from foreground handlers and
///   from the reconciliation task.
/// - `'static` → it lives as long as the service.
pub trait Host: Send + Sync + 'static {
    /// The current address of the connected player `username`, or `None`
    /// if nobody by that name is online.
    fn player_ip(&self, username: &str) -> Option<String>;

    /// Names of everyone currently online.
    fn online_players(&self) -> Vec<String>;

    /// Disconnects `username` with `message` as the reason.
    fn kick(&self, username: &str, message: &str);

    /// Shows `message` to `username`.
    fn send_message(&self, username: &str, message: &str);

    /// Reminds `username` that they need to log in.
    fn prompt_login(&self, username: &str);

    /// `true` if `username` must log in before playing (as opposed to,
    /// e.g., an exempt staff account or a world without forced login).
    fn is_forced_to_log_in(&self, username: &str) -> bool;
}

/// Lets the caller keep a handle on the host it gave to the manager.
impl<T: Host> Host for std::sync::Arc<T> {
    fn player_ip(&self, username: &str) -> Option<String> {
        (**self).player_ip(username)
    }

    fn online_players(&self) -> Vec<String> {
        (**self).online_players()
    }

    fn kick(&self, username: &str, message: &str) {
        (**self).kick(username, message)
    }

    fn send_message(&self, username: &str, message: &str) {
        (**self).send_message(username, message)
    }

    fn prompt_login(&self, username: &str) {
        (**self).prompt_login(username)
    }

    fn is_forced_to_log_in(&self, username: &str) -> bool {
        (**self).is_forced_to_log_in(username)
    }
}
