//! In-memory host used by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Host;

/// Records every side effect and lets tests connect/disconnect players.
pub(crate) struct MockHost {
    online: Mutex<HashMap<String, String>>,
    forced: AtomicBool,
    pub(crate) kicks: Mutex<Vec<(String, String)>>,
    pub(crate) messages: Mutex<Vec<(String, String)>>,
    pub(crate) prompts: Mutex<Vec<String>>,
    /// Run once, from inside the next `player_ip` call.
    lookup_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MockHost {
    pub(crate) fn new() -> Self {
        Self {
            online: Mutex::new(HashMap::new()),
            forced: AtomicBool::new(true),
            kicks: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            lookup_hook: Mutex::new(None),
        }
    }

    pub(crate) fn connect(&self, name: &str, ip: &str) {
        self.online
            .lock()
            .unwrap()
            .insert(name.to_lowercase(), ip.to_string());
    }

    pub(crate) fn disconnect(&self, name: &str) {
        self.online.lock().unwrap().remove(&name.to_lowercase());
    }

    pub(crate) fn set_forced(&self, forced: bool) {
        self.forced.store(forced, Ordering::SeqCst);
    }

    /// Runs `hook` during the next IP lookup, e.g. to commit a transition
    /// while a sweep is between reading and writing a session.
    pub(crate) fn on_next_lookup(&self, hook: impl FnOnce() + Send + 'static) {
        *self.lookup_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn kick_count(&self) -> usize {
        self.kicks.lock().unwrap().len()
    }
}

impl Host for MockHost {
    fn player_ip(&self, username: &str) -> Option<String> {
        let hook = self.lookup_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.online
            .lock()
            .unwrap()
            .get(&username.to_lowercase())
            .cloned()
    }

    fn online_players(&self) -> Vec<String> {
        self.online.lock().unwrap().keys().cloned().collect()
    }

    fn kick(&self, username: &str, message: &str) {
        self.kicks
            .lock()
            .unwrap()
            .push((username.to_string(), message.to_string()));
    }

    fn send_message(&self, username: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((username.to_string(), message.to_string()));
    }

    fn prompt_login(&self, username: &str) {
        self.prompts.lock().unwrap().push(username.to_string());
    }

    fn is_forced_to_log_in(&self, _username: &str) -> bool {
        self.forced.load(Ordering::SeqCst)
    }
}
