//! The reconciliation sweep: once per tick period, walk every session and
//! apply the timeout and idle-logout policy.
//!
//! ```text
//!                    │ player online                    │ player offline
//! ───────────────────┼──────────────────────────────────┼────────────────
//! logged in          │ heartbeat (status = 0);          │ destroy
//!                    │ idle too long → end + notify     │
//! logged out         │ count down (status -= period);   │ destroy
//!                    │ too long → kick                  │
//! ```
//!
//! Each session is handled on its own. A panic while handling one (from an
//! observer, say) is caught and logged, and the sweep moves on to the next.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, info, warn};

use crate::session::HEARTBEAT_STATUS;
use crate::{Host, Outcome, Session, SessionManager, SessionPolicy, Username};

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions looked at.
    pub visited: usize,
    /// Logged-in, online sessions that were simply kept alive.
    pub heartbeats: usize,
    /// Sessions ended because the player was idle too long.
    pub idle_logouts: usize,
    /// Players kicked for not logging in within the timeout.
    pub timeouts: usize,
    /// Logged-out, online sessions whose countdown advanced.
    pub countdowns: usize,
    /// Sessions removed because the player is offline.
    pub destroyed: usize,
    /// Sessions an observer kept from being destroyed or idle-logged-out.
    pub vetoed: usize,
    /// Sessions skipped because handling them panicked.
    pub failures: usize,
}

impl SweepReport {
    /// `true` if nothing happened beyond heartbeats and countdowns.
    pub fn is_quiet(&self) -> bool {
        self.idle_logouts == 0
            && self.timeouts == 0
            && self.destroyed == 0
            && self.vetoed == 0
            && self.failures == 0
    }

    fn record(&mut self, action: SweepAction) {
        match action {
            SweepAction::Heartbeat => self.heartbeats += 1,
            SweepAction::IdleLogout => self.idle_logouts += 1,
            SweepAction::TimedOut => self.timeouts += 1,
            SweepAction::CountedDown => self.countdowns += 1,
            SweepAction::Destroyed => self.destroyed += 1,
            SweepAction::Vetoed => self.vetoed += 1,
            SweepAction::Skipped => {}
        }
    }
}

/// What the sweep did with one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepAction {
    Heartbeat,
    IdleLogout,
    TimedOut,
    CountedDown,
    Destroyed,
    Vetoed,
    /// Exempt, not forced to log in, or changed or gone mid-sweep.
    Skipped,
}

impl<H: Host> SessionManager<H> {
    /// Runs one reconciliation pass.
    ///
    /// `period` is the number of host ticks since the previous sweep; it is
    /// what the idle and countdown counters advance by. The policy is read
    /// once at the start, so a concurrent
    /// [`set_policy`](Self::set_policy) takes effect on the next sweep.
    pub fn sweep(&self, period: u64) -> SweepReport {
        let policy = self.policy();
        let mut report = SweepReport::default();

        for (username, session) in self.store.iter() {
            report.visited += 1;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.reconcile(&username, &session, &policy, period)
            }));
            match result {
                Ok(action) => report.record(action),
                Err(payload) => {
                    report.failures += 1;
                    error!(
                        %username,
                        reason = panic_message(payload.as_ref()),
                        "session reconciliation failed, skipping"
                    );
                }
            }
        }

        if !report.is_quiet() {
            debug!(?report, "session sweep finished");
        }
        report
    }

    fn reconcile(
        &self,
        username: &Username,
        session: &Session,
        policy: &SessionPolicy,
        period: u64,
    ) -> SweepAction {
        let name = username.as_str();
        let online = self.host.player_ip(name).is_some();

        match (session.is_alive(), online) {
            (true, true) => self.keep_alive(username, policy, period),
            (false, true) => self.count_down(username, policy, period),
            (_, false) => match self.destroy_session(username) {
                Outcome::NotCancelled => SweepAction::Destroyed,
                Outcome::Cancelled => SweepAction::Vetoed,
            },
        }
    }

    /// Logged in and online: heartbeat, then the idle-logout check.
    fn keep_alive(
        &self,
        username: &Username,
        policy: &SessionPolicy,
        period: u64,
    ) -> SweepAction {
        // The session may have been ended since the sweep copied it.
        let idle = self.store.update(username, |s| {
            s.is_alive().then(|| {
                s.set_status(HEARTBEAT_STATUS);
                s.inactivity()
            })
        });
        let Some(idle) = idle.flatten() else {
            return SweepAction::Skipped;
        };

        let logout = &policy.automatic_logout;
        if !logout.enabled {
            return SweepAction::Heartbeat;
        }

        if idle < logout.inactivity_time {
            self.store
                .update(username, |s| s.advance_inactivity(period));
            return SweepAction::Heartbeat;
        }

        let name = username.as_str();
        let ended = !self.end_session(username).is_cancelled();
        self.store.update(username, Session::reset_inactivity);
        self.host
            .send_message(name, &policy.messages.automatically_logged_out);
        if self.host.is_forced_to_log_in(name) {
            self.host.prompt_login(name);
        }
        if !ended {
            warn!(%username, idle_ticks = idle, "idle logout cancelled by observer");
            return SweepAction::Vetoed;
        }
        debug!(%username, idle_ticks = idle, "logged out for inactivity");
        SweepAction::IdleLogout
    }

    /// Logged out and online: advance the countdown or kick.
    fn count_down(
        &self,
        username: &Username,
        policy: &SessionPolicy,
        period: u64,
    ) -> SweepAction {
        let name = username.as_str();
        if policy.is_exempt_from_timeout(name) || !self.host.is_forced_to_log_in(name) {
            return SweepAction::Skipped;
        }

        // Re-read: the player may have logged in since the sweep copied
        // the session.
        let Some(current) = self.store.get(username) else {
            return SweepAction::Skipped;
        };
        if current.is_alive() {
            return SweepAction::Skipped;
        }

        let timeout = &policy.force_login.timeout;
        let waited = current.status().unsigned_abs();
        if timeout.enabled && waited >= timeout.value {
            self.host.kick(name, &policy.messages.forced_login_timeout);
            info!(%username, waited_ticks = waited, "kicked for not logging in");
            return SweepAction::TimedOut;
        }

        let counted = self.store.update(username, |s| {
            let logged_out = !s.is_alive();
            if logged_out {
                s.deepen_countdown(period);
            }
            logged_out
        });
        match counted {
            Some(true) => SweepAction::CountedDown,
            _ => SweepAction::Skipped,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::LOGGED_OUT_STATUS;
    use crate::testing::MockHost;
    use crate::{SessionEvent, SessionEventKind};

    // -- Helpers ----------------------------------------------------------

    fn manager_with(policy: SessionPolicy) -> (SessionManager<Arc<MockHost>>, Arc<MockHost>) {
        let host = Arc::new(MockHost::new());
        (SessionManager::new(Arc::clone(&host), policy), host)
    }

    fn idle_policy(inactivity_time: u64) -> SessionPolicy {
        let mut policy = SessionPolicy::default();
        policy.automatic_logout.enabled = true;
        policy.automatic_logout.inactivity_time = inactivity_time;
        policy
    }

    fn timeout_policy(value: u64) -> SessionPolicy {
        let mut policy = SessionPolicy::default();
        policy.force_login.timeout.enabled = true;
        policy.force_login.timeout.value = value;
        policy
    }

    fn session(mgr: &SessionManager<Arc<MockHost>>, name: &str) -> Session {
        mgr.get(name).unwrap().expect("session exists")
    }

    // =====================================================================
    // Logged in + online
    // =====================================================================

    #[test]
    fn test_sweep_online_logged_in_resets_status_to_heartbeat() {
        let (mgr, host) = manager_with(SessionPolicy::default());
        host.connect("alice", "10.0.0.1");
        mgr.create("alice", "10.0.0.1").unwrap();
        mgr.start("alice").unwrap();
        mgr.store
            .update(&Username::parse("alice").unwrap(), |s| s.set_status(17));

        let report = mgr.sweep(1);

        assert_eq!(report.heartbeats, 1);
        assert_eq!(session(&mgr, "alice").status(), HEARTBEAT_STATUS);
    }

    #[test]
    fn test_sweep_without_idle_logout_does_not_count_inactivity() {
        let (mgr, host) = manager_with(SessionPolicy::default());
        host.connect("alice", "1");
        mgr.start("alice").unwrap();

        for _ in 0..10 {
            mgr.sweep(1);
        }

        assert_eq!(session(&mgr, "alice").inactivity(), 0);
    }

    #[test]
    fn test_sweep_idle_threshold_reached_ends_session() {
        let (mgr, host) = manager_with(idle_policy(100));
        host.connect("alice", "1");
        mgr.start("alice").unwrap();

        // 100 sweeps accumulate 100 ticks of inactivity.
        for _ in 0..100 {
            assert_eq!(mgr.sweep(1).idle_logouts, 0);
        }
        assert_eq!(session(&mgr, "alice").inactivity(), 100);

        let report = mgr.sweep(1);

        assert_eq!(report.idle_logouts, 1);
        let alice = session(&mgr, "alice");
        assert!(!alice.is_alive());
        assert_eq!(alice.inactivity(), 0);
        assert_eq!(
            *host.messages.lock().unwrap(),
            vec![(
                "alice".to_string(),
                SessionPolicy::default().messages.automatically_logged_out
            )]
        );
        assert_eq!(*host.prompts.lock().unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_sweep_idle_logout_skips_prompt_when_not_forced() {
        let (mgr, host) = manager_with(idle_policy(0));
        host.connect("alice", "1");
        host.set_forced(false);
        mgr.start("alice").unwrap();

        mgr.sweep(1);

        assert!(!session(&mgr, "alice").is_alive());
        assert!(host.prompts.lock().unwrap().is_empty());
        assert_eq!(host.messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sweep_activity_reset_postpones_idle_logout() {
        let (mgr, host) = manager_with(idle_policy(5));
        host.connect("alice", "1");
        mgr.start("alice").unwrap();

        for _ in 0..20 {
            mgr.sweep(1);
            mgr.reset_inactivity("alice").unwrap();
        }

        assert!(mgr.is_alive("alice").unwrap());
    }

    #[test]
    fn test_sweep_inactivity_advances_by_period() {
        let (mgr, host) = manager_with(idle_policy(1_000));
        host.connect("alice", "1");
        mgr.start("alice").unwrap();

        mgr.sweep(20);
        mgr.sweep(20);

        assert_eq!(session(&mgr, "alice").inactivity(), 40);
    }

    // =====================================================================
    // Logged in + offline
    // =====================================================================

    #[test]
    fn test_sweep_offline_logged_in_is_destroyed() {
        let (mgr, host) = manager_with(SessionPolicy::default());
        host.connect("alice", "1");
        mgr.start("alice").unwrap();
        host.disconnect("alice");

        let report = mgr.sweep(1);

        assert_eq!(report.destroyed, 1);
        assert!(mgr.get("alice").unwrap().is_none());
    }

    #[test]
    fn test_sweep_offline_logged_in_destroyed_even_with_idle_logout() {
        let (mgr, host) = manager_with(idle_policy(0));
        mgr.start("alice").unwrap();
        host.disconnect("alice");

        mgr.sweep(1);

        assert!(mgr.is_empty());
        assert!(host.messages.lock().unwrap().is_empty());
    }

    // =====================================================================
    // Logged out + online
    // =====================================================================

    #[test]
    fn test_sweep_logged_out_online_counts_down() {
        let (mgr, host) = manager_with(timeout_policy(1_200));
        host.connect("alice", "1");
        mgr.create("alice", "1").unwrap();

        let report = mgr.sweep(1);

        assert_eq!(report.countdowns, 1);
        assert_eq!(session(&mgr, "alice").status(), LOGGED_OUT_STATUS - 1);
    }

    #[test]
    fn test_sweep_timeout_kicks_on_threshold() {
        let (mgr, host) = manager_with(timeout_policy(1_200));
        host.connect("alice", "1");
        mgr.create("alice", "1").unwrap();
        assert_eq!(session(&mgr, "alice").status(), -1);

        for _ in 0..1_199 {
            mgr.sweep(1);
        }
        assert_eq!(session(&mgr, "alice").status(), -1_200);
        assert_eq!(host.kick_count(), 0);

        let report = mgr.sweep(1);

        assert_eq!(report.timeouts, 1);
        assert_eq!(host.kick_count(), 1);
        // Kicked, not advanced again.
        assert_eq!(session(&mgr, "alice").status(), -1_200);
        assert_eq!(
            host.kicks.lock().unwrap()[0].1,
            SessionPolicy::default().messages.forced_login_timeout
        );
    }

    #[test]
    fn test_sweep_timeout_disabled_counts_down_forever() {
        let mut policy = timeout_policy(10);
        policy.force_login.timeout.enabled = false;
        let (mgr, host) = manager_with(policy);
        host.connect("alice", "1");
        mgr.create("alice", "1").unwrap();

        for _ in 0..50 {
            mgr.sweep(1);
        }

        assert_eq!(host.kick_count(), 0);
        assert_eq!(session(&mgr, "alice").status(), -51);
    }

    #[test]
    fn test_sweep_exempt_player_is_left_alone() {
        let mut policy = timeout_policy(1);
        policy.force_login.timeout.disable_for_players = vec!["ALICE".into()];
        let (mgr, host) = manager_with(policy);
        host.connect("alice", "1");
        mgr.create("alice", "1").unwrap();

        for _ in 0..5 {
            mgr.sweep(1);
        }

        assert_eq!(host.kick_count(), 0);
        assert_eq!(session(&mgr, "alice").status(), LOGGED_OUT_STATUS);
    }

    #[test]
    fn test_sweep_player_not_forced_is_left_alone() {
        let (mgr, host) = manager_with(timeout_policy(1));
        host.connect("alice", "1");
        host.set_forced(false);
        mgr.create("alice", "1").unwrap();

        let report = mgr.sweep(1);

        assert_eq!(report.countdowns + report.timeouts, 0);
        assert_eq!(session(&mgr, "alice").status(), LOGGED_OUT_STATUS);
    }

    // =====================================================================
    // Logged out + offline
    // =====================================================================

    #[test]
    fn test_sweep_logged_out_offline_is_destroyed() {
        let (mgr, _) = manager_with(SessionPolicy::default());
        mgr.create("alice", "1").unwrap();

        let report = mgr.sweep(1);

        assert_eq!(report.destroyed, 1);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_sweep_vetoed_destroy_is_counted() {
        let (mgr, _) = manager_with(SessionPolicy::default());
        mgr.create("alice", "1").unwrap();
        mgr.observers()
            .register_for(SessionEventKind::Destroy, |e: &mut SessionEvent| e.cancel());

        let report = mgr.sweep(1);

        assert_eq!(report.vetoed, 1);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_sweep_vetoed_idle_logout_is_counted_as_vetoed() {
        let (mgr, host) = manager_with(idle_policy(0));
        host.connect("alice", "1");
        mgr.start("alice").unwrap();
        mgr.observers()
            .register_for(SessionEventKind::End, |e: &mut SessionEvent| e.cancel());

        let report = mgr.sweep(1);

        assert_eq!(report.vetoed, 1);
        assert_eq!(report.idle_logouts, 0);
        assert!(session(&mgr, "alice").is_alive());
        // The notice still goes out.
        assert_eq!(host.messages.lock().unwrap().len(), 1);
    }

    // =====================================================================
    // Transitions committed while a sweep is running
    // =====================================================================

    fn shared_manager(
        policy: SessionPolicy,
    ) -> (Arc<SessionManager<Arc<MockHost>>>, Arc<MockHost>) {
        let host = Arc::new(MockHost::new());
        let mgr = Arc::new(SessionManager::new(Arc::clone(&host), policy));
        (mgr, host)
    }

    #[test]
    fn test_sweep_login_during_sweep_is_not_undone() {
        let (mgr, host) = shared_manager(timeout_policy(1_200));
        host.connect("alice", "1");
        mgr.create("alice", "1").unwrap();

        // Alice logs in after the sweep copied her logged-out session.
        let racer = Arc::downgrade(&mgr);
        host.on_next_lookup(move || {
            if let Some(mgr) = racer.upgrade() {
                mgr.start("alice").unwrap();
            }
        });
        let report = mgr.sweep(1);

        assert_eq!(report.countdowns, 0);
        let alice = session(&mgr, "alice");
        assert_eq!(alice.status(), HEARTBEAT_STATUS);
        assert!(mgr.is_alive("alice").unwrap());
    }

    #[test]
    fn test_sweep_logout_during_sweep_is_not_undone() {
        let (mgr, host) = shared_manager(SessionPolicy::default());
        host.connect("alice", "1");
        mgr.start("alice").unwrap();

        // Alice logs out after the sweep copied her logged-in session.
        let racer = Arc::downgrade(&mgr);
        host.on_next_lookup(move || {
            if let Some(mgr) = racer.upgrade() {
                mgr.end("alice").unwrap();
            }
        });
        let report = mgr.sweep(1);

        assert_eq!(report.heartbeats, 0);
        assert_eq!(session(&mgr, "alice").status(), LOGGED_OUT_STATUS);
        assert!(!mgr.is_alive("alice").unwrap());
    }

    #[test]
    fn test_sweep_login_during_sweep_is_not_kicked() {
        let (mgr, host) = shared_manager(timeout_policy(1));
        host.connect("alice", "1");
        mgr.create("alice", "1").unwrap();

        let racer = Arc::downgrade(&mgr);
        host.on_next_lookup(move || {
            if let Some(mgr) = racer.upgrade() {
                mgr.start("alice").unwrap();
            }
        });
        let report = mgr.sweep(1);

        assert_eq!(report.timeouts, 0);
        assert_eq!(host.kick_count(), 0);
    }

    // =====================================================================
    // Failure isolation
    // =====================================================================

    #[test]
    fn test_sweep_panicking_observer_does_not_stop_sweep() {
        let (mgr, _) = manager_with(SessionPolicy::default());
        for name in ["alice", "bob", "carol"] {
            mgr.create(name, "1").unwrap();
        }
        mgr.observers().register_for(
            SessionEventKind::Destroy,
            |e: &mut SessionEvent| {
                if e.username().as_str() == "bob" {
                    panic!("observer blew up");
                }
            },
        );

        let report = mgr.sweep(1);

        assert_eq!(report.visited, 3);
        assert_eq!(report.failures, 1);
        assert_eq!(report.destroyed, 2);
        assert!(mgr.get("bob").unwrap().is_some());
        assert!(mgr.get("alice").unwrap().is_none());
        assert!(mgr.get("carol").unwrap().is_none());
    }

    #[test]
    fn test_sweep_empty_store_is_quiet() {
        let (mgr, _) = manager_with(SessionPolicy::default());
        let report = mgr.sweep(1);
        assert_eq!(report, SweepReport::default());
        assert!(report.is_quiet());
    }

    #[test]
    fn test_sweep_uses_reloaded_policy() {
        let (mgr, host) = manager_with(SessionPolicy::default());
        host.connect("alice", "1");
        mgr.start("alice").unwrap();

        mgr.set_policy(idle_policy(0));
        mgr.sweep(1);

        assert!(!mgr.is_alive("alice").unwrap());
    }

    #[test]
    fn test_panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
