//! `SessionService` builder and reconciler task.
//!
//! This is the entry point for embedding Gatehouse in a game server. It
//! ties the layers together: config → session manager → tick scheduler
//! → snapshot files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gatehouse_session::{
    Host, Outcome, SessionError, SessionManager, SessionPolicy, Username,
};
use gatehouse_snapshot::{consume_snapshot, export_sessions};
use gatehouse_tick::TickScheduler;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::{GatehouseConfig, GatehouseError};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`SessionService`].
///
/// # Example
///
/// ```rust,ignore
/// use gatehouse::prelude::*;
///
/// let service = SessionServiceBuilder::new()
///     .config(GatehouseConfig::load("gatehouse.toml")?)
///     .data_dir("plugins/gatehouse")
///     .build(my_host);
/// service.restore_after_restart().ok();
/// service.adopt_online_players();
/// let reconciler = service.spawn_reconciler();
/// ```
pub struct SessionServiceBuilder {
    config: GatehouseConfig,
    data_dir: PathBuf,
}

impl SessionServiceBuilder {
    /// Creates a builder with default config and the current directory as
    /// data directory.
    pub fn new() -> Self {
        Self {
            config: GatehouseConfig::default(),
            data_dir: PathBuf::from("."),
        }
    }

    pub fn config(mut self, config: GatehouseConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory the restart snapshot is written to.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Builds the service around `host`. No task is started yet.
    pub fn build<H: Host>(self, host: H) -> SessionService<H> {
        let manager = Arc::new(SessionManager::new(host, self.config.policy.clone()));
        info!(data_dir = %self.data_dir.display(), "session service built");
        SessionService {
            manager,
            config: self.config,
            data_dir: self.data_dir,
        }
    }
}

impl Default for SessionServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Owns the session manager and everything around it.
///
/// Foreground handlers (join, quit, login commands) go through
/// [`manager()`](Self::manager) or the `on_*` hooks; the periodic sweep
/// runs on the task started by [`spawn_reconciler()`](Self::spawn_reconciler).
pub struct SessionService<H: Host> {
    manager: Arc<SessionManager<H>>,
    config: GatehouseConfig,
    data_dir: PathBuf,
}

impl<H: Host> SessionService<H> {
    /// The shared session manager.
    pub fn manager(&self) -> &Arc<SessionManager<H>> {
        &self.manager
    }

    /// The configuration the service was built with. Policy changes made
    /// through [`reload_policy`](Self::reload_policy) are not reflected.
    pub fn config(&self) -> &GatehouseConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Where the restart snapshot lives.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.config.storage.sessions.filename)
    }

    /// Replaces the live policy. The next sweep uses it.
    pub fn reload_policy(&self, policy: SessionPolicy) {
        self.manager.set_policy(policy);
        info!("session policy reloaded");
    }

    // -----------------------------------------------------------------------
    // Player hooks
    // -----------------------------------------------------------------------

    /// A player connected: track them and, if they must log in, ask them
    /// to.
    pub fn on_join(&self, username: &str, ip: &str) -> Result<Outcome, SessionError> {
        let name = Username::parse(username)?;
        let outcome = self.manager.create(name.as_str(), ip)?;
        if self.manager.host().is_forced_to_log_in(name.as_str()) {
            self.manager.host().prompt_login(name.as_str());
        }
        Ok(outcome)
    }

    /// A player disconnected. The session stays until the next sweep
    /// notices they are gone.
    pub fn on_quit(&self, username: &str) {
        trace!(username, "player quit, session left for the sweep");
    }

    /// Runs [`on_join`](Self::on_join) for everyone already online.
    /// Returns how many players were handled.
    pub fn adopt_online_players(&self) -> usize {
        let host = self.manager.host();
        let mut adopted = 0;
        for name in host.online_players() {
            let ip = host.player_ip(&name).unwrap_or_default();
            match self.on_join(&name, &ip) {
                Ok(_) => adopted += 1,
                Err(e) => warn!(username = %name, error = %e, "could not adopt player"),
            }
        }
        info!(count = adopted, "online players adopted");
        adopted
    }

    /// Destroys the session of everyone online. Returns how many were
    /// destroyed; sessions whose destroy was cancelled are not counted.
    pub fn release_online_players(&self) -> usize {
        let mut released = 0;
        for name in self.manager.host().online_players() {
            match self.manager.destroy(&name) {
                Ok(Outcome::NotCancelled) => released += 1,
                Ok(Outcome::Cancelled) => {
                    debug!(username = %name, "release vetoed by observer");
                }
                Err(e) => warn!(username = %name, error = %e, "could not release player"),
            }
        }
        info!(count = released, "online players released");
        released
    }

    // -----------------------------------------------------------------------
    // Restart persistence
    // -----------------------------------------------------------------------

    /// Writes every session to [`snapshot_path()`](Self::snapshot_path).
    pub fn export_for_restart(&self) -> Result<usize, GatehouseError> {
        let path = self.snapshot_path();
        export_sessions(self.manager.store(), &path)
            .inspect_err(|e| warn!(path = %path.display(), error = %e, "session export failed"))
            .map_err(Into::into)
    }

    /// Imports and deletes the snapshot left by a previous
    /// [`export_for_restart`](Self::export_for_restart), if any.
    pub fn restore_after_restart(&self) -> Result<Option<usize>, GatehouseError> {
        let path = self.snapshot_path();
        consume_snapshot(self.manager.store(), &path)
            .inspect_err(|e| warn!(path = %path.display(), error = %e, "session import failed"))
            .map_err(Into::into)
    }

    // -----------------------------------------------------------------------
    // Reconciler
    // -----------------------------------------------------------------------

    /// Spawns the task that sweeps the sessions once per period.
    ///
    /// Must be called from inside a Tokio runtime. The task runs until the
    /// returned handle is shut down or dropped.
    pub fn spawn_reconciler(&self) -> ReconcilerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = TickScheduler::new(self.config.tick_config());
        let manager = Arc::clone(&self.manager);
        let task = tokio::spawn(run_reconciler(manager, scheduler, shutdown_rx));
        ReconcilerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running reconciler task.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl ReconcilerHandle {
    /// Stops the task and waits for the sweep in progress, if any, to
    /// finish. Returns the number of sweeps performed.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(sweeps) => sweeps,
            Err(e) => {
                error!(error = %e, "reconciler task failed");
                0
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run_reconciler<H: Host>(
    manager: Arc<SessionManager<H>>,
    mut scheduler: TickScheduler,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    info!(
        period_ticks = scheduler.config().period_ticks,
        "reconciler started"
    );

    loop {
        tokio::select! {
            // Also fires when the handle is dropped.
            _ = shutdown.changed() => break,
            tick = scheduler.wait_for_tick() => {
                manager.sweep(tick.period_ticks);
                scheduler.record_tick_end();
            }
        }
    }

    let sweeps = scheduler.tick_count();
    info!(sweeps, "reconciler stopped");
    sweeps
}
