//! A scripted lobby: a few players join, one logs in, one idles, one
//! never logs in, then the server "restarts" and the logins survive.
//!
//! Run with `RUST_LOG=debug cargo run -p lobby [config.toml]`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gatehouse::prelude::*;
use tracing::info;

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Lobby {
    players: Mutex<HashMap<String, String>>,
}

impl Lobby {
    fn connect(&self, name: &str, ip: &str) {
        if let Ok(mut players) = self.players.lock() {
            players.insert(name.to_lowercase(), ip.to_string());
        }
    }
}

impl Host for Lobby {
    fn player_ip(&self, username: &str) -> Option<String> {
        self.players.lock().ok()?.get(username).cloned()
    }

    fn online_players(&self) -> Vec<String> {
        self.players
            .lock()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn kick(&self, username: &str, message: &str) {
        info!(username, message, "lobby: kick");
        if let Ok(mut players) = self.players.lock() {
            players.remove(username);
        }
    }

    fn send_message(&self, username: &str, message: &str) {
        info!(username, message, "lobby: message");
    }

    fn prompt_login(&self, username: &str) {
        info!(username, "lobby: please /login <password>");
    }

    fn is_forced_to_log_in(&self, _username: &str) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

fn demo_config() -> GatehouseConfig {
    let mut config = GatehouseConfig::default();
    // Short thresholds so the demo finishes in a few seconds.
    config.policy.force_login.timeout.value = 40;
    config.policy.automatic_logout.enabled = true;
    config.policy.automatic_logout.inactivity_time = 30;
    config
}

#[tokio::main]
async fn main() -> Result<(), GatehouseError> {
    gatehouse::telemetry::init();

    let config = match std::env::args().nth(1) {
        Some(path) => GatehouseConfig::load(path)?,
        None => demo_config(),
    };
    let data_dir = std::env::temp_dir().join("gatehouse-lobby");
    std::fs::create_dir_all(&data_dir).map_err(gatehouse::snapshot::SnapshotError::from)?;

    let lobby = Arc::new(Lobby::default());
    lobby.connect("Alice", "10.0.0.1");
    lobby.connect("Bob", "10.0.0.2");
    lobby.connect("Carol", "10.0.0.3");

    let service = SessionServiceBuilder::new()
        .config(config.clone())
        .data_dir(&data_dir)
        .build(Arc::clone(&lobby));
    service.restore_after_restart().ok();
    service.adopt_online_players();

    service.manager().observers().register_for(
        SessionEventKind::Start,
        |event: &mut SessionEvent| info!(username = %event.username(), "logged in"),
    );

    let reconciler = service.spawn_reconciler();

    // Alice and Bob log in; Carol never does. Alice keeps moving.
    service.manager().start("alice")?;
    service.manager().start("bob")?;
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        service.manager().reset_inactivity("alice")?;
    }

    let sweeps = reconciler.shutdown().await;
    info!(sweeps, sessions = service.manager().len(), "first run finished");
    for (username, session) in service.manager().sessions() {
        info!(%username, alive = session.is_alive(), status = session.status(), "session");
    }

    // Restart: write the table out, start over, read it back.
    service.export_for_restart()?;
    service.release_online_players();
    drop(service);

    let service = SessionServiceBuilder::new()
        .config(config)
        .data_dir(&data_dir)
        .build(Arc::clone(&lobby));
    let restored = service.restore_after_restart()?;
    service.adopt_online_players();
    info!(?restored, alice_alive = service.manager().is_alive("alice")?, "after restart");

    Ok(())
}
