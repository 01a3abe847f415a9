//! # Gatehouse
//!
//! Login session tracking for game servers.
//!
//! Gatehouse keeps one session per connected player, knows whether that
//! player has logged in, logs idle players out, kicks players who never
//! log in, and carries logins across a server restart. The game server
//! plugs in through the [`Host`](gatehouse_session::Host) trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatehouse::prelude::*;
//!
//! // Implement Host for your server, then:
//! // let service = SessionServiceBuilder::new()
//! //     .config(GatehouseConfig::load("gatehouse.toml")?)
//! //     .data_dir("data")
//! //     .build(my_host);
//! // let reconciler = service.spawn_reconciler();
//! ```

mod config;
mod error;
mod service;
pub mod telemetry;

pub use config::{ConfigError, GatehouseConfig, SessionsFile, StorageSettings, TickSettings};
pub use error::GatehouseError;
pub use service::{ReconcilerHandle, SessionService, SessionServiceBuilder};

pub use gatehouse_session as session;
pub use gatehouse_snapshot as snapshot;
pub use gatehouse_tick as tick;

/// Everything needed to embed the service.
pub mod prelude {
    pub use crate::{
        ConfigError, GatehouseConfig, GatehouseError, ReconcilerHandle, SessionService,
        SessionServiceBuilder,
    };
    pub use gatehouse_session::{
        Host, ObserverPriority, Outcome, Session, SessionEvent, SessionEventKind, SessionManager,
        SessionPolicy, SweepReport, Username,
    };
}
