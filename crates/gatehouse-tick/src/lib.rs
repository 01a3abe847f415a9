//! Fixed-period tick scheduler for Gatehouse.
//!
//! The game server measures time in ticks (20 per second on most hosts),
//! and every session threshold is expressed in them. This crate turns
//! that into a Tokio timer: it fires once every `period_ticks` host ticks
//! and reports how many ticks each firing stands for.
//!
//! # Integration
//!
//! The scheduler sits inside the reconciler task's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         tick = scheduler.wait_for_tick() => {
//!             manager.sweep(tick.period_ticks);
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```

use std::time::{Duration, Instant};

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a firing comes late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Forget the missed firings and schedule the next one a full period
    /// from now.
    #[default]
    Skip,
    /// Keep the original cadence: the next firing is one period after the
    /// missed deadline, even if that is already in the past.
    Drop,
}

/// Configuration for the tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Host ticks per second.
    pub tick_rate_hz: u32,
    /// Host ticks between two firings.
    pub period_ticks: u64,
    /// Overrun handling policy.
    pub policy: TickPolicy,
    /// Fraction (0.0–1.0) of the period the work may take before a
    /// warning is logged. Default: 0.80.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            period_ticks: 1,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
        }
    }
}

impl TickConfig {
    /// Highest supported host tick rate.
    pub const MAX_TICK_RATE_HZ: u32 = 1_000;

    /// Longest supported period, in host ticks.
    pub const MAX_PERIOD_TICKS: u64 = u32::MAX as u64;

    /// A config firing every `period_ticks` at `tick_rate_hz`.
    pub fn new(tick_rate_hz: u32, period_ticks: u64) -> Self {
        Self {
            tick_rate_hz,
            period_ticks,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]. Rules:
    /// - `tick_rate_hz` clamped to `1..=MAX_TICK_RATE_HZ`.
    /// - `period_ticks` clamped to `1..=MAX_PERIOD_TICKS`.
    /// - `budget_warn_threshold` clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        let rate = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
        if rate != self.tick_rate_hz {
            warn!(
                rate = self.tick_rate_hz,
                clamped = rate,
                "tick_rate_hz out of range, clamping"
            );
            self.tick_rate_hz = rate;
        }
        let period = self.period_ticks.clamp(1, Self::MAX_PERIOD_TICKS);
        if period != self.period_ticks {
            warn!(
                period_ticks = self.period_ticks,
                clamped = period,
                "period_ticks out of range, clamping"
            );
            self.period_ticks = period;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Wall-clock length of one host tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    /// Wall-clock length of one firing period.
    pub fn period(&self) -> Duration {
        let ticks = self.period_ticks.clamp(1, Self::MAX_PERIOD_TICKS);
        self.tick_duration().saturating_mul(ticks as u32)
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Firing number, starting at 1.
    pub tick: u64,
    /// Host ticks this firing stands for. Always the configured period;
    /// work should advance its counters by this, not by wall-clock time.
    pub period_ticks: u64,
    /// `true` if the firing woke up more than 10% of a period late.
    pub overrun: bool,
    /// Whole periods lost to the overrun (always 0 under `Drop`).
    pub periods_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-period scheduler. One per reconciler task.
pub struct TickScheduler {
    config: TickConfig,
    period: Duration,
    tick_count: u64,
    next_tick: TokioInstant,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
    paused: bool,
}

impl TickScheduler {
    /// Creates a scheduler whose first firing is one period from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.period();

        debug!(
            rate_hz = config.tick_rate_hz,
            period_ticks = config.period_ticks,
            period_ms = period.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            "tick scheduler created"
        );

        Self {
            next_tick: TokioInstant::now() + period,
            config,
            period,
            tick_count: 0,
            tick_start: None,
            paused: false,
        }
    }

    /// Waits until the next firing is due.
    ///
    /// While paused this future pends forever, which lets `tokio::select!`
    /// keep serving its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let deadline = self.next_tick;
        time::sleep_until(deadline).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(deadline);
        let overrun = late_by > self.period / 10;
        let mut periods_skipped = 0u64;

        self.next_tick = match self.config.policy {
            TickPolicy::Skip => {
                if overrun {
                    periods_skipped =
                        (late_by.as_nanos() / self.period.as_nanos().max(1)) as u64;
                    if periods_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = periods_skipped,
                            late_ms = late_by.as_secs_f64() * 1000.0,
                            "tick overrun, skipping ahead"
                        );
                    }
                }
                now + self.period
            }
            TickPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "tick overrun, keeping original cadence"
                    );
                }
                deadline + self.period
            }
        };

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            period_ticks: self.config.period_ticks,
            overrun,
            periods_skipped,
        }
    }

    /// Records that the work for the current firing has finished and
    /// warns if it used more than the configured share of the period.
    ///
    /// Returns how long the work took, or `None` without a prior
    /// `wait_for_tick`.
    pub fn record_tick_end(&mut self) -> Option<Duration> {
        let start = self.tick_start.take()?;
        let elapsed = start.elapsed();

        let utilization = elapsed.as_secs_f64() / self.period.as_secs_f64();
        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.period.as_secs_f64() * 1000.0,
                "tick work approaching period length"
            );
        }
        Some(elapsed)
    }

    /// Stops firing until [`resume`](Self::resume). Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Resumes firing, one full period from now. Idempotent.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next_tick = TokioInstant::now() + self.period;
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Firings so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The validated configuration.
    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    /// Wall-clock length of one period.
    pub fn period(&self) -> Duration {
        self.period
    }
}
