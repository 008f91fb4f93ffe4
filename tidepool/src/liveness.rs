//! Heartbeat sweeps that evict dead connections.
//!
//! Every `ping_interval` the monitor pings every registered connection
//! (a *sweep*). `pong_delay` after that same sweep it walks the sweep's
//! snapshot again (the *check*):
//!
//! ```text
//!  t0            t0+ping      t0+2*ping            t0+pong_delay
//!  │ sweep 1     │ sweep 2    │ sweep 3    ...     │ check of sweep 1
//!  │ ping all    │ ping all   │ ping all           │ still not healthy?
//!  │ pings = 1   │ pings = 2  │ pings = 3          │   mark Unhealthy
//!  ▼             ▼            ▼                    ▼   pending_pings > threshold? evict
//! ```
//!
//! The check reads each connection's live `pending_pings`, which keeps
//! growing while later sweeps run. A pong at any time resets it. With the
//! default tuning a silent connection is evicted by the first check,
//! 26 s after the heartbeat started. Evictions of one check happen in bulk.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::HeartbeatConfig;
use crate::connection::ConnectionHandle;
use crate::registry::ConnectionRegistry;
use crate::transport::Transport;
use crate::types::SocketKey;

/// One connection as seen by a ping sweep.
#[derive(Debug, Clone)]
pub struct SweepEntry {
    /// Key the connection was registered under at sweep time.
    pub key: SocketKey,
    /// The pinged connection.
    pub connection: ConnectionHandle,
    /// Pending pings right after this sweep's ping, for diagnostics.
    pub pings: u32,
}

/// Connections pinged by one sweep, checked again after the pong delay.
#[derive(Debug, Clone, Default)]
pub struct SweepSnapshot {
    entries: Vec<SweepEntry>,
}

impl SweepSnapshot {
    /// Pinged connections.
    pub fn entries(&self) -> &[SweepEntry] {
        &self.entries
    }

    /// Number of pinged connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the sweep found no connection.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Periodic heartbeat over the registry.
#[derive(Debug)]
pub struct LivenessMonitor {
    registry: Rc<ConnectionRegistry>,
    transport: Rc<dyn Transport>,
    config: HeartbeatConfig,
    task: RefCell<Option<JoinHandle<()>>>,
}

impl LivenessMonitor {
    /// Monitor over `registry`, pinging through `transport`.
    pub fn new(
        registry: Rc<ConnectionRegistry>,
        transport: Rc<dyn Transport>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
            task: RefCell::new(None),
        }
    }

    /// Heartbeat tuning.
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Ping every registered connection.
    pub fn ping_sweep(&self) -> SweepSnapshot {
        let entries: Vec<SweepEntry> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(key, connection)| {
                let pings = connection.mark_ping_sent();
                self.transport.ping(&connection);
                SweepEntry {
                    key,
                    connection,
                    pings,
                }
            })
            .collect();
        tracing::debug!(connections = entries.len(), "heartbeat sweep");
        SweepSnapshot { entries }
    }

    /// Check a past sweep: mark silent connections unhealthy and evict
    /// those whose pending pings exceed the threshold. Returns the evicted
    /// keys.
    pub fn evict_sweep(&self, sweep: &SweepSnapshot) -> Vec<SocketKey> {
        let threshold = self.config.unhealthy_threshold;
        let mut evicted = Vec::new();
        for entry in &sweep.entries {
            let connection = &entry.connection;
            if !self.registry.is_current(&entry.key, connection) {
                continue;
            }
            if connection.is_healthy() {
                continue;
            }
            connection.mark_unhealthy();
            if connection.pending_pings() > threshold {
                self.transport.close(connection);
                self.registry.remove_connection(connection);
                evicted.push(entry.key.clone());
            }
        }
        if !evicted.is_empty() {
            tracing::info!(
                evicted = evicted.len(),
                threshold,
                "evicted unresponsive connections"
            );
        }
        evicted
    }

    /// A pong arrived on `connection`.
    pub fn record_pong(&self, connection: &ConnectionHandle) {
        connection.mark_pong();
        tracing::trace!(connection_id = %connection.id(), "pong");
    }

    /// Run sweeps and checks on the local task set until [`stop`](Self::stop).
    pub fn spawn(self: &Rc<Self>) {
        let monitor = Rc::clone(self);
        let task = tokio::task::spawn_local(async move { monitor.run().await });
        if let Some(previous) = self.task.borrow_mut().replace(task) {
            previous.abort();
        }
    }

    /// Stop the background loop.
    pub fn stop(&self) {
        if let Some(task) = self.task.borrow_mut().take() {
            task.abort();
        }
    }

    async fn run(&self) {
        let ping_interval = self.config.ping_interval();
        let pong_delay = self.config.pong_delay();
        let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut checks: VecDeque<(Instant, SweepSnapshot)> = VecDeque::new();

        tracing::info!(?ping_interval, ?pong_delay, "heartbeat started");
        loop {
            let next_check = checks.front().map(|(deadline, _)| *deadline);
            tokio::select! {
                biased;
                () = sleep_until(next_check) => {
                    if let Some((_, sweep)) = checks.pop_front() {
                        self.evict_sweep(&sweep);
                    }
                }
                _ = ticker.tick() => {
                    let sweep = self.ping_sweep();
                    checks.push_back((Instant::now() + pong_delay, sweep));
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
