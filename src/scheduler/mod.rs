//! Publish scheduler
//!
//! [`PublishScheduler::run`] alternates between two states for the life of
//! the process:
//!
//! - **AwaitingConnection** - re-checks connectivity every
//!   [`CONNECT_POLL_INTERVAL`]
//! - **Publishing** - runs every [`PublishJob`] in order, sleeps for the
//!   current interval, repeats while connected
//!
//! A quit command clears `auto_reconnect`, which ends the loop the next time
//! it is checked; the sleep in progress is cut short through [`SchedulerState`].
//!
//! The first cycle of every broker session is a discovery cycle: jobs also
//! publish their Home Assistant discovery configs, so the entities survive a
//! broker that lost its retained messages.

pub mod job;

pub use job::{CycleContext, PublishJob};

use crate::broker::BrokerHandle;
use crate::cycle_span;
use crate::discovery::DiscoveryContext;
use crate::metrics::MetricSource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn, Instrument};

/// How often connectivity is re-checked while disconnected
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Scheduler state shared with the control handlers
#[derive(Debug)]
pub struct SchedulerState {
    interval_secs: AtomicU64,
    default_interval_secs: u64,
    first_cycle_completed: AtomicBool,
    auto_reconnect: AtomicBool,
    wake: Notify,
}

impl SchedulerState {
    pub fn new(default_interval_secs: u64) -> Self {
        Self {
            interval_secs: AtomicU64::new(default_interval_secs),
            default_interval_secs,
            first_cycle_completed: AtomicBool::new(false),
            auto_reconnect: AtomicBool::new(true),
            wake: Notify::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs())
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.load(Ordering::SeqCst)
    }

    pub fn default_interval_secs(&self) -> u64 {
        self.default_interval_secs
    }

    /// Set the interval used from the next sleep on; returns whether it changed
    pub fn set_interval(&self, secs: u64) -> bool {
        self.interval_secs.swap(secs, Ordering::SeqCst) != secs
    }

    /// Fall back to the configured default interval
    pub fn reset_interval(&self) {
        self.interval_secs
            .store(self.default_interval_secs, Ordering::SeqCst);
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Terminal: the loop ends and never waits for a reconnect again
    pub fn disable_auto_reconnect(&self) {
        self.auto_reconnect.store(false, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is not sleeping right now
        self.wake.notify_one();
    }

    pub fn first_cycle_completed(&self) -> bool {
        self.first_cycle_completed.load(Ordering::SeqCst)
    }

    fn set_first_cycle_completed(&self, completed: bool) {
        self.first_cycle_completed
            .store(completed, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless woken by a quit first
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => debug!("Sleep interrupted"),
        }
    }
}

/// The wait-then-publish loop
pub struct PublishScheduler {
    broker: Arc<dyn BrokerHandle>,
    metrics: Arc<dyn MetricSource>,
    state: Arc<SchedulerState>,
    base_topic: String,
    discovery: Option<DiscoveryContext>,
    jobs: Vec<Box<dyn PublishJob>>,
    cycles: AtomicU64,
}

impl PublishScheduler {
    pub fn new(
        broker: Arc<dyn BrokerHandle>,
        metrics: Arc<dyn MetricSource>,
        state: Arc<SchedulerState>,
        base_topic: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            metrics,
            state,
            base_topic: base_topic.into(),
            discovery: None,
            jobs: Vec::new(),
            cycles: AtomicU64::new(0),
        }
    }

    /// Enable discovery configs on the first cycle of each session
    pub fn with_discovery(mut self, discovery: DiscoveryContext) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_jobs(mut self, jobs: Vec<Box<dyn PublishJob>>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.name()).collect()
    }

    /// Completed cycles so far
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Run until a quit disables auto-reconnect
    pub async fn run(&self) {
        let mut session = 0;

        while self.state.auto_reconnect() {
            if !self.broker.is_connected() {
                debug!("Trying to connect...");
                self.state.sleep(CONNECT_POLL_INTERVAL).await;
                continue;
            }

            info!(
                "Publish period is set to {} seconds.",
                self.state.interval_secs()
            );

            while self.broker.is_connected() && self.state.auto_reconnect() {
                let current = self.broker.session();
                if current != session {
                    // New broker session, announce everything again
                    session = current;
                    self.state.set_first_cycle_completed(false);
                }

                self.publish_all().await;
                self.state.sleep(self.state.interval()).await;
            }

            if self.state.auto_reconnect() {
                info!("Reconnecting...");
            }
        }

        warn!("Main loop ended");
    }

    /// Run every job once, in order
    pub async fn publish_all(&self) {
        let cycle = self.cycles.load(Ordering::SeqCst) + 1;
        let discovery = if self.state.first_cycle_completed() {
            None
        } else {
            self.discovery.as_ref()
        };

        let ctx = CycleContext::new(
            self.broker.as_ref(),
            self.metrics.as_ref(),
            &self.base_topic,
            discovery,
            cycle,
        );

        let span = cycle_span!(cycle = cycle, discovery = discovery.is_some());
        async {
            debug!("...publishing");
            for job in &self.jobs {
                if let Err(e) = job.run(&ctx).await {
                    if e.is_metric_unavailable() {
                        warn!(job = job.name(), "{}", e);
                    } else {
                        error!(job = job.name(), "{}", e);
                    }
                }
            }
        }
        .instrument(span)
        .await;

        self.cycles.store(cycle, Ordering::SeqCst);

        let failures = ctx.discovery_failures();
        if ctx.is_discovery_cycle() && failures > 0 {
            warn!(
                "{} discovery configs were not published, announcing again next cycle",
                failures
            );
        } else {
            self.state.set_first_cycle_completed(true);
        }
    }
}
