//! Publish job abstraction

use crate::broker::BrokerHandle;
use crate::discovery::DiscoveryContext;
use crate::error::S2mResult;
use crate::metrics::MetricSource;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// What a job sees during one publish cycle
pub struct CycleContext<'a> {
    pub broker: &'a dyn BrokerHandle,
    pub metrics: &'a dyn MetricSource,
    pub base_topic: &'a str,
    /// Present only on discovery cycles (first cycle of every broker session)
    pub discovery: Option<&'a DiscoveryContext>,
    /// 1-based cycle counter over the process lifetime
    pub cycle: u64,
    discovery_failures: AtomicUsize,
}

impl<'a> CycleContext<'a> {
    pub fn new(
        broker: &'a dyn BrokerHandle,
        metrics: &'a dyn MetricSource,
        base_topic: &'a str,
        discovery: Option<&'a DiscoveryContext>,
        cycle: u64,
    ) -> Self {
        Self {
            broker,
            metrics,
            base_topic,
            discovery,
            cycle,
            discovery_failures: AtomicUsize::new(0),
        }
    }

    pub fn is_discovery_cycle(&self) -> bool {
        self.discovery.is_some()
    }

    /// A discovery config of this cycle did not make it to the broker
    pub fn record_discovery_failure(&self) {
        self.discovery_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn discovery_failures(&self) -> usize {
        self.discovery_failures.load(Ordering::SeqCst)
    }
}

/// One named unit of work run once per cycle, in registration order
///
/// Jobs are best-effort: a failing metric is logged and skipped, the job
/// only returns an error when it could not do anything at all.
#[async_trait]
pub trait PublishJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &CycleContext<'_>) -> S2mResult<()>;
}
