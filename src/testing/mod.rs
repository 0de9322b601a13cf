//! Testing utilities and mock implementations
//!
//! Mocks for exercising the broker connection, scheduler and control
//! handlers without an MQTT broker or real sensors.
//!
//! ```rust
//! use std::sync::Arc;
//! use system2mqtt::publishers::standard_jobs;
//! use system2mqtt::scheduler::{PublishScheduler, SchedulerState};
//! use system2mqtt::testing::{MockBrokerHandle, MockMetricSource};
//!
//! # tokio_test::block_on(async {
//! let broker = Arc::new(MockBrokerHandle::new());
//! let scheduler = PublishScheduler::new(
//!     broker.clone(),
//!     Arc::new(MockMetricSource::new()),
//!     Arc::new(SchedulerState::new(60)),
//!     "s2m/host1",
//! )
//! .with_jobs(standard_jobs(None, false));
//!
//! scheduler.publish_all().await;
//! assert!(broker.published().iter().any(|m| m.topic == "s2m/host1/memory"));
//! # });
//! ```

pub mod mocks;

pub use mocks::*;
