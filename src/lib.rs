//! system2mqtt - host metrics over MQTT
//!
//! Periodically samples host metrics (mount state, disk usage, CPU load and
//! temperature, memory, fan speed, disk temperatures) and republishes them to
//! an MQTT broker, optionally announcing each metric to Home Assistant through
//! MQTT discovery.
//!
//! # Overview
//!
//! - [`broker`] - broker connection lifecycle: liveness (last will), topic
//!   dispatch and the connection state machine
//! - [`transport`] - MQTT transport built on `rumqttc`
//! - [`scheduler`] - the wait-then-publish loop
//! - [`control`] - handlers for inbound control topics (period, quit, power)
//! - [`publishers`] - the per-cycle metric publish jobs
//! - [`metrics`] - metric sources (local host via `sysinfo`, Proxmox VE)
//! - [`discovery`] - Home Assistant discovery payloads
//!
//! # Quick Start
//!
//! ```rust
//! use system2mqtt::topics::TopicBuilder;
//!
//! let base = "s2m/host1";
//! assert_eq!(TopicBuilder::liveness(base), "s2m/host1/LWT");
//! assert_eq!(TopicBuilder::mount_state(base, "sysroot"), "s2m/host1/disks/mount/sysroot");
//! ```

pub mod broker;
pub mod config;
pub mod control;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod publishers;
pub mod scheduler;
pub mod testing;
pub mod topics;
pub mod transport;

pub use broker::{BrokerConnection, BrokerHandle};
pub use config::*;
pub use error::{S2mError, S2mResult};
pub use scheduler::{PublishJob, PublishScheduler, SchedulerState};
pub use transport::mqtt::MqttTransport;
