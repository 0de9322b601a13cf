//! Control topic handlers
//!
//! - `<base>/tele/PUBLISH_PERIOD` - integer seconds, applied at the next sleep
//! - `<base>/callbacks/s2m_quit` - `1` ends the publish lifecycle
//! - `<base>/callbacks/shutdown`, `<base>/callbacks/reboot` - `1` powers the
//!   host off or restarts it
//!
//! Trigger handlers acknowledge by publishing an empty payload to their own
//! topic. That echo comes back to us and is ignored like any other
//! non-trigger payload. Retained triggers are ignored too, otherwise a stale
//! retained `1` would power the host off on every connect.

use crate::broker::{BrokerConnection, BrokerHandle, InboundMessage, TopicHandler};
use crate::error::{S2mError, S2mResult};
use crate::scheduler::SchedulerState;
use crate::topics::TopicBuilder;
use crate::transport::{QoS, Transport};
use std::fmt;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Payload that fires a trigger handler
pub const TRIGGER_PAYLOAD: &str = "1";

/// Liveness payload published by the quit sequence
pub const EXITED_PAYLOAD: &str = "exited";

pub const QUIT_CALLBACK: &str = "s2m_quit";
pub const SHUTDOWN_CALLBACK: &str = "shutdown";
pub const REBOOT_CALLBACK: &str = "reboot";

/// Parse a publish period payload: a positive integer number of seconds
pub fn parse_period(topic: &str, payload: &str) -> S2mResult<u64> {
    match payload.trim().parse::<u64>() {
        Ok(0) => Err(S2mError::invalid_payload(topic, "publish period must be positive")),
        Ok(secs) => Ok(secs),
        Err(e) => Err(S2mError::invalid_payload(
            topic,
            format!("'{}' is not a number of seconds: {}", payload.trim(), e),
        )),
    }
}

/// Sets the publish interval; bad payloads reset it to the configured default
pub struct PublishPeriodHandler {
    state: Arc<SchedulerState>,
}

impl PublishPeriodHandler {
    pub fn new(state: Arc<SchedulerState>) -> Self {
        Self { state }
    }
}

impl TopicHandler for PublishPeriodHandler {
    fn handle(&self, message: &InboundMessage, _broker: &dyn BrokerHandle) -> S2mResult<()> {
        match parse_period(&message.topic, &message.payload_str()) {
            Ok(secs) => {
                if self.state.set_interval(secs) {
                    info!("Publish period has been set to {} seconds.", secs);
                }
                Ok(())
            }
            Err(e) => {
                self.state.reset_interval();
                warn!(
                    "Publish period reset to {} seconds",
                    self.state.default_interval_secs()
                );
                Err(e)
            }
        }
    }
}

/// Is this a live (non-retained) trigger? Logs why not otherwise.
fn is_trigger(title: &str, message: &InboundMessage) -> bool {
    let payload = message.payload_str();
    if payload != TRIGGER_PAYLOAD {
        warn!("[{}]: '{}': Not {} received", title, payload, TRIGGER_PAYLOAD);
        return false;
    }
    if message.retain {
        warn!("[{}]: ignoring retained trigger on {}", title, message.topic);
        return false;
    }
    true
}

fn acknowledge(broker: &dyn BrokerHandle, topic: &str) {
    if let Err(e) = broker.publish(topic, Vec::new(), QoS::AtMostOnce, false) {
        error!("Failed to acknowledge {}: {}", topic, e);
    }
}

/// Ends the publish lifecycle
pub struct QuitHandler {
    state: Arc<SchedulerState>,
}

impl QuitHandler {
    pub fn new(state: Arc<SchedulerState>) -> Self {
        Self { state }
    }
}

impl TopicHandler for QuitHandler {
    fn handle(&self, message: &InboundMessage, broker: &dyn BrokerHandle) -> S2mResult<()> {
        if !is_trigger("Quit", message) {
            return Ok(());
        }

        info!("Quit called....");
        self.state.disable_auto_reconnect();

        acknowledge(broker, &message.topic);
        if let Err(e) = broker.publish_liveness(EXITED_PAYLOAD) {
            error!("Failed to publish terminal liveness: {}", e);
        }
        broker.stop()?;
        Ok(())
    }
}

const SHUTDOWN_ARGS: &[&str] = &["-h", "now"];
const REBOOT_ARGS: &[&str] = &[];

/// Host power operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Shutdown,
    Reboot,
}

impl PowerAction {
    /// Program and arguments that perform the action
    pub fn command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            PowerAction::Shutdown => ("shutdown", SHUTDOWN_ARGS),
            PowerAction::Reboot => ("reboot", REBOOT_ARGS),
        }
    }

    fn callback_name(&self) -> &'static str {
        match self {
            PowerAction::Shutdown => SHUTDOWN_CALLBACK,
            PowerAction::Reboot => REBOOT_CALLBACK,
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Shutdown => write!(f, "Shutdown"),
            PowerAction::Reboot => write!(f, "Reboot"),
        }
    }
}

/// Performs host power operations; fire and forget, failures are only logged
pub trait PowerControl: Send + Sync {
    fn execute(&self, action: PowerAction);
}

/// Runs the system's `shutdown` / `reboot` commands
#[derive(Debug, Default)]
pub struct SystemPowerControl;

impl PowerControl for SystemPowerControl {
    fn execute(&self, action: PowerAction) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("Cannot run {}: no tokio runtime", action);
            return;
        };

        let (program, args) = action.command();
        runtime.spawn(async move {
            match Command::new(program).args(args).status().await {
                Ok(status) if status.success() => debug!("'{}' finished", program),
                Ok(status) => error!("'{}' exited with {}", program, status),
                Err(e) => error!("Failed to run '{}': {}", program, e),
            }
        });
    }
}

/// Shutdown / reboot trigger
pub struct PowerHandler {
    action: PowerAction,
    power: Arc<dyn PowerControl>,
}

impl PowerHandler {
    pub fn new(action: PowerAction, power: Arc<dyn PowerControl>) -> Self {
        Self { action, power }
    }
}

impl TopicHandler for PowerHandler {
    fn handle(&self, message: &InboundMessage, broker: &dyn BrokerHandle) -> S2mResult<()> {
        debug!("{}", message.payload_str());
        if !is_trigger(&self.action.to_string(), message) {
            return Ok(());
        }

        match self.action {
            PowerAction::Shutdown => info!("Attempting to poweroff..."),
            PowerAction::Reboot => info!("Attempting to reboot..."),
        }
        acknowledge(broker, &message.topic);
        self.power.execute(self.action);
        Ok(())
    }
}

/// Register the four control handlers under `base_topic`
pub fn register_control_handlers<T: Transport + 'static>(
    broker: &BrokerConnection<T>,
    base_topic: &str,
    state: &Arc<SchedulerState>,
    power: Arc<dyn PowerControl>,
) {
    broker.register(
        TopicBuilder::publish_period(base_topic),
        PublishPeriodHandler::new(Arc::clone(state)),
    );
    broker.register(
        TopicBuilder::callback(base_topic, QUIT_CALLBACK),
        QuitHandler::new(Arc::clone(state)),
    );
    for action in [PowerAction::Shutdown, PowerAction::Reboot] {
        broker.register(
            TopicBuilder::callback(base_topic, action.callback_name()),
            PowerHandler::new(action, Arc::clone(&power)),
        );
    }
}
