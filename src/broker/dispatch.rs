//! Topic dispatch table
//!
//! Maps subscription filters to handlers. Every registered filter is
//! (re-)subscribed on each successful connect; inbound messages are routed to
//! the handler of the exact filter, or else to the first matching wildcard
//! filter in lexicographic order.

use super::BrokerHandle;
use crate::error::{S2mError, S2mResult};
use crate::topics::{is_wildcard, topic_matches};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{error, info};

/// A message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }

    /// Payload decoded as UTF-8 (lossy)
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Handler for messages on a subscribed topic
///
/// Runs on the transport's event loop task: must not block.
pub trait TopicHandler: Send + Sync {
    fn handle(&self, message: &InboundMessage, broker: &dyn BrokerHandle) -> S2mResult<()>;
}

impl<F> TopicHandler for F
where
    F: Fn(&InboundMessage, &dyn BrokerHandle) -> S2mResult<()> + Send + Sync,
{
    fn handle(&self, message: &InboundMessage, broker: &dyn BrokerHandle) -> S2mResult<()> {
        self(message, broker)
    }
}

/// Registered topic handlers keyed by subscription filter
#[derive(Default)]
pub struct DispatchTable {
    handlers: RwLock<BTreeMap<String, Arc<dyn TopicHandler>>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the handler for a filter (last registration wins)
    pub fn register(&self, filter: impl Into<String>, handler: Arc<dyn TopicHandler>) {
        let filter = filter.into();
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(filter.clone(), handler).is_some() {
            info!("Replaced handler for topic: {}", filter);
        }
    }

    /// All registered filters, in lexicographic order
    pub fn topics(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }

    /// Find the handler for a concrete topic
    pub fn lookup(&self, topic: &str) -> Option<Arc<dyn TopicHandler>> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(handler) = handlers.get(topic) {
            return Some(Arc::clone(handler));
        }

        handlers
            .iter()
            .find(|(filter, _)| is_wildcard(filter) && topic_matches(filter, topic))
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Route a message to its handler, isolating handler errors and panics
    ///
    /// Returns false if no handler matched.
    pub fn dispatch(&self, message: &InboundMessage, broker: &dyn BrokerHandle) -> bool {
        let Some(handler) = self.lookup(&message.topic) else {
            return false;
        };

        // The handler lock is released here, so handlers may register others
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(message, broker)));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(topic = %message.topic, error = %e, "Topic handler failed");
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let error = S2mError::internal_error(format!("handler panicked: {reason}"));
                error!(topic = %message.topic, error = %error, "Topic handler failed");
            }
        }
        true
    }
}
