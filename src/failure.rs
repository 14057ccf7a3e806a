//! Handler failure reporting
//!
//! Every caught handler failure is logged through `tracing`. A `FailureSink`
//! can additionally be attached to a distributor to keep the failures for
//! inspection. Failed handlers are never retried; the sink is a record, not
//! a redelivery queue.

use crate::error::DistributorError;
use crate::notification::Notification;
use crate::types::TypeKey;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

/// A caught handler failure with enough context to diagnose it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerFailure {
    /// Payload type name of the notification being dispatched
    pub type_key: String,

    /// Identity of the failing handler
    pub handler: String,

    /// Notification id (ntf-<uuid>)
    pub notification_id: String,

    /// Error message or panic payload
    pub reason: String,

    /// Whether the handler panicked rather than returning an error
    pub panicked: bool,

    /// Unix timestamp in milliseconds when the failure was caught
    pub failed_at: u64,
}

impl HandlerFailure {
    /// Create a failure record for `handler` while dispatching `notification`
    pub fn new(
        notification: &Notification,
        handler: impl Into<String>,
        reason: impl Into<String>,
        panicked: bool,
    ) -> Self {
        Self {
            type_key: notification.type_key().name().to_string(),
            handler: handler.into(),
            notification_id: notification.id().to_string(),
            reason: reason.into(),
            panicked,
            failed_at: now_millis(),
        }
    }

    /// Convert into the matching error value
    pub fn to_error(&self) -> DistributorError {
        DistributorError::HandlerFailure {
            type_key: self.type_key.clone(),
            handler: self.handler.clone(),
            reason: self.reason.clone(),
        }
    }
}

/// Receiver for caught handler failures
///
/// Called on the dispatching thread right after the failure is caught.
/// Implementations must not call back into the distributor that reported
/// the failure.
pub trait FailureSink: Send + Sync {
    /// Record one failure
    fn report(&self, failure: HandlerFailure);

    /// Number of failures currently held
    fn count(&self) -> usize;

    /// Most recent failures first
    fn list(&self, limit: usize) -> Vec<HandlerFailure>;
}

/// In-memory failure sink for development and testing
///
/// Keeps at most `max_failures` records; the oldest are dropped first.
/// A capacity of 0 means unbounded.
pub struct MemoryFailureSink {
    failures: RwLock<VecDeque<HandlerFailure>>,
    max_failures: usize,
}

impl MemoryFailureSink {
    /// Create a new in-memory sink
    pub fn new(max_failures: usize) -> Self {
        Self {
            failures: RwLock::new(VecDeque::new()),
            max_failures,
        }
    }

    /// Failures recorded for one payload type, most recent first
    pub fn for_type(&self, type_key: TypeKey) -> Vec<HandlerFailure> {
        let failures = self.failures.read().unwrap_or_else(PoisonError::into_inner);
        failures
            .iter()
            .rev()
            .filter(|f| f.type_key == type_key.name())
            .cloned()
            .collect()
    }

    /// Drop every recorded failure
    pub fn clear(&self) {
        self.failures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for MemoryFailureSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl FailureSink for MemoryFailureSink {
    fn report(&self, failure: HandlerFailure) {
        let mut failures = self.failures.write().unwrap_or_else(PoisonError::into_inner);
        failures.push_back(failure);

        if self.max_failures > 0 {
            while failures.len() > self.max_failures {
                failures.pop_front();
            }
        }
    }

    fn count(&self) -> usize {
        self.failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn list(&self, limit: usize) -> Vec<HandlerFailure> {
        let failures = self.failures.read().unwrap_or_else(PoisonError::into_inner);
        failures.iter().rev().take(limit).cloned().collect()
    }
}

/// Log a caught failure and forward it to the sink, if any
pub(crate) fn report_failure(
    distributor: &str,
    sink: Option<&dyn FailureSink>,
    failure: HandlerFailure,
) {
    tracing::error!(
        distributor = %distributor,
        type_key = %failure.type_key,
        handler = %failure.handler,
        notification = %failure.notification_id,
        panicked = failure.panicked,
        error = %failure.reason,
        "Failed to distribute notification to handler"
    );

    if let Some(sink) = sink {
        sink.report(failure);
    }
}

/// Render a caught panic payload as text
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
