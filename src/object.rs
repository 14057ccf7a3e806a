//! Synchronous distribution engine
//!
//! `ObjectDistributor` delivers a payload to every handler registered for its
//! type before `distribute` returns, on the caller's thread, in registration
//! order. Total latency is the sum of the handlers' latencies, so handlers
//! should stay short.
//!
//! Registrations use list semantics: subscribing the same handler twice
//! under one key makes it run twice per distribute.
//!
//! Handlers see a snapshot of the registrations taken when `distribute`
//! starts. Subscribing or unsubscribing from inside a handler is not
//! supported as a way to affect the distribute call already in progress;
//! such changes apply to later calls only.

use crate::config::DistributorConfig;
use crate::error::Result;
use crate::failure::{panic_message, report_failure, FailureSink, HandlerFailure, MemoryFailureSink};
use crate::notification::{Notification, SharedAny};
use crate::registry::{DuplicatePolicy, Registrant, SubscriberRegistry};
use crate::types::{DispatchSummary, HandlerResult, OwnerId, TypeKey};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Callback signature for synchronous handlers
pub type HandlerFn = dyn Fn(&Notification) -> HandlerResult + Send + Sync;

/// Named, cloneable callback for the synchronous engine
///
/// Clones share the callback, and are "the same handler" for `unsubscribe`.
/// Two handlers built from separate `new` calls are always distinct, even
/// with the same name.
#[derive(Clone)]
pub struct Handler {
    name: Arc<str>,
    callback: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap a fallible callback
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Notification) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            callback: Arc::new(callback),
        }
    }

    /// Wrap a callback that cannot fail
    pub fn infallible<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        Self::new(name, move |n| {
            callback(n);
            Ok(())
        })
    }

    /// Handler name used in logs and failure records
    pub fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, notification: &Notification) -> HandlerResult {
        (self.callback)(notification)
    }
}

impl Registrant for Handler {
    fn same_registrant(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.callback) as *const (),
            Arc::as_ptr(&other.callback) as *const (),
        )
    }

    fn label(&self) -> String {
        self.name.to_string()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

/// Synchronous distribution capability
///
/// Lets components take `&dyn Distributor` or `Arc<dyn Distributor>` instead of
/// a concrete `ObjectDistributor`, so tests can substitute their own.
pub trait Distributor: Send + Sync {
    /// Register `handler` for payloads of `type_key`
    fn subscribe(&self, type_key: TypeKey, handler: Handler) -> Result<()>;

    /// Remove one registration of `handler` under `type_key`
    fn unsubscribe(&self, type_key: TypeKey, handler: &Handler) -> bool;

    /// Remove every registration made on behalf of `owner`
    fn unsubscribe_all(&self, owner: OwnerId) -> usize;

    /// Deliver a prepared notification to its handlers
    fn dispatch(&self, notification: &Notification) -> DispatchSummary;

    /// Deliver an already-shared payload under an explicit key
    fn distribute_shared(
        &self,
        type_key: TypeKey,
        payload: SharedAny,
        sender: Option<SharedAny>,
    ) -> Result<DispatchSummary> {
        let notification = Notification::from_shared(type_key, payload)?.with_sender(sender);
        Ok(self.dispatch(&notification))
    }
}

/// Immediate, caller-thread distributor
pub struct ObjectDistributor {
    registry: SubscriberRegistry<Handler>,
    failure_sink: Option<Arc<dyn FailureSink>>,
    config: DistributorConfig,
}

impl ObjectDistributor {
    /// Create a distributor with default settings
    pub fn new() -> Self {
        Self {
            registry: SubscriberRegistry::new(DuplicatePolicy::Allow),
            failure_sink: None,
            config: DistributorConfig::default(),
        }
    }

    /// Create a distributor from validated settings
    pub fn with_config(config: DistributorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Forward caught handler failures to `sink`
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    /// Record caught handler failures in a `MemoryFailureSink`
    /// sized by `failure_capacity`
    pub fn with_failure_recording(self) -> Self {
        let sink = Arc::new(MemoryFailureSink::new(self.config.failure_capacity));
        self.with_failure_sink(sink)
    }

    /// Process-wide shared instance
    pub fn global() -> &'static ObjectDistributor {
        crate::global::object_distributor()
    }

    /// Active settings
    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    /// Attached failure sink, if any
    pub fn failure_sink(&self) -> Option<&Arc<dyn FailureSink>> {
        self.failure_sink.as_ref()
    }

    /// Underlying registry, for inspection
    pub fn registry(&self) -> &SubscriberRegistry<Handler> {
        &self.registry
    }

    /// Register `handler` for payloads of `type_key`
    pub fn subscribe(&self, type_key: TypeKey, handler: Handler) -> Result<()> {
        self.register(type_key, handler, None)
    }

    /// Register `handler` on behalf of `owner`, for later `unsubscribe_all`
    pub fn subscribe_owned(
        &self,
        type_key: TypeKey,
        handler: Handler,
        owner: OwnerId,
    ) -> Result<()> {
        self.register(type_key, handler, Some(owner))
    }

    /// Register `handler` for payloads of type `T`
    pub fn subscribe_to<T: Any>(&self, handler: Handler) -> Result<()> {
        self.subscribe(TypeKey::of::<T>(), handler)
    }

    /// Register `handler` for payloads of type `T` on behalf of `owner`
    pub fn subscribe_to_owned<T: Any>(&self, handler: Handler, owner: OwnerId) -> Result<()> {
        self.subscribe_owned(TypeKey::of::<T>(), handler, owner)
    }

    fn register(&self, type_key: TypeKey, handler: Handler, owner: Option<OwnerId>) -> Result<()> {
        let name = handler.label();
        self.registry.subscribe(type_key, handler, owner)?;

        tracing::debug!(
            distributor = %self.config.name,
            type_key = %type_key,
            handler = %name,
            "Handler subscribed"
        );
        Ok(())
    }

    /// Remove one registration of `handler` under `type_key`
    ///
    /// Returns whether a registration was removed; unknown handlers are ignored.
    pub fn unsubscribe(&self, type_key: TypeKey, handler: &Handler) -> bool {
        let removed = self.registry.unsubscribe(type_key, handler);
        if removed {
            tracing::debug!(
                distributor = %self.config.name,
                type_key = %type_key,
                handler = %handler.name(),
                "Handler unsubscribed"
            );
        }
        removed
    }

    /// Remove every registration made on behalf of `owner`
    pub fn unsubscribe_all(&self, owner: OwnerId) -> usize {
        let removed = self.registry.unsubscribe_all(owner);
        tracing::debug!(
            distributor = %self.config.name,
            owner = %owner,
            removed,
            "Owner unsubscribed from all types"
        );
        removed
    }

    /// Deliver `payload` to every handler registered for its type
    ///
    /// Returns once every handler has run or failed. Handler failures are
    /// logged and counted, never returned.
    pub fn distribute<T: Any + Send + Sync>(
        &self,
        payload: T,
        sender: Option<SharedAny>,
    ) -> DispatchSummary {
        self.dispatch(&Notification::new(payload).with_sender(sender))
    }

    /// Deliver an already-shared payload under an explicit key
    ///
    /// Fails with `InvalidArgument` when the payload is not of the key's type.
    pub fn distribute_shared(
        &self,
        type_key: TypeKey,
        payload: SharedAny,
        sender: Option<SharedAny>,
    ) -> Result<DispatchSummary> {
        let notification = Notification::from_shared(type_key, payload)?.with_sender(sender);
        Ok(self.dispatch(&notification))
    }

    /// Deliver a prepared notification
    pub fn dispatch(&self, notification: &Notification) -> DispatchSummary {
        let handlers = self.registry.handlers_for(notification.type_key());
        let mut summary = DispatchSummary {
            notifications: 1,
            ..DispatchSummary::default()
        };

        for handler in &handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.invoke(notification)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(HandlerFailure::new(
                    notification,
                    handler.name(),
                    e.to_string(),
                    false,
                )),
                Err(panic) => Some(HandlerFailure::new(
                    notification,
                    handler.name(),
                    panic_message(panic.as_ref()),
                    true,
                )),
            };

            match failure {
                None => summary.delivered += 1,
                Some(failure) => {
                    summary.failed += 1;
                    report_failure(&self.config.name, self.failure_sink.as_deref(), failure);
                }
            }
        }

        if self.config.trace_timing {
            tracing::debug!(
                distributor = %self.config.name,
                type_key = %notification.type_key(),
                notification = %notification.id(),
                handlers = handlers.len(),
                elapsed_ms = notification.elapsed_ms(),
                "Notification distributed"
            );
        }

        summary
    }
}

impl Distributor for ObjectDistributor {
    fn subscribe(&self, type_key: TypeKey, handler: Handler) -> Result<()> {
        ObjectDistributor::subscribe(self, type_key, handler)
    }

    fn unsubscribe(&self, type_key: TypeKey, handler: &Handler) -> bool {
        ObjectDistributor::unsubscribe(self, type_key, handler)
    }

    fn unsubscribe_all(&self, owner: OwnerId) -> usize {
        ObjectDistributor::unsubscribe_all(self, owner)
    }

    fn dispatch(&self, notification: &Notification) -> DispatchSummary {
        ObjectDistributor::dispatch(self, notification)
    }

    fn distribute_shared(
        &self,
        type_key: TypeKey,
        payload: SharedAny,
        sender: Option<SharedAny>,
    ) -> Result<DispatchSummary> {
        ObjectDistributor::distribute_shared(self, type_key, payload, sender)
    }
}

impl Default for ObjectDistributor {
    fn default() -> Self {
        Self::new()
    }
}
