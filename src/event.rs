//! Asynchronous, queue-buffered distribution engine
//!
//! `EventDistributor::publish` wraps the payload in a notification, appends it
//! to a FIFO queue, then drains the queue. Each subscriber invocation runs as
//! its own tokio task and is awaited before the next subscriber, so a slow
//! subscriber never runs on the publisher's call stack, but one drain pass is
//! still sequential.
//!
//! ## Draining
//! ```text
//! publish(payload)
//!     │
//!     ├─► queue.push_back(notification), in_flight += 1
//!     │
//!     └─► drain_lock.lock().await          (one drainer at a time)
//!             │
//!             └─► loop pop_front() until empty
//!                   ├─► spawn(sub1.on_notification(n)).await
//!                   ├─► spawn(sub2.on_notification(n)).await
//!                   └─► in_flight -= 1
//! ```
//!
//! ## Rules
//! - **FIFO**: notifications are dispatched in the order they were enqueued
//! - **Exactly once**: a notification is popped by exactly one drainer
//! - **Completion**: when `publish` returns, the notification it enqueued has
//!   been handled. The drainer holding the lock only releases it after it
//!   observed an empty queue, so anything enqueued before a publisher gets the
//!   lock is already done or still queued for that publisher.
//! - **Set semantics**: subscribing the same subscriber twice under one key
//!   is a no-op
//! - **Isolation**: an error or panic in a subscriber is logged and recorded,
//!   the drain continues
//!
//! A subscriber that publishes to the distributor currently dispatching to it
//! already runs under that distributor's drain lock. Its `publish` skips the
//! lock and drains the queue inline, popping under the queue mutex like any
//! drainer, so it still returns only after its own notification has been
//! handled. The enclosing drain resumes with whatever is left. This only
//! applies within the subscriber's own task; tasks it spawns itself publish
//! normally.
//!
//! There is no cancellation or timeout for stuck subscribers. Dropping a
//! `publish` future mid-drain abandons the notification being dispatched;
//! nothing is redelivered.
//!
//! `publish` must be called from within a tokio runtime.

use crate::config::DistributorConfig;
use crate::error::Result;
use crate::failure::{panic_message, report_failure, FailureSink, HandlerFailure, MemoryFailureSink};
use crate::notification::{Notification, SharedAny};
use crate::registry::{DuplicatePolicy, Registrant, SubscriberRegistry};
use crate::types::{DispatchSummary, HandlerResult, OwnerId, TypeKey};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Capability of receiving notifications from an `EventDistributor`
#[async_trait]
pub trait NotificationSubscriber: Send + Sync + 'static {
    /// Handle one notification
    async fn on_notification(&self, notification: Arc<Notification>) -> HandlerResult;

    /// Subscriber identity for logs and failure records
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared subscriber handle as stored by the registry
pub type SubscriberRef = Arc<dyn NotificationSubscriber>;

impl Registrant for SubscriberRef {
    fn same_registrant(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(self) as *const (),
            Arc::as_ptr(other) as *const (),
        )
    }

    fn label(&self) -> String {
        self.name().to_string()
    }
}

type SubscriberCallback =
    dyn Fn(Arc<Notification>) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// Closure-backed subscriber
pub struct SubscriberFn {
    name: String,
    callback: Box<SubscriberCallback>,
}

impl SubscriberFn {
    /// Build a subscriber from an async closure
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Arc<Notification>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            callback: Box::new(move |n| callback(n).boxed()),
        }
    }

    /// Build a shared subscriber ready for `subscribe`
    pub fn arc<F, Fut>(name: impl Into<String>, callback: F) -> SubscriberRef
    where
        F: Fn(Arc<Notification>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Arc::new(Self::new(name, callback))
    }
}

#[async_trait]
impl NotificationSubscriber for SubscriberFn {
    async fn on_notification(&self, notification: Arc<Notification>) -> HandlerResult {
        (self.callback)(notification).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

tokio::task_local! {
    /// Instance id of the distributor whose drain spawned the current task
    static DRAINING: usize;
}

static NEXT_INSTANCE: AtomicUsize = AtomicUsize::new(1);

/// Decrements the in-flight count when a popped notification is finished,
/// including when the draining future is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Queue-buffered distributor with per-subscriber tasks
pub struct EventDistributor {
    registry: SubscriberRegistry<SubscriberRef>,

    /// Notifications waiting for a drainer
    queue: Mutex<VecDeque<Arc<Notification>>>,

    /// Held by the single active drainer
    drain_lock: tokio::sync::Mutex<()>,

    /// Enqueued or currently being dispatched
    in_flight: AtomicUsize,

    /// Distinguishes this instance in the `DRAINING` task-local
    instance_id: usize,

    failure_sink: Option<Arc<dyn FailureSink>>,
    config: DistributorConfig,
}

impl EventDistributor {
    /// Create a distributor with default settings
    pub fn new() -> Self {
        Self {
            registry: SubscriberRegistry::new(DuplicatePolicy::Ignore),
            queue: Mutex::new(VecDeque::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            instance_id: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
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

    /// Forward caught subscriber failures to `sink`
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    /// Record caught subscriber failures in a `MemoryFailureSink`
    /// sized by `failure_capacity`
    pub fn with_failure_recording(self) -> Self {
        let sink = Arc::new(MemoryFailureSink::new(self.config.failure_capacity));
        self.with_failure_sink(sink)
    }

    /// Process-wide shared instance
    pub fn global() -> &'static EventDistributor {
        crate::global::event_distributor()
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
    pub fn registry(&self) -> &SubscriberRegistry<SubscriberRef> {
        &self.registry
    }

    /// Register `subscriber` for payloads of `type_key`
    ///
    /// Returns `false` if it was already registered under that key.
    pub fn subscribe(&self, type_key: TypeKey, subscriber: SubscriberRef) -> Result<bool> {
        let owner = OwnerId::of(&subscriber);
        let name = subscriber.label();
        let added = self.registry.subscribe(type_key, subscriber, Some(owner))?;

        tracing::debug!(
            distributor = %self.config.name,
            type_key = %type_key,
            subscriber = %name,
            added,
            "Subscriber registered"
        );
        Ok(added)
    }

    /// Register `subscriber` for payloads of type `T`
    pub fn subscribe_to<T: Any>(&self, subscriber: SubscriberRef) -> Result<bool> {
        self.subscribe(TypeKey::of::<T>(), subscriber)
    }

    /// Remove `subscriber` from `type_key`; unknown subscribers are ignored
    pub fn unsubscribe(&self, type_key: TypeKey, subscriber: &SubscriberRef) -> bool {
        let removed = self.registry.unsubscribe(type_key, subscriber);
        if removed {
            tracing::debug!(
                distributor = %self.config.name,
                type_key = %type_key,
                subscriber = %subscriber.name(),
                "Subscriber removed"
            );
        }
        removed
    }

    /// Remove `subscriber` from every type it is registered for
    pub fn unsubscribe_all(&self, subscriber: &SubscriberRef) -> usize {
        let removed = self.registry.unsubscribe_all(OwnerId::of(subscriber));
        tracing::debug!(
            distributor = %self.config.name,
            subscriber = %subscriber.name(),
            removed,
            "Subscriber removed from all types"
        );
        removed
    }

    /// Number of notifications enqueued or being dispatched
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of notifications waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Enqueue `payload` and drain the queue
    ///
    /// Returns once the notification has been handled by every subscriber
    /// registered for its type. The summary covers everything this call's
    /// drain pass dispatched, which may be nothing if a concurrent publisher
    /// already handled it.
    pub async fn publish<T: Any + Send + Sync>(&self, payload: T) -> DispatchSummary {
        self.enqueue_and_drain(Notification::new(payload)).await
    }

    /// Like `publish`, recording the originating sender
    pub async fn publish_from<T: Any + Send + Sync>(
        &self,
        payload: T,
        sender: SharedAny,
    ) -> DispatchSummary {
        self.enqueue_and_drain(Notification::new(payload).with_sender(Some(sender)))
            .await
    }

    /// Enqueue an already-shared payload under an explicit key
    ///
    /// Fails with `InvalidArgument` when the payload is not of the key's type.
    pub async fn publish_shared(
        &self,
        type_key: TypeKey,
        payload: SharedAny,
    ) -> Result<DispatchSummary> {
        let notification = Notification::from_shared(type_key, payload)?;
        Ok(self.enqueue_and_drain(notification).await)
    }

    async fn enqueue_and_drain(&self, notification: Notification) -> DispatchSummary {
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.push_back(Arc::new(notification));
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }

        let nested = DRAINING
            .try_with(|id| *id == self.instance_id)
            .unwrap_or(false);
        if nested {
            tracing::trace!(
                distributor = %self.config.name,
                "Nested publish draining inline"
            );
            return self.drain_queue().await;
        }

        let _drainer = self.drain_lock.lock().await;
        self.drain_queue().await
    }

    /// Pop and dispatch until the queue is empty
    ///
    /// Callers hold `drain_lock`, directly or through the drain that spawned
    /// the current subscriber task.
    async fn drain_queue(&self) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        loop {
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(notification) = next else {
                break;
            };

            let _in_flight = InFlightGuard(&self.in_flight);
            summary.absorb(self.dispatch(&notification).await);
        }

        summary
    }

    async fn dispatch(&self, notification: &Arc<Notification>) -> DispatchSummary {
        let subscribers = self.registry.handlers_for(notification.type_key());
        let mut summary = DispatchSummary {
            notifications: 1,
            ..DispatchSummary::default()
        };

        for subscriber in &subscribers {
            let task_subscriber = Arc::clone(subscriber);
            let task_notification = Arc::clone(notification);
            let handle = tokio::spawn(DRAINING.scope(self.instance_id, async move {
                task_subscriber.on_notification(task_notification).await
            }));

            let failure = match handle.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(HandlerFailure::new(
                    notification,
                    subscriber.name(),
                    e.to_string(),
                    false,
                )),
                Err(e) if e.is_panic() => Some(HandlerFailure::new(
                    notification,
                    subscriber.name(),
                    panic_message(e.into_panic().as_ref()),
                    true,
                )),
                Err(e) => Some(HandlerFailure::new(
                    notification,
                    subscriber.name(),
                    e.to_string(),
                    false,
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
                subscribers = subscribers.len(),
                elapsed_ms = notification.elapsed_ms(),
                "Notification processed"
            );
        }

        summary
    }
}

impl Default for EventDistributor {
    fn default() -> Self {
        Self::new()
    }
}
