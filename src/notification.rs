//! Notification envelope
//!
//! Wraps a published payload with its type key, optional sender, and the
//! moment it was published. Elapsed time is measured on the monotonic clock;
//! the wall-clock timestamp is kept for display only.

use crate::error::{DistributorError, Result};
use crate::types::TypeKey;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Type-erased, shareable value
pub type SharedAny = Arc<dyn Any + Send + Sync>;

/// Immutable envelope around one published payload
#[derive(Clone)]
pub struct Notification {
    id: String,
    type_key: TypeKey,
    payload: SharedAny,
    sender: Option<SharedAny>,
    published: Instant,
    published_at: DateTime<Utc>,
}

impl Notification {
    /// Wrap a payload, keyed by its concrete type
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self::build(TypeKey::of::<T>(), Arc::new(payload))
    }

    /// Wrap an already-shared payload under an explicit key
    ///
    /// Fails with `InvalidArgument` when the payload is not an instance of
    /// the key's type.
    pub fn from_shared(type_key: TypeKey, payload: SharedAny) -> Result<Self> {
        if !type_key.matches(&*payload) {
            return Err(DistributorError::InvalidArgument(format!(
                "payload is not an instance of '{}'",
                type_key
            )));
        }
        Ok(Self::build(type_key, payload))
    }

    fn build(type_key: TypeKey, payload: SharedAny) -> Self {
        Self {
            id: format!("ntf-{}", uuid::Uuid::new_v4()),
            type_key,
            payload,
            sender: None,
            published: Instant::now(),
            published_at: Utc::now(),
        }
    }

    /// Attach the originating sender
    pub fn with_sender(mut self, sender: Option<SharedAny>) -> Self {
        self.sender = sender;
        self
    }

    /// Unique notification identifier (ntf-<uuid>)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Routing key of the payload
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Borrow the payload as `T`, or `None` if it is another type
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// The type-erased payload
    pub fn payload_any(&self) -> &SharedAny {
        &self.payload
    }

    /// Borrow the sender as `T`, if present and of that type
    pub fn sender<T: Any>(&self) -> Option<&T> {
        self.sender.as_ref().and_then(|s| s.downcast_ref::<T>())
    }

    /// Whether a sender was attached
    pub fn has_sender(&self) -> bool {
        self.sender.is_some()
    }

    /// Wall-clock publish time
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Time since publish, measured on the monotonic clock
    ///
    /// Never negative, non-decreasing across calls.
    pub fn elapsed(&self) -> Duration {
        self.published.elapsed()
    }

    /// Time since publish in fractional milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("id", &self.id)
            .field("type_key", &self.type_key)
            .field("has_sender", &self.sender.is_some())
            .field("published_at", &self.published_at)
            .finish()
    }
}
