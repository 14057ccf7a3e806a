//! Core value types shared by both distribution engines

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Boxed error returned by subscriber callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a single handler invocation
pub type HandlerResult = std::result::Result<(), BoxError>;

/// Stable routing key for a payload type
///
/// Two payloads of the same concrete type always share a key; payloads of
/// different types never do. Equality and hashing only look at the `TypeId`,
/// the name is carried for logs.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for the payload type `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Key for the type of `value`
    pub fn of_val<T: Any>(_value: &T) -> Self {
        Self::of::<T>()
    }

    /// Fully-qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Underlying type identifier
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Check whether a type-erased value is an instance of this key's type
    pub fn matches(&self, value: &(dyn Any + Send + Sync)) -> bool {
        value.type_id() == self.id
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeKey").field(&self.name).finish()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Identity of the object a registration belongs to
///
/// Used only by `unsubscribe_all` to remove every registration made on
/// behalf of one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerId {
    /// Explicitly allocated token
    Token(u64),
    /// Address of a shared allocation
    Address(usize),
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    /// Allocate a fresh, process-unique owner token
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self::Token(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }

    /// Owner identity of a shared object
    ///
    /// Stable for as long as the allocation is alive.
    pub fn of<T: ?Sized>(object: &Arc<T>) -> Self {
        Self::Address(Arc::as_ptr(object) as *const () as usize)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(t) => write!(f, "owner-{}", t),
            Self::Address(a) => write!(f, "owner@{:#x}", a),
        }
    }
}

/// Counts produced by one distribute call or one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    /// Notifications dispatched
    pub notifications: usize,

    /// Handler invocations that completed successfully
    pub delivered: usize,

    /// Handler invocations that returned an error or panicked
    pub failed: usize,
}

impl DispatchSummary {
    /// Total handler invocations attempted
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }

    pub(crate) fn absorb(&mut self, other: DispatchSummary) {
        self.notifications += other.notifications;
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}
