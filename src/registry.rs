//! Subscriber registry — type key to ordered handlers
//!
//! Both distribution engines route through a `SubscriberRegistry`. Every
//! operation takes the registry lock for its whole duration, so readers never
//! observe a half-updated handler list. Lookups hand out snapshots; handler
//! code never runs while the lock is held.

use crate::error::{DistributorError, Result};
use crate::types::{OwnerId, TypeKey};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Something that can be registered under a type key
///
/// Implementations define what "the same handler" means for `unsubscribe`
/// and duplicate detection, and give a label for logs.
pub trait Registrant: Clone + Send + Sync {
    /// Whether `self` and `other` denote the same handler
    fn same_registrant(&self, other: &Self) -> bool;

    /// Human-readable handler identity
    fn label(&self) -> String;
}

/// What `subscribe` does with a handler already registered under the key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// List semantics: every subscribe call appends
    #[default]
    Allow,
    /// Set semantics: re-subscribing is a no-op
    Ignore,
}

/// One handler registration
#[derive(Clone)]
struct Registration<H> {
    handler: H,
    owner: Option<OwnerId>,
}

/// Concurrency-safe mapping from `TypeKey` to ordered handlers
pub struct SubscriberRegistry<H: Registrant> {
    /// type key → handlers in registration order
    entries: RwLock<HashMap<TypeKey, Vec<Registration<H>>>>,
    policy: DuplicatePolicy,
}

impl<H: Registrant> SubscriberRegistry<H> {
    /// Create an empty registry with the given duplicate policy
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Duplicate policy of this registry
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    // Handlers run outside the lock, so a poisoned lock only means a panic
    // inside the registry's own bookkeeping; the map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TypeKey, Vec<Registration<H>>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TypeKey, Vec<Registration<H>>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` under `type_key`
    ///
    /// Returns `false` when the registry ignores duplicates and the handler
    /// was already present. Fails with `InvalidArgument` for a handler
    /// without a label.
    pub fn subscribe(&self, type_key: TypeKey, handler: H, owner: Option<OwnerId>) -> Result<bool> {
        if handler.label().is_empty() {
            return Err(DistributorError::InvalidArgument(format!(
                "handler for '{}' has an empty name",
                type_key
            )));
        }

        let mut entries = self.write();
        let list = entries.entry(type_key).or_default();

        if self.policy == DuplicatePolicy::Ignore
            && list.iter().any(|r| r.handler.same_registrant(&handler))
        {
            return Ok(false);
        }

        list.push(Registration { handler, owner });
        Ok(true)
    }

    /// Remove the first registration of `handler` under `type_key`
    ///
    /// Returns whether anything was removed; absence is not an error.
    pub fn unsubscribe(&self, type_key: TypeKey, handler: &H) -> bool {
        let mut entries = self.write();
        let Some(list) = entries.get_mut(&type_key) else {
            return false;
        };

        let removed = match list.iter().position(|r| r.handler.same_registrant(handler)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        };

        if list.is_empty() {
            entries.remove(&type_key);
        }
        removed
    }

    /// Remove every registration made on behalf of `owner`, across all keys
    ///
    /// Returns the number of registrations removed. Idempotent.
    pub fn unsubscribe_all(&self, owner: OwnerId) -> usize {
        let mut entries = self.write();
        let mut removed = 0;

        entries.retain(|_, list| {
            let before = list.len();
            list.retain(|r| r.owner != Some(owner));
            removed += before - list.len();
            !list.is_empty()
        });

        removed
    }

    /// Snapshot of the handlers registered under `type_key`, in order
    pub fn handlers_for(&self, type_key: TypeKey) -> Vec<H> {
        self.read()
            .get(&type_key)
            .map(|list| list.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of registrations under `type_key`
    pub fn subscriber_count(&self, type_key: TypeKey) -> usize {
        self.read().get(&type_key).map_or(0, Vec::len)
    }

    /// Keys that currently have at least one registration
    pub fn type_keys(&self) -> Vec<TypeKey> {
        self.read().keys().copied().collect()
    }

    /// Whether no handler is registered at all
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<H: Registrant> Default for SubscriberRegistry<H> {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}
