//! Process-wide distributor instances
//!
//! Both are built on first access and live until the process exits. Prefer
//! constructing explicit instances where the distributor can be injected;
//! these exist for code that has no way to receive one.

use crate::event::EventDistributor;
use crate::object::ObjectDistributor;
use std::sync::OnceLock;

static EVENT_DISTRIBUTOR: OnceLock<EventDistributor> = OnceLock::new();
static OBJECT_DISTRIBUTOR: OnceLock<ObjectDistributor> = OnceLock::new();

/// Shared asynchronous distributor
pub fn event_distributor() -> &'static EventDistributor {
    EVENT_DISTRIBUTOR.get_or_init(|| {
        tracing::debug!("Initializing process-wide event distributor");
        EventDistributor::new()
    })
}

/// Shared synchronous distributor
pub fn object_distributor() -> &'static ObjectDistributor {
    OBJECT_DISTRIBUTOR.get_or_init(|| {
        tracing::debug!("Initializing process-wide object distributor");
        ObjectDistributor::new()
    })
}
