//! # a3s-distributor
//!
//! In-process, type-keyed publish/subscribe for the A3S ecosystem.
//!
//! ## Overview
//!
//! Producers publish arbitrary typed payloads; consumers register interest
//! by payload type and get called back without producers knowing who they
//! are. Two engines share one subscriber registry:
//!
//! - **ObjectDistributor** — synchronous: `distribute` runs every handler on
//!   the caller's thread, in registration order, before returning
//! - **EventDistributor** — asynchronous: `publish` enqueues a notification
//!   and drains the queue, running each subscriber as its own tokio task
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_distributor::{Handler, ObjectDistributor};
//!
//! struct PriceChanged {
//!     pair: &'static str,
//!     rate: f64,
//! }
//!
//! let distributor = ObjectDistributor::new();
//! distributor
//!     .subscribe_to::<PriceChanged>(Handler::infallible("ticker", |n| {
//!         let change = n.payload::<PriceChanged>().unwrap();
//!         println!("{} -> {}", change.pair, change.rate);
//!     }))
//!     .unwrap();
//!
//! let summary = distributor.distribute(PriceChanged { pair: "USD/CNY", rate: 7.35 }, None);
//! assert_eq!(summary.delivered, 1);
//! ```
//!
//! ```rust
//! use a3s_distributor::{BoxError, EventDistributor, SubscriberFn};
//!
//! struct Deployed(&'static str);
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let distributor = EventDistributor::new();
//! distributor
//!     .subscribe_to::<Deployed>(SubscriberFn::arc("audit", |n| async move {
//!         println!("deployed {}", n.payload::<Deployed>().unwrap().0);
//!         Ok::<(), BoxError>(())
//!     }))
//!     .unwrap();
//!
//! // returns once the notification has been handled
//! distributor.publish(Deployed("api")).await;
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **TypeKey** — routing key derived from the payload's concrete type
//! - **Notification** — envelope with payload, sender, and publish time
//! - **SubscriberRegistry** — type key → ordered handlers, list or set semantics
//! - **FailureSink** — optional record of handler errors and panics
//! - **global** — lazily-built process-wide instances of both engines

pub mod config;
pub mod error;
pub mod event;
pub mod failure;
pub mod global;
pub mod notification;
pub mod object;
pub mod registry;
pub mod types;

// Re-export core types
pub use config::DistributorConfig;
pub use error::{DistributorError, Result};
pub use event::{EventDistributor, NotificationSubscriber, SubscriberFn, SubscriberRef};
pub use failure::{FailureSink, HandlerFailure, MemoryFailureSink};
pub use notification::{Notification, SharedAny};
pub use object::{Distributor, Handler, HandlerFn, ObjectDistributor};
pub use registry::{DuplicatePolicy, Registrant, SubscriberRegistry};
pub use types::{BoxError, DispatchSummary, HandlerResult, OwnerId, TypeKey};
