//! Distributor integration tests
//!
//! End-to-end tests exercising both engines through the public API:
//! type routing, duplicate semantics, owner removal, failure isolation,
//! FIFO ordering, elapsed-time measurement, and concurrency.

use a3s_distributor::{
    BoxError, DistributorConfig, EventDistributor, FailureSink, Handler, MemoryFailureSink,
    Notification, NotificationSubscriber, ObjectDistributor, OwnerId, SubscriberFn,
    SubscriberRef, TypeKey,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct OrderPlaced {
    id: u32,
}

#[derive(Debug, Clone)]
struct StockLow {
    sku: &'static str,
}

fn counting_handler(name: &str, hits: &Arc<AtomicUsize>) -> Handler {
    let hits = Arc::clone(hits);
    Handler::infallible(name, move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
    })
}

fn counting_subscriber(name: &str, hits: &Arc<AtomicUsize>) -> SubscriberRef {
    let hits = Arc::clone(hits);
    SubscriberFn::arc(name, move |_| {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    })
}

/// Subscriber object that listens to two payload types
#[derive(Default)]
struct Warehouse {
    orders: Mutex<Vec<u32>>,
    alerts: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl NotificationSubscriber for Warehouse {
    async fn on_notification(
        &self,
        notification: Arc<Notification>,
    ) -> a3s_distributor::HandlerResult {
        if let Some(order) = notification.payload::<OrderPlaced>() {
            self.orders.lock().unwrap().push(order.id);
        } else if let Some(alert) = notification.payload::<StockLow>() {
            self.alerts.lock().unwrap().push(alert.sku);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "warehouse"
    }
}

// ─── Type Routing ────────────────────────────────────────────────

#[test]
fn test_sync_routes_only_matching_type() {
    let distributor = ObjectDistributor::new();
    let hits = Arc::new(AtomicUsize::new(0));
    distributor
        .subscribe_to::<OrderPlaced>(counting_handler("orders", &hits))
        .unwrap();

    for i in 0..100 {
        distributor.distribute(OrderPlaced { id: i }, None);
        distributor.distribute(StockLow { sku: "A-1" }, None);
    }

    assert_eq!(hits.load(Ordering::SeqCst), 100);
}

#[tokio::test]
async fn test_async_routes_only_matching_type() {
    let distributor = EventDistributor::new();
    let warehouse = Arc::new(Warehouse::default());
    distributor
        .subscribe_to::<OrderPlaced>(warehouse.clone())
        .unwrap();

    for i in 0..100 {
        distributor.publish(OrderPlaced { id: i }).await;
        distributor.publish(StockLow { sku: "A-1" }).await;
    }

    assert_eq!(warehouse.orders.lock().unwrap().len(), 100);
    assert!(warehouse.alerts.lock().unwrap().is_empty());
    assert_eq!(distributor.in_flight(), 0);
}

// ─── Duplicate Semantics ─────────────────────────────────────────

#[test]
fn test_sync_duplicates_accumulate() {
    let distributor = ObjectDistributor::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let handler = counting_handler("dup", &hits);

    distributor.subscribe_to::<OrderPlaced>(handler.clone()).unwrap();
    distributor.subscribe_to::<OrderPlaced>(handler).unwrap();
    distributor.distribute(OrderPlaced { id: 1 }, None);

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_async_duplicates_ignored() {
    let distributor = EventDistributor::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let sub = counting_subscriber("dup", &hits);

    distributor.subscribe_to::<OrderPlaced>(sub.clone()).unwrap();
    distributor.subscribe_to::<OrderPlaced>(sub).unwrap();
    distributor.publish(OrderPlaced { id: 1 }).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ─── Owner Removal ───────────────────────────────────────────────

#[test]
fn test_sync_unsubscribe_all_across_types() {
    let distributor = ObjectDistributor::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let owner = OwnerId::new();

    distributor
        .subscribe_to_owned::<OrderPlaced>(counting_handler("o", &hits), owner)
        .unwrap();
    distributor
        .subscribe_to_owned::<StockLow>(counting_handler("s", &hits), owner)
        .unwrap();

    distributor.unsubscribe_all(owner);
    distributor.distribute(OrderPlaced { id: 1 }, None);
    distributor.distribute(StockLow { sku: "B-2" }, None);

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(distributor.registry().is_empty());
}

#[tokio::test]
async fn test_async_unsubscribe_all_across_types() {
    let distributor = EventDistributor::new();
    let warehouse = Arc::new(Warehouse::default());
    let sub: SubscriberRef = warehouse.clone();

    distributor.subscribe_to::<OrderPlaced>(sub.clone()).unwrap();
    distributor.subscribe_to::<StockLow>(sub.clone()).unwrap();

    distributor.publish(OrderPlaced { id: 1 }).await;
    distributor.publish(StockLow { sku: "C-3" }).await;
    assert_eq!(distributor.unsubscribe_all(&sub), 2);

    distributor.publish(OrderPlaced { id: 2 }).await;
    distributor.publish(StockLow { sku: "D-4" }).await;

    assert_eq!(*warehouse.orders.lock().unwrap(), vec![1]);
    assert_eq!(*warehouse.alerts.lock().unwrap(), vec!["C-3"]);
}

#[test]
fn test_unsubscribe_never_subscribed_is_noop() {
    let sync = ObjectDistributor::new();
    let hits = Arc::new(AtomicUsize::new(0));
    assert!(!sync.unsubscribe(TypeKey::of::<OrderPlaced>(), &counting_handler("x", &hits)));
    assert_eq!(sync.unsubscribe_all(OwnerId::new()), 0);

    let async_engine = EventDistributor::new();
    let sub = counting_subscriber("y", &hits);
    assert!(!async_engine.unsubscribe(TypeKey::of::<OrderPlaced>(), &sub));
    assert_eq!(async_engine.unsubscribe_all(&sub), 0);
}

// ─── Failure Isolation ───────────────────────────────────────────

#[test]
fn test_sync_failure_then_success() {
    let sink = Arc::new(MemoryFailureSink::default());
    let distributor = ObjectDistributor::with_config(DistributorConfig::named("orders"))
        .unwrap()
        .with_failure_sink(sink.clone());
    let hits = Arc::new(AtomicUsize::new(0));

    distributor
        .subscribe_to::<OrderPlaced>(Handler::new("rejects", |n| {
            let id = n.payload::<OrderPlaced>().map(|o| o.id).unwrap_or_default();
            Err(format!("order {} rejected", id).into())
        }))
        .unwrap();
    distributor
        .subscribe_to::<OrderPlaced>(counting_handler("accepts", &hits))
        .unwrap();

    let summary = distributor.distribute(OrderPlaced { id: 9 }, None);

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let failures = sink.for_type(TypeKey::of::<OrderPlaced>());
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].handler, "rejects");
    assert_eq!(failures[0].reason, "order 9 rejected");
}

#[tokio::test]
async fn test_async_failure_then_success() {
    let sink = Arc::new(MemoryFailureSink::default());
    let distributor = EventDistributor::new().with_failure_sink(sink.clone());
    let hits = Arc::new(AtomicUsize::new(0));

    distributor
        .subscribe_to::<StockLow>(SubscriberFn::arc("pager", |_| async {
            Err::<(), BoxError>("pager unreachable".into())
        }))
        .unwrap();
    distributor
        .subscribe_to::<StockLow>(counting_subscriber("email", &hits))
        .unwrap();

    let summary = distributor.publish(StockLow { sku: "E-5" }).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(sink.count(), 1);
    assert_eq!(sink.list(1)[0].handler, "pager");
}

// ─── Ordering ────────────────────────────────────────────────────

#[tokio::test]
async fn test_async_fifo_for_every_n() {
    for n in [1u32, 2, 17, 100] {
        let distributor = EventDistributor::new();
        let warehouse = Arc::new(Warehouse::default());
        distributor
            .subscribe_to::<OrderPlaced>(warehouse.clone())
            .unwrap();

        for id in 0..n {
            distributor.publish(OrderPlaced { id }).await;
        }

        assert_eq!(
            *warehouse.orders.lock().unwrap(),
            (0..n).collect::<Vec<_>>(),
            "dispatch order differs from publish order for n = {}",
            n
        );
    }
}

#[test]
fn test_sync_handlers_run_in_registration_order_on_caller_thread() {
    let distributor = ObjectDistributor::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let caller = std::thread::current().id();

    for name in ["ledger", "mailer", "metrics"] {
        let log = Arc::clone(&log);
        distributor
            .subscribe_to::<OrderPlaced>(Handler::infallible(name, move |_| {
                log.lock()
                    .unwrap()
                    .push((name, std::thread::current().id()));
            }))
            .unwrap();
    }

    distributor.distribute(OrderPlaced { id: 1 }, None);

    let log = log.lock().unwrap();
    let names: Vec<_> = log.iter().map(|(n, _)| *n).collect();
    assert_eq!(names, vec!["ledger", "mailer", "metrics"]);
    assert!(log.iter().all(|(_, t)| *t == caller));
}

// ─── Envelope Timing ─────────────────────────────────────────────

#[test]
fn test_elapsed_since_publish_observed_by_handler() {
    let distributor = ObjectDistributor::new();
    let readings = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&readings);

    distributor
        .subscribe_to::<OrderPlaced>(Handler::infallible("timer", move |n| {
            let first = n.elapsed_ms();
            std::thread::sleep(Duration::from_millis(3));
            let second = n.elapsed_ms();
            r.lock().unwrap().push((first, second));
        }))
        .unwrap();

    distributor.distribute(OrderPlaced { id: 1 }, None);

    let (first, second) = readings.lock().unwrap()[0];
    assert!(first >= 0.0);
    assert!(second >= first + 3.0);
}

// ─── Concurrency ─────────────────────────────────────────────────

#[test]
fn test_sync_concurrent_publishers_and_subscribers() {
    let distributor = Arc::new(ObjectDistributor::new());
    let hits = Arc::new(AtomicUsize::new(0));
    distributor
        .subscribe_to::<OrderPlaced>(counting_handler("base", &hits))
        .unwrap();

    let mut threads = Vec::new();
    for t in 0..4 {
        let d = Arc::clone(&distributor);
        threads.push(std::thread::spawn(move || {
            for i in 0..100 {
                d.distribute(OrderPlaced { id: t * 100 + i }, None);
            }
        }));
    }
    // churn registrations while distributing
    let churn = {
        let d = Arc::clone(&distributor);
        std::thread::spawn(move || {
            let extra = Arc::new(AtomicUsize::new(0));
            for _ in 0..100 {
                let owner = OwnerId::new();
                d.subscribe_to_owned::<OrderPlaced>(counting_handler("extra", &extra), owner)
                    .unwrap();
                d.unsubscribe_all(owner);
            }
        })
    };

    for t in threads {
        t.join().unwrap();
    }
    churn.join().unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 400);
    assert_eq!(distributor.registry().subscriber_count(TypeKey::of::<OrderPlaced>()), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_concurrent_publishers_each_dispatched_once() {
    let distributor = Arc::new(EventDistributor::new());
    let warehouse = Arc::new(Warehouse::default());
    distributor
        .subscribe_to::<OrderPlaced>(warehouse.clone())
        .unwrap();

    let mut tasks = Vec::new();
    for t in 0..8u32 {
        let d = Arc::clone(&distributor);
        tasks.push(tokio::spawn(async move {
            for i in 0..25u32 {
                d.publish(OrderPlaced { id: t * 100 + i }).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut ids = warehouse.orders.lock().unwrap().clone();
    assert_eq!(ids.len(), 200);
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 200);
    assert_eq!(distributor.in_flight(), 0);
    assert_eq!(distributor.pending(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_per_publisher_order_preserved_under_contention() {
    let distributor = Arc::new(EventDistributor::new());
    let warehouse = Arc::new(Warehouse::default());
    distributor
        .subscribe_to::<OrderPlaced>(warehouse.clone())
        .unwrap();

    let mut tasks = Vec::new();
    for t in 0..3u32 {
        let d = Arc::clone(&distributor);
        tasks.push(tokio::spawn(async move {
            for i in 0..40u32 {
                d.publish(OrderPlaced { id: t * 1000 + i }).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let ids = warehouse.orders.lock().unwrap().clone();
    for t in 0..3u32 {
        let mine: Vec<u32> = ids.iter().copied().filter(|id| id / 1000 == t).collect();
        assert_eq!(mine, (0..40).map(|i| t * 1000 + i).collect::<Vec<_>>());
    }
}

// ─── Type-erased Publishing ──────────────────────────────────────

#[tokio::test]
async fn test_shared_payload_paths() {
    let hits = Arc::new(AtomicUsize::new(0));

    let sync = ObjectDistributor::new();
    sync.subscribe(TypeKey::of::<StockLow>(), counting_handler("s", &hits))
        .unwrap();
    let summary = sync
        .distribute_shared(TypeKey::of::<StockLow>(), Arc::new(StockLow { sku: "F-6" }), None)
        .unwrap();
    assert_eq!(summary.delivered, 1);
    assert!(sync
        .distribute_shared(TypeKey::of::<StockLow>(), Arc::new(OrderPlaced { id: 1 }), None)
        .is_err());

    let async_engine = EventDistributor::new();
    async_engine
        .subscribe(TypeKey::of::<StockLow>(), counting_subscriber("a", &hits))
        .unwrap();
    async_engine
        .publish_shared(TypeKey::of::<StockLow>(), Arc::new(StockLow { sku: "G-7" }))
        .await
        .unwrap();
    assert!(async_engine
        .publish_shared(TypeKey::of::<StockLow>(), Arc::new(OrderPlaced { id: 2 }))
        .await
        .is_err());

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
