//! End-to-end tests for the event bus: ordering, backpressure, handler
//! isolation, and the overflow fallback.

use parking_lot::Mutex;
use peerbase_bus::{
    BusConfig, Event, EventBinding, EventBus, HandlerError, Priority, SubscriberId,
};
use std::sync::Arc;
use std::time::Duration;

/// Polls until `condition` holds or the deadline passes.
async fn wait_until(condition: impl Fn() -> bool, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn tagged(event_type: &str, tag: usize) -> Event {
    Event::new(event_type, "test").with_metadata("tag", tag.to_string())
}

fn tag_of(event: &Event) -> usize {
    event.metadata_value("tag").unwrap().parse().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_dispatch_in_publish_order() {
    // A single worker makes delivery order equal claim order, which in
    // turn must equal publish order while the ring never overflows.
    let bus = EventBus::new(BusConfig::new().worker_count(1)).unwrap();
    bus.initialize().unwrap();

    let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.register_subscriber(
        SubscriberId::new("collector"),
        vec![EventBinding::new("seq", Priority::NORMAL, move |event| {
            sink.lock().push(tag_of(event));
            Ok(())
        })],
    );

    for i in 0..100 {
        bus.publish(tagged("seq", i), Priority::NORMAL).await.unwrap();
    }

    assert!(wait_until(|| seen.lock().len() == 100, Duration::from_secs(2)).await);
    assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_ring_suspends_publish_until_a_slot_frees() {
    let bus = EventBus::new(BusConfig::new().ring_capacity(4).worker_count(1)).unwrap();
    bus.initialize().unwrap();

    // Gate the single worker inside a handler so the ring fills up.
    let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);
    bus.register_subscriber(
        SubscriberId::new("slow"),
        vec![EventBinding::new("work", Priority::NORMAL, move |_| {
            let _ = gate_rx.lock().recv();
            Ok(())
        })],
    );

    // One event occupies the worker, four fill the ring.
    for i in 0..5 {
        bus.publish(tagged("work", i), Priority::NORMAL).await.unwrap();
    }
    assert!(wait_until(|| bus.pending() == 4, Duration::from_secs(1)).await);

    // The sixth publish must suspend...
    let blocked = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.publish(tagged("work", 5), Priority::NORMAL).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "publish should be backpressured");

    // ...until the worker drains a slot.
    for _ in 0..6 {
        gate_tx.send(()).unwrap();
    }
    blocked.await.unwrap().unwrap();

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_immediate_falls_back_to_stream_when_full() {
    let bus = EventBus::new(BusConfig::new().ring_capacity(4).worker_count(1)).unwrap();
    bus.initialize().unwrap();

    let mut stream = bus.subscribe("work");

    let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);
    bus.register_subscriber(
        SubscriberId::new("slow"),
        vec![EventBinding::new("work", Priority::NORMAL, move |_| {
            let _ = gate_rx.lock().recv();
            Ok(())
        })],
    );

    for i in 0..5 {
        bus.publish(tagged("work", i), Priority::NORMAL).await.unwrap();
    }
    assert!(wait_until(|| bus.pending() == 4, Duration::from_secs(1)).await);

    // Ring is full: this must return immediately and still reach the
    // shared stream subscribers.
    let overflow = tagged("work", 999);
    let overflow_id = bus
        .publish_immediate(overflow, Priority::MAX)
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let event = stream.recv().await.expect("stream open");
            if event.id() == &overflow_id {
                return event;
            }
        }
    })
    .await
    .expect("overflow event must reach the shared stream");
    assert_eq!(tag_of(&received), 999);

    // The fallback still counts toward published statistics.
    let stats = bus.stats();
    assert_eq!(stats.published, 6);
    assert_eq!(stats.direct_broadcast, 1);

    for _ in 0..6 {
        let _ = gate_tx.send(());
    }
    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_handler_does_not_stop_delivery() {
    let bus = EventBus::new(BusConfig::new().worker_count(1)).unwrap();
    bus.initialize().unwrap();

    let delivered: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    bus.register_subscriber(
        SubscriberId::new("mixed"),
        vec![
            // Highest priority handler always fails.
            EventBinding::new("job", Priority::MAX, |_| {
                Err(HandlerError::new("simulated failure"))
            }),
            EventBinding::new("job", Priority::MIN, move |event| {
                sink.lock().push(tag_of(event));
                Ok(())
            }),
        ],
    );

    for i in 0..3 {
        bus.publish(tagged("job", i), Priority::NORMAL).await.unwrap();
    }

    assert!(wait_until(|| delivered.lock().len() == 3, Duration::from_secs(2)).await);
    assert_eq!(*delivered.lock(), vec![0, 1, 2]);

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handlers_run_high_priority_first_for_every_event() {
    let bus = EventBus::new(BusConfig::new().worker_count(1)).unwrap();
    bus.initialize().unwrap();

    let order: Arc<Mutex<Vec<(usize, &'static str)>>> = Arc::new(Mutex::new(Vec::new()));
    let high_sink = Arc::clone(&order);
    let low_sink = Arc::clone(&order);
    bus.register_subscriber(
        SubscriberId::new("dual"),
        vec![
            EventBinding::new("task", Priority::new(10), move |event| {
                high_sink.lock().push((tag_of(event), "high"));
                Ok(())
            }),
            EventBinding::new("task", Priority::new(0), move |event| {
                low_sink.lock().push((tag_of(event), "low"));
                Ok(())
            }),
        ],
    );

    // Publish priorities vary; handler ordering must not.
    for (i, publish_priority) in [1u8, 9, 5].into_iter().enumerate() {
        bus.publish(tagged("task", i), Priority::new(publish_priority))
            .await
            .unwrap();
    }

    assert!(wait_until(|| order.lock().len() == 6, Duration::from_secs(2)).await);
    let order = order.lock();
    for i in 0..3 {
        assert_eq!(order[i * 2], (i, "high"));
        assert_eq!(order[i * 2 + 1], (i, "low"));
    }

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_subscriptions_filter_by_type() {
    let bus = EventBus::with_defaults();
    bus.initialize().unwrap();

    let mut messages = bus.subscribe("social.message");
    let mut multi = bus.subscribe_types(vec!["net.peer".into(), "storage".into()]);
    let mut filtered = bus.subscribe_filtered(|e| e.source() == "chat");

    bus.publish(
        Event::new("social.message.text", "chat").with_metadata("n", "1"),
        Priority::NORMAL,
    )
    .await
    .unwrap();
    bus.publish(Event::new("net.peer.connected", "transport"), Priority::NORMAL)
        .await
        .unwrap();

    let m = tokio::time::timeout(Duration::from_secs(1), messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(m.event_type().as_str(), "social.message.text");

    let p = tokio::time::timeout(Duration::from_secs(1), multi.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p.event_type().as_str(), "net.peer.connected");

    let f = tokio::time::timeout(Duration::from_secs(1), filtered.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(f.source(), "chat");

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stats_track_processing() {
    let bus = EventBus::new(BusConfig::new().worker_count(2)).unwrap();
    bus.initialize().unwrap();

    for i in 0..10 {
        bus.publish(tagged("metrics", i), Priority::NORMAL)
            .await
            .unwrap();
    }

    assert!(wait_until(|| bus.stats().processed == 10, Duration::from_secs(2)).await);
    let stats = bus.stats();
    assert_eq!(stats.published, 10);
    assert_eq!(stats.direct_broadcast, 0);
    assert!(stats.last_event_at.is_some());

    bus.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_drops_pending_envelopes() {
    let bus = EventBus::new(BusConfig::new().ring_capacity(8).worker_count(1)).unwrap();
    bus.initialize().unwrap();

    // Park the worker forever on the first event.
    let (_gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);
    let delivered = Arc::new(Mutex::new(0usize));
    let count = Arc::clone(&delivered);
    bus.register_subscriber(
        SubscriberId::new("parked"),
        vec![EventBinding::new("work", Priority::NORMAL, move |_| {
            *count.lock() += 1;
            let _ = gate_rx.lock().recv_timeout(Duration::from_millis(200));
            Ok(())
        })],
    );

    for i in 0..6 {
        bus.publish(tagged("work", i), Priority::NORMAL).await.unwrap();
    }
    assert!(wait_until(|| *delivered.lock() >= 1, Duration::from_secs(1)).await);

    bus.shutdown().await;
    assert_eq!(bus.pending(), 0);
    // Only the events the worker reached before shutdown were delivered.
    assert!(*delivered.lock() < 6);
}
