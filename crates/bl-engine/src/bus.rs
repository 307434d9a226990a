use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use bl_types::{Event, EventBusConfig, EventKind};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_POLL: Duration = Duration::from_millis(1);
const STOP_DEADLINE: Duration = Duration::from_secs(5);

/// Join a worker, giving up after the deadline; a handler stuck in a
/// callback is abandoned rather than blocking shutdown.
fn join_bounded(handle: JoinHandle<()>, deadline: Duration) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// A consumer of bus events.
///
/// Each handler is driven by exactly one dedicated worker, so
/// `handle_event` is never called concurrently for the same handler;
/// implementations keep their mutable state behind an uncontended lock.
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    fn handle_event(&self, event: &Event);
}

/// Counters published by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    pub events_dispatched: u64,
    pub events_dropped: u64,
    pub dispatch_errors: u64,
}

#[derive(Default)]
struct StatsInner {
    events_dispatched: AtomicU64,
    events_dropped: AtomicU64,
    dispatch_errors: AtomicU64,
    /// Events alive anywhere in the bus: central queue, subscriber queues,
    /// or a handler callback. Zero means quiescent.
    pending: AtomicI64,
}

/// One subscriber: its own bounded queue drained by its own worker.
struct Subscription {
    name: String,
    sender: Sender<Event>,
    active: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Multi-producer / multi-consumer event dispatcher.
///
/// One bounded central queue is drained by a single dispatcher worker that
/// copies each event into the bounded queue of every subscriber registered
/// for its kind. Producers never block: a full queue drops that one event
/// (for that one subscriber) and bumps `events_dropped`. A handler
/// registered for several kinds shares a single queue and worker, so it
/// observes those kinds serialized.
pub struct EventBus {
    config: EventBusConfig,
    central_tx: Sender<Event>,
    central_rx: Receiver<Event>,
    subscribers: Arc<RwLock<HashMap<EventKind, Vec<Arc<Subscription>>>>>,
    by_name: Mutex<HashMap<String, Arc<Subscription>>>,
    stats: Arc<StatsInner>,
    running: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (central_tx, central_rx) = bounded(config.central_queue_size);
        Self {
            config,
            central_tx,
            central_rx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            by_name: Mutex::new(HashMap::new()),
            stats: Arc::new(StatsInner::default()),
            running: Arc::new(AtomicBool::new(false)),
            dispatcher: Mutex::new(None),
        }
    }

    /// Attach a handler to an event kind with the configured default queue
    /// size. Registering the same handler (by name) for another kind reuses
    /// its queue and worker.
    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.register_with_queue_size(kind, handler, self.config.subscriber_queue_size);
    }

    /// Attach a handler with an explicit queue capacity; the capacity only
    /// applies when this call creates the subscription.
    pub fn register_with_queue_size(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
        queue_size: usize,
    ) {
        let subscription = {
            let mut by_name = self.by_name.lock();
            match by_name.get(handler.name()) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let subscription = self.spawn_subscription(handler, queue_size);
                    by_name.insert(subscription.name.clone(), Arc::clone(&subscription));
                    subscription
                }
            }
        };

        let mut subscribers = self.subscribers.write();
        let entries = subscribers.entry(kind).or_default();
        if !entries.iter().any(|s| s.name == subscription.name) {
            info!(handler = %subscription.name, kind = %kind, "registered event handler");
            entries.push(subscription);
        }
    }

    fn spawn_subscription(
        &self,
        handler: Arc<dyn EventHandler>,
        queue_size: usize,
    ) -> Arc<Subscription> {
        let (tx, rx) = bounded::<Event>(queue_size);
        let active = Arc::new(AtomicBool::new(true));
        let stats = Arc::clone(&self.stats);
        let name = handler.name().to_string();

        let worker_active = Arc::clone(&active);
        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name(format!("bus-{}", worker_name))
            .spawn(move || {
                loop {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(event) => {
                            let outcome =
                                catch_unwind(AssertUnwindSafe(|| handler.handle_event(&event)));
                            if outcome.is_err() {
                                stats.dispatch_errors.fetch_add(1, Ordering::Relaxed);
                                error!(
                                    handler = %worker_name,
                                    kind = %event.kind(),
                                    "handler panicked while processing event"
                                );
                            }
                            stats.pending.fetch_sub(1, Ordering::AcqRel);
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if !worker_active.load(Ordering::Acquire) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn subscriber worker");

        Arc::new(Subscription {
            name,
            sender: tx,
            active,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Non-blocking publish. Returns whether the central queue accepted the
    /// event; a full queue drops it and bumps `events_dropped`.
    pub fn publish(&self, event: Event) -> bool {
        self.stats.pending.fetch_add(1, Ordering::AcqRel);
        match self.central_tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.stats.pending.fetch_sub(1, Ordering::AcqRel);
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %event.kind(), "central queue full, event dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.pending.fetch_sub(1, Ordering::AcqRel);
                false
            }
        }
    }

    /// Start the dispatcher worker. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let rx = self.central_rx.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("bus-dispatcher".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(event) => {
                        let targets: Vec<Arc<Subscription>> = {
                            let guard = subscribers.read();
                            guard.get(&event.kind()).cloned().unwrap_or_default()
                        };

                        let mut delivered = 0usize;
                        for subscription in &targets {
                            match subscription.sender.try_send(event.clone()) {
                                Ok(()) => {
                                    stats.pending.fetch_add(1, Ordering::AcqRel);
                                    delivered += 1;
                                }
                                Err(TrySendError::Full(_)) => {
                                    stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                                    warn!(
                                        handler = %subscription.name,
                                        kind = %event.kind(),
                                        "subscriber queue full, event dropped"
                                    );
                                }
                                Err(TrySendError::Disconnected(_)) => {
                                    stats.dispatch_errors.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }

                        stats.events_dispatched.fetch_add(1, Ordering::Relaxed);
                        if delivered == 0 {
                            debug!(kind = %event.kind(), "event had no live subscribers");
                        }
                        // The central-queue token is released only after the
                        // fan-out so quiescence never observes a half
                        // dispatched event.
                        stats.pending.fetch_sub(1, Ordering::AcqRel);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("failed to spawn dispatcher");

        *self.dispatcher.lock() = Some(handle);
        info!("event bus started");
    }

    /// Stop the bus: drain in-flight events up to a bounded deadline, then
    /// signal and join the dispatcher and all subscriber workers.
    pub fn stop(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        if !self.wait_until_idle(STOP_DEADLINE) {
            warn!(
                pending = self.stats.pending.load(Ordering::Acquire),
                "event bus stop deadline reached with events still in flight"
            );
        }

        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.dispatcher.lock().take() {
            if !join_bounded(handle, STOP_DEADLINE) {
                warn!("dispatcher did not stop within deadline");
            }
        }

        let subscriptions: Vec<Arc<Subscription>> = self.by_name.lock().values().cloned().collect();
        for subscription in subscriptions {
            subscription.active.store(false, Ordering::Release);
            if let Some(handle) = subscription.worker.lock().take() {
                if !join_bounded(handle, STOP_DEADLINE) {
                    warn!(handler = %subscription.name, "worker did not stop within deadline");
                }
            }
        }
        info!("event bus stopped");
    }

    /// True when no event is in the central queue, in any subscriber queue,
    /// or inside a handler callback.
    pub fn is_idle(&self) -> bool {
        self.stats.pending.load(Ordering::Acquire) == 0 && self.central_rx.is_empty()
    }

    /// Block until the bus is quiescent or the deadline elapses.
    pub fn wait_until_idle(&self, deadline: Duration) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if self.is_idle() {
                return true;
            }
            thread::sleep(IDLE_POLL);
        }
        self.is_idle()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            events_dispatched: self.stats.events_dispatched.load(Ordering::Relaxed),
            events_dropped: self.stats.events_dropped.load(Ordering::Relaxed),
            dispatch_errors: self.stats.dispatch_errors.load(Ordering::Relaxed),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.by_name.lock().len()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // Workers exit on their own once senders disconnect; make sure the
        // dispatcher is not left spinning if the caller forgot to stop.
        self.running.store(false, Ordering::Release);
        let subscriptions: Vec<Arc<Subscription>> = self.by_name.lock().values().cloned().collect();
        for subscription in subscriptions {
            subscription.active.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_types::{Signal, SignalDirection};
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    fn ts() -> DateTime<Utc> {
        "2024-03-01T00:00:00Z".parse().unwrap()
    }

    fn signal_event(n: usize) -> Event {
        Event::signal(
            Signal::new(
                "s1",
                format!("SYM{:03}", n),
                SignalDirection::Buy,
                0.5,
                ts(),
                dec!(10.0),
                "test",
            )
            .unwrap(),
        )
    }

    struct Recorder {
        name: String,
        seen: Mutex<Vec<Event>>,
        delay: Duration,
        count: AtomicUsize,
    }

    impl Recorder {
        fn new(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
                delay,
                count: AtomicUsize::new(0),
            })
        }
    }

    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle_event(&self, event: &Event) {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.seen.lock().push(event.clone());
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bus(central: usize, subscriber: usize) -> EventBus {
        EventBus::new(EventBusConfig {
            central_queue_size: central,
            subscriber_queue_size: subscriber,
        })
    }

    #[test]
    fn delivers_in_fifo_order() {
        let bus = bus(100, 100);
        let recorder = Recorder::new("recorder", Duration::ZERO);
        bus.register(EventKind::Signal, recorder.clone());
        bus.start();

        for n in 0..20 {
            assert!(bus.publish(signal_event(n)));
        }
        assert!(bus.wait_until_idle(Duration::from_secs(2)));

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 20);
        for (n, event) in seen.iter().enumerate() {
            match event {
                Event::Signal { signal, .. } => {
                    assert_eq!(signal.symbol, format!("SYM{:03}", n));
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(bus.stats().events_dispatched, 20);
        bus.stop();
    }

    #[test]
    fn kind_filtering() {
        let bus = bus(100, 100);
        let recorder = Recorder::new("signals-only", Duration::ZERO);
        bus.register(EventKind::Signal, recorder.clone());
        bus.start();

        bus.publish(signal_event(0));
        bus.publish(Event::timer("t1", Duration::from_secs(1), ts()));
        assert!(bus.wait_until_idle(Duration::from_secs(2)));

        assert_eq!(recorder.count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().events_dispatched, 2);
        bus.stop();
    }

    #[test]
    fn shared_queue_for_multi_kind_handler() {
        let bus = bus(100, 100);
        let recorder = Recorder::new("multi", Duration::ZERO);
        bus.register(EventKind::Signal, recorder.clone());
        bus.register(EventKind::Timer, recorder.clone());
        assert_eq!(bus.subscriber_count(), 1);
        bus.start();

        bus.publish(signal_event(0));
        bus.publish(Event::timer("t1", Duration::from_secs(1), ts()));
        assert!(bus.wait_until_idle(Duration::from_secs(2)));
        assert_eq!(recorder.count.load(Ordering::SeqCst), 2);
        bus.stop();
    }

    #[test]
    fn slow_subscriber_overflow_is_isolated() {
        let bus = bus(1000, 1000);
        let fast = Recorder::new("fast", Duration::ZERO);
        let slow = Recorder::new("slow", Duration::from_millis(20));
        bus.register(EventKind::Signal, fast.clone());
        bus.register_with_queue_size(EventKind::Signal, slow.clone(), 4);
        bus.start();

        for n in 0..100 {
            assert!(bus.publish(signal_event(n)));
        }
        assert!(bus.wait_until_idle(Duration::from_secs(10)));

        let fast_seen = fast.count.load(Ordering::SeqCst);
        let slow_seen = slow.count.load(Ordering::SeqCst);
        assert_eq!(fast_seen, 100);
        assert!(slow_seen < 100);
        let stats = bus.stats();
        assert_eq!(stats.events_dispatched, 100);
        assert!(stats.events_dropped > 0);
        assert_eq!(stats.events_dropped as usize, 100 - slow_seen);

        // The slow handler saw an in-order subsequence.
        let seen = slow.seen.lock();
        let mut last = None;
        for event in seen.iter() {
            if let Event::Signal { signal, .. } = event {
                let n: usize = signal.symbol[3..].parse().unwrap();
                if let Some(prev) = last {
                    assert!(n > prev);
                }
                last = Some(n);
            }
        }
        bus.stop();
    }

    struct Panicker {
        after: usize,
        count: AtomicUsize,
    }

    impl EventHandler for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        fn handle_event(&self, _event: &Event) {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            if n == self.after {
                panic!("boom");
            }
        }
    }

    #[test]
    fn handler_panic_does_not_poison_the_bus() {
        let bus = bus(100, 100);
        let panicker = Arc::new(Panicker {
            after: 1,
            count: AtomicUsize::new(0),
        });
        let healthy = Recorder::new("healthy", Duration::ZERO);
        bus.register(EventKind::Signal, panicker.clone());
        bus.register(EventKind::Signal, healthy.clone());
        bus.start();

        for n in 0..5 {
            bus.publish(signal_event(n));
        }
        assert!(bus.wait_until_idle(Duration::from_secs(2)));

        assert_eq!(healthy.count.load(Ordering::SeqCst), 5);
        assert_eq!(panicker.count.load(Ordering::SeqCst), 5);
        assert_eq!(bus.stats().dispatch_errors, 1);
        bus.stop();
    }

    struct Republisher {
        bus: Arc<EventBus>,
        forwarded: AtomicUsize,
    }

    impl EventHandler for Republisher {
        fn name(&self) -> &str {
            "republisher"
        }

        fn handle_event(&self, event: &Event) {
            if let Event::Signal { .. } = event {
                if self.forwarded.fetch_add(1, Ordering::SeqCst) == 0 {
                    self.bus
                        .publish(Event::timer("derived", Duration::from_secs(1), ts()));
                }
            }
        }
    }

    #[test]
    fn idle_covers_republished_events() {
        let bus = Arc::new(bus(100, 100));
        let republisher = Arc::new(Republisher {
            bus: Arc::clone(&bus),
            forwarded: AtomicUsize::new(0),
        });
        let timers = Recorder::new("timers", Duration::from_millis(10));
        bus.register(EventKind::Signal, republisher);
        bus.register(EventKind::Timer, timers.clone());
        bus.start();

        bus.publish(signal_event(0));
        assert!(bus.wait_until_idle(Duration::from_secs(2)));
        assert_eq!(timers.count.load(Ordering::SeqCst), 1);
        bus.stop();
    }

    #[test]
    fn publish_conservation() {
        let bus = bus(8, 2);
        let slow = Recorder::new("slow", Duration::from_millis(5));
        bus.register(EventKind::Signal, slow.clone());
        bus.start();

        let mut accepted = 0u64;
        for n in 0..50 {
            if bus.publish(signal_event(n)) {
                accepted += 1;
            }
        }
        assert!(bus.wait_until_idle(Duration::from_secs(5)));
        let stats = bus.stats();
        // Everything accepted centrally was dispatched; everything else
        // is accounted for by the drop counter.
        assert_eq!(stats.events_dispatched, accepted);
        assert_eq!(
            stats.events_dispatched,
            slow.count.load(Ordering::SeqCst) as u64
                + (stats.events_dropped - (50 - accepted))
        );
        bus.stop();
    }
}
