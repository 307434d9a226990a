use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use bl_types::Event;

use crate::bus::EventBus;

const JOIN_DEADLINE: Duration = Duration::from_secs(5);

type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Join a worker but give up after the deadline; a callback that never
/// returns is left to finish detached.
fn join_with_deadline(handle: JoinHandle<()>, deadline: Duration) -> bool {
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

/// A named periodic task running on its own worker.
///
/// When a callback overruns its interval the next invocation starts
/// immediately after it completes: invocations never overlap and drift is
/// absorbed rather than compensated. Cancellation is cooperative via an
/// interruptible wait.
pub struct Timer {
    pub timer_id: String,
    pub interval: Duration,
    pub repeat: bool,
    pub start_delay: Duration,
    callback: TimerCallback,
    stop_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl Timer {
    pub fn new(
        timer_id: impl Into<String>,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
        repeat: bool,
        start_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            timer_id: timer_id.into(),
            interval,
            repeat,
            start_delay,
            callback: Arc::new(callback),
            stop_tx: Mutex::new(None),
            worker: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A repeating timer that publishes a TIMER event on every tick, used to
    /// drive data refresh and heartbeat consumers.
    pub fn publishing(
        bus: Arc<EventBus>,
        timer_id: impl Into<String>,
        interval: Duration,
        start_delay: Duration,
    ) -> Arc<Self> {
        let timer_id = timer_id.into();
        let id_for_event = timer_id.clone();
        Self::new(
            timer_id,
            interval,
            move || {
                bus.publish(Event::timer(id_for_event.clone(), interval, Utc::now()));
            },
            true,
            start_delay,
        )
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!(timer_id = %self.timer_id, "timer already running");
            return;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        *self.stop_tx.lock() = Some(stop_tx);

        let callback = Arc::clone(&self.callback);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let repeat = self.repeat;
        let start_delay = self.start_delay;
        let timer_id = self.timer_id.clone();

        let handle = thread::Builder::new()
            .name(format!("timer-{}", timer_id))
            .spawn(move || {
                if !start_delay.is_zero() {
                    match stop_rx.recv_timeout(start_delay) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => {
                            running.store(false, Ordering::Release);
                            return;
                        }
                    }
                }

                loop {
                    let started = Instant::now();
                    callback();
                    let elapsed = started.elapsed();
                    if elapsed > interval {
                        warn!(
                            timer_id = %timer_id,
                            elapsed_ms = elapsed.as_millis() as u64,
                            interval_ms = interval.as_millis() as u64,
                            "timer callback overran its interval"
                        );
                    }

                    if !repeat {
                        break;
                    }
                    match stop_rx.recv_timeout(interval.saturating_sub(elapsed)) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                }
                running.store(false, Ordering::Release);
            })
            .expect("failed to spawn timer worker");

        *self.worker.lock() = Some(handle);
        info!(timer_id = %self.timer_id, interval_ms = self.interval.as_millis() as u64, "timer started");
    }

    pub fn stop(&self) {
        // Dropping the sender interrupts the worker's wait.
        self.stop_tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if !join_with_deadline(handle, JOIN_DEADLINE) {
                warn!(timer_id = %self.timer_id, "timer worker did not stop within deadline");
            }
        }
        self.running.store(false, Ordering::Release);
        info!(timer_id = %self.timer_id, "timer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Owns a set of named timers with bulk start/stop.
#[derive(Default)]
pub struct TimerManager {
    timers: Mutex<HashMap<String, Arc<Timer>>>,
    running: AtomicBool,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a timer; refuses duplicate ids. If the manager is already
    /// running the timer starts immediately.
    pub fn add_timer(&self, timer: Arc<Timer>) -> bool {
        let mut timers = self.timers.lock();
        if timers.contains_key(&timer.timer_id) {
            warn!(timer_id = %timer.timer_id, "duplicate timer id refused");
            return false;
        }
        if self.running.load(Ordering::Acquire) {
            timer.start();
        }
        timers.insert(timer.timer_id.clone(), timer);
        true
    }

    pub fn create_timer(
        &self,
        timer_id: impl Into<String>,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
        repeat: bool,
        start_delay: Duration,
    ) -> Option<Arc<Timer>> {
        let timer = Timer::new(timer_id, interval, callback, repeat, start_delay);
        if self.add_timer(Arc::clone(&timer)) {
            Some(timer)
        } else {
            None
        }
    }

    pub fn remove_timer(&self, timer_id: &str) -> bool {
        let timer = self.timers.lock().remove(timer_id);
        match timer {
            Some(timer) => {
                timer.stop();
                true
            }
            None => {
                warn!(timer_id = %timer_id, "timer not found");
                false
            }
        }
    }

    pub fn get_timer(&self, timer_id: &str) -> Option<Arc<Timer>> {
        self.timers.lock().get(timer_id).cloned()
    }

    pub fn start_all(&self) {
        self.running.store(true, Ordering::Release);
        let timers: Vec<Arc<Timer>> = self.timers.lock().values().cloned().collect();
        let count = timers.len();
        for timer in timers {
            timer.start();
        }
        info!(count, "timers started");
    }

    pub fn stop_all(&self) {
        self.running.store(false, Ordering::Release);
        let timers: Vec<Arc<Timer>> = self.timers.lock().values().cloned().collect();
        for timer in timers {
            timer.stop();
        }
        info!("all timers stopped");
    }

    pub fn running_timers(&self) -> Vec<String> {
        self.timers
            .lock()
            .iter()
            .filter(|(_, timer)| timer.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn repeating_timer_fires_multiple_times() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let timer = Timer::new(
            "t1",
            Duration::from_millis(10),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            true,
            Duration::ZERO,
        );

        timer.start();
        thread::sleep(Duration::from_millis(100));
        timer.stop();

        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected at least 3 firings, got {}", fired);
        assert!(!timer.is_running());

        // No further firings after stop.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[test]
    fn one_shot_timer_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let timer = Timer::new(
            "once",
            Duration::from_millis(5),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            false,
            Duration::ZERO,
        );

        timer.start();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
        timer.stop();
    }

    #[test]
    fn start_delay_respected_and_interruptible() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let timer = Timer::new(
            "delayed",
            Duration::from_millis(5),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            true,
            Duration::from_secs(60),
        );

        timer.start();
        thread::sleep(Duration::from_millis(20));
        timer.stop();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn overrunning_callback_does_not_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let active_c = Arc::clone(&active);
        let overlapped_c = Arc::clone(&overlapped);

        let timer = Timer::new(
            "slow",
            Duration::from_millis(5),
            move || {
                if active_c.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlapped_c.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(25));
                active_c.fetch_sub(1, Ordering::SeqCst);
            },
            true,
            Duration::ZERO,
        );

        timer.start();
        thread::sleep(Duration::from_millis(120));
        timer.stop();
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn manager_refuses_duplicates_and_bulk_stops() {
        let manager = TimerManager::new();
        let made = manager.create_timer("a", Duration::from_millis(10), || {}, true, Duration::ZERO);
        assert!(made.is_some());
        let dup = manager.create_timer("a", Duration::from_millis(10), || {}, true, Duration::ZERO);
        assert!(dup.is_none());
        assert_eq!(manager.len(), 1);

        manager.start_all();
        assert_eq!(manager.running_timers(), vec!["a".to_string()]);

        // Timers added while running start immediately.
        manager.create_timer("b", Duration::from_millis(10), || {}, true, Duration::ZERO);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(manager.running_timers().len(), 2);

        manager.stop_all();
        assert!(manager.running_timers().is_empty());

        assert!(manager.remove_timer("a"));
        assert!(!manager.remove_timer("a"));
        assert_eq!(manager.len(), 1);
    }
}
