//! Per-URL failure bookkeeping that outlives a single request.
//!
//! A URL that keeps failing is probed less and less often: every request while
//! it has failed once, then every 2nd, 10th, 100th ... request, with a time
//! based probe as a floor so a recovered server is noticed eventually.

use crate::types::FailoverStatusChanged;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

type StatusListener = Box<dyn Fn(&FailoverStatusChanged) + Send + Sync>;

#[derive(Debug)]
pub struct FailureCounter {
    value: AtomicU64,
    last_check: Mutex<Instant>,
    force_check: AtomicBool,
}

impl Default for FailureCounter {
    fn default() -> Self {
        FailureCounter {
            value: AtomicU64::new(0),
            last_check: Mutex::new(Instant::now()),
            force_check: AtomicBool::new(false),
        }
    }
}

impl FailureCounter {
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn last_check(&self) -> Instant {
        *self.last_check.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self.last_check.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn is_force_check(&self) -> bool {
        self.force_check.load(Ordering::SeqCst)
    }
}

/// How many requests to let pass between probes of a URL that has failed
/// `failures` times in a row.
pub fn check_repetition_rate(failures: u64) -> u64 {
    match failures {
        0..=1 => failures,
        2..=9 => 2,
        10..=99 => 10,
        100..=999 => 100,
        1000..=9999 => 1000,
        10000..=99999 => 10000,
        _ => 100000,
    }
}

#[derive(Default)]
pub struct FailureCounters {
    counters: DashMap<String, Arc<FailureCounter>>,
    listeners: RwLock<Vec<StatusListener>>,
}

impl FailureCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, url: &str) -> Arc<FailureCounter> {
        if let Some(counter) = self.counters.get(url) {
            return Arc::clone(counter.value());
        }
        Arc::clone(self.counters.entry(url.to_string()).or_default().value())
    }

    /// Start tracking `url` without disturbing an existing counter.
    pub fn track(&self, url: &str) {
        self.counters.entry(url.to_string()).or_default();
    }

    /// Forget everything about `url`'s failures, without notifying listeners.
    pub fn replace_with_fresh(&self, url: &str) {
        self.counters
            .insert(url.to_string(), Arc::new(FailureCounter::default()));
    }

    pub fn failure_count(&self, url: &str) -> u64 {
        self.holder(url).value()
    }

    pub fn is_first_failure(&self, url: &str) -> bool {
        self.failure_count(url) == 0
    }

    pub fn increment(&self, url: &str) {
        let counter = self.holder(url);
        counter.force_check.store(false, Ordering::SeqCst);
        let current = counter.value.fetch_add(1, Ordering::SeqCst) + 1;
        if current == 1 {
            tracing::warn!("{} started failing", url);
            self.notify(&FailoverStatusChanged {
                url: url.to_string(),
                failing: true,
            });
        }
    }

    pub fn reset(&self, url: &str) {
        let counter = self.holder(url);
        let old = counter.value.swap(0, Ordering::SeqCst);
        counter.touch();
        counter.force_check.store(false, Ordering::SeqCst);
        if old != 0 {
            tracing::info!("{} recovered after {} failures", url, old);
            self.notify(&FailoverStatusChanged {
                url: url.to_string(),
                failing: false,
            });
        }
    }

    pub fn force_check(&self, url: &str, should_force: bool) {
        self.holder(url)
            .force_check
            .store(should_force, Ordering::SeqCst);
    }

    /// Whether request number `current_request` should be sent to `url`,
    /// given its failure history.
    pub fn should_check(&self, url: &str, current_request: u64, max_check_period: Duration) -> bool {
        let counter = self.holder(url);
        let failures = counter.value();
        if failures == 0 || counter.is_force_check() {
            counter.touch();
            return true;
        }

        let rate = check_repetition_rate(failures);
        if rate > 0 && current_request % rate == 0 {
            counter.touch();
            return true;
        }

        if counter.last_check().elapsed() > max_check_period {
            counter.touch();
            return true;
        }

        false
    }

    pub fn on_status_changed<F>(&self, listener: F)
    where
        F: Fn(&FailoverStatusChanged) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    fn notify(&self, event: &FailoverStatusChanged) {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_repetition_rate() {
        assert_eq!(check_repetition_rate(0), 0);
        assert_eq!(check_repetition_rate(1), 1);
        assert_eq!(check_repetition_rate(2), 2);
        assert_eq!(check_repetition_rate(9), 2);
        assert_eq!(check_repetition_rate(10), 10);
        assert_eq!(check_repetition_rate(999), 100);
        assert_eq!(check_repetition_rate(5000), 1000);
        assert_eq!(check_repetition_rate(50000), 10000);
        assert_eq!(check_repetition_rate(1_000_000), 100000);
    }

    #[test]
    fn test_increment_and_reset_emit_transitions_once() {
        let counters = FailureCounters::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        counters.on_status_changed(move |e| sink.lock().unwrap().push(e.clone()));

        counters.increment("http://a");
        counters.increment("http://a");
        assert_eq!(counters.failure_count("http://a"), 2);
        counters.reset("http://a");
        counters.reset("http://a");

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                FailoverStatusChanged {
                    url: "http://a".into(),
                    failing: true
                },
                FailoverStatusChanged {
                    url: "http://a".into(),
                    failing: false
                },
            ]
        );
    }

    #[test]
    fn test_healthy_url_is_always_checked() {
        let counters = FailureCounters::new();
        for request in 0..5 {
            assert!(counters.should_check("http://a", request, Duration::from_secs(300)));
        }
    }

    #[test]
    fn test_failing_url_is_throttled() {
        let counters = FailureCounters::new();
        for _ in 0..5 {
            counters.increment("http://a");
        }
        let period = Duration::from_secs(300);
        assert!(counters.should_check("http://a", 4, period));
        assert!(!counters.should_check("http://a", 5, period));
        assert!(counters.should_check("http://a", 6, period));
    }

    #[test]
    fn test_force_check_bypasses_throttle() {
        let counters = FailureCounters::new();
        for _ in 0..5 {
            counters.increment("http://a");
        }
        counters.force_check("http://a", true);
        assert!(counters.should_check("http://a", 5, Duration::from_secs(300)));

        // the next failure clears the forced check
        counters.increment("http://a");
        assert!(!counters.should_check("http://a", 5, Duration::from_secs(300)));
    }

    #[test]
    fn test_elapsed_period_allows_probe() {
        let counters = FailureCounters::new();
        for _ in 0..5 {
            counters.increment("http://a");
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(counters.should_check("http://a", 5, Duration::from_millis(1)));
    }

    #[test]
    fn test_replace_with_fresh_is_silent() {
        let counters = FailureCounters::new();
        let events = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&events);
        counters.increment("http://a");
        counters.on_status_changed(move |_| *sink.lock().unwrap() += 1);

        counters.replace_with_fresh("http://a");
        assert!(counters.is_first_failure("http://a"));
        assert_eq!(*events.lock().unwrap(), 0);
    }
}
