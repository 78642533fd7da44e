//! Live view of a run: which entries are in flight and how many are done.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Names shown per status line before the rest are summarized as `+N more`.
const SHOWN_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub done: usize,
    pub total: usize,
    pub not_published: usize,
    /// Sorted names of entries currently inside the pipeline.
    pub in_flight: Vec<String>,
}

impl Snapshot {
    fn status_line(&self) -> String {
        let mut line = format!("entries {}/{}, {} not published", self.done, self.total, self.not_published);
        if !self.in_flight.is_empty() {
            let shown: Vec<&str> = self.in_flight.iter().take(SHOWN_IN_FLIGHT).map(String::as_str).collect();
            line.push_str("; working on ");
            line.push_str(&shown.join(", "));
            if self.in_flight.len() > SHOWN_IN_FLIGHT {
                line.push_str(&format!(" (+{} more)", self.in_flight.len() - SHOWN_IN_FLIGHT));
            }
        }
        line
    }
}

/// Shared by the worker threads and, when enabled, a reporter thread that
/// logs a status line every `interval`.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    interval: Duration,
    done: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    not_published: Arc<AtomicUsize>,
    in_flight: Arc<Mutex<BTreeSet<String>>>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            interval: Duration::from_secs(5),
            done: Arc::new(AtomicUsize::new(0)),
            total: Arc::new(AtomicUsize::new(0)),
            not_published: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(Mutex::new(BTreeSet::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn set_total(&self, n: usize) {
        self.total.store(n, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
        self.not_published.store(0, Ordering::Relaxed);
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn begin_job(&self, name: &str) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).insert(name.to_string());
    }

    pub fn finish_job(&self, name: &str, published: bool) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(name);
        self.done.fetch_add(1, Ordering::Relaxed);
        if !published {
            self.not_published.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            done: self.done.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            not_published: self.not_published.load(Ordering::Relaxed),
            in_flight: self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect(),
        }
    }

    /// Spawn the reporter thread. No-op when disabled.
    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let me = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            loop {
                thread::sleep(me.interval);
                if !me.running.load(Ordering::Relaxed) {
                    break;
                }
                log::info!("[{:>4}s] {}", t0.elapsed().as_secs(), me.snapshot().status_line());
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
