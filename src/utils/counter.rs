//! A simple counter for tracking per-file command results.
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;

/// A counter for tracking per-file command results.
pub struct Counter {
    ok: AtomicUsize,
    error: AtomicUsize,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            ok: AtomicUsize::new(0),
            error: AtomicUsize::new(0),
        }
    }

    pub fn inc_ok(&self) {
        self.ok.fetch_add(1, SeqCst);
    }

    pub fn inc_error(&self) {
        self.error.fetch_add(1, SeqCst);
    }

    pub fn errors(&self) -> usize {
        self.error.load(SeqCst)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OK: {}, Error: {}",
            self.ok.load(SeqCst),
            self.error.load(SeqCst),
        )
    }
}

#[test]
fn test_counter_display() {
    let counter = Counter::new();
    counter.inc_ok();
    counter.inc_ok();
    counter.inc_error();
    assert_eq!(counter.to_string(), "OK: 2, Error: 1");
    assert_eq!(counter.errors(), 1);
}
