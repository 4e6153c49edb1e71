use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};

use serde_json::json;

/// Gauge-like atomic counter that remembers the highest value it reached.
///
/// Used for in-flight bookkeeping (pending background deliveries), where
/// the current value goes up and down and the peak is worth reporting.
pub struct Counter {
    current: AtomicIsize,
    peak: AtomicIsize,
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#"{{ "count":{}, "max":{} }}"#, self.count(), self.max())
    }
}

impl Counter {
    #[inline]
    pub fn new() -> Self {
        Counter { current: AtomicIsize::new(0), peak: AtomicIsize::new(0) }
    }

    #[inline]
    pub fn inc(&self) {
        self.incs(1);
    }

    #[inline]
    pub fn incs(&self, c: isize) {
        let prev = self.current.fetch_add(c, Ordering::SeqCst);
        self.peak.fetch_max(prev + c, Ordering::SeqCst);
    }

    #[inline]
    pub fn dec(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn count(&self) -> isize {
        self.current.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn max(&self) -> isize {
        self.peak.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.count() <= 0
    }

    #[inline]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "count": self.count(),
            "max": self.max()
        })
    }
}
