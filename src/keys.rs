use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Rotating pool of API credentials. The active index is process-local and
/// resets each run; rotation never wraps, so an exhausted pool stays
/// exhausted until the next invocation.
#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<String>,
    index: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            index: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Currently active key, or `None` once the pool is exhausted.
    pub fn current(&self) -> Option<&str> {
        self.keys
            .get(self.index.load(Ordering::Relaxed))
            .map(String::as_str)
    }

    /// 1-based position of the active key, for log lines.
    pub fn position(&self) -> usize {
        self.index.load(Ordering::Relaxed) + 1
    }

    /// Advance to the next key. Returns false when none remain.
    pub fn rotate(&self) -> bool {
        let next = self.index.load(Ordering::Relaxed) + 1;
        if next < self.keys.len() {
            self.index.store(next, Ordering::Relaxed);
            info!(target = "bodega.keys", key = next + 1, "switching to next credential");
            true
        } else {
            self.index.store(self.keys.len(), Ordering::Relaxed);
            false
        }
    }

    pub fn reset(&self) {
        self.index.store(0, Ordering::Relaxed);
    }
}
