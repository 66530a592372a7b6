use std::sync::atomic::{AtomicU64, Ordering};

/// Shared gauge of sample-buffer bytes currently handed to workers.
///
/// Dispatch decisions read a snapshot of this counter; it is advisory
/// backpressure, not hard admission control, so short bursts can exceed a
/// pipeline's budget.
#[derive(Debug, Default)]
pub struct MemoryGauge {
    in_use: AtomicU64,
}

impl MemoryGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self, bytes: u64) {
        self.in_use.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn release(&self, bytes: u64) {
        let mut current = self.in_use.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(bytes);
            match self.in_use.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn in_use(&self) -> u64 {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Usage if `bytes` more were dispatched right now.
    pub fn projected(&self, bytes: u64) -> u64 {
        self.in_use().saturating_add(bytes)
    }
}
