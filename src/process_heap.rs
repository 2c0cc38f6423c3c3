use std::sync::atomic::{AtomicUsize, Ordering};

/// State shared by every heap of a process.
///
/// Tracks how many heaps are currently marking incrementally or concurrently,
/// which write barriers consult to decide whether they have work to do. Entering
/// and exiting publish with `Release`, queries load with `Acquire`, so a barrier
/// observing a non-zero count also observes the marker state set up before it.
pub struct ProcessHeap {
    incremental_or_concurrent_marking: AtomicUsize,
}

impl ProcessHeap {
    pub const fn new() -> Self {
        Self {
            incremental_or_concurrent_marking: AtomicUsize::new(0),
        }
    }

    pub fn enter_incremental_or_concurrent_marking(&self) {
        self.incremental_or_concurrent_marking
            .fetch_add(1, Ordering::Release);
    }

    pub fn exit_incremental_or_concurrent_marking(&self) {
        let previous = self
            .incremental_or_concurrent_marking
            .fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "unbalanced exit from incremental marking");
    }

    pub fn is_any_incremental_or_concurrent_marking(&self) -> bool {
        self.incremental_or_concurrent_marking.load(Ordering::Acquire) > 0
    }
}

impl Default for ProcessHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_counts_heaps() {
        let process = ProcessHeap::new();
        assert!(!process.is_any_incremental_or_concurrent_marking());
        process.enter_incremental_or_concurrent_marking();
        process.enter_incremental_or_concurrent_marking();
        process.exit_incremental_or_concurrent_marking();
        assert!(process.is_any_incremental_or_concurrent_marking());
        process.exit_incremental_or_concurrent_marking();
        assert!(!process.is_any_incremental_or_concurrent_marking());
    }
}
