use std::time::{Duration, Instant};

/// Collects marking and allocation counters of one heap.
#[derive(Default)]
pub struct StatsCollector {
    marking_started_at: Option<Instant>,
    marking_in_progress: bool,
    total_gc_cycles_count: usize,
    last_marked_bytes: usize,
    total_marked_bytes: usize,
    total_marking_time: Duration,
    allocated_bytes_since_marking: usize,
    total_memory_allocated: usize,
    total_objects_allocated: usize,
    total_objects_found_on_stack: usize,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_marking_started(&mut self) {
        debug_assert!(!self.marking_in_progress, "marking started twice");
        self.marking_in_progress = true;
        self.marking_started_at = Some(Instant::now());
        self.allocated_bytes_since_marking = 0;
    }

    pub fn notify_marking_completed(&mut self, marked_bytes: usize) {
        debug_assert!(self.marking_in_progress, "marking completed without start");
        self.marking_in_progress = false;
        self.total_gc_cycles_count += 1;
        self.last_marked_bytes = marked_bytes;
        self.total_marked_bytes += marked_bytes;
        if let Some(start) = self.marking_started_at.take() {
            self.total_marking_time += start.elapsed();
        }
    }

    pub fn notify_allocation(&mut self, bytes: usize) {
        self.allocated_bytes_since_marking += bytes;
        self.total_memory_allocated += bytes;
        self.total_objects_allocated += 1;
    }

    pub fn notify_objects_found_on_stack(&mut self, count: usize) {
        self.total_objects_found_on_stack += count;
    }

    pub fn is_marking_in_progress(&self) -> bool {
        self.marking_in_progress
    }

    /// Bytes allocated since the current or last cycle started.
    pub fn allocated_bytes_since_marking(&self) -> usize {
        self.allocated_bytes_since_marking
    }

    pub fn last_marked_bytes(&self) -> usize {
        self.last_marked_bytes
    }

    pub fn total_gc_cycles_count(&self) -> usize {
        self.total_gc_cycles_count
    }

    pub fn snapshot(&self, committed_bytes: usize, pages: usize) -> HeapStatistics {
        HeapStatistics {
            committed_bytes,
            pages,
            total_gc_cycles_count: self.total_gc_cycles_count,
            last_marked_bytes: self.last_marked_bytes,
            total_marked_bytes: self.total_marked_bytes,
            total_marking_time: self.total_marking_time,
            total_memory_allocated: self.total_memory_allocated,
            total_objects_allocated: self.total_objects_allocated,
            total_objects_found_on_stack: self.total_objects_found_on_stack,
        }
    }
}

pub struct HeapStatistics {
    pub committed_bytes: usize,
    pub pages: usize,
    pub total_gc_cycles_count: usize,
    pub last_marked_bytes: usize,
    pub total_marked_bytes: usize,
    pub total_marking_time: Duration,
    pub total_memory_allocated: usize,
    pub total_objects_allocated: usize,
    pub total_objects_found_on_stack: usize,
}

struct FormattedSize {
    pub size: usize,
}

impl std::fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let ksize = (self.size as f64) / 1024f64;

        if ksize < 1f64 {
            return write!(f, "{}B", self.size);
        }

        let msize = ksize / 1024f64;

        if msize < 1f64 {
            return write!(f, "{:.1}K", ksize);
        }

        let gsize = msize / 1024f64;

        if gsize < 1f64 {
            write!(f, "{:.1}M", msize)
        } else {
            write!(f, "{:.1}G", gsize)
        }
    }
}

fn formatted_size(size: usize) -> FormattedSize {
    FormattedSize { size }
}

impl std::fmt::Display for HeapStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Heap statistics:")?;
        writeln!(
            f,
            "  Committed memory: {} in {} page(s)",
            formatted_size(self.committed_bytes),
            self.pages
        )?;
        writeln!(f, "  Total GC cycles count: {}", self.total_gc_cycles_count)?;
        writeln!(
            f,
            "  Marked in last cycle: {}",
            formatted_size(self.last_marked_bytes)
        )?;
        writeln!(
            f,
            "  Total marked: {} in {:.2}ms",
            formatted_size(self.total_marked_bytes),
            self.total_marking_time.as_secs_f64() * 1000.0
        )?;
        writeln!(
            f,
            "  Total memory allocated: {}",
            formatted_size(self.total_memory_allocated)
        )?;
        writeln!(
            f,
            "  Total objects allocated: {}",
            self.total_objects_allocated
        )?;
        let found_ratio = if self.total_objects_allocated == 0 {
            0.0
        } else {
            self.total_objects_found_on_stack as f64 / self.total_objects_allocated as f64
        };
        writeln!(
            f,
            "  Total objects found conservatively: {} ({:.2}%)",
            self.total_objects_found_on_stack,
            found_ratio * 100.0
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(formatted_size(512).to_string(), "512B");
        assert_eq!(formatted_size(64 * 1024).to_string(), "64.0K");
        assert_eq!(formatted_size(3 * 1024 * 1024 / 2).to_string(), "1.5M");
    }

    #[test]
    fn cycle_counters() {
        let mut stats = StatsCollector::new();
        stats.notify_allocation(32);
        stats.notify_marking_started();
        assert!(stats.is_marking_in_progress());
        stats.notify_marking_completed(128);
        let snapshot = stats.snapshot(4096, 1);
        assert_eq!(snapshot.total_gc_cycles_count, 1);
        assert_eq!(snapshot.last_marked_bytes, 128);
        assert_eq!(snapshot.total_objects_allocated, 1);
        assert!(snapshot.to_string().contains("Total GC cycles count: 1"));
    }
}
