//! Work-stealing worklist shared by the mutator and concurrent markers.
//!
//! Every consumer owns a local LIFO deque. Once a local deque holds
//! [SEGMENT_SIZE] items they are published to a global injector from which
//! any consumer may steal a batch when its own deque runs dry.

use crossbeam_deque::{Injector, Steal, Worker};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

pub const SEGMENT_SIZE: usize = 64;

pub struct Worklist<T> {
    locals: Box<[CachePadded<Mutex<Worker<T>>>]>,
    injector: Injector<T>,
}

impl<T: Send> Worklist<T> {
    /// Creates a worklist with one local view per consumer `0..num_tasks`.
    pub fn new(num_tasks: usize) -> Self {
        assert!(num_tasks > 0, "worklist needs at least one consumer");
        Self {
            locals: (0..num_tasks)
                .map(|_| CachePadded::new(Mutex::new(Worker::new_lifo())))
                .collect(),
            injector: Injector::new(),
        }
    }

    pub fn num_tasks(&self) -> usize {
        self.locals.len()
    }

    pub fn push(&self, task_id: usize, item: T) {
        let local = self.locals[task_id].lock();
        if local.len() >= SEGMENT_SIZE {
            self.publish(&local);
        }
        local.push(item);
    }

    pub fn pop(&self, task_id: usize) -> Option<T> {
        let local = self.locals[task_id].lock();
        if let Some(item) = local.pop() {
            return Some(item);
        }
        loop {
            match self.injector.steal_batch_and_pop(&local) {
                Steal::Empty => return None,
                Steal::Success(item) => return Some(item),
                Steal::Retry => continue,
            }
        }
    }

    pub fn is_local_empty(&self, task_id: usize) -> bool {
        self.locals[task_id].lock().is_empty()
    }

    pub fn is_global_pool_empty(&self) -> bool {
        self.injector.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.is_global_pool_empty() && self.locals.iter().all(|local| local.lock().is_empty())
    }

    /// Number of items across every view and the global pool.
    pub fn len(&self) -> usize {
        let locals: usize = self.locals.iter().map(|local| local.lock().len()).sum();
        locals + self.injector.len()
    }

    pub fn local_size(&self, task_id: usize) -> usize {
        self.locals[task_id].lock().len()
    }

    /// Publishes the local view of `task_id` so other consumers can steal it.
    pub fn flush_to_global(&self, task_id: usize) {
        let local = self.locals[task_id].lock();
        self.publish(&local);
    }

    /// Moves the whole global pool of `other` into this worklist.
    pub fn merge_global_pool(&self, other: &Worklist<T>) {
        while let Some(item) = steal_one(&other.injector) {
            self.injector.push(item);
        }
    }

    /// Removes every item from every view and the global pool.
    pub fn take_all(&self) -> Vec<T> {
        let mut items = Vec::new();
        for local in self.locals.iter() {
            let local = local.lock();
            while let Some(item) = local.pop() {
                items.push(item);
            }
        }
        while let Some(item) = steal_one(&self.injector) {
            items.push(item);
        }
        items
    }

    pub fn clear(&self) {
        drop(self.take_all());
    }

    fn publish(&self, local: &Worker<T>) {
        while let Some(item) = local.pop() {
            self.injector.push(item);
        }
    }
}

fn steal_one<T>(injector: &Injector<T>) -> Option<T> {
    loop {
        match injector.steal() {
            Steal::Empty => return None,
            Steal::Success(item) => return Some(item),
            Steal::Retry => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn pop_returns_pushed_items_of_own_view() {
        let worklist = Worklist::new(2);
        for i in 0..10 {
            worklist.push(0, i);
        }
        assert!(!worklist.is_local_empty(0));
        assert!(worklist.is_local_empty(1));
        // Nothing was published, the second consumer sees no work.
        assert!(worklist.pop(1).is_none());
        let mut popped = Vec::new();
        while let Some(item) = worklist.pop(0) {
            popped.push(item);
        }
        popped.sort_unstable();
        assert_eq!(popped, (0..10).collect::<Vec<_>>());
        assert!(worklist.is_empty());
    }

    #[test]
    fn full_segments_become_stealable() {
        let worklist = Worklist::new(2);
        for i in 0..(SEGMENT_SIZE * 3) {
            worklist.push(0, i);
        }
        assert!(!worklist.is_global_pool_empty());
        let mut stolen = 0;
        while worklist.pop(1).is_some() {
            stolen += 1;
        }
        // Only published items are visible to the second consumer.
        assert_eq!(stolen, SEGMENT_SIZE * 2);
        assert_eq!(worklist.local_size(0), SEGMENT_SIZE);
        worklist.flush_to_global(0);
        assert!(worklist.is_local_empty(0));
        assert_eq!(worklist.len(), SEGMENT_SIZE);
    }

    #[test]
    fn merge_moves_global_pool() {
        let from = Worklist::new(1);
        let to = Worklist::new(1);
        from.push(0, 1);
        from.push(0, 2);
        from.flush_to_global(0);
        to.merge_global_pool(&from);
        assert!(from.is_empty());
        assert_eq!(to.len(), 2);
        assert!(to.is_local_empty(0));
        assert!(to.pop(0).is_some());
    }

    #[test]
    fn take_all_drains_views_and_pool() {
        let worklist = Worklist::new(3);
        worklist.push(0, 1);
        worklist.push(2, 2);
        worklist.push(1, 3);
        worklist.flush_to_global(1);
        let mut items = worklist.take_all();
        items.sort_unstable();
        assert_eq!(items, vec![1, 2, 3]);
        assert!(worklist.is_empty());
    }

    #[test]
    fn concurrent_consumers_see_each_item_once() {
        const PER_PRODUCER: usize = 10_000;
        let worklist = Worklist::new(4);
        let seen = Mutex::new(HashSet::new());
        crossbeam_utils::thread::scope(|s| {
            for task_id in 0..4 {
                let worklist = &worklist;
                let seen = &seen;
                s.spawn(move |_| {
                    for i in 0..PER_PRODUCER {
                        worklist.push(task_id, task_id * PER_PRODUCER + i);
                        if i % 3 == 0 {
                            if let Some(item) = worklist.pop(task_id) {
                                assert!(seen.lock().insert(item));
                            }
                        }
                    }
                    worklist.flush_to_global(task_id);
                    while let Some(item) = worklist.pop(task_id) {
                        assert!(seen.lock().insert(item));
                    }
                });
            }
        })
        .unwrap();
        for item in worklist.take_all() {
            assert!(seen.lock().insert(item));
        }
        assert_eq!(seen.lock().len(), 4 * PER_PRODUCER);
    }
}
