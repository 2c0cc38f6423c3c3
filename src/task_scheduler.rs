use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{config::StackState, heap::Heap};

/// Cancellation token shared between a posted job and whoever scheduled it.
#[derive(Clone, Default)]
pub struct TaskHandle {
    canceled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Whether both handles control the same job.
    pub fn ptr_eq(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.canceled, &other.canceled)
    }
}

/// Unit of work posted to a [TaskRunner].
pub trait Job {
    fn is_canceled(&self) -> bool;
    fn execute(self: Box<Self>, heap: &mut Heap);
}

/// Foreground task queue. Posted jobs run one at a time on the mutator,
/// never nested inside another job.
pub trait TaskRunner {
    fn post_non_nestable_task(&self, job: Box<dyn Job>);
    fn pop_task(&self) -> Option<Box<dyn Job>>;
}

/// FIFO [TaskRunner] pumped by [Heap::run_pending_tasks].
pub struct TaskScheduler(pub(crate) Mutex<VecDeque<Box<dyn Job>>>);

impl TaskScheduler {
    pub fn new() -> Self {
        Self(Mutex::new(VecDeque::new()))
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner for TaskScheduler {
    fn post_non_nestable_task(&self, job: Box<dyn Job>) {
        self.0.lock().push_back(job);
    }

    fn pop_task(&self) -> Option<Box<dyn Job>> {
        self.0.lock().pop_front()
    }
}

/// Runs one incremental marking step and finalizes the cycle once marking
/// reached its fixed point.
pub struct IncrementalMarkingTask {
    handle: TaskHandle,
    marked_bytes_budget: usize,
}

impl IncrementalMarkingTask {
    pub fn post(runner: &dyn TaskRunner, marked_bytes_budget: usize) -> TaskHandle {
        let handle = TaskHandle::new();
        runner.post_non_nestable_task(Box::new(Self {
            handle: handle.clone(),
            marked_bytes_budget,
        }));
        handle
    }
}

impl Job for IncrementalMarkingTask {
    fn is_canceled(&self) -> bool {
        self.handle.is_canceled()
    }

    fn execute(self: Box<Self>, heap: &mut Heap) {
        if self.handle.is_canceled() {
            log::trace!("skipping canceled incremental marking task");
            return;
        }
        let done = match heap.marker_and_base() {
            Some((marker, base)) => {
                marker.clear_pending_task(&self.handle);
                marker.incremental_marking_step(
                    base,
                    StackState::NoHeapPointers,
                    self.marked_bytes_budget,
                )
            }
            None => return,
        };
        if done {
            if let Err(err) =
                heap.finalize_incremental_garbage_collection_if_needed(StackState::NoHeapPointers)
            {
                log::error!("incremental marking task failed to finalize: {}", err);
            }
        }
    }
}
