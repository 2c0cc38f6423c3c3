use std::ptr::NonNull;

use crate::{
    header::HeapObjectHeader, internal::trace_trait::TraceCallback,
    liveness_broker::WeakCallback, worklist::Worklist,
};

/// Consumer id of the mutator thread. Concurrent markers use `1..num_tasks`.
pub const MUTATOR_THREAD_ID: usize = 0;

/// Object discovered as reachable, waiting to be traced.
#[derive(Clone, Copy)]
pub struct MarkingItem {
    pub base_object_payload: *const u8,
    pub callback: TraceCallback,
}

// Payload pointers are only dereferenced by markers holding the owning heap.
unsafe impl Send for MarkingItem {}

/// Header recorded for later processing: not fully constructed objects and
/// objects found by the marking write barrier.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeaderItem(NonNull<HeapObjectHeader>);

unsafe impl Send for HeaderItem {}

impl HeaderItem {
    pub fn new(header: &HeapObjectHeader) -> Self {
        Self(NonNull::from(header))
    }

    pub fn header<'a>(self) -> &'a HeapObjectHeader {
        unsafe { &*self.0.as_ptr() }
    }
}

#[derive(Clone, Copy)]
pub struct WeakCallbackItem {
    pub callback: WeakCallback,
    pub parameter: *const u8,
}

unsafe impl Send for WeakCallbackItem {}

pub type MarkingWorklist = Worklist<MarkingItem>;
pub type NotFullyConstructedWorklist = Worklist<HeaderItem>;
pub type WeakCallbackWorklist = Worklist<WeakCallbackItem>;
pub type WriteBarrierWorklist = Worklist<HeaderItem>;

/// The five queues a marking cycle works through.
pub struct MarkingWorklists {
    marking_worklist: MarkingWorklist,
    not_fully_constructed_worklist: NotFullyConstructedWorklist,
    previously_not_fully_constructed_worklist: NotFullyConstructedWorklist,
    weak_callback_worklist: WeakCallbackWorklist,
    write_barrier_worklist: WriteBarrierWorklist,
}

impl MarkingWorklists {
    /// `num_tasks` counts the mutator plus every concurrent marker.
    pub fn new(num_tasks: usize) -> Self {
        Self {
            marking_worklist: Worklist::new(num_tasks),
            not_fully_constructed_worklist: Worklist::new(num_tasks),
            previously_not_fully_constructed_worklist: Worklist::new(num_tasks),
            weak_callback_worklist: Worklist::new(num_tasks),
            write_barrier_worklist: Worklist::new(num_tasks),
        }
    }

    pub fn marking_worklist(&self) -> &MarkingWorklist {
        &self.marking_worklist
    }

    pub fn not_fully_constructed_worklist(&self) -> &NotFullyConstructedWorklist {
        &self.not_fully_constructed_worklist
    }

    pub fn previously_not_fully_constructed_worklist(&self) -> &NotFullyConstructedWorklist {
        &self.previously_not_fully_constructed_worklist
    }

    pub fn weak_callback_worklist(&self) -> &WeakCallbackWorklist {
        &self.weak_callback_worklist
    }

    pub fn write_barrier_worklist(&self) -> &WriteBarrierWorklist {
        &self.write_barrier_worklist
    }

    /// Moves not fully constructed objects to the retry queue. Their
    /// constructors are assumed to have finished by the time the retry
    /// queue is drained.
    pub fn flush_not_fully_constructed_objects(&self) {
        let nfc = &self.not_fully_constructed_worklist;
        if nfc.is_local_empty(MUTATOR_THREAD_ID) && nfc.is_global_pool_empty() {
            return;
        }
        nfc.flush_to_global(MUTATOR_THREAD_ID);
        self.previously_not_fully_constructed_worklist
            .merge_global_pool(nfc);
        debug_assert!(nfc.is_local_empty(MUTATOR_THREAD_ID));
    }

    pub fn is_empty(&self) -> bool {
        self.marking_worklist.is_empty()
            && self.not_fully_constructed_worklist.is_empty()
            && self.previously_not_fully_constructed_worklist.is_empty()
            && self.weak_callback_worklist.is_empty()
            && self.write_barrier_worklist.is_empty()
    }

    pub fn clear_for_testing(&self) {
        self.marking_worklist.clear();
        self.not_fully_constructed_worklist.clear();
        self.previously_not_fully_constructed_worklist.clear();
        self.weak_callback_worklist.clear();
        self.write_barrier_worklist.clear();
    }
}
