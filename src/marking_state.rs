use std::sync::Arc;

use crate::{
    gc_info_table::GC_TABLE,
    header::HeapObjectHeader,
    internal::trace_trait::TraceDescriptor,
    liveness_broker::WeakCallback,
    marking_worklists::{HeaderItem, MarkingItem, MarkingWorklists, WeakCallbackItem},
    space::Space,
};

/// Per-consumer marking bookkeeping: the worklist views of one task and the
/// bytes it traced so far.
pub struct MarkingState {
    worklists: Arc<MarkingWorklists>,
    task_id: usize,
    marked_bytes: usize,
}

impl MarkingState {
    pub fn new(worklists: Arc<MarkingWorklists>, task_id: usize) -> Self {
        Self {
            worklists,
            task_id,
            marked_bytes: 0,
        }
    }

    pub fn worklists(&self) -> &Arc<MarkingWorklists> {
        &self.worklists
    }

    pub fn task_id(&self) -> usize {
        self.task_id
    }

    /// Marks `header` and queues it for tracing. Objects in construction are
    /// deferred to the not fully constructed worklist. Returns `false` when the
    /// object was already marked.
    pub fn mark_and_push(&mut self, header: &HeapObjectHeader) -> bool {
        let descriptor = TraceDescriptor {
            base_object_payload: header.payload(),
            callback: GC_TABLE.get_gc_info(header.get_gc_info_index()).trace,
        };
        self.mark_and_push_descriptor(header, descriptor)
    }

    pub fn mark_and_push_descriptor(
        &mut self,
        header: &HeapObjectHeader,
        descriptor: TraceDescriptor,
    ) -> bool {
        if !header.try_mark_atomic() {
            return false;
        }
        if header.is_in_construction() {
            self.worklists
                .not_fully_constructed_worklist()
                .push(self.task_id, HeaderItem::new(header));
        } else {
            self.worklists.marking_worklist().push(
                self.task_id,
                MarkingItem {
                    base_object_payload: descriptor.base_object_payload,
                    callback: descriptor.callback,
                },
            );
        }
        true
    }

    /// Marks without queueing; the caller traces the object itself.
    pub fn mark_no_push(&mut self, header: &HeapObjectHeader) -> bool {
        header.try_mark_atomic()
    }

    /// Marks whatever object contains `address`. Addresses that do not point
    /// into an allocated object are ignored.
    pub fn dynamically_mark_address(&mut self, space: &Space, address: usize) -> bool {
        match space.object_header_from_inner_address(address) {
            Some(header) => self.mark_and_push(header),
            None => false,
        }
    }

    /// Slow path of the marking write barrier.
    pub fn write_barrier(&mut self, header: &HeapObjectHeader) {
        if !header.try_mark_atomic() {
            return;
        }
        let item = HeaderItem::new(header);
        if header.is_in_construction() {
            self.worklists
                .not_fully_constructed_worklist()
                .push(self.task_id, item);
        } else {
            self.worklists
                .write_barrier_worklist()
                .push(self.task_id, item);
        }
    }

    pub fn register_weak_callback(&mut self, callback: WeakCallback, parameter: *const u8) {
        self.worklists
            .weak_callback_worklist()
            .push(self.task_id, WeakCallbackItem { callback, parameter });
    }

    #[inline]
    pub fn account_marked_bytes(&mut self, header: &HeapObjectHeader) {
        self.marked_bytes += header.get_size();
    }

    #[inline]
    pub fn marked_bytes(&self) -> usize {
        self.marked_bytes
    }

    /// Makes every locally queued item visible to other consumers.
    pub fn publish(&self) {
        self.worklists.marking_worklist().flush_to_global(self.task_id);
        self.worklists
            .not_fully_constructed_worklist()
            .flush_to_global(self.task_id);
        self.worklists
            .weak_callback_worklist()
            .flush_to_global(self.task_id);
        self.worklists
            .write_barrier_worklist()
            .flush_to_global(self.task_id);
    }
}
