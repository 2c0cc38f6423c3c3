use crate::{
    gc_info_table::GC_TABLE,
    header::HeapObjectHeader,
    internal::trace_trait::TraceDescriptor,
    liveness_broker::WeakCallback,
    marking_state::MarkingState,
    space::Space,
    stack::StackVisitor,
    visitor::{Visitor, VisitorTrait},
};

/// Visitor handed to trace callbacks while marking. Precise edges mark and
/// queue their targets, conservative words are resolved through the space.
pub struct MarkingVisitor<'a> {
    state: &'a mut MarkingState,
    space: &'a Space,
}

impl<'a> MarkingVisitor<'a> {
    pub fn new(state: &'a mut MarkingState, space: &'a Space) -> Self {
        Self { state, space }
    }

    pub fn state(&mut self) -> &mut MarkingState {
        &mut *self.state
    }

    /// Marks the object containing `address`, if any. Returns `true` when
    /// this call marked it.
    pub fn trace_conservatively_if_needed(&mut self, address: usize) -> bool {
        let space = self.space;
        let header = match space.object_header_from_inner_address(address) {
            Some(header) => header,
            None => return false,
        };
        if header.is_marked() {
            return false;
        }
        if header.is_in_construction() {
            if !self.state.mark_no_push(header) {
                return false;
            }
            self.state.account_marked_bytes(header);
            self.trace_payload_conservatively(header);
            true
        } else {
            self.state.mark_and_push(header)
        }
    }

    /// Traces an already marked object that was deferred because it was in
    /// construction. Objects still in construction are scanned word by word.
    pub fn trace_not_fully_constructed(&mut self, header: &HeapObjectHeader) {
        debug_assert!(header.is_marked());
        self.state.account_marked_bytes(header);
        if header.is_in_construction() {
            self.trace_payload_conservatively(header);
        } else {
            self.trace_marked_object(header);
        }
    }

    /// Invokes the precise trace callback of a marked, fully constructed object.
    pub fn trace_marked_object(&mut self, header: &HeapObjectHeader) {
        debug_assert!(!header.is_in_construction(), "tracing object in construction");
        debug_assert!(header.is_marked(), "tracing unmarked object");
        let callback = GC_TABLE.get_gc_info(header.get_gc_info_index()).trace;
        callback(&mut Visitor::new(self), header.payload());
    }

    fn trace_payload_conservatively(&mut self, header: &HeapObjectHeader) {
        Visitor::new(self).trace_conservatively(header.payload(), header.payload_end());
    }
}

impl VisitorTrait for MarkingVisitor<'_> {
    fn visit(&mut self, this: *const u8, descriptor: TraceDescriptor) {
        let _ = this;
        let header = unsafe { &*HeapObjectHeader::from_payload(descriptor.base_object_payload) };
        self.state.mark_and_push_descriptor(header, descriptor);
    }

    fn register_weak_callback(&mut self, callback: WeakCallback, parameter: *const u8) {
        self.state.register_weak_callback(callback, parameter);
    }

    fn visit_conservative(&mut self, address: usize) {
        let _ = self.trace_conservatively_if_needed(address);
    }
}

impl StackVisitor for MarkingVisitor<'_> {
    fn visit_pointer(&mut self, address: usize) {
        let _ = self.trace_conservatively_if_needed(address);
    }
}
