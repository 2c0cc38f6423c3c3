use std::mem::size_of;

use crate::{
    gc_info_table::GC_TABLE,
    gcref::{GcRef, UntypedGcRef},
    internal::trace_trait::{TraceDescriptor, TraceTrait},
    liveness_broker::WeakCallback,
};

pub trait VisitorTrait {
    fn visit(&mut self, this: *const u8, descriptor: TraceDescriptor) {
        let _ = this;
        let _ = descriptor;
    }

    /// Registers `callback` to run once marking has reached its fixed point.
    fn register_weak_callback(&mut self, callback: WeakCallback, parameter: *const u8) {
        let _ = callback;
        let _ = parameter;
    }

    /// Treats `address` as a potential pointer into the heap.
    fn visit_conservative(&mut self, address: usize);
}

pub struct Visitor<'a> {
    pub(crate) vis: &'a mut dyn VisitorTrait,
}

impl<'a> Visitor<'a> {
    pub fn new(vis: &'a mut dyn VisitorTrait) -> Self {
        Self { vis }
    }

    /// Trace method for raw pointers. Prefer the versions for managed pointers.
    pub unsafe fn trace<T: TraceTrait>(&mut self, t: *const T) {
        if t.is_null() {
            return;
        }

        self.vis
            .visit(t.cast(), <T as TraceTrait>::get_trace_descriptor(t.cast()))
    }

    /// Trace method for inlined objects that are not allocated themselves but
    /// otherwise follow managed heap layout and have a trace() method.
    pub fn trace_ref<T: TraceTrait>(&mut self, object: &T) {
        <T as TraceTrait>::trace(object, self);
    }

    pub fn trace_gcref<T: TraceTrait>(&mut self, object: GcRef<T>) {
        unsafe {
            self.trace(object.downcast().get() as *const T);
        }
    }

    pub fn trace_untyped(&mut self, object: UntypedGcRef) {
        let gc_info = GC_TABLE.get_gc_info(object.header().get_gc_info_index());
        self.vis.visit(
            object.get(),
            TraceDescriptor {
                base_object_payload: object.get(),
                callback: gc_info.trace,
            },
        )
    }

    pub fn register_weak_callback(&mut self, callback: WeakCallback, parameter: *const u8) {
        self.vis.register_weak_callback(callback, parameter);
    }

    /// Scans every word in `[from, to)` conservatively.
    pub fn trace_conservatively(&mut self, from: *const u8, to: *const u8) {
        let mut scan = from as usize;
        let end = to as usize;
        debug_assert_eq!(scan % size_of::<usize>(), 0);
        while scan + size_of::<usize>() <= end {
            let word = unsafe { (scan as *const usize).read() };
            self.vis.visit_conservative(word);
            scan += size_of::<usize>();
        }
    }
}
