use crate::visitor::Visitor;

pub type TraceCallback = fn(&mut Visitor<'_>, *const u8);

/// Trait specifying how the garbage collector processes an object of type `T`.
pub trait TraceTrait: Sized {
    /// Function invoking the tracing for an object of type `T`.
    /// - `visitor`: The visitor to dispatch to.
    fn trace(&self, vis: &mut Visitor<'_>) {
        let _ = vis;
    }
    /// Type-erased entry point stored in the [GCInfoTable](crate::gc_info_table::GCInfoTable).
    fn trace_(vis: &mut Visitor<'_>, this: *const u8) {
        unsafe {
            (*this.cast::<Self>()).trace(vis);
        }
    }
    /// Returns trace descriptor for type that implements this trait.
    /// Not recommended to override it.
    fn get_trace_descriptor(this: *const u8) -> TraceDescriptor {
        TraceDescriptor {
            base_object_payload: this,
            callback: Self::trace_,
        }
    }
}

/// Describe how to trace an object.
#[derive(Clone, Copy)]
pub struct TraceDescriptor {
    pub base_object_payload: *const u8,
    pub callback: TraceCallback,
}
