use crate::{
    gcref::{GcRef, UntypedGcRef},
    space::Space,
};

/// Callback run after marking reached its fixed point. `parameter` is the
/// opaque value passed at registration, usually the payload of the object
/// holding the weak reference.
pub type WeakCallback = fn(&LivenessBroker<'_>, *const u8);

/// Answers liveness queries while weak references are processed. Only
/// meaningful once marking reached its fixed point.
pub struct LivenessBroker<'a> {
    space: &'a Space,
}

impl<'a> LivenessBroker<'a> {
    pub(crate) fn new(space: &'a Space) -> Self {
        Self { space }
    }

    pub fn is_heap_object_alive<T>(&self, object: GcRef<T>) -> bool {
        self.is_untyped_alive(object.downcast())
    }

    pub fn is_untyped_alive(&self, object: UntypedGcRef) -> bool {
        object.header().is_marked()
    }

    /// Resolves an arbitrary address to its enclosing object, if any, and
    /// reports whether that object is marked. Addresses outside the heap are
    /// never alive.
    pub fn is_address_marked(&self, address: usize) -> bool {
        self.space
            .object_header_from_inner_address(address)
            .map_or(false, |header| header.is_marked())
    }
}
