use std::{
    fmt::{self},
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use crate::{
    header::HeapObjectHeader,
    internal::{gc_info::GCInfoTrait, trace_trait::TraceTrait},
    visitor::Visitor,
};

/// Typed pointer to a heap object. Points at the object header so that a slot
/// holding it can be resolved back to its target with an inner-address lookup.
#[repr(transparent)]
pub struct GcRef<T> {
    pub(crate) raw: UntypedGcRef,
    pub(crate) marker: PhantomData<T>,
}

impl<T> GcRef<T> {
    pub fn downcast(self) -> UntypedGcRef {
        self.raw
    }

    pub fn header(&self) -> &HeapObjectHeader {
        self.raw.header()
    }

    /// Address of the payload, used as weak-callback parameter or root word.
    pub fn as_ptr(&self) -> *const T {
        self.raw.get().cast()
    }
}

impl<T> Deref for GcRef<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.raw.get().cast::<T>() }
    }
}
impl<T> DerefMut for GcRef<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.raw.get().cast::<T>() }
    }
}

#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct UntypedGcRef {
    pub(crate) header: NonNull<HeapObjectHeader>,
}

impl UntypedGcRef {
    /// # Safety
    ///
    /// `header` must point to a live object header inside the heap.
    pub unsafe fn from_header(header: NonNull<HeapObjectHeader>) -> Self {
        Self { header }
    }

    pub fn get(&self) -> *mut u8 {
        self.header().payload() as _
    }

    pub fn header(&self) -> &HeapObjectHeader {
        unsafe { &*self.header.as_ptr() }
    }

    pub fn address(&self) -> usize {
        self.header.as_ptr() as usize
    }

    pub fn cast<T: GCInfoTrait>(self) -> Option<GcRef<T>> {
        if self.header().get_gc_info_index() == T::index() {
            Some(GcRef {
                raw: self,
                marker: PhantomData,
            })
        } else {
            None
        }
    }

    /// # Safety
    ///
    /// The object must have been allocated as a `T`.
    pub unsafe fn cast_unchecked<T>(self) -> GcRef<T> {
        GcRef {
            raw: self,
            marker: PhantomData,
        }
    }
}

impl fmt::Debug for UntypedGcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UntypedGcRef({:p})", self.header)
    }
}
impl fmt::Pointer for UntypedGcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UntypedGcRef({:p})", self.header)
    }
}
impl<T> std::fmt::Pointer for GcRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:p}", self.raw)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for GcRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", **self)
    }
}

impl<T> Copy for GcRef<T> {}

impl<T> Clone for GcRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: TraceTrait> TraceTrait for GcRef<T> {
    fn trace(&self, vis: &mut Visitor<'_>) {
        vis.trace_gcref(*self);
    }
}

impl TraceTrait for UntypedGcRef {
    fn trace(&self, vis: &mut Visitor<'_>) {
        vis.trace_untyped(*self);
    }
}

macro_rules! impl_prim {
    ($($t:ty)*) => {
        $(
            impl TraceTrait for $t {}
        )*
    };
}

impl_prim! (
    () bool f32 f64 usize isize
    u8 u16 u32 u64 u128
    i8 i16 i32 i64 i128
);

impl<T: TraceTrait> TraceTrait for Vec<T> {
    fn trace(&self, vis: &mut Visitor<'_>) {
        for elem in self.iter() {
            vis.trace_ref(elem);
        }
    }
}

impl<T: TraceTrait, const N: usize> TraceTrait for [T; N] {
    fn trace(&self, vis: &mut Visitor<'_>) {
        for elem in self.iter() {
            vis.trace_ref(elem);
        }
    }
}

impl<T: TraceTrait> TraceTrait for Option<T> {
    fn trace(&self, vis: &mut Visitor<'_>) {
        if let Some(elem) = self {
            elem.trace(vis);
        }
    }
}

impl PartialEq for UntypedGcRef {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
    }
}

impl Eq for UntypedGcRef {}

impl<T> PartialEq for GcRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for GcRef<T> {}
