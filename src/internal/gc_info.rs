use std::any::{type_name, TypeId};

use crate::gc_info_table::{GCInfo, GC_TABLE};

use super::trace_trait::TraceTrait;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct GCInfoIndex(pub u16);

pub trait GCInfoTrait: TraceTrait + Sized + 'static {
    fn index() -> GCInfoIndex {
        GC_TABLE.add_gc_info_type_id(TypeId::of::<Self>(), || GCInfo {
            trace: <Self as TraceTrait>::trace_,
            name: type_name::<Self>(),
        })
    }
}

impl<T: TraceTrait + Sized + 'static> GCInfoTrait for T {}
