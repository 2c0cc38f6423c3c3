use std::{any::TypeId, collections::HashMap};

use parking_lot::{const_rwlock, RwLock};

use crate::internal::{gc_info::GCInfoIndex, trace_trait::TraceCallback};

/// GCInfo contains metadata for objects.
#[derive(Clone, Copy)]
pub struct GCInfo {
    pub trace: TraceCallback,
    pub name: &'static str,
}

/// Process-wide table resolving [GCInfoIndex] stored in object headers to
/// per-type trace callbacks.
pub struct GCInfoTable {
    table: RwLock<Vec<GCInfo>>,
    /// Created on first registration, `HashMap::new` is not `const`.
    type_id_map: RwLock<Option<HashMap<TypeId, GCInfoIndex>>>,
}

pub static GC_TABLE: GCInfoTable = GCInfoTable::new();

impl GCInfoTable {
    /// At maximum [`MAX_INDEX - 1`](GCInfoTable::MAX_INDEX) indices are supported.
    ///
    /// We assume that 14 bits are enough to represent all possible types.
    pub const MAX_INDEX: u16 = 1 << 14;
    /// Minimum index returned. Values smaller [`MIN_INDEX`](GCInfoTable::MIN_INDEX) may be used as
    /// sentinels.
    pub const MIN_INDEX: u16 = 1;

    pub const fn new() -> Self {
        Self {
            table: const_rwlock(Vec::new()),
            type_id_map: const_rwlock(None),
        }
    }

    pub(crate) fn add_gc_info_type_id(
        &self,
        type_id: TypeId,
        info: impl FnOnce() -> GCInfo,
    ) -> GCInfoIndex {
        if let Some(index) = self
            .type_id_map
            .read()
            .as_ref()
            .and_then(|map| map.get(&type_id).copied())
        {
            return index;
        }
        let mut map = self.type_id_map.write();
        let map = map.get_or_insert_with(HashMap::new);
        // Another thread may have registered the type between the two locks.
        if let Some(&index) = map.get(&type_id) {
            return index;
        }
        let index = self.add_gc_info(info());
        map.insert(type_id, index);
        index
    }

    pub fn add_gc_info(&self, info: GCInfo) -> GCInfoIndex {
        let mut table = self.table.write();
        let index = table.len() + Self::MIN_INDEX as usize;
        if index >= Self::MAX_INDEX as usize {
            panic!("GCInfoTable memory exhausted");
        }
        log::trace!("registered GCInfo #{} for {}", index, info.name);
        table.push(info);
        GCInfoIndex(index as u16)
    }

    pub fn get_gc_info(&self, index: GCInfoIndex) -> GCInfo {
        let table = self.table.read();
        debug_assert!(index.0 >= Self::MIN_INDEX, "sentinel GCInfoIndex");
        table[(index.0 - Self::MIN_INDEX) as usize]
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use crate::internal::{gc_info::GCInfoTrait, trace_trait::TraceTrait};

    use super::GC_TABLE;

    struct First;
    impl TraceTrait for First {}

    struct Second;
    impl TraceTrait for Second {}

    #[test]
    fn each_type_is_registered_once() {
        let first = First::index();
        let second = Second::index();
        assert_ne!(first, second);
        assert_eq!(First::index(), first);
        assert_eq!(Second::index(), second);
        assert_eq!(GC_TABLE.get_gc_info(first).name, std::any::type_name::<First>());
    }
}
