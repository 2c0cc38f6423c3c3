//! Write barriers run by the mutator when it stores a heap pointer into a heap
//! object.

use crate::{
    age_table::Age, gcref::UntypedGcRef, heap::HeapBase, marker::Marker,
    remembered_set::RememberedSet,
};

/// Dijkstra-style insertion barrier: keeps `value` from being missed by an
/// incremental cycle that already traced the slot's holder.
pub fn marking_barrier(marker: &mut Marker, base: &HeapBase, value: UntypedGcRef) {
    if !base.process_heap.is_any_incremental_or_concurrent_marking() {
        return;
    }
    marker.write_barrier(value.header());
}

/// Records `slot` when it may hold an old-to-young pointer.
pub fn generational_barrier(base: &HeapBase, slot: usize, value: UntypedGcRef) {
    let remembered_set: &dyn RememberedSet = &*base.remembered_set;
    if !remembered_set.is_generational() || base.is_incremental_marking_in_progress {
        return;
    }
    if base.space.age(slot) == Age::Young || base.space.age(value.address()) == Age::Old {
        return;
    }
    // Slots outside heap objects cannot be replayed.
    match base.space.object_header_from_inner_address(slot) {
        Some(holder) if !holder.is_young() => remembered_set.record_slot(slot),
        _ => {}
    }
}
