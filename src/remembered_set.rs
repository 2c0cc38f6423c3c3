use parking_lot::Mutex;

use crate::{marking_state::MarkingState, space::Space};

/// Old-to-young slot bookkeeping consulted by minor cycles.
pub trait RememberedSet {
    fn is_generational(&self) -> bool;

    /// Records `slot`, the address of a field inside an old object.
    fn record_slot(&self, slot: usize);

    /// Marks the current target of every recorded slot held by an old
    /// object. Returns the number of slots replayed.
    fn visit_remembered_slots(&self, space: &Space, state: &mut MarkingState) -> usize;

    /// Forgets every slot and resets the age tables. Linear allocation
    /// buffers must be retired.
    fn reset(&self, space: &mut Space);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Selected for non-generational heaps.
pub struct NullRememberedSet;

impl RememberedSet for NullRememberedSet {
    fn is_generational(&self) -> bool {
        false
    }

    fn record_slot(&self, _slot: usize) {}

    fn visit_remembered_slots(&self, _space: &Space, _state: &mut MarkingState) -> usize {
        0
    }

    fn reset(&self, _space: &mut Space) {}

    fn len(&self) -> usize {
        0
    }
}

pub struct OldToNewRememberedSet {
    slots: Mutex<Vec<usize>>,
}

impl OldToNewRememberedSet {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl Default for OldToNewRememberedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RememberedSet for OldToNewRememberedSet {
    fn is_generational(&self) -> bool {
        true
    }

    fn record_slot(&self, slot: usize) {
        self.slots.lock().push(slot);
    }

    fn visit_remembered_slots(&self, space: &Space, state: &mut MarkingState) -> usize {
        let slots = self.slots.lock();
        let mut replayed = 0;
        for &slot in slots.iter() {
            let container = match space.object_header_from_inner_address(slot) {
                Some(header) => header,
                None => continue,
            };
            // Young containers are traced by the cycle anyway.
            if container.is_young() {
                continue;
            }
            let value = unsafe { (slot as *const usize).read() };
            if value == 0 {
                continue;
            }
            state.dynamically_mark_address(space, value);
            replayed += 1;
        }
        log::trace!("replayed {} of {} remembered slots", replayed, slots.len());
        replayed
    }

    fn reset(&self, space: &mut Space) {
        debug_assert!(!space.has_linear_allocation_buffer());
        self.slots.lock().clear();
        space.reset_age_tables();
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
