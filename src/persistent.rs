use std::marker::PhantomData;

use crate::{
    gcref::{GcRef, UntypedGcRef},
    liveness_broker::LivenessBroker,
    visitor::Visitor,
};

/// Off-heap root table. Strong regions are traced as marking roots, weak
/// regions have their dead entries cleared once marking is done.
pub struct PersistentRegion {
    nodes: Vec<Option<UntypedGcRef>>,
    free_list: Vec<usize>,
}

impl PersistentRegion {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
        }
    }

    pub fn allocate(&mut self, object: UntypedGcRef) -> usize {
        match self.free_list.pop() {
            Some(index) => {
                self.nodes[index] = Some(object);
                index
            }
            None => {
                self.nodes.push(Some(object));
                self.nodes.len() - 1
            }
        }
    }

    pub fn free(&mut self, index: usize) {
        debug_assert!(!self.free_list.contains(&index), "double free of persistent node");
        self.nodes[index] = None;
        self.free_list.push(index);
    }

    pub fn get(&self, index: usize) -> Option<UntypedGcRef> {
        self.nodes.get(index).copied().flatten()
    }

    pub fn set(&mut self, index: usize, object: Option<UntypedGcRef>) {
        self.nodes[index] = object;
    }

    /// Number of allocated nodes, cleared weak nodes included.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn trace(&self, vis: &mut Visitor<'_>) {
        for object in self.nodes.iter().flatten() {
            vis.trace_untyped(*object);
        }
    }

    /// Clears every entry whose object was not marked. Returns the number of
    /// cleared entries.
    pub fn process_weak(&mut self, broker: &LivenessBroker<'_>) -> usize {
        let mut cleared = 0;
        for node in self.nodes.iter_mut() {
            if let Some(object) = *node {
                if !broker.is_untyped_alive(object) {
                    *node = None;
                    cleared += 1;
                }
            }
        }
        cleared
    }
}

impl Default for PersistentRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// Strong root handle created by [Heap::persistent](crate::heap::Heap::persistent).
pub struct Persistent<T> {
    pub(crate) index: usize,
    marker: PhantomData<GcRef<T>>,
}

impl<T> Persistent<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            marker: PhantomData,
        }
    }
}

/// Weak root handle created by [Heap::weak_persistent](crate::heap::Heap::weak_persistent).
/// Reads as `None` once its object died.
pub struct WeakPersistent<T> {
    pub(crate) index: usize,
    marker: PhantomData<GcRef<T>>,
}

impl<T> WeakPersistent<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            marker: PhantomData,
        }
    }
}
