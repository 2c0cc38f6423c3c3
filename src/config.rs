use std::time::Duration;

/// Which objects a cycle collects.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CollectionType {
    /// Whole heap.
    Major,
    /// Young objects only. Old-to-young edges come from the remembered set.
    Minor,
}

/// Whether the native stack must be scanned conservatively for heap pointers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StackState {
    NoHeapPointers,
    MayContainHeapPointers,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkingType {
    /// Marking happens entirely inside one pause.
    Atomic,
    /// Marking is interleaved with the mutator.
    Incremental,
    /// As `Incremental`, with helper markers working in the background.
    IncrementalAndConcurrent,
}

/// Per-cycle parameters handed to the marker.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MarkingConfig {
    pub collection_type: CollectionType,
    pub stack_state: StackState,
    pub marking_type: MarkingType,
}

impl Default for MarkingConfig {
    fn default() -> Self {
        Self {
            collection_type: CollectionType::Major,
            stack_state: StackState::MayContainHeapPointers,
            marking_type: MarkingType::Atomic,
        }
    }
}

impl MarkingConfig {
    pub fn atomic() -> Self {
        Self::default()
    }

    pub fn incremental() -> Self {
        Self::default().with_marking_type(MarkingType::Incremental)
    }

    pub fn with_collection_type(mut self, collection_type: CollectionType) -> Self {
        self.collection_type = collection_type;
        self
    }

    pub fn with_stack_state(mut self, stack_state: StackState) -> Self {
        self.stack_state = stack_state;
        self
    }

    pub fn with_marking_type(mut self, marking_type: MarkingType) -> Self {
        self.marking_type = marking_type;
        self
    }

    pub fn is_incremental_or_concurrent(&self) -> bool {
        self.marking_type != MarkingType::Atomic
    }

    pub fn is_minor(&self) -> bool {
        self.collection_type == CollectionType::Minor
    }
}

/// Tunables for incremental marking.
#[derive(Clone, Copy, Debug)]
pub struct MarkerOptions {
    /// Byte budget of a step triggered by a task or by allocation.
    pub min_marked_bytes_per_step: usize,
    /// Time budget of a single step.
    pub max_step_duration: Duration,
    /// Bytes the mutator allocates between two allocation-triggered steps.
    pub allocation_step_bytes: usize,
    /// Concurrent helpers sharing the worklists. `0` means mutator only.
    pub num_concurrent_markers: usize,
}

impl Default for MarkerOptions {
    fn default() -> Self {
        Self {
            min_marked_bytes_per_step: 64 * 1024,
            max_step_duration: Duration::from_millis(2),
            allocation_step_bytes: 64 * 1024,
            num_concurrent_markers: 0,
        }
    }
}

/// Configuration for heap constructor.
#[derive(Clone, Copy, Debug)]
pub struct HeapConfig {
    /// Enables verbose printing
    pub verbose: bool,
    /// Record old-to-young slots and allow minor cycles.
    pub generational: bool,
    pub marker: MarkerOptions,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            generational: false,
            marker: MarkerOptions::default(),
        }
    }
}
