use std::{
    mem::{align_of, size_of},
    ptr::NonNull,
    sync::Arc,
};

use crate::{
    config::{CollectionType, HeapConfig, MarkingConfig, MarkingType, StackState},
    error::MarkingError,
    gcref::{GcRef, UntypedGcRef},
    header::{HeapObjectHeader, ALLOCATION_GRANULARITY},
    internal::gc_info::{GCInfoIndex, GCInfoTrait},
    marker::{Marker, MarkerPhase, MarkingStats},
    persistent::{Persistent, PersistentRegion, WeakPersistent},
    process_heap::ProcessHeap,
    remembered_set::{NullRememberedSet, OldToNewRememberedSet, RememberedSet},
    space::Space,
    stack::{EmptyStack, Stack},
    stats_collector::{HeapStatistics, StatsCollector},
    task_scheduler::{TaskRunner, TaskScheduler},
    write_barrier,
};

/// Services the marker needs from its heap.
pub struct HeapBase {
    pub(crate) space: Space,
    pub(crate) strong_persistents: PersistentRegion,
    pub(crate) weak_persistents: PersistentRegion,
    pub(crate) stack: Arc<dyn Stack>,
    pub(crate) stats_collector: StatsCollector,
    pub(crate) remembered_set: Box<dyn RememberedSet>,
    pub(crate) process_heap: Arc<ProcessHeap>,
    pub(crate) task_runner: Option<Arc<dyn TaskRunner>>,
    /// Set while a generational heap marks incrementally. The generational
    /// barrier stands down, the marking barrier covers new edges.
    pub(crate) is_incremental_marking_in_progress: bool,
}

impl HeapBase {
    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut Space {
        &mut self.space
    }

    pub fn stats_collector(&self) -> &StatsCollector {
        &self.stats_collector
    }

    pub fn remembered_set(&self) -> &dyn RememberedSet {
        &*self.remembered_set
    }

    pub fn process_heap(&self) -> &Arc<ProcessHeap> {
        &self.process_heap
    }

    pub fn is_incremental_marking_in_progress(&self) -> bool {
        self.is_incremental_marking_in_progress
    }
}

/// Embedder-provided collaborators.
pub struct Platform {
    /// Receives incremental marking tasks. `None` disables task-driven steps.
    pub task_runner: Option<Arc<dyn TaskRunner>>,
    pub process_heap: Arc<ProcessHeap>,
    pub stack: Arc<dyn Stack>,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            task_runner: Some(Arc::new(TaskScheduler::new())),
            process_heap: Arc::new(ProcessHeap::new()),
            stack: Arc::new(EmptyStack),
        }
    }
}

pub struct Heap {
    base: HeapBase,
    marker: Option<Box<Marker>>,
    config: HeapConfig,
    allocated_since_marking_step: usize,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Box<Self> {
        Self::with_platform(config, Platform::default())
    }

    pub fn with_platform(config: HeapConfig, platform: Platform) -> Box<Self> {
        let remembered_set: Box<dyn RememberedSet> = if config.generational {
            Box::new(OldToNewRememberedSet::new())
        } else {
            Box::new(NullRememberedSet)
        };
        Box::new(Self {
            base: HeapBase {
                space: Space::new(),
                strong_persistents: PersistentRegion::new(),
                weak_persistents: PersistentRegion::new(),
                stack: platform.stack,
                stats_collector: StatsCollector::new(),
                remembered_set,
                process_heap: platform.process_heap,
                task_runner: platform.task_runner,
                is_incremental_marking_in_progress: false,
            },
            marker: None,
            config,
            allocated_since_marking_step: 0,
        })
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn base(&self) -> &HeapBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut HeapBase {
        &mut self.base
    }

    pub fn space(&self) -> &Space {
        &self.base.space
    }

    pub fn marker(&self) -> Option<&Marker> {
        self.marker.as_deref()
    }

    pub fn marker_mut(&mut self) -> Option<&mut Marker> {
        self.marker.as_deref_mut()
    }

    /// Splits the heap so the marker can be driven against its collaborators.
    pub fn marker_and_base(&mut self) -> Option<(&mut Marker, &mut HeapBase)> {
        match &mut self.marker {
            Some(marker) => Some((&mut **marker, &mut self.base)),
            None => None,
        }
    }

    pub fn is_marking(&self) -> bool {
        self.marker.is_some()
    }

    pub fn statistics(&self) -> HeapStatistics {
        self.base.stats_collector.snapshot(
            self.base.space.committed_bytes(),
            self.base.space.pages().len(),
        )
    }

    /// Allocates `value` and publishes it as fully constructed.
    pub fn allocate<T: GCInfoTrait>(&mut self, value: T) -> GcRef<T> {
        debug_assert!(align_of::<T>() <= ALLOCATION_GRANULARITY);
        let object = self.allocate_raw_or_fail(size_of::<T>(), T::index());
        unsafe {
            object.get().cast::<T>().write(value);
            object.header().mark_as_fully_constructed();
            object.cast_unchecked()
        }
    }

    /// Allocates zeroed memory for `size` payload bytes. The object stays in
    /// construction until [HeapObjectHeader::mark_as_fully_constructed] is called.
    pub fn allocate_raw(&mut self, size: usize, index: GCInfoIndex) -> Option<UntypedGcRef> {
        let header = self
            .base
            .space
            .allocate(size, index, self.config.generational)?;
        let object = unsafe { UntypedGcRef::from_header(header) };
        self.base
            .stats_collector
            .notify_allocation(object.header().get_size());
        self.allocated_since_marking_step += object.header().get_size();
        if self.allocated_since_marking_step >= self.config.marker.allocation_step_bytes {
            self.allocated_since_marking_step = 0;
            self.advance_marking_on_allocation();
        }
        Some(object)
    }

    pub fn allocate_raw_or_fail(&mut self, size: usize, index: GCInfoIndex) -> UntypedGcRef {
        match self.allocate_raw(size, index) {
            Some(object) => object,
            None => panic!("Out of memory while allocating {} bytes", size),
        }
    }

    pub fn persistent<T>(&mut self, object: GcRef<T>) -> Persistent<T> {
        Persistent::new(self.base.strong_persistents.allocate(object.downcast()))
    }

    pub fn get_persistent<T>(&self, handle: &Persistent<T>) -> Option<GcRef<T>> {
        self.base
            .strong_persistents
            .get(handle.index)
            .map(|object| unsafe { object.cast_unchecked() })
    }

    pub fn release_persistent<T>(&mut self, handle: Persistent<T>) {
        self.base.strong_persistents.free(handle.index);
    }

    pub fn weak_persistent<T>(&mut self, object: GcRef<T>) -> WeakPersistent<T> {
        WeakPersistent::new(self.base.weak_persistents.allocate(object.downcast()))
    }

    pub fn get_weak_persistent<T>(&self, handle: &WeakPersistent<T>) -> Option<GcRef<T>> {
        self.base
            .weak_persistents
            .get(handle.index)
            .map(|object| unsafe { object.cast_unchecked() })
    }

    pub fn release_weak_persistent<T>(&mut self, handle: WeakPersistent<T>) {
        self.base.weak_persistents.free(handle.index);
    }

    /// Runs the write barriers for a store of `value` into `slot`, a field of
    /// a heap object.
    pub fn write_barrier(&mut self, slot: *const u8, value: UntypedGcRef) {
        if let Some(marker) = self.marker.as_deref_mut() {
            if marker.phase() == MarkerPhase::Marking {
                write_barrier::marking_barrier(marker, &self.base, value);
            }
        }
        write_barrier::generational_barrier(&self.base, slot as usize, value);
    }

    /// Stores `value` into a field of a heap object and runs the barriers.
    pub fn store<T>(&mut self, slot: &mut Option<GcRef<T>>, value: Option<GcRef<T>>) {
        *slot = value;
        if let Some(value) = value {
            let address = slot as *mut Option<GcRef<T>> as *const u8;
            self.write_barrier(address, value.downcast());
        }
    }

    /// Turns a young object into an old one.
    pub fn promote<T>(&mut self, object: GcRef<T>) {
        self.base.space.promote(object.header());
    }

    pub fn start_garbage_collection(&mut self, mut config: MarkingConfig) {
        debug_assert!(self.marker.is_none(), "garbage collection already running");
        if config.collection_type == CollectionType::Minor
            && !self.base.remembered_set.is_generational()
        {
            log::warn!("minor collection requested on a non-generational heap, running major");
            config.collection_type = CollectionType::Major;
        }
        if config.collection_type == CollectionType::Major
            && self.base.remembered_set.is_generational()
        {
            self.unmark_all();
        }
        let mut marker = Box::new(Marker::new(config, self.config.marker));
        marker.set_verbose(self.config.verbose);
        marker.start_marking(&mut self.base);
        self.allocated_since_marking_step = 0;
        self.marker = Some(marker);
    }

    pub fn start_incremental_garbage_collection(&mut self, collection_type: CollectionType) {
        self.start_garbage_collection(
            MarkingConfig::incremental()
                .with_collection_type(collection_type)
                .with_stack_state(StackState::NoHeapPointers),
        );
    }

    /// Completes the running cycle: finishes marking, processes weakness and
    /// hands survivors to [Heap::process_survivors].
    pub fn finalize_garbage_collection(
        &mut self,
        stack_state: StackState,
    ) -> Result<MarkingStats, MarkingError> {
        let mut marker = match self.marker.take() {
            Some(marker) => marker,
            None => return Ok(MarkingStats::default()),
        };
        match marker.phase() {
            MarkerPhase::Marking => marker.finish_marking(&mut self.base, stack_state),
            MarkerPhase::AtomicPause => {
                let done = marker.process_worklists_with_deadline(&self.base, usize::MAX, None);
                debug_assert!(done);
                marker.leave_atomic_pause(&mut self.base);
            }
            MarkerPhase::Idle => {}
        }
        let weakness = if marker.weakness_processed() {
            Ok(0)
        } else {
            marker.process_weakness(&mut self.base)
        };
        let stats = (*marker).finalize();
        self.process_survivors();
        weakness?;
        let stats = stats?;
        logln_if!(
            self.config.verbose,
            "[heap] collection finished, {} bytes marked",
            stats.marked_bytes
        );
        Ok(stats)
    }

    /// Finalizes the running cycle if it marks incrementally. Returns `None`
    /// when there was nothing to finalize.
    pub fn finalize_incremental_garbage_collection_if_needed(
        &mut self,
        stack_state: StackState,
    ) -> Result<Option<MarkingStats>, MarkingError> {
        let needed = self.marker.as_deref().map_or(false, |marker| {
            marker.phase() == MarkerPhase::Marking
                && marker.config().marking_type != MarkingType::Atomic
        });
        if !needed {
            return Ok(None);
        }
        self.finalize_garbage_collection(stack_state).map(Some)
    }

    /// Runs a full atomic cycle, finishing any incremental one first.
    pub fn collect_garbage(&mut self) -> Result<MarkingStats, MarkingError> {
        if self.marker.is_some() {
            self.finalize_garbage_collection(StackState::MayContainHeapPointers)?;
        }
        self.collect_garbage_with(MarkingConfig::atomic())
    }

    pub fn collect_garbage_with(
        &mut self,
        config: MarkingConfig,
    ) -> Result<MarkingStats, MarkingError> {
        self.start_garbage_collection(config);
        self.finalize_garbage_collection(config.stack_state)
    }

    /// Gives the running incremental cycle a bounded slice of marking work.
    pub fn advance_marking_on_allocation(&mut self) -> bool {
        match self.marker_and_base() {
            Some((marker, base))
                if marker.phase() == MarkerPhase::Marking
                    && marker.config().is_incremental_or_concurrent() =>
            {
                marker.advance_marking_on_allocation(base)
            }
            _ => false,
        }
    }

    /// Runs queued tasks until the runner is empty. Returns the number of
    /// executed tasks.
    ///
    /// Tasks are non-nestable. Must not be called while an object returned by
    /// [`Heap::allocate_raw`] is still in construction, a marking step would
    /// flush it from the not-fully-constructed worklist and trace it.
    pub fn run_pending_tasks(&mut self) -> usize {
        let runner = match &self.base.task_runner {
            Some(runner) => runner.clone(),
            None => return 0,
        };
        let mut executed = 0;
        while let Some(job) = runner.pop_task() {
            if job.is_canceled() {
                continue;
            }
            job.execute(self);
            executed += 1;
        }
        executed
    }

    /// Stand-in for sweeping: clears mark bits of a non-generational heap.
    /// Generational heaps keep marks sticky and promote marked young objects.
    fn process_survivors(&mut self) {
        let space = &mut self.base.space;
        if !self.base.remembered_set.is_generational() {
            space.for_each_object(|header| {
                header.unmark();
            });
            return;
        }
        let mut survivors: Vec<NonNull<HeapObjectHeader>> = Vec::new();
        space.for_each_object(|header| {
            if header.is_marked() && header.is_young() {
                survivors.push(NonNull::from(header));
            }
        });
        log::debug!("promoting {} young survivor(s)", survivors.len());
        for header in survivors {
            space.promote(unsafe { header.as_ref() });
        }
    }

    fn unmark_all(&mut self) {
        self.base.space.for_each_object(|header| {
            header.unmark();
        });
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Some(marker) = self.marker.take() {
            if marker.phase() == MarkerPhase::Marking
                && marker.config().is_incremental_or_concurrent()
            {
                self.base
                    .process_heap
                    .exit_incremental_or_concurrent_marking();
            }
        }
    }
}
