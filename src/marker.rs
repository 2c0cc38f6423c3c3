//! Mark phase driver.
//!
//! A cycle moves through `Idle -> Marking -> AtomicPause -> Idle`. Incremental
//! cycles visit roots without the stack when marking starts and then advance
//! in bounded steps posted to the heap's [TaskRunner](crate::task_scheduler::TaskRunner).
//! The atomic pause revisits roots, this time scanning the stack if
//! requested, and drains every worklist without a deadline.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    config::{MarkerOptions, MarkingConfig, MarkingType, StackState},
    drain::{drain_worklist_with_bytes_and_time_deadline, DEFAULT_DEADLINE_CHECK_INTERVAL},
    error::MarkingError,
    header::HeapObjectHeader,
    heap::HeapBase,
    liveness_broker::LivenessBroker,
    marking_state::MarkingState,
    marking_visitor::MarkingVisitor,
    marking_worklists::{HeaderItem, MarkingItem, MarkingWorklists, MUTATOR_THREAD_ID},
    space::Space,
    stack::StackVisitor,
    task_scheduler::{IncrementalMarkingTask, TaskHandle},
    visitor::Visitor,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkerPhase {
    Idle,
    Marking,
    AtomicPause,
}

/// Result of a finished marker.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct MarkingStats {
    pub marked_bytes: usize,
    /// Not fully constructed objects found marked and dropped at finalization.
    pub discarded_not_fully_constructed: usize,
}

pub struct Marker {
    config: MarkingConfig,
    options: MarkerOptions,
    worklists: Arc<MarkingWorklists>,
    mutator_marking_state: MarkingState,
    incremental_marking_handle: Option<TaskHandle>,
    phase: MarkerPhase,
    is_marking_started: bool,
    weakness_processed: bool,
    verbose: bool,
}

impl Marker {
    pub fn new(config: MarkingConfig, options: MarkerOptions) -> Self {
        let worklists = Arc::new(MarkingWorklists::new(1 + options.num_concurrent_markers));
        Self {
            config,
            options,
            mutator_marking_state: MarkingState::new(worklists.clone(), MUTATOR_THREAD_ID),
            worklists,
            incremental_marking_handle: None,
            phase: MarkerPhase::Idle,
            is_marking_started: false,
            weakness_processed: false,
            verbose: false,
        }
    }

    pub(crate) fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn phase(&self) -> MarkerPhase {
        self.phase
    }

    pub fn config(&self) -> &MarkingConfig {
        &self.config
    }

    pub fn options(&self) -> &MarkerOptions {
        &self.options
    }

    pub fn marked_bytes(&self) -> usize {
        self.mutator_marking_state.marked_bytes()
    }

    /// Shared worklists, for concurrent markers using task ids `1..`.
    pub fn worklists(&self) -> Arc<MarkingWorklists> {
        self.worklists.clone()
    }

    pub fn has_pending_task(&self) -> bool {
        self.incremental_marking_handle.is_some()
    }

    pub fn is_marking_started(&self) -> bool {
        self.is_marking_started
    }

    pub fn weakness_processed(&self) -> bool {
        self.weakness_processed
    }

    pub fn start_marking(&mut self, heap: &mut HeapBase) {
        debug_assert_eq!(self.phase, MarkerPhase::Idle, "marking already started");
        heap.stats_collector.notify_marking_started();
        self.is_marking_started = true;
        self.phase = MarkerPhase::Marking;
        logln_if!(
            self.verbose,
            "[marker] start {:?} {:?} marking",
            self.config.collection_type,
            self.config.marking_type
        );
        if self.config.is_incremental_or_concurrent() {
            heap.process_heap.enter_incremental_or_concurrent_marking();
            if heap.remembered_set.is_generational() {
                heap.is_incremental_marking_in_progress = true;
            }
            // The stack is only scanned in the atomic pause.
            self.visit_roots(heap, StackState::NoHeapPointers);
            self.schedule_incremental_marking_task(heap);
        }
    }

    pub fn enter_atomic_pause(&mut self, heap: &mut HeapBase, stack_state: StackState) {
        debug_assert!(self.is_marking_started, "marking not started");
        debug_assert_eq!(self.phase, MarkerPhase::Marking);
        if self.config.is_incremental_or_concurrent() {
            heap.process_heap.exit_incremental_or_concurrent_marking();
            heap.is_incremental_marking_in_progress = false;
            if let Some(handle) = self.incremental_marking_handle.take() {
                handle.cancel();
            }
        }
        self.config = self
            .config
            .with_stack_state(stack_state)
            .with_marking_type(MarkingType::Atomic);
        self.phase = MarkerPhase::AtomicPause;

        // Also retires linear allocation buffers.
        self.visit_roots(heap, stack_state);
        if stack_state == StackState::NoHeapPointers {
            self.worklists.flush_not_fully_constructed_objects();
        } else {
            self.mark_not_fully_constructed_objects(heap);
        }
    }

    pub fn leave_atomic_pause(&mut self, heap: &mut HeapBase) {
        debug_assert!(
            self.incremental_marking_handle.is_none(),
            "incremental marking task still pending"
        );
        debug_assert_eq!(self.phase, MarkerPhase::AtomicPause);
        heap.remembered_set.reset(&mut heap.space);
        let marked_bytes = self.mutator_marking_state.marked_bytes();
        heap.stats_collector.notify_marking_completed(marked_bytes);
        self.phase = MarkerPhase::Idle;
        logln_if!(self.verbose, "[marker] marked {} bytes", marked_bytes);
    }

    /// Runs the rest of the cycle inside one pause.
    pub fn finish_marking(&mut self, heap: &mut HeapBase, stack_state: StackState) {
        debug_assert!(self.is_marking_started, "marking not started");
        self.enter_atomic_pause(heap, stack_state);
        let done = self.process_worklists_with_deadline(heap, usize::MAX, None);
        debug_assert!(done, "unbounded drain reported unfinished work");
        self.leave_atomic_pause(heap);
        self.is_marking_started = false;
    }

    /// Clears weak persistents pointing at dead objects and runs the weak
    /// callbacks registered while tracing. Returns the number of cleared weak
    /// persistents.
    pub fn process_weakness(&mut self, heap: &mut HeapBase) -> Result<usize, MarkingError> {
        debug_assert!(!self.weakness_processed, "weakness processed twice");
        debug_assert_ne!(self.phase, MarkerPhase::Marking);
        self.weakness_processed = true;

        let HeapBase {
            space,
            weak_persistents,
            ..
        } = heap;
        let broker = LivenessBroker::new(space);
        let cleared = weak_persistents.process_weak(&broker);

        let weak_callbacks = self.worklists.weak_callback_worklist();
        let mut invoked = 0usize;
        while let Some(item) = weak_callbacks.pop(MUTATOR_THREAD_ID) {
            (item.callback)(&broker, item.parameter);
            invoked += 1;
        }
        log::debug!(
            "cleared {} weak persistent(s), ran {} weak callback(s)",
            cleared,
            invoked
        );

        let residual = self.worklists.marking_worklist().len();
        if residual != 0 {
            log::error!("weak callbacks pushed {} marking item(s)", residual);
            return Err(MarkingError::WeakCallbackProducedWork { count: residual });
        }
        Ok(cleared)
    }

    pub fn incremental_marking_step(
        &mut self,
        heap: &mut HeapBase,
        stack_state: StackState,
        expected_marked_bytes: usize,
    ) -> bool {
        debug_assert_eq!(self.phase, MarkerPhase::Marking);
        if stack_state == StackState::NoHeapPointers {
            self.worklists.flush_not_fully_constructed_objects();
        }
        self.config.stack_state = stack_state;
        let max_duration = self.options.max_step_duration;
        self.advance_marking_with_deadline(heap, expected_marked_bytes, Some(max_duration), true)
    }

    pub fn incremental_marking_step_for_testing(
        &mut self,
        heap: &mut HeapBase,
        stack_state: StackState,
        expected_marked_bytes: usize,
    ) -> bool {
        self.incremental_marking_step(heap, stack_state, expected_marked_bytes)
    }

    /// Bounded drain interleaved with allocation. Never schedules a task.
    pub fn advance_marking_on_allocation(&mut self, heap: &mut HeapBase) -> bool {
        debug_assert_eq!(self.phase, MarkerPhase::Marking);
        let (bytes, duration) = (
            self.options.min_marked_bytes_per_step,
            self.options.max_step_duration,
        );
        self.advance_marking_with_deadline(heap, bytes, Some(duration), false)
    }

    fn advance_marking_with_deadline(
        &mut self,
        heap: &mut HeapBase,
        expected_marked_bytes: usize,
        max_duration: Option<Duration>,
        reschedule: bool,
    ) -> bool {
        let marked_before = self.mutator_marking_state.marked_bytes();
        let done = self.process_worklists_with_deadline(heap, expected_marked_bytes, max_duration);
        if self.options.num_concurrent_markers > 0 {
            self.mutator_marking_state.publish();
        }
        log::trace!(
            "marking step traced {} bytes, done: {}",
            self.mutator_marking_state.marked_bytes() - marked_before,
            done
        );
        if !done {
            debug_assert!(
                self.config.is_incremental_or_concurrent(),
                "atomic marking must always finish"
            );
            if reschedule {
                self.schedule_incremental_marking_task(heap);
            }
        }
        done
    }

    /// Drains the retry, marking and write barrier worklists in that order
    /// until the marking worklist stays empty or a budget runs out. Returns
    /// `true` when marking reached its fixed point.
    pub fn process_worklists_with_deadline(
        &mut self,
        heap: &HeapBase,
        expected_marked_bytes: usize,
        max_duration: Option<Duration>,
    ) -> bool {
        const INTERVAL: usize = DEFAULT_DEADLINE_CHECK_INTERVAL;
        let marked_bytes_deadline = self
            .mutator_marking_state
            .marked_bytes()
            .saturating_add(expected_marked_bytes);
        let time_deadline = max_duration.and_then(|duration| Instant::now().checked_add(duration));
        let space = &heap.space;
        let worklists = &*self.worklists;
        let state = &mut self.mutator_marking_state;

        loop {
            if !drain_worklist_with_bytes_and_time_deadline::<INTERVAL, _, _>(
                state,
                marked_bytes_deadline,
                time_deadline,
                worklists.previously_not_fully_constructed_worklist(),
                |state, item: HeaderItem| trace_header_item(state, space, item),
            ) {
                return false;
            }

            if !drain_worklist_with_bytes_and_time_deadline::<INTERVAL, _, _>(
                state,
                marked_bytes_deadline,
                time_deadline,
                worklists.marking_worklist(),
                |state, item: MarkingItem| trace_marking_item(state, space, item),
            ) {
                return false;
            }

            if !drain_worklist_with_bytes_and_time_deadline::<INTERVAL, _, _>(
                state,
                marked_bytes_deadline,
                time_deadline,
                worklists.write_barrier_worklist(),
                |state, item: HeaderItem| trace_header_item(state, space, item),
            ) {
                return false;
            }

            let marking = worklists.marking_worklist();
            if marking.is_local_empty(MUTATOR_THREAD_ID) && marking.is_global_pool_empty() {
                return true;
            }
        }
    }

    /// Traces every not fully constructed object in place. Used when the
    /// stack is scanned, so objects still in construction are scanned
    /// conservatively.
    pub fn mark_not_fully_constructed_objects(&mut self, heap: &HeapBase) {
        let space = &heap.space;
        let not_fully_constructed = self.worklists.not_fully_constructed_worklist();
        let mut visitor = MarkingVisitor::new(&mut self.mutator_marking_state, space);
        while let Some(item) = not_fully_constructed.pop(MUTATOR_THREAD_ID) {
            visitor.trace_not_fully_constructed(item.header());
        }
    }

    pub fn visit_roots(&mut self, heap: &mut HeapBase, stack_state: StackState) {
        heap.space.reset_linear_allocation_buffers();

        let HeapBase {
            space,
            strong_persistents,
            stack,
            remembered_set,
            stats_collector,
            ..
        } = heap;
        let space: &Space = space;
        {
            let mut visitor = MarkingVisitor::new(&mut self.mutator_marking_state, space);
            strong_persistents.trace(&mut Visitor::new(&mut visitor));
            if stack_state != StackState::NoHeapPointers {
                let mut stack_visitor = RootStackVisitor {
                    visitor: &mut visitor,
                    found: 0,
                };
                stack.iterate_pointers(&mut stack_visitor);
                let found = stack_visitor.found;
                stats_collector.notify_objects_found_on_stack(found);
                log::trace!("stack scan found {} object(s)", found);
            }
        }
        if self.config.is_minor() {
            remembered_set.visit_remembered_slots(space, &mut self.mutator_marking_state);
        }
    }

    pub fn clear_all_worklists_for_testing(&mut self) {
        self.worklists.clear_for_testing();
    }

    /// Forgets `handle` if it is the pending task. Called by the task itself
    /// right before it runs.
    pub fn clear_pending_task(&mut self, handle: &TaskHandle) {
        if let Some(pending) = &self.incremental_marking_handle {
            if pending.ptr_eq(handle) {
                self.incremental_marking_handle = None;
            }
        }
    }

    /// Marking barrier slow path for an object stored into the heap while
    /// marking runs.
    pub fn write_barrier(&mut self, header: &HeapObjectHeader) {
        debug_assert_eq!(self.phase, MarkerPhase::Marking);
        self.mutator_marking_state.write_barrier(header);
    }

    /// Makes locally queued work stealable by concurrent markers.
    pub fn publish(&self) {
        self.mutator_marking_state.publish();
    }

    fn schedule_incremental_marking_task(&mut self, heap: &HeapBase) {
        if self.incremental_marking_handle.is_some() {
            return;
        }
        let runner = match &heap.task_runner {
            Some(runner) => runner,
            None => return,
        };
        self.incremental_marking_handle = Some(IncrementalMarkingTask::post(
            &**runner,
            self.options.min_marked_bytes_per_step,
        ));
    }

    /// Consumes the marker and checks that no deferred work was left behind.
    pub fn finalize(self) -> Result<MarkingStats, MarkingError> {
        let mut stats = MarkingStats {
            marked_bytes: self.marked_bytes(),
            discarded_not_fully_constructed: 0,
        };
        let residual = self.worklists.not_fully_constructed_worklist().take_all();
        if residual.is_empty() {
            return Ok(stats);
        }
        // Without a stack scan nothing could have marked these objects.
        if self.config.stack_state == StackState::NoHeapPointers {
            return Err(MarkingError::ResidualWorkPresent {
                count: residual.len(),
            });
        }
        let unmarked = residual
            .iter()
            .filter(|item| !item.header().is_marked())
            .count();
        if unmarked != 0 {
            return Err(MarkingError::ResidualWorkPresent { count: unmarked });
        }
        log::debug!(
            "discarding {} marked not fully constructed object(s)",
            residual.len()
        );
        stats.discarded_not_fully_constructed = residual.len();
        Ok(stats)
    }
}

impl Drop for Marker {
    fn drop(&mut self) {
        let not_fully_constructed = self.worklists.not_fully_constructed_worklist();
        if !not_fully_constructed.is_empty() {
            log::warn!(
                "marker dropped with {} not fully constructed object(s) queued",
                not_fully_constructed.len()
            );
            not_fully_constructed.clear();
        }
        if let Some(handle) = self.incremental_marking_handle.take() {
            handle.cancel();
        }
    }
}

fn trace_header_item(state: &mut MarkingState, space: &Space, item: HeaderItem) {
    let header = item.header();
    MarkingVisitor::new(state, space).trace_marked_object(header);
    state.account_marked_bytes(header);
}

fn trace_marking_item(state: &mut MarkingState, space: &Space, item: MarkingItem) {
    let header = unsafe { &*HeapObjectHeader::from_payload(item.base_object_payload) };
    debug_assert!(!header.is_in_construction(), "tracing object in construction");
    debug_assert!(header.is_marked(), "tracing unmarked object");
    let mut visitor = MarkingVisitor::new(state, space);
    (item.callback)(&mut Visitor::new(&mut visitor), item.base_object_payload);
    state.account_marked_bytes(header);
}

/// Drains the marking worklist of a concurrent marker. `state` must use a task
/// id other than [MUTATOR_THREAD_ID]. Returns `true` once its view ran dry.
pub fn concurrent_marking_step(
    space: &Space,
    state: &mut MarkingState,
    marked_bytes_budget: usize,
) -> bool {
    debug_assert_ne!(state.task_id(), MUTATOR_THREAD_ID);
    let worklists = state.worklists().clone();
    let deadline = state.marked_bytes().saturating_add(marked_bytes_budget);
    let done = drain_worklist_with_bytes_and_time_deadline::<DEFAULT_DEADLINE_CHECK_INTERVAL, _, _>(
        state,
        deadline,
        None,
        worklists.marking_worklist(),
        |state, item: MarkingItem| trace_marking_item(state, space, item),
    );
    state.publish();
    done
}

struct RootStackVisitor<'a, 'b> {
    visitor: &'a mut MarkingVisitor<'b>,
    found: usize,
}

impl StackVisitor for RootStackVisitor<'_, '_> {
    fn visit_pointer(&mut self, address: usize) {
        if self.visitor.trace_conservatively_if_needed(address) {
            self.found += 1;
        }
    }
}
