//! Mark phase driver for an incremental, generational tracing garbage collector.
//!
//! [Heap] owns the object [space](space::Space), the persistent roots and the
//! [Marker](marker::Marker) of the running cycle. Cycles are either atomic
//! ([Heap::collect_garbage]) or incremental
//! ([Heap::start_incremental_garbage_collection]), in which case marking
//! advances through tasks pumped by [Heap::run_pending_tasks] and through
//! allocation until the atomic pause finishes it.

/// Logs at `info` when `$cond` holds, at `debug` otherwise.
macro_rules! logln_if {
    ($cond: expr, $($t:tt)*) => {
        if $cond {
            log::info!($($t)*);
        } else {
            log::debug!($($t)*);
        }
    };
}

pub mod age_table;
pub mod config;
pub mod drain;
pub mod error;
pub mod gc_info_table;
pub mod gcref;
pub mod header;
pub mod heap;
pub mod internal;
pub mod liveness_broker;
pub mod marker;
pub mod marking_state;
pub mod marking_visitor;
pub mod marking_worklists;
pub mod persistent;
pub mod process_heap;
pub mod remembered_set;
pub mod space;
pub mod stack;
pub mod stats_collector;
pub mod task_scheduler;
pub mod visitor;
pub mod worklist;
pub mod write_barrier;

pub use config::{
    CollectionType, HeapConfig, MarkerOptions, MarkingConfig, MarkingType, StackState,
};
pub use error::MarkingError;
pub use gcref::{GcRef, UntypedGcRef};
pub use heap::{Heap, HeapBase, Platform};
pub use internal::trace_trait::TraceTrait;
pub use marker::{Marker, MarkerPhase, MarkingStats};
pub use visitor::Visitor;
