//! Deadline-bounded worklist draining.
//!
//! Checking the clock is expensive relative to tracing a single object, so the
//! stop predicate is only evaluated after every `INTERVAL`-th processed item.
//! A drain therefore overshoots its budget by at most `INTERVAL - 1` items.

use std::time::Instant;

use crate::{marking_state::MarkingState, worklist::Worklist};

pub const DEFAULT_DEADLINE_CHECK_INTERVAL: usize = 150;

/// Pops items of `task_id` from `worklist` and hands them to `callback` until
/// the worklist is empty (returns `true`) or `should_yield` holds at a check
/// point (returns `false`).
pub fn drain_worklist_with_predicate<const INTERVAL: usize, C, T, P, F>(
    ctx: &mut C,
    should_yield: P,
    worklist: &Worklist<T>,
    task_id: usize,
    mut callback: F,
) -> bool
where
    T: Send,
    P: Fn(&C) -> bool,
    F: FnMut(&mut C, T),
{
    debug_assert!(INTERVAL > 0);
    let mut processed_callback_count = INTERVAL;
    while let Some(item) = worklist.pop(task_id) {
        callback(ctx, item);
        processed_callback_count -= 1;
        if processed_callback_count == 0 {
            if should_yield(ctx) {
                return false;
            }
            processed_callback_count = INTERVAL;
        }
    }
    true
}

/// Drains until `state` reached `marked_bytes_deadline` or the clock passed
/// `time_deadline`. `None` means no time limit.
pub fn drain_worklist_with_bytes_and_time_deadline<const INTERVAL: usize, T, F>(
    state: &mut MarkingState,
    marked_bytes_deadline: usize,
    time_deadline: Option<Instant>,
    worklist: &Worklist<T>,
    callback: F,
) -> bool
where
    T: Send,
    F: FnMut(&mut MarkingState, T),
{
    let task_id = state.task_id();
    drain_worklist_with_predicate::<INTERVAL, _, _, _, _>(
        state,
        |state| {
            state.marked_bytes() >= marked_bytes_deadline
                || time_deadline.map_or(false, |deadline| Instant::now() >= deadline)
        },
        worklist,
        task_id,
        callback,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_is_checked_every_interval() {
        let worklist = Worklist::new(1);
        for i in 0..1000usize {
            worklist.push(0, i);
        }
        let mut processed = 0usize;
        let done = drain_worklist_with_predicate::<10, _, _, _, _>(
            &mut processed,
            |processed| *processed >= 25,
            &worklist,
            0,
            |processed, _| *processed += 1,
        );
        assert!(!done);
        // Budget met at 25, noticed at the next check point.
        assert_eq!(processed, 30);
        assert_eq!(worklist.len(), 970);
    }

    #[test]
    fn overshoot_is_bounded_by_interval() {
        const INTERVAL: usize = DEFAULT_DEADLINE_CHECK_INTERVAL;
        for budget in [1usize, 149, 150, 151, 299] {
            let worklist = Worklist::new(1);
            for i in 0..2000usize {
                worklist.push(0, i);
            }
            let mut processed = 0usize;
            let done = drain_worklist_with_predicate::<INTERVAL, _, _, _, _>(
                &mut processed,
                |processed| *processed >= budget,
                &worklist,
                0,
                |processed, _| *processed += 1,
            );
            assert!(!done);
            assert!(processed >= budget);
            assert!(processed - budget <= INTERVAL - 1);
        }
    }

    #[test]
    fn empty_worklist_is_done() {
        let worklist: Worklist<usize> = Worklist::new(1);
        let mut ctx = ();
        assert!(drain_worklist_with_predicate::<150, _, _, _, _>(
            &mut ctx,
            |_| true,
            &worklist,
            0,
            |_, _| unreachable!(),
        ));
    }
}
