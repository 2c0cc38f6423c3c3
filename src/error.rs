use std::fmt;

/// Marking invariants that are reported to the caller instead of asserted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkingError {
    /// The marker was finalized while not fully constructed objects were still queued.
    ResidualWorkPresent { count: usize },
    /// Weak callbacks pushed new objects onto the marking worklist.
    WeakCallbackProducedWork { count: usize },
}

impl fmt::Display for MarkingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkingError::ResidualWorkPresent { count } => write!(
                f,
                "{} not fully constructed object(s) left after marking",
                count
            ),
            MarkingError::WeakCallbackProducedWork { count } => write!(
                f,
                "weak callbacks produced {} new marking item(s)",
                count
            ),
        }
    }
}

impl std::error::Error for MarkingError {}
