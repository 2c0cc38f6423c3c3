//! Conservative root sources.

use parking_lot::Mutex;

/// Receives every word found on a stack.
pub trait StackVisitor {
    fn visit_pointer(&mut self, address: usize);
}

/// A stack that can be iterated conservatively for potential heap pointers.
pub trait Stack: Send + Sync {
    fn iterate_pointers(&self, visitor: &mut dyn StackVisitor);
}

/// Stack that never holds heap pointers.
pub struct EmptyStack;

impl Stack for EmptyStack {
    fn iterate_pointers(&self, _visitor: &mut dyn StackVisitor) {}
}

/// Explicitly maintained stack of words, standing in for the native stack.
///
/// Embedders push every value that may hold a heap pointer and pop it when the
/// value goes out of scope. Values are never interpreted precisely: each word
/// is handed to the marker as an arbitrary address.
pub struct ShadowStack {
    words: Mutex<Vec<usize>>,
}

impl ShadowStack {
    pub fn new() -> Self {
        Self {
            words: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, word: usize) {
        self.words.lock().push(word);
    }

    pub fn push_ptr<T>(&self, ptr: *const T) {
        self.push(ptr as usize);
    }

    pub fn pop(&self) -> Option<usize> {
        self.words.lock().pop()
    }

    pub fn clear(&self) {
        self.words.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.words.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ShadowStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack for ShadowStack {
    fn iterate_pointers(&self, visitor: &mut dyn StackVisitor) {
        // Snapshot so visitors may push while the stack is walked.
        let words = self.words.lock().clone();
        for word in words.into_iter().rev() {
            visitor.visit_pointer(word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Vec<usize>);

    impl StackVisitor for Collect {
        fn visit_pointer(&mut self, address: usize) {
            self.0.push(address);
        }
    }

    #[test]
    fn walks_top_to_bottom() {
        let stack = ShadowStack::new();
        stack.push(1);
        stack.push(2);
        stack.push(3);
        assert_eq!(stack.pop(), Some(3));
        let mut collect = Collect(Vec::new());
        stack.iterate_pointers(&mut collect);
        assert_eq!(collect.0, vec![2, 1]);
    }
}
