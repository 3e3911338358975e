//! Work queue shared by the evaluator's worker threads

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trellis_types::Key;

/// Cancels a running evaluation from any thread
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Create a handle that is not interrupted
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running evaluation to stop. It returns
    /// [`EvaluationError::Interrupted`](crate::EvaluationError::Interrupted).
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once `interrupt` was called and not yet cleared
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Key>,
    active: usize,
    halted: bool,
}

/// Pending keys plus the count of keys being processed.
///
/// The queue is drained once nothing is pending and no worker holds a key,
/// since only a worker holding a key can enqueue more.
#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&self, key: Key) {
        let mut state = self.state.lock();
        if state.halted {
            return;
        }
        state.pending.push_back(key);
        drop(state);
        self.ready.notify_one();
    }

    /// Block until a key is available. Returns `None` once the queue is
    /// drained or halted. Every returned key must be followed by
    /// [`finish`](Self::finish).
    pub(crate) fn next(&self) -> Option<Key> {
        let mut state = self.state.lock();
        loop {
            if state.halted {
                return None;
            }
            if let Some(key) = state.pending.pop_front() {
                state.active += 1;
                return Some(key);
            }
            if state.active == 0 {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        let drained = state.active == 0 && state.pending.is_empty();
        drop(state);
        if drained {
            self.ready.notify_all();
        }
    }

    /// Stop handing out keys. Returns true for the first caller only.
    pub(crate) fn halt(&self) -> bool {
        let mut state = self.state.lock();
        let first = !state.halted;
        state.halted = true;
        state.pending.clear();
        drop(state);
        self.ready.notify_all();
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn key(arg: &str) -> Key {
        Key::new("node", arg)
    }

    #[test]
    fn test_fifo_and_drain() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));
        queue.enqueue(key("b"));

        assert_eq!(queue.next(), Some(key("a")));
        queue.finish();
        assert_eq!(queue.next(), Some(key("b")));
        queue.finish();
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn test_halt() {
        let queue = WorkQueue::new();
        queue.enqueue(key("a"));

        assert!(queue.halt());
        assert!(!queue.halt());
        assert_eq!(queue.next(), None);

        queue.enqueue(key("b"));
        assert_eq!(queue.next(), None);
    }

    #[test]
    fn test_workers_wait_for_active_keys() {
        let queue = WorkQueue::new();
        let processed = AtomicUsize::new(0);
        queue.enqueue(key("0"));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while let Some(key) = queue.next() {
                        let n: usize = key.argument().parse().unwrap();
                        if n < 50 {
                            queue.enqueue(Key::new("node", (n + 1).to_string()));
                        }
                        processed.fetch_add(1, Ordering::SeqCst);
                        queue.finish();
                    }
                });
            }
        });

        assert_eq!(processed.load(Ordering::SeqCst), 51);
    }

    #[test]
    fn test_interrupt_handle_is_shared() {
        let handle = InterruptHandle::new();
        let clone = handle.clone();
        clone.interrupt();
        assert!(handle.is_interrupted());
        handle.clear();
        assert!(!clone.is_interrupted());
    }
}
