//! The host executor: a single-threaded, run-to-completion task queue.
//!
//! Everything "asynchronous" in the core — scheduling passes, class
//! resolution, class initialization — is a one-shot closure enqueued here
//! and run on a later [`Jvm::tick`]. Tasks run to completion before the
//! next one starts; there is no preemption and no internal locking.
//!
//! The embedding host drives the queue. Test drivers typically call
//! [`Jvm::run_until_idle`], which pumps until quiescence; an interactive
//! host would interleave ticks with its own event sources.

use std::collections::VecDeque;

use crate::Jvm;

/// A one-shot task on the host executor.
pub type HostTask = Box<dyn FnOnce(&mut Jvm)>;

/// FIFO queue of pending host tasks.
#[derive(Default)]
pub struct Executor {
    queue: VecDeque<HostTask>,
}

impl Executor {
    pub(crate) fn new() -> Self {
        Executor::default()
    }

    pub(crate) fn push(&mut self, task: HostTask) {
        self.queue.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<HostTask> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl Jvm {
    /// Enqueues a task for a later tick.
    pub(crate) fn defer(&mut self, task: HostTask) {
        self.executor.push(task);
    }

    /// Runs one pending task. Returns `false` when the queue is empty.
    pub fn tick(&mut self) -> bool {
        match self.executor.pop() {
            Some(task) => {
                task(self);
                true
            }
            None => false,
        }
    }

    /// Pumps the executor until no tasks remain.
    ///
    /// Tasks may enqueue further tasks; the pump continues until the VM is
    /// quiescent (every thread suspended, terminated, or awaiting an
    /// external continuation that has not been enqueued).
    pub fn run_until_idle(&mut self) {
        while self.tick() {}
    }

    /// Number of tasks currently queued.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.executor.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let mut jvm = Jvm::new();
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = std::rc::Rc::clone(&order);
            jvm.defer(Box::new(move |_jvm| order.borrow_mut().push(i)));
        }
        assert_eq!(jvm.pending_tasks(), 3);
        jvm.run_until_idle();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert_eq!(jvm.pending_tasks(), 0);
    }

    #[test]
    fn test_tasks_may_enqueue_tasks() {
        let mut jvm = Jvm::new();
        let hits = std::rc::Rc::new(std::cell::Cell::new(0));
        let outer = std::rc::Rc::clone(&hits);
        jvm.defer(Box::new(move |jvm| {
            let inner = std::rc::Rc::clone(&outer);
            jvm.defer(Box::new(move |_jvm| inner.set(inner.get() + 1)));
        }));
        jvm.run_until_idle();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_tick_on_empty_queue() {
        let mut jvm = Jvm::new();
        assert!(!jvm.tick());
    }
}
