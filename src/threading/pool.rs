//! The thread pool: admission, one-thread-at-a-time scheduling, park
//! counters, and the empty-set callback.
//!
//! The pool owns every thread in an arena that never shrinks — a
//! [`ThreadId`] stays valid for the lifetime of the VM. Membership (which
//! threads the scheduler considers) is tracked separately in insertion
//! order: termination removes a thread from the member set, resurrection
//! re-appends it.
//!
//! Scheduling is deferred: whenever a scheduling decision is needed, a task
//! is enqueued on the host executor and the pick happens on the next tick.
//! That prevents unbounded recursion when a termination or suspension would
//! otherwise re-enter the dispatch loop synchronously, and it gives pending
//! asynchronous callbacks (class loading, native I/O) a chance to complete
//! between thread quanta.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    runtime::class::ClassId,
    threading::{
        status::ThreadStatus,
        thread::{JvmThread, ThreadId},
    },
    Jvm,
};

/// Callback invoked by a scheduling tick that finds the member set empty.
pub type EmptyPoolCallback = Rc<dyn Fn(&mut Jvm)>;

/// The pool of all JVM threads.
pub struct ThreadPool {
    /// Thread arena; slots are never reused.
    threads: Vec<JvmThread>,
    /// Member set in insertion order; the scheduler scans this.
    members: Vec<ThreadId>,
    /// The single RUNNING thread, if any.
    running: Option<ThreadId>,
    /// Park permits per thread identity; negative when unparks precede
    /// parks.
    park_counts: FxHashMap<ThreadId, i32>,
    /// Dedups deferred scheduling requests.
    scheduling: bool,
    /// Invoked when a scheduling tick finds no members.
    on_empty: Option<EmptyPoolCallback>,
}

impl ThreadPool {
    pub(crate) fn new() -> Self {
        ThreadPool {
            threads: Vec::new(),
            members: Vec::new(),
            running: None,
            park_counts: FxHashMap::default(),
            scheduling: false,
            on_empty: None,
        }
    }

    /// Returns the thread behind `tid`.
    ///
    /// # Panics
    ///
    /// Panics if the handle is dangling (host bug).
    #[must_use]
    pub fn thread(&self, tid: ThreadId) -> &JvmThread {
        self.threads
            .get(tid.index())
            .unwrap_or_else(|| vm_bug!("dangling thread handle {tid}"))
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> &mut JvmThread {
        self.threads
            .get_mut(tid.index())
            .unwrap_or_else(|| vm_bug!("dangling thread handle {tid}"))
    }

    /// Member threads in insertion order.
    #[must_use]
    pub fn members(&self) -> &[ThreadId] {
        &self.members
    }

    /// The currently RUNNING thread, if any.
    #[must_use]
    pub fn running_thread(&self) -> Option<ThreadId> {
        self.running
    }

    fn admit(&mut self, tid: ThreadId) {
        if !self.members.contains(&tid) {
            self.members.push(tid);
        }
    }

    fn evict(&mut self, tid: ThreadId) {
        self.members.retain(|&t| t != tid);
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("threads", &self.threads.len())
            .field("members", &self.members)
            .field("running", &self.running)
            .field("scheduling", &self.scheduling)
            .finish()
    }
}

impl Jvm {
    /// Creates a thread of class `cls` in the NEW state, admits it to the
    /// pool, and allocates its `java/lang/Thread` heap object.
    pub fn new_thread(&mut self, cls: ClassId) -> ThreadId {
        let tid = ThreadId::new(u32::try_from(self.pool.threads.len()).unwrap_or_else(|_| {
            vm_bug!("thread arena exceeded u32 handle space");
        }));
        let obj = self.heap.alloc(cls);
        self.pool.threads.push(JvmThread::new(tid, cls, obj));
        self.pool.admit(tid);
        debug!(thread = tid.raw(), "thread created");
        tid
    }

    /// Re-admits a previously terminated thread to the member set.
    pub fn resurrect_thread(&mut self, tid: ThreadId) {
        debug!(thread = tid.raw(), "thread resurrected");
        self.pool.admit(tid);
    }

    /// Member threads in insertion order.
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadId> {
        self.pool.members.clone()
    }

    /// The currently RUNNING thread, if any.
    #[must_use]
    pub fn running_thread(&self) -> Option<ThreadId> {
        self.pool.running
    }

    /// Installs the callback fired by a scheduling tick that finds the
    /// member set empty.
    pub fn on_pool_empty(&mut self, cb: EmptyPoolCallback) {
        self.pool.on_empty = Some(cb);
    }

    /// Post-transition hook: `tid` became RUNNABLE.
    pub(crate) fn thread_runnable(&mut self, tid: ThreadId) {
        let _ = tid;
        if self.pool.running.is_none() {
            self.schedule_next_thread();
        }
    }

    /// Post-transition hook: `tid` entered a suspended state.
    pub(crate) fn thread_suspended(&mut self, tid: ThreadId) {
        if self.pool.running == Some(tid) {
            self.pool.running = None;
            self.schedule_next_thread();
        }
    }

    /// Post-transition hook: `tid` terminated.
    pub(crate) fn thread_terminated(&mut self, tid: ThreadId) {
        self.pool.evict(tid);
        debug!(thread = tid.raw(), "thread terminated");
        if self.pool.running == Some(tid) {
            self.pool.running = None;
            self.schedule_next_thread();
        }
    }

    /// Defers a scheduling pass to the next executor tick. Multiple
    /// requests before the tick collapse into one pass.
    pub(crate) fn schedule_next_thread(&mut self) {
        if self.pool.scheduling {
            return;
        }
        self.pool.scheduling = true;
        trace!("scheduling pass deferred to next tick");
        self.defer(Box::new(|jvm: &mut Jvm| {
            jvm.pool.scheduling = false;
            jvm.next_thread();
        }));
    }

    /// The scheduling pass: with no thread RUNNING, promotes the first
    /// RUNNABLE member (insertion order); with no members at all, fires
    /// the empty callback.
    fn next_thread(&mut self) {
        if self.pool.running.is_some() {
            return;
        }
        if self.pool.members.is_empty() {
            debug!("thread pool empty");
            if let Some(cb) = self.pool.on_empty.clone() {
                cb(self);
            }
            return;
        }
        let next = self
            .pool
            .members
            .iter()
            .copied()
            .find(|&t| self.pool.thread(t).status == ThreadStatus::Runnable);
        if let Some(tid) = next {
            trace!(thread = tid.raw(), "promoted to RUNNING");
            self.pool.running = Some(tid);
            self.set_status(tid, ThreadStatus::Running, None);
        }
    }

    /// Consumes a park permit: increments the park counter and suspends
    /// `tid` into PARKED when the result is positive. A preceding unpark
    /// makes the park a no-op.
    pub fn park(&mut self, tid: ThreadId) {
        let count = self.pool.park_counts.entry(tid).or_insert(0);
        *count += 1;
        let parked = *count > 0;
        trace!(thread = tid.raw(), count = *count, "park");
        if parked {
            self.set_status(tid, ThreadStatus::Parked, None);
        }
    }

    /// Produces a park permit: decrements the counter and makes `tid`
    /// RUNNABLE when the result is zero or negative. The counter may go
    /// negative so that an unpark preceding a park still satisfies it —
    /// POSIX-semaphore-like semantics.
    pub fn unpark(&mut self, tid: ThreadId) {
        let count = self.pool.park_counts.entry(tid).or_insert(0);
        *count -= 1;
        let release = *count <= 0;
        trace!(thread = tid.raw(), count = *count, "unpark");
        if release {
            self.set_status(tid, ThreadStatus::Runnable, None);
        }
    }

    /// Clears the park counter entirely and makes `tid` RUNNABLE,
    /// regardless of whether it was parked.
    pub fn completely_unpark(&mut self, tid: ThreadId) {
        self.pool.park_counts.insert(tid, 0);
        trace!(thread = tid.raw(), "completely unparked");
        self.set_status(tid, ThreadStatus::Runnable, None);
    }

    /// Returns `true` while `tid` holds a positive park count.
    #[must_use]
    pub fn is_parked(&self, tid: ThreadId) -> bool {
        self.pool.park_counts.get(&tid).copied().unwrap_or(0) > 0
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;

    #[test]
    fn test_new_thread_is_admitted() {
        let mut jvm = Jvm::new();
        let cls = jvm.bootstrap().thread;
        let a = jvm.new_thread(cls);
        let b = jvm.new_thread(cls);
        assert_eq!(jvm.threads(), vec![a, b]);
        assert!(jvm.running_thread().is_none());
    }

    #[test]
    fn test_unpark_preceding_park_presatisfies_it() {
        let mut jvm = Jvm::new();
        let cls = jvm.bootstrap().thread;
        let tid = jvm.new_thread(cls);
        // A NEW thread with no permits: unpark first drives the counter
        // negative and leaves the later park satisfied.
        jvm.unpark(tid);
        assert!(!jvm.is_parked(tid));
        jvm.park(tid);
        assert!(!jvm.is_parked(tid));
        // Status followed the unpark edge NEW -> RUNNABLE.
        assert_eq!(jvm.thread_status(tid), ThreadStatus::Runnable);
    }

    #[test]
    fn test_completely_unpark_clears_stale_negatives() {
        let mut jvm = Jvm::new();
        let cls = jvm.bootstrap().thread;
        let tid = jvm.new_thread(cls);
        jvm.unpark(tid);
        jvm.unpark(tid);
        jvm.completely_unpark(tid);
        assert!(!jvm.is_parked(tid));
        // The reset discards the accumulated permits: one more unpark
        // drives the counter to -1, not -3.
        jvm.unpark(tid);
        assert!(!jvm.is_parked(tid));
        assert_eq!(jvm.thread_status(tid), ThreadStatus::Runnable);
    }

    #[test]
    fn test_empty_callback_fires_on_empty_pool_tick() {
        let mut jvm = Jvm::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        jvm.on_pool_empty(Rc::new(move |_jvm| flag.set(true)));
        jvm.schedule_next_thread();
        assert!(!fired.get());
        jvm.run_until_idle();
        assert!(fired.get());
    }

    #[test]
    fn test_scheduling_requests_are_deduped() {
        let mut jvm = Jvm::new();
        jvm.schedule_next_thread();
        jvm.schedule_next_thread();
        jvm.schedule_next_thread();
        assert_eq!(jvm.pending_tasks(), 1);
    }
}
