//! JVM monitors: ownership, blocked queues, and wait sets.
//!
//! A monitor mediates synchronized-method entry, `monitorenter` /
//! `monitorexit`, and `wait`/`notify`. Because execution is single-threaded
//! cooperative, a monitor needs no internal locking — it is plain state
//! mutated only by the currently RUNNING thread:
//!
//! - `owner` + `entry_count` model reentrant ownership.
//! - `blocked` is a FIFO of threads suspended on entry. Each entry stores a
//!   one-shot continuation run when the lock is handed to that thread, plus
//!   the entry count to restore (1 for a fresh acquisition, the saved count
//!   for a wait re-acquisition).
//! - `waiting` holds threads parked in `Object.wait`; `notify` moves them
//!   to the blocked queue in the UNINTERRUPTABLY_BLOCKED state, where they
//!   compete for the lock again.
//!
//! Hand-off is eager: when the owner releases, the head of the blocked
//! queue becomes the owner immediately (its continuation runs, then it goes
//! RUNNABLE), so the lock can never be stolen in between.

use std::collections::VecDeque;

use tracing::trace;

use crate::{
    threading::{ThreadId, ThreadStatus},
    Jvm,
};

/// Handle to a monitor in the monitor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorId(u32);

impl MonitorId {
    /// Creates a handle from a raw table index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        MonitorId(index)
    }

    /// Raw table index of this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One-shot continuation run when a suspended thread re-acquires a monitor
/// (or, for internal use, when any deferred acquisition completes).
pub type AcquireCallback = Box<dyn FnOnce(&mut Jvm)>;

/// A thread suspended on monitor entry.
struct BlockedEntry {
    /// The suspended thread.
    thread: ThreadId,
    /// Entry count to restore on acquisition.
    restore_count: u32,
    /// Continuation run once the lock is handed to this thread.
    on_acquired: Option<AcquireCallback>,
}

/// A thread in the monitor's wait set.
struct WaitingEntry {
    /// The waiting thread.
    thread: ThreadId,
    /// `true` for `wait(timeout)` — reflected in the thread status.
    timed: bool,
    /// Entry count held when `wait` was called, restored on re-acquisition.
    restore_count: u32,
    /// Continuation run once the thread has re-acquired the lock.
    on_wake: Option<AcquireCallback>,
}

/// A single JVM monitor.
#[derive(Default)]
pub struct Monitor {
    owner: Option<ThreadId>,
    entry_count: u32,
    blocked: VecDeque<BlockedEntry>,
    waiting: Vec<WaitingEntry>,
}

impl Monitor {
    /// The thread currently owning this monitor, if any.
    #[must_use]
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Reentrant entry count of the current owner.
    #[must_use]
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Returns `true` if `t` is blocked on entry to this monitor.
    #[must_use]
    pub fn is_blocked(&self, t: ThreadId) -> bool {
        self.blocked.iter().any(|e| e.thread == t)
    }

    /// Returns `true` if `t` is in this monitor's wait set (untimed).
    #[must_use]
    pub fn is_waiting(&self, t: ThreadId) -> bool {
        self.waiting.iter().any(|e| e.thread == t && !e.timed)
    }

    /// Returns `true` if `t` is in this monitor's wait set with a timeout.
    #[must_use]
    pub fn is_timed_waiting(&self, t: ThreadId) -> bool {
        self.waiting.iter().any(|e| e.thread == t && e.timed)
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("owner", &self.owner)
            .field("entry_count", &self.entry_count)
            .field("blocked", &self.blocked.len())
            .field("waiting", &self.waiting.len())
            .finish()
    }
}

/// Arena of monitors owned by the [`Jvm`].
#[derive(Debug, Default)]
pub struct MonitorTable {
    monitors: Vec<Monitor>,
}

impl MonitorTable {
    /// Creates a fresh monitor and returns its handle.
    pub fn create(&mut self) -> MonitorId {
        let id = MonitorId::new(u32::try_from(self.monitors.len()).unwrap_or_else(|_| {
            vm_bug!("monitor table exceeded u32 handle space");
        }));
        self.monitors.push(Monitor::default());
        id
    }

    /// Returns the monitor behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if the handle is dangling (host bug).
    #[must_use]
    pub fn monitor(&self, id: MonitorId) -> &Monitor {
        self.monitors
            .get(id.index())
            .unwrap_or_else(|| vm_bug!("dangling monitor handle #{}", id.index()))
    }

    fn monitor_mut(&mut self, id: MonitorId) -> &mut Monitor {
        self.monitors
            .get_mut(id.index())
            .unwrap_or_else(|| vm_bug!("dangling monitor handle #{}", id.index()))
    }
}

/// Result of releasing a monitor: the entry the lock was handed to, if any.
struct Handoff {
    thread: ThreadId,
    on_acquired: Option<AcquireCallback>,
}

impl Jvm {
    /// Attempts to enter `mon` on behalf of `tid`.
    ///
    /// Returns `true` if the lock was acquired synchronously (free or
    /// reentrant). Otherwise the thread is appended to the blocked queue,
    /// transitioned to BLOCKED on this monitor, and `false` is returned;
    /// `on_acquired` runs later, once the lock has been handed over and
    /// the thread made RUNNABLE.
    pub fn monitor_enter(
        &mut self,
        mon: MonitorId,
        tid: ThreadId,
        on_acquired: Option<AcquireCallback>,
    ) -> bool {
        let acquired = {
            let m = self.monitors.monitor_mut(mon);
            match m.owner {
                None => {
                    m.owner = Some(tid);
                    m.entry_count = 1;
                    true
                }
                Some(owner) if owner == tid => {
                    m.entry_count += 1;
                    true
                }
                Some(_) => {
                    m.blocked.push_back(BlockedEntry {
                        thread: tid,
                        restore_count: 1,
                        on_acquired,
                    });
                    false
                }
            }
        };
        if acquired {
            trace!(thread = tid.raw(), monitor = mon.index(), "monitor entered");
            true
        } else {
            trace!(thread = tid.raw(), monitor = mon.index(), "monitor contended");
            self.set_status(tid, ThreadStatus::Blocked, Some(mon));
            false
        }
    }

    /// Exits `mon` on behalf of `tid`, handing the lock to the next blocked
    /// thread on full release.
    ///
    /// # Panics
    ///
    /// Panics if `tid` does not own the monitor (host bug).
    pub fn monitor_exit(&mut self, mon: MonitorId, tid: ThreadId) {
        let handoff = {
            let m = self.monitors.monitor_mut(mon);
            if m.owner != Some(tid) {
                vm_bug!(
                    "monitor exit by thread {} which does not own monitor #{}",
                    tid.raw(),
                    mon.index()
                );
            }
            m.entry_count -= 1;
            if m.entry_count > 0 {
                None
            } else {
                m.owner = None;
                Self::appoint_next_owner(m)
            }
        };
        trace!(thread = tid.raw(), monitor = mon.index(), "monitor exited");
        self.complete_handoff(handoff);
    }

    /// Releases `mon` entirely and moves `tid` into its wait set.
    ///
    /// The thread transitions to WAITING (or TIMED_WAITING when `timed`) on
    /// this monitor. `on_wake` runs after the thread has been notified *and*
    /// re-acquired the lock — natives typically complete their own frame
    /// there via [`Jvm::async_return`].
    ///
    /// # Panics
    ///
    /// Panics if `tid` does not own the monitor (host bug).
    pub fn monitor_wait(
        &mut self,
        mon: MonitorId,
        tid: ThreadId,
        timed: bool,
        on_wake: Option<AcquireCallback>,
    ) {
        let handoff = {
            let m = self.monitors.monitor_mut(mon);
            if m.owner != Some(tid) {
                vm_bug!(
                    "monitor wait by thread {} which does not own monitor #{}",
                    tid.raw(),
                    mon.index()
                );
            }
            let restore_count = m.entry_count;
            m.owner = None;
            m.entry_count = 0;
            m.waiting.push(WaitingEntry {
                thread: tid,
                timed,
                restore_count,
                on_wake,
            });
            Self::appoint_next_owner(m)
        };
        trace!(
            thread = tid.raw(),
            monitor = mon.index(),
            timed,
            "monitor wait"
        );
        self.complete_handoff(handoff);
        let status = if timed {
            ThreadStatus::TimedWaiting
        } else {
            ThreadStatus::Waiting
        };
        self.set_status(tid, status, Some(mon));
    }

    /// Notifies one thread in `mon`'s wait set (FIFO).
    ///
    /// The notified thread moves to UNINTERRUPTABLY_BLOCKED and joins the
    /// blocked queue; it resumes once it re-acquires the lock.
    ///
    /// # Panics
    ///
    /// Panics if `tid` does not own the monitor (host bug).
    pub fn monitor_notify(&mut self, mon: MonitorId, tid: ThreadId) {
        self.assert_owner(mon, tid, "notify");
        if !self.monitors.monitor(mon).waiting.is_empty() {
            self.move_waiter_to_blocked(mon, 0);
        }
    }

    /// Notifies every thread in `mon`'s wait set.
    ///
    /// # Panics
    ///
    /// Panics if `tid` does not own the monitor (host bug).
    pub fn monitor_notify_all(&mut self, mon: MonitorId, tid: ThreadId) {
        self.assert_owner(mon, tid, "notifyAll");
        while !self.monitors.monitor(mon).waiting.is_empty() {
            self.move_waiter_to_blocked(mon, 0);
        }
    }

    /// Removes `target` from `mon`'s wait set ahead of any notify — the
    /// timeout/interrupt path driven by host timer code.
    ///
    /// No-op if the thread is not in the wait set.
    pub fn monitor_unwait(&mut self, mon: MonitorId, target: ThreadId) {
        let position = self
            .monitors
            .monitor(mon)
            .waiting
            .iter()
            .position(|e| e.thread == target);
        if let Some(at) = position {
            self.move_waiter_to_blocked(mon, at);
        }
    }

    /// Returns `true` if `t` is blocked on entry to `mon`.
    #[must_use]
    pub fn monitor_is_blocked(&self, mon: MonitorId, t: ThreadId) -> bool {
        self.monitors.monitor(mon).is_blocked(t)
    }

    /// Returns `true` if `t` is in `mon`'s wait set without a timeout.
    #[must_use]
    pub fn monitor_is_waiting(&self, mon: MonitorId, t: ThreadId) -> bool {
        self.monitors.monitor(mon).is_waiting(t)
    }

    /// Returns `true` if `t` is in `mon`'s wait set with a timeout.
    #[must_use]
    pub fn monitor_is_timed_waiting(&self, mon: MonitorId, t: ThreadId) -> bool {
        self.monitors.monitor(mon).is_timed_waiting(t)
    }

    fn assert_owner(&self, mon: MonitorId, tid: ThreadId, op: &str) {
        if self.monitors.monitor(mon).owner != Some(tid) {
            vm_bug!(
                "monitor {op} by thread {} which does not own monitor #{}",
                tid.raw(),
                mon.index()
            );
        }
    }

    /// Moves the waiter at `at` into the blocked queue in the
    /// UNINTERRUPTABLY_BLOCKED state.
    fn move_waiter_to_blocked(&mut self, mon: MonitorId, at: usize) {
        let (thread, acquire_now) = {
            let m = self.monitors.monitor_mut(mon);
            let w = m.waiting.remove(at);
            let thread = w.thread;
            m.blocked.push_back(BlockedEntry {
                thread,
                restore_count: w.restore_count,
                on_acquired: w.on_wake,
            });
            // A free monitor hands itself over immediately.
            (thread, m.owner.is_none())
        };
        trace!(thread = thread.raw(), monitor = mon.index(), "notified");
        self.set_status(thread, ThreadStatus::UninterruptablyBlocked, Some(mon));
        if acquire_now {
            let handoff = Self::appoint_next_owner(self.monitors.monitor_mut(mon));
            self.complete_handoff(handoff);
        }
    }

    /// Pops the next blocked thread and assigns it ownership. Caller runs
    /// the continuation and status transition via `complete_handoff`.
    fn appoint_next_owner(m: &mut Monitor) -> Option<Handoff> {
        m.blocked.pop_front().map(|e| {
            m.owner = Some(e.thread);
            m.entry_count = e.restore_count;
            Handoff {
                thread: e.thread,
                on_acquired: e.on_acquired,
            }
        })
    }

    fn complete_handoff(&mut self, handoff: Option<Handoff>) {
        if let Some(h) = handoff {
            trace!(thread = h.thread.raw(), "monitor handed off");
            // Status first: acquisition continuations may complete frames
            // via async_return, which requires a runnable thread.
            self.set_status(h.thread, ThreadStatus::Runnable, None);
            if let Some(cb) = h.on_acquired {
                cb(self);
            }
        }
    }
}
