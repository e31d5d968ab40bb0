//! Thread status values and the legal transition matrix.

use strum::EnumIter;

/// Execution status of a JVM thread.
///
/// Exactly one thread is `Running` at any instant; every other live thread
/// is either waiting for the scheduler (`Runnable`) or suspended in one of
/// the parked/blocked/waiting states. Transitions go through
/// [`crate::Jvm::set_status`], which enforces the legality matrix below and
/// performs the post-transition scheduler notifications.
///
/// # Legal transitions
///
/// ```text
/// NEW            → RUNNABLE, ASYNC_WAITING
/// RUNNING        → RUNNABLE (collapsed: stays RUNNING), TERMINATED,
///                  BLOCKED, WAITING, TIMED_WAITING,
///                  ASYNC_WAITING, PARKED
/// RUNNABLE       → ASYNC_WAITING, RUNNABLE (self), RUNNING
/// ASYNC_WAITING  → RUNNABLE, TERMINATED
/// WAITING        → UNINTERRUPTABLY_BLOCKED, RUNNABLE
/// TIMED_WAITING  → UNINTERRUPTABLY_BLOCKED, RUNNABLE
/// BLOCKED        → RUNNABLE
/// PARKED         → RUNNABLE
/// UNINTERRUPTABLY_BLOCKED → RUNNABLE
/// TERMINATED     → NEW (resurrection), RUNNABLE or
///                  ASYNC_WAITING (via intermediate NEW)
/// ```
///
/// Every other transition is a host bug and fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ThreadStatus {
    /// Created, never scheduled.
    New,
    /// Ready to run; waiting for the scheduler.
    Runnable,
    /// Currently executing on the host executor.
    Running,
    /// Suspended on monitor entry.
    Blocked,
    /// Suspended in a monitor wait set, no timeout.
    Waiting,
    /// Suspended in a monitor wait set with a timeout.
    TimedWaiting,
    /// Re-acquiring a monitor after wait; not interruptible.
    UninterruptablyBlocked,
    /// Suspended awaiting an external continuation (class resolution,
    /// native I/O). Distinct from blocking on a monitor.
    AsyncWaiting,
    /// Suspended by the park counter.
    Parked,
    /// Finished; removed from the pool's runnable set. May be resurrected.
    Terminated,
}

impl ThreadStatus {
    /// Returns `true` for states that suspend the thread off the scheduler.
    #[must_use]
    pub fn is_suspended(self) -> bool {
        matches!(
            self,
            ThreadStatus::Blocked
                | ThreadStatus::Waiting
                | ThreadStatus::TimedWaiting
                | ThreadStatus::UninterruptablyBlocked
                | ThreadStatus::AsyncWaiting
                | ThreadStatus::Parked
        )
    }

    /// Returns `true` for states that must carry a monitor reference.
    #[must_use]
    pub fn requires_monitor(self) -> bool {
        matches!(
            self,
            ThreadStatus::Blocked
                | ThreadStatus::Waiting
                | ThreadStatus::TimedWaiting
                | ThreadStatus::UninterruptablyBlocked
        )
    }

    /// Returns `true` if a single-step transition from `self` to `to` is
    /// legal.
    ///
    /// The multi-step resurrection path (TERMINATED → NEW → target) and the
    /// RUNNING → RUNNABLE collapse are handled by
    /// [`crate::Jvm::set_status`] before this check.
    #[must_use]
    pub fn can_transition_to(self, to: ThreadStatus) -> bool {
        use ThreadStatus::{
            AsyncWaiting, Blocked, New, Parked, Runnable, Running, Terminated, TimedWaiting,
            UninterruptablyBlocked, Waiting,
        };
        match self {
            New => matches!(to, Runnable | AsyncWaiting),
            Running => matches!(
                to,
                Runnable
                    | Terminated
                    | Blocked
                    | Waiting
                    | TimedWaiting
                    | AsyncWaiting
                    | Parked
            ),
            Runnable => matches!(to, AsyncWaiting | Runnable | Running),
            AsyncWaiting => matches!(to, Runnable | Terminated),
            Waiting | TimedWaiting => matches!(to, UninterruptablyBlocked | Runnable),
            Blocked | Parked | UninterruptablyBlocked => matches!(to, Runnable),
            Terminated => matches!(to, New),
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ThreadStatus::New => "NEW",
            ThreadStatus::Runnable => "RUNNABLE",
            ThreadStatus::Running => "RUNNING",
            ThreadStatus::Blocked => "BLOCKED",
            ThreadStatus::Waiting => "WAITING",
            ThreadStatus::TimedWaiting => "TIMED_WAITING",
            ThreadStatus::UninterruptablyBlocked => "UNINTERRUPTABLY_BLOCKED",
            ThreadStatus::AsyncWaiting => "ASYNC_WAITING",
            ThreadStatus::Parked => "PARKED",
            ThreadStatus::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_monitor_states_are_suspended() {
        for status in ThreadStatus::iter() {
            if status.requires_monitor() {
                assert!(status.is_suspended(), "{status} requires monitor but is not suspended");
            }
        }
    }

    #[test]
    fn test_every_suspended_state_reaches_runnable() {
        for status in ThreadStatus::iter() {
            if status.is_suspended() {
                assert!(
                    status.can_transition_to(ThreadStatus::Runnable),
                    "{status} cannot reach RUNNABLE"
                );
            }
        }
    }

    #[test]
    fn test_transition_matrix_spot_checks() {
        use ThreadStatus::*;
        assert!(New.can_transition_to(Runnable));
        assert!(New.can_transition_to(AsyncWaiting));
        assert!(!New.can_transition_to(Running));
        assert!(Runnable.can_transition_to(Running));
        assert!(!Runnable.can_transition_to(Blocked));
        assert!(Running.can_transition_to(Parked));
        assert!(!Running.can_transition_to(UninterruptablyBlocked));
        assert!(Waiting.can_transition_to(UninterruptablyBlocked));
        assert!(TimedWaiting.can_transition_to(UninterruptablyBlocked));
        assert!(!Blocked.can_transition_to(Waiting));
        assert!(Terminated.can_transition_to(New));
        assert!(!Terminated.can_transition_to(Running));
    }

    #[test]
    fn test_transition_matrix_is_exactly_the_specified_set() {
        use ThreadStatus::*;
        let legal: &[(ThreadStatus, ThreadStatus)] = &[
            (New, Runnable),
            (New, AsyncWaiting),
            (Running, Runnable),
            (Running, Terminated),
            (Running, Blocked),
            (Running, Waiting),
            (Running, TimedWaiting),
            (Running, AsyncWaiting),
            (Running, Parked),
            (Runnable, AsyncWaiting),
            (Runnable, Runnable),
            (Runnable, Running),
            (AsyncWaiting, Runnable),
            (AsyncWaiting, Terminated),
            (Waiting, UninterruptablyBlocked),
            (Waiting, Runnable),
            (TimedWaiting, UninterruptablyBlocked),
            (TimedWaiting, Runnable),
            (Blocked, Runnable),
            (Parked, Runnable),
            (UninterruptablyBlocked, Runnable),
            (Terminated, New),
        ];
        for from in ThreadStatus::iter() {
            for to in ThreadStatus::iter() {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "edge {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_running_is_not_suspended() {
        assert!(!ThreadStatus::Running.is_suspended());
        assert!(!ThreadStatus::Runnable.is_suspended());
        assert!(!ThreadStatus::New.is_suspended());
        assert!(!ThreadStatus::Terminated.is_suspended());
    }
}
