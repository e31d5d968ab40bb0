//! JVM threads: per-thread state, the status state machine, the dispatch
//! loop, and the runtime glue (`run_method`, `async_return`,
//! `throw_exception`).
//!
//! A [`JvmThread`] is passive data — a status, a call stack, an interrupt
//! flag, and the monitor it is suspended on. All behavior lives on
//! [`Jvm`], which owns every thread through the pool arena and re-borrows
//! per step; that breaks the thread ↔ pool reference cycle with integer
//! handles instead of shared ownership.

use tracing::{debug, error, trace};

use crate::{
    runtime::{
        class::ClassId,
        heap::ObjRef,
        method::MethodId,
        monitor::MonitorId,
        value::Value,
    },
    threading::{
        frame::{BytecodeFrame, InternalFrame, MethodCallback, NativeFrame, StackFrame,
            StackTraceEntry},
        status::ThreadStatus,
    },
    Jvm,
};

/// Handle to a thread in the pool arena. Doubles as the thread's stable
/// identity (`ref`) for park counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

impl ThreadId {
    /// Creates a handle from a raw arena index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        ThreadId(index)
    }

    /// The raw identity integer.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Raw arena index of this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// One logical JVM thread.
#[derive(Debug)]
pub struct JvmThread {
    /// Stable identity of this thread.
    pub(crate) id: ThreadId,
    /// Current execution status.
    pub(crate) status: ThreadStatus,
    /// Call stack, bottom first.
    pub(crate) stack: Vec<StackFrame>,
    /// Interrupt flag; checked only by explicit host/native code.
    pub(crate) interrupted: bool,
    /// Monitor the thread is suspended on. `Some` iff the status requires
    /// a monitor.
    pub(crate) monitor: Option<MonitorId>,
    /// The thread's `java/lang/Thread` class.
    pub(crate) cls: ClassId,
    /// The thread's own heap object, passed to uncaught-exception
    /// dispatch.
    pub(crate) obj: ObjRef,
}

impl JvmThread {
    pub(crate) fn new(id: ThreadId, cls: ClassId, obj: ObjRef) -> Self {
        JvmThread {
            id,
            status: ThreadStatus::New,
            stack: Vec::new(),
            interrupted: false,
            monitor: None,
            cls,
            obj,
        }
    }

    /// The thread's identity handle.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Current execution status.
    #[must_use]
    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    /// Current call stack depth.
    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// The interrupt flag.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// The monitor this thread is suspended on, if any.
    #[must_use]
    pub fn monitor_block(&self) -> Option<MonitorId> {
        self.monitor
    }

    /// The thread's own heap object.
    #[must_use]
    pub fn object(&self) -> ObjRef {
        self.obj
    }
}

impl Jvm {
    /// Transitions `tid` to `status`, enforcing the legality matrix and
    /// applying the post-transition scheduler notifications.
    ///
    /// Special rules:
    ///
    /// - Same-status transitions are no-ops (idempotent).
    /// - RUNNING → RUNNABLE is silently collapsed: a running thread need
    ///   not re-announce itself.
    /// - TERMINATED → RUNNABLE / ASYNC_WAITING resurrects through an
    ///   intermediate NEW that re-admits the thread to the pool.
    ///
    /// Entering BLOCKED, WAITING, TIMED_WAITING, or
    /// UNINTERRUPTABLY_BLOCKED requires `monitor`; entering any other
    /// state clears the stored monitor.
    ///
    /// # Panics
    ///
    /// Panics on an illegal transition or a missing monitor argument (host
    /// bugs).
    pub fn set_status(&mut self, tid: ThreadId, status: ThreadStatus, monitor: Option<MonitorId>) {
        let mut current = self.pool.thread(tid).status;
        if current == status {
            return;
        }
        if current == ThreadStatus::Running && status == ThreadStatus::Runnable {
            trace!(thread = tid.raw(), "RUNNABLE collapsed onto RUNNING");
            return;
        }

        // Resurrection: TERMINATED reaches RUNNABLE / ASYNC_WAITING through
        // an intermediate NEW. Done as a two-step loop, not recursion.
        if current == ThreadStatus::Terminated
            && matches!(
                status,
                ThreadStatus::New | ThreadStatus::Runnable | ThreadStatus::AsyncWaiting
            )
        {
            {
                let thread = self.pool.thread_mut(tid);
                thread.status = ThreadStatus::New;
                thread.monitor = None;
            }
            trace!(thread = tid.raw(), "resurrected: TERMINATED -> NEW");
            self.resurrect_thread(tid);
            if status == ThreadStatus::New {
                return;
            }
            current = ThreadStatus::New;
        }

        if !current.can_transition_to(status) {
            vm_bug!(
                "illegal thread status transition {current} -> {status} on {tid}"
            );
        }

        {
            let thread = self.pool.thread_mut(tid);
            if status.requires_monitor() {
                let mon = monitor.unwrap_or_else(|| {
                    vm_bug!("transition to {status} requires a monitor on {tid}")
                });
                thread.monitor = Some(mon);
            } else {
                thread.monitor = None;
            }
            thread.status = status;
        }
        trace!(thread = tid.raw(), from = %current, to = %status, "status transition");

        match status {
            ThreadStatus::Runnable => self.thread_runnable(tid),
            ThreadStatus::Running => self.run_thread(tid),
            ThreadStatus::Terminated => self.thread_terminated(tid),
            s if s.is_suspended() => self.thread_suspended(tid),
            _ => {}
        }
    }

    /// The dispatch loop: runs the top frame while the thread stays
    /// RUNNING, then terminates the thread once its stack is empty.
    pub(crate) fn run_thread(&mut self, tid: ThreadId) {
        loop {
            let thread = self.pool.thread(tid);
            if thread.status != ThreadStatus::Running || thread.stack.is_empty() {
                break;
            }
            self.run_top_frame(tid);
        }
        // An empty stack ends the thread — unless it suspended into a
        // state with no TERMINATED edge (a thread that parked after its
        // last frame completed terminates on its next quantum instead).
        let thread = self.pool.thread(tid);
        if thread.stack.is_empty() && thread.status.can_transition_to(ThreadStatus::Terminated) {
            self.set_status(tid, ThreadStatus::Terminated, None);
        }
    }

    /// Pushes an invocation of `method` with `args` (slot form) onto `tid`
    /// and makes the thread runnable.
    ///
    /// With `cb`, an internal continuation frame is pushed underneath so
    /// the host is notified when the invocation completes or throws.
    ///
    /// # Panics
    ///
    /// Panics when the thread status does not allow starting an invocation
    /// (allowed: NEW, RUNNING, RUNNABLE, ASYNC_WAITING, TERMINATED), when
    /// the method is abstract, or when a native method has no binding
    /// (host bugs).
    pub fn run_method(
        &mut self,
        tid: ThreadId,
        method: MethodId,
        args: Vec<Value>,
        cb: Option<MethodCallback>,
    ) {
        let status = self.pool.thread(tid).status;
        if !matches!(
            status,
            ThreadStatus::New
                | ThreadStatus::Running
                | ThreadStatus::Runnable
                | ThreadStatus::AsyncWaiting
                | ThreadStatus::Terminated
        ) {
            vm_bug!("run_method on {tid} in status {status}");
        }

        if let Some(cb) = cb {
            self.pool
                .thread_mut(tid)
                .stack
                .push(StackFrame::Internal(InternalFrame::new(cb)));
        }

        let (is_native, is_abstract, max_locals, cls) = {
            let m = self.loader.method(method);
            (m.is_native(), m.is_abstract(), m.max_locals, m.cls)
        };
        if is_abstract {
            let name = self.loader.class(cls).name.clone();
            vm_bug!(
                "cannot invoke abstract method {}",
                self.loader.method(method).full_signature(&name)
            );
        }

        let frame = if is_native {
            let class_name = self.loader.class(cls).name.clone();
            let native_fn = self
                .loader
                .method(method)
                .native_function(&class_name)
                .unwrap_or_else(|e| vm_bug!("{e}"));
            StackFrame::Native(NativeFrame {
                method,
                args: Some(args),
                native_fn,
            })
        } else {
            StackFrame::Bytecode(BytecodeFrame::new(method, max_locals, args))
        };
        debug!(thread = tid.raw(), method = method.index(), "invocation pushed");
        self.pool.thread_mut(tid).stack.push(frame);
        self.set_status(tid, ThreadStatus::Runnable, None);
    }

    /// Completes the top frame with a return value and resumes the caller.
    ///
    /// Used by native methods and by the interpreter's return opcodes.
    /// Two-slot returns (`J`, `D`) pass `(rv1, Some(Value::Null))`; the
    /// null filler is distinct from an absent second slot.
    ///
    /// # Panics
    ///
    /// Panics when the status does not allow returning (allowed: RUNNING,
    /// RUNNABLE, ASYNC_WAITING), when the stack is empty, or — in debug
    /// builds — when the value does not match the popped method's return
    /// descriptor (host bugs).
    pub fn async_return(&mut self, tid: ThreadId, rv1: Option<Value>, rv2: Option<Value>) {
        let status = self.pool.thread(tid).status;
        if !matches!(
            status,
            ThreadStatus::Running | ThreadStatus::Runnable | ThreadStatus::AsyncWaiting
        ) {
            vm_bug!("async_return on {tid} in status {status}");
        }

        let popped = self
            .pool
            .thread_mut(tid)
            .stack
            .pop()
            .unwrap_or_else(|| vm_bug!("async_return on {tid} with empty stack"));
        if let Some(method) = popped.method() {
            #[cfg(debug_assertions)]
            self.verify_return_value(method, rv1.as_ref(), rv2.as_ref());
            let _ = method;
        }
        trace!(thread = tid.raw(), "frame returned");

        if !self.pool.thread(tid).stack.is_empty() {
            self.frame_resume(tid, rv1, rv2);
        }
        self.set_status(tid, ThreadStatus::Runnable, None);
    }

    /// Throws `e` on `tid`, unwinding frames until one takes
    /// responsibility; uncaught exceptions go to
    /// `dispatchUncaughtException` on the thread's class.
    ///
    /// The thread is made RUNNABLE *before* the walk because a handler may
    /// itself need to suspend for catch-type resolution.
    ///
    /// # Panics
    ///
    /// Panics when the status does not allow throwing (allowed: RUNNING,
    /// RUNNABLE, ASYNC_WAITING) or the stack is empty (host bugs).
    pub fn throw_exception(&mut self, tid: ThreadId, e: Value) {
        let status = self.pool.thread(tid).status;
        if !matches!(
            status,
            ThreadStatus::Running | ThreadStatus::Runnable | ThreadStatus::AsyncWaiting
        ) {
            vm_bug!("throw_exception on {tid} in status {status}");
        }
        if self.pool.thread(tid).stack.is_empty() {
            vm_bug!("throw_exception on {tid} with empty stack");
        }
        debug!(thread = tid.raw(), "throwing exception");

        // An internal frame on top never handles its own throw.
        if matches!(
            self.pool.thread(tid).stack.last(),
            Some(StackFrame::Internal(_))
        ) {
            self.pool.thread_mut(tid).stack.pop();
        }

        self.set_status(tid, ThreadStatus::Runnable, None);

        while !self.pool.thread(tid).stack.is_empty() {
            if self.frame_catch(tid, e.clone()) {
                return;
            }
            self.pool.thread_mut(tid).stack.pop();
        }
        self.handle_uncaught_exception(tid, e);
    }

    /// Constructs an instance of `class_name` with
    /// `<init>(Ljava/lang/String;)V` and throws it on `tid`.
    ///
    /// If the class is not yet initialized the thread suspends
    /// (ASYNC_WAITING) while initialization is requested, then retries.
    ///
    /// # Panics
    ///
    /// Panics when `class_name` cannot be initialized at all or lacks the
    /// string constructor (host configuration bugs).
    pub fn throw_new_exception(&mut self, tid: ThreadId, class_name: &str, msg: &str) {
        if let Some(cls) = self.loader.get_initialized_class(class_name) {
            let obj = self.heap.alloc(cls);
            let msg_ref = self.intern_string(msg);
            let init = self
                .method_lookup(cls, "<init>(Ljava/lang/String;)V")
                .unwrap_or_else(|e| vm_bug!("{e}"));
            let exception = Value::Ref(obj);
            debug!(thread = tid.raw(), class = class_name, "constructing exception");
            self.run_method(
                tid,
                init,
                vec![exception.clone(), msg_ref],
                Some(Box::new(move |jvm: &mut Jvm, outcome| match outcome {
                    crate::threading::frame::MethodResult::Return(_) => {
                        jvm.throw_exception(tid, exception);
                    }
                    crate::threading::frame::MethodResult::Throw(err) => {
                        jvm.throw_exception(tid, err);
                    }
                })),
            );
        } else {
            self.set_status(tid, ThreadStatus::AsyncWaiting, None);
            let class_name = class_name.to_string();
            let msg = msg.to_string();
            self.initialize_class(
                tid,
                &class_name.clone(),
                Box::new(move |jvm: &mut Jvm, outcome| match outcome {
                    Ok(_) => jvm.throw_new_exception(tid, &class_name, &msg),
                    Err(e) => vm_bug!("cannot initialize exception class: {e}"),
                }),
            );
        }
    }

    /// Dispatches an uncaught exception to
    /// `dispatchUncaughtException(Ljava/lang/Throwable;)V` on the thread's
    /// class, invoked with `(self, e)`.
    pub(crate) fn handle_uncaught_exception(&mut self, tid: ThreadId, e: Value) {
        error!(thread = tid.raw(), "uncaught exception, dispatching");
        let (cls, this) = {
            let thread = self.pool.thread(tid);
            (thread.cls, Value::Ref(thread.obj))
        };
        let dispatch = self
            .method_lookup(cls, "dispatchUncaughtException(Ljava/lang/Throwable;)V")
            .unwrap_or_else(|err| vm_bug!("{err}"));
        self.run_method(tid, dispatch, vec![this, e], None);
    }

    /// Captures the thread's stack trace, bottom frame first. Internal
    /// frames are not language-visible and are skipped.
    #[must_use]
    pub fn stack_trace(&self, tid: ThreadId) -> Vec<StackTraceEntry> {
        self.pool
            .thread(tid)
            .stack
            .iter()
            .filter_map(StackFrame::stack_trace_frame)
            .collect()
    }

    /// The method of the top-most language-visible frame, if any.
    #[must_use]
    pub fn current_method(&self, tid: ThreadId) -> Option<MethodId> {
        self.pool
            .thread(tid)
            .stack
            .iter()
            .rev()
            .find_map(StackFrame::method)
    }

    /// Current status of `tid`.
    #[must_use]
    pub fn thread_status(&self, tid: ThreadId) -> ThreadStatus {
        self.pool.thread(tid).status
    }

    /// The interrupt flag of `tid`.
    #[must_use]
    pub fn is_interrupted(&self, tid: ThreadId) -> bool {
        self.pool.thread(tid).interrupted
    }

    /// Sets the interrupt flag of `tid`. The flag is passive: it is
    /// consulted only by explicit host/native code.
    pub fn set_interrupted(&mut self, tid: ThreadId, interrupted: bool) {
        self.pool.thread_mut(tid).interrupted = interrupted;
    }

    /// The monitor `tid` is suspended on, if any.
    #[must_use]
    pub fn monitor_block(&self, tid: ThreadId) -> Option<MonitorId> {
        self.pool.thread(tid).monitor
    }

    /// Validates `(rv1, rv2)` against the popped method's return
    /// descriptor. Debug builds only — this is a host-bug detector, not a
    /// JVM exception source.
    #[cfg(debug_assertions)]
    fn verify_return_value(&self, method: MethodId, rv1: Option<&Value>, rv2: Option<&Value>) {
        let m = self.loader.method(method);
        let descriptor = m.return_descriptor();
        let signature = m.signature();
        match descriptor {
            "V" => {
                if rv1.is_some() || rv2.is_some() {
                    vm_bug!("{signature}: void return carries a value");
                }
            }
            "J" | "D" => {
                // The second slot must be the null filler — present, not
                // merely absent.
                if rv2 != Some(&Value::Null) {
                    vm_bug!("{signature}: two-slot return lacks its null filler");
                }
                match (descriptor, rv1) {
                    ("J", Some(Value::Long(_))) | ("D", Some(Value::Double(_))) => {}
                    _ => vm_bug!("{signature}: two-slot return value has wrong type"),
                }
            }
            one_slot => {
                if rv2.is_some() {
                    vm_bug!("{signature}: single-slot return carries a second slot");
                }
                match (one_slot, rv1) {
                    ("Z", Some(Value::Int(v))) if *v == 0 || *v == 1 => {}
                    ("B", Some(Value::Int(v))) if i8::try_from(*v).is_ok() => {}
                    ("S", Some(Value::Int(v))) if i16::try_from(*v).is_ok() => {}
                    ("C", Some(Value::Int(v))) if (0..=0xFFFF).contains(v) => {}
                    ("I", Some(Value::Int(_))) | ("F", Some(Value::Float(_))) => {}
                    (reference, Some(Value::Null)) if Self::is_reference_descriptor(reference) => {}
                    (reference, Some(Value::Ref(r))) if Self::is_reference_descriptor(reference) => {
                        self.verify_reference_return(&signature, reference, *r);
                    }
                    _ => vm_bug!(
                        "{signature}: return value does not match descriptor {one_slot}"
                    ),
                }
            }
        }
    }

    #[cfg(debug_assertions)]
    fn is_reference_descriptor(descriptor: &str) -> bool {
        descriptor.starts_with('L') || descriptor.starts_with('[')
    }

    #[cfg(debug_assertions)]
    fn verify_reference_return(&self, signature: &str, descriptor: &str, r: ObjRef) {
        // Array classes are not modelled; any reference satisfies them.
        if descriptor.starts_with('[') {
            return;
        }
        let name = &descriptor[1..descriptor.len() - 1];
        let declared = match self.loader.get_resolved_class(name) {
            Some(cls) => cls,
            None => vm_bug!("{signature}: returns unresolved class {name}"),
        };
        let actual = self.heap.object(r).class;
        if !self.is_castable(actual, declared) {
            vm_bug!(
                "{signature}: returned instance of {} is not castable to {name}",
                self.loader.class(actual).name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        runtime::{opcode::Opcode, ClassBuilder, MethodBuilder},
        test::{collect_result, pumped},
    };

    use super::*;

    #[test]
    fn test_new_thread_starts_fresh() {
        let mut jvm = Jvm::new();
        let tid = jvm.new_thread(jvm.bootstrap().thread);
        assert_eq!(jvm.thread_status(tid), ThreadStatus::New);
        assert_eq!(jvm.stack_trace(tid).len(), 0);
        assert!(!jvm.is_interrupted(tid));
        assert!(jvm.monitor_block(tid).is_none());
    }

    #[test]
    fn test_run_method_returns_value_through_callback() {
        let mut jvm = Jvm::new();
        let object = jvm.bootstrap().object;
        let cls = ClassBuilder::new("demo/Answer")
            .extends(object)
            .method(
                MethodBuilder::new("get", "()I")
                    .code(vec![Opcode::Const(Value::Int(41)), Opcode::Const(Value::Int(1)),
                        Opcode::IAdd, Opcode::ReturnValue]),
            )
            .build(&mut jvm)
            .unwrap();
        let tid = jvm.new_thread(jvm.bootstrap().thread);
        let m = jvm.method_lookup(cls, "get()I").unwrap();

        let (result, cb) = collect_result();
        jvm.run_method(tid, m, vec![], Some(cb));
        jvm.run_until_idle();

        assert_eq!(
            *result.borrow(),
            Some(crate::threading::frame::MethodResult::Return(Some(Value::Int(42))))
        );
        assert_eq!(jvm.thread_status(tid), ThreadStatus::Terminated);
    }

    #[test]
    fn test_two_slot_return() {
        let mut jvm = Jvm::new();
        let object = jvm.bootstrap().object;
        let cls = ClassBuilder::new("demo/Wide")
            .extends(object)
            .method(
                MethodBuilder::new("get", "()J")
                    .code(vec![Opcode::Const(Value::Long(1 << 40)), Opcode::ReturnWide]),
            )
            .build(&mut jvm)
            .unwrap();
        let m = jvm.method_lookup(cls, "get()J").unwrap();
        let (jvm, result) = pumped(jvm, m, vec![]);
        assert_eq!(
            *result.borrow(),
            Some(crate::threading::frame::MethodResult::Return(Some(Value::Long(1 << 40))))
        );
        drop(jvm);
    }

    #[test]
    fn test_interrupt_flag_round_trip() {
        let mut jvm = Jvm::new();
        let tid = jvm.new_thread(jvm.bootstrap().thread);
        jvm.set_interrupted(tid, true);
        assert!(jvm.is_interrupted(tid));
        jvm.set_interrupted(tid, false);
        assert!(!jvm.is_interrupted(tid));
    }

    #[test]
    fn test_set_status_is_idempotent() {
        let mut jvm = Jvm::new();
        let tid = jvm.new_thread(jvm.bootstrap().thread);
        jvm.set_status(tid, ThreadStatus::AsyncWaiting, None);
        jvm.set_status(tid, ThreadStatus::AsyncWaiting, None);
        assert_eq!(jvm.thread_status(tid), ThreadStatus::AsyncWaiting);
    }

    #[test]
    #[should_panic(expected = "illegal thread status transition")]
    fn test_illegal_transition_is_fatal() {
        let mut jvm = Jvm::new();
        let tid = jvm.new_thread(jvm.bootstrap().thread);
        // NEW -> RUNNING is not a legal edge.
        jvm.set_status(tid, ThreadStatus::Running, None);
    }

    #[test]
    #[should_panic(expected = "requires a monitor")]
    fn test_blocked_without_monitor_is_fatal() {
        let mut jvm = Jvm::new();
        let object = jvm.bootstrap().object;
        // A native that blocks without naming a monitor: host bug.
        let cls = ClassBuilder::new("demo/BadNative")
            .extends(object)
            .method(MethodBuilder::new("block", "()V").native(std::rc::Rc::new(
                |jvm: &mut Jvm, tid, _args| {
                    jvm.set_status(tid, ThreadStatus::Blocked, None);
                    None
                },
            )))
            .build(&mut jvm)
            .unwrap();
        let m = jvm.method_lookup(cls, "block()V").unwrap();
        let tid = jvm.new_thread(jvm.bootstrap().thread);
        jvm.run_method(tid, m, vec![], None);
        jvm.run_until_idle();
    }

    #[test]
    fn test_current_method_skips_internal_frames() {
        let mut jvm = Jvm::new();
        let object = jvm.bootstrap().object;
        let cls = ClassBuilder::new("demo/Top")
            .extends(object)
            .method(MethodBuilder::new("spin", "()V").code(vec![Opcode::Return]))
            .build(&mut jvm)
            .unwrap();
        let m = jvm.method_lookup(cls, "spin()V").unwrap();
        let tid = jvm.new_thread(jvm.bootstrap().thread);
        jvm.run_method(tid, m, vec![], Some(Box::new(|_, _| {})));
        // Before any tick: stack is [internal, bytecode].
        assert_eq!(jvm.current_method(tid), Some(m));
        assert_eq!(jvm.stack_trace(tid).len(), 1);
    }
}
