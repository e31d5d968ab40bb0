//! Stack frames: the discriminated activation record and its execution
//! engine.
//!
//! A frame is one of three variants:
//!
//! - **Bytecode** — drives the interpreter fetch-execute loop over a
//!   method's code array.
//! - **Native** — invokes a bound host function exactly once per
//!   activation.
//! - **Internal** — a continuation boundary returning control to host code
//!   that called [`Jvm::run_method`] with a callback.
//!
//! The sum type keeps per-variant state small and lets the dispatch site
//! branch once on the variant instead of virtual-dispatching in the hot
//! loop. Frames hold handles (`MethodId`, `ObjRef`) and never own
//! references into the VM; the execution methods live on [`Jvm`] and
//! re-borrow what they need each step.

use tracing::{debug, trace};

use crate::{
    runtime::{
        method::{CatchType, MethodId},
        monitor::MonitorId,
        value::Value,
        NativeFn,
    },
    threading::{status::ThreadStatus, thread::ThreadId},
    Jvm,
};

/// Outcome of a method invocation started with [`Jvm::run_method`],
/// delivered to the host callback by an internal frame.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    /// Normal completion; carries the first return slot, if any.
    Return(Option<Value>),
    /// The invocation threw; carries the throwable reference.
    Throw(Value),
}

/// Host continuation attached to an internal frame; invoked exactly once
/// with the invocation outcome.
pub type MethodCallback = Box<dyn FnOnce(&mut Jvm, MethodResult)>;

/// Discriminant of a [`StackFrame`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Interpreted bytecode activation.
    Bytecode,
    /// Native function activation.
    Native,
    /// Host continuation boundary.
    Internal,
}

/// One entry of a thread's stack trace.
///
/// The operand-stack and local snapshots are independent copies taken at
/// capture time; later execution does not affect them.
#[derive(Debug, Clone)]
pub struct StackTraceEntry {
    /// The frame's method.
    pub method: MethodId,
    /// Code index at capture time; `None` for native frames.
    pub pc: Option<u32>,
    /// Copy of the operand stack at capture time.
    pub stack: Vec<Value>,
    /// Copy of the local variable slots at capture time.
    pub locals: Vec<Value>,
}

/// An interpreted activation record.
#[derive(Debug)]
pub struct BytecodeFrame {
    /// The executing method.
    pub method: MethodId,
    /// Current code index. Points at a valid opcode start except while the
    /// frame is suspended mid-exception-resolution.
    pub pc: u32,
    /// Local variable slots, sized to the method's `max_locals`.
    pub locals: Vec<Value>,
    /// Operand stack slots.
    pub operand_stack: Vec<Value>,
    /// Set by opcodes that must yield control to the thread loop.
    pub return_to_thread_loop: bool,
    /// Whether this frame holds its synchronized method's monitor. Keeps
    /// re-entry after a nested call from re-acquiring.
    pub locked_method_lock: bool,
}

impl BytecodeFrame {
    /// Creates a frame for `method`, seeding locals with the argument
    /// slots.
    ///
    /// # Panics
    ///
    /// Panics if more argument slots are supplied than `max_locals` (host
    /// bug).
    #[must_use]
    pub fn new(method: MethodId, max_locals: u16, args: Vec<Value>) -> Self {
        if args.len() > usize::from(max_locals) {
            vm_bug!(
                "method frame with {} argument slots but max_locals {}",
                args.len(),
                max_locals
            );
        }
        let mut locals = args;
        locals.resize(usize::from(max_locals), Value::Null);
        BytecodeFrame {
            method,
            pc: 0,
            locals,
            operand_stack: Vec::new(),
            return_to_thread_loop: false,
            locked_method_lock: false,
        }
    }

    /// Returns the local slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of bounds (host bug).
    #[must_use]
    pub fn local(&self, index: u16) -> &Value {
        self.locals
            .get(usize::from(index))
            .unwrap_or_else(|| vm_bug!("local slot {index} out of bounds"))
    }

    /// Overwrites the local slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of bounds (host bug).
    pub fn set_local(&mut self, index: u16, value: Value) {
        let slot = self
            .locals
            .get_mut(usize::from(index))
            .unwrap_or_else(|| vm_bug!("local slot {index} out of bounds"));
        *slot = value;
    }

    /// Pops the top operand slot.
    ///
    /// # Panics
    ///
    /// Panics on an empty operand stack (host bug).
    pub fn pop_operand(&mut self) -> Value {
        self.operand_stack
            .pop()
            .unwrap_or_else(|| vm_bug!("pop from empty operand stack"))
    }
}

/// A native activation record. Single-use: running it twice is fatal.
pub struct NativeFrame {
    /// The native method.
    pub method: MethodId,
    /// Argument slots, consumed by the single run.
    pub(crate) args: Option<Vec<Value>>,
    /// Cached native binding, resolved when the frame was pushed.
    pub(crate) native_fn: NativeFn,
}

impl std::fmt::Debug for NativeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFrame")
            .field("method", &self.method)
            .field("consumed", &self.args.is_none())
            .finish()
    }
}

/// A continuation boundary frame.
///
/// Carries the host callback plus the one-shot payload stashed by
/// resume/exception scheduling before the frame runs.
pub struct InternalFrame {
    cb: MethodCallback,
    pending: Option<MethodResult>,
}

impl InternalFrame {
    /// Wraps a host callback into a frame.
    #[must_use]
    pub fn new(cb: MethodCallback) -> Self {
        InternalFrame { cb, pending: None }
    }
}

impl std::fmt::Debug for InternalFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalFrame")
            .field("pending", &self.pending)
            .finish()
    }
}

/// One activation record on a thread's call stack.
#[derive(Debug)]
pub enum StackFrame {
    /// Interpreted bytecode activation.
    Bytecode(BytecodeFrame),
    /// Native function activation.
    Native(NativeFrame),
    /// Host continuation boundary.
    Internal(InternalFrame),
}

impl StackFrame {
    /// The variant discriminant.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            StackFrame::Bytecode(_) => FrameKind::Bytecode,
            StackFrame::Native(_) => FrameKind::Native,
            StackFrame::Internal(_) => FrameKind::Internal,
        }
    }

    /// The frame's method; `None` for internal frames.
    #[must_use]
    pub fn method(&self) -> Option<MethodId> {
        match self {
            StackFrame::Bytecode(f) => Some(f.method),
            StackFrame::Native(f) => Some(f.method),
            StackFrame::Internal(_) => None,
        }
    }

    /// Stack-trace entry for this frame; `None` for internal frames, which
    /// are not language-visible.
    #[must_use]
    pub fn stack_trace_frame(&self) -> Option<StackTraceEntry> {
        match self {
            StackFrame::Bytecode(f) => Some(StackTraceEntry {
                method: f.method,
                pc: Some(f.pc),
                stack: f.operand_stack.clone(),
                locals: f.locals.clone(),
            }),
            StackFrame::Native(f) => Some(StackTraceEntry {
                method: f.method,
                pc: None,
                stack: Vec::new(),
                locals: Vec::new(),
            }),
            StackFrame::Internal(_) => None,
        }
    }
}

impl Jvm {
    /// Runs the top frame of `tid` once. Called by the thread dispatch loop
    /// while the thread is RUNNING.
    pub(crate) fn run_top_frame(&mut self, tid: ThreadId) {
        let kind = match self.pool.thread(tid).stack.last() {
            Some(frame) => frame.kind(),
            None => vm_bug!("dispatch on thread {} with empty stack", tid.raw()),
        };
        match kind {
            FrameKind::Bytecode => self.run_bytecode_frame(tid),
            FrameKind::Native => self.run_native_frame(tid),
            FrameKind::Internal => self.run_internal_frame(tid),
        }
    }

    /// The interpreter fetch-execute loop for the top bytecode frame.
    ///
    /// Entry actions: acquire the method lock of synchronized methods
    /// (suspension-capable — a blocked acquisition returns without
    /// executing an opcode or advancing `pc`), clear
    /// `return_to_thread_loop`, then fetch and execute opcodes until one
    /// yields.
    fn run_bytecode_frame(&mut self, tid: ThreadId) {
        let depth = self.pool.thread(tid).stack.len();
        let (method_id, locked) = match self.pool.thread(tid).stack.last() {
            Some(StackFrame::Bytecode(f)) => (f.method, f.locked_method_lock),
            _ => vm_bug!("run_bytecode_frame without a bytecode frame on top"),
        };

        if self.loader.method(method_id).is_synchronized() && !locked {
            let mon = self.method_lock(method_id, tid);
            let acquired = self.monitor_enter(
                mon,
                tid,
                Some(Box::new(move |jvm: &mut Jvm| {
                    // Acquired after blocking: mark the lock held so frame
                    // re-entry does not re-acquire.
                    if let Some(StackFrame::Bytecode(f)) =
                        jvm.pool.thread_mut(tid).stack.last_mut()
                    {
                        f.locked_method_lock = true;
                    }
                })),
            );
            if !acquired {
                return;
            }
            self.top_bytecode_frame_mut(tid).locked_method_lock = true;
        }

        self.top_bytecode_frame_mut(tid).return_to_thread_loop = false;

        loop {
            let op = {
                let thread = self.pool.thread(tid);
                if thread.status != ThreadStatus::Running || thread.stack.len() != depth {
                    break;
                }
                let Some(StackFrame::Bytecode(frame)) = thread.stack.last() else {
                    break;
                };
                if frame.return_to_thread_loop {
                    break;
                }
                let method = self.loader.method(frame.method);
                match method.code.get(frame.pc as usize) {
                    Some(op) => op.clone(),
                    None => vm_bug!(
                        "pc {} past end of {} bytecode",
                        frame.pc,
                        method.signature()
                    ),
                }
            };
            op.execute(self, tid);
        }
    }

    /// Runs the top native frame: converts the argument slots, invokes the
    /// bound function synchronously, and — unless the native suspended the
    /// thread or is no longer the current activation (it performed a nested
    /// call) — completes the frame with the adapted return value.
    fn run_native_frame(&mut self, tid: ThreadId) {
        let depth = self.pool.thread(tid).stack.len();
        let (method_id, args, native_fn) = match self.pool.thread_mut(tid).stack.last_mut() {
            Some(StackFrame::Native(f)) => {
                let args = f.args.take().unwrap_or_else(|| {
                    vm_bug!("native frame run twice for method #{}", f.method.index())
                });
                (f.method, args, f.native_fn.clone())
            }
            _ => vm_bug!("run_native_frame without a native frame on top"),
        };

        let class_name = {
            let method = self.loader.method(method_id);
            self.loader.class(method.cls).name.clone()
        };
        let signature = self.loader.method(method_id).full_signature(&class_name);
        trace!(thread = tid.raw(), method = %signature, "invoking native");
        let args = self.loader.method(method_id).convert_args(&class_name, args);
        let raw = native_fn(self, tid, args);

        let still_current = {
            let thread = self.pool.thread(tid);
            thread.status == ThreadStatus::Running
                && thread.stack.len() == depth
                && matches!(
                    thread.stack.last(),
                    Some(StackFrame::Native(f)) if f.method == method_id
                )
        };
        if still_current {
            match self.loader.method(method_id).return_descriptor() {
                "J" | "D" => self.async_return(tid, raw, Some(Value::Null)),
                "Z" => {
                    let adapted = raw.map(|v| match v {
                        Value::Int(x) => Value::Int(i32::from(x != 0)),
                        other => other,
                    });
                    self.async_return(tid, adapted, None);
                }
                _ => self.async_return(tid, raw, None),
            }
        }
    }

    /// Runs the top internal frame: pops it, suspends the thread into
    /// ASYNC_WAITING, and invokes the host callback with the stashed
    /// outcome.
    fn run_internal_frame(&mut self, tid: ThreadId) {
        let frame = self.pool.thread_mut(tid).stack.pop();
        let Some(StackFrame::Internal(frame)) = frame else {
            vm_bug!("run_internal_frame without an internal frame on top");
        };
        let pending = frame
            .pending
            .unwrap_or_else(|| vm_bug!("internal frame run with no scheduled outcome"));
        self.set_status(tid, ThreadStatus::AsyncWaiting, None);
        trace!(thread = tid.raw(), outcome = ?pending, "internal frame completing");
        (frame.cb)(self, pending);
    }

    /// Schedules a nested invocation's return value onto the top frame.
    ///
    /// Bytecode frames advance `pc` past the invoke instruction via the
    /// opcode's own `inc_pc`, then receive the return slots. Native frames
    /// ignore the resume (the nested return steps them off via
    /// [`Jvm::async_return`]). Internal frames stash the outcome for their
    /// run.
    pub(crate) fn frame_resume(&mut self, tid: ThreadId, rv1: Option<Value>, rv2: Option<Value>) {
        let thread = self.pool.thread_mut(tid);
        match thread.stack.last_mut() {
            Some(StackFrame::Bytecode(frame)) => {
                let op = self
                    .loader
                    .method(frame.method)
                    .code
                    .get(frame.pc as usize)
                    .cloned()
                    .unwrap_or_else(|| {
                        vm_bug!("resume at pc {} past end of bytecode", frame.pc)
                    });
                op.inc_pc(frame);
                if let Some(v) = rv1 {
                    frame.operand_stack.push(v);
                }
                if let Some(v) = rv2 {
                    frame.operand_stack.push(v);
                }
            }
            Some(StackFrame::Native(_)) => {}
            Some(StackFrame::Internal(frame)) => {
                // Internal callbacks receive a single value slot.
                frame.pending = Some(MethodResult::Return(rv1));
            }
            None => vm_bug!("resume on thread {} with empty stack", tid.raw()),
        }
    }

    /// Offers the exception `e` to the top frame. Returns `true` when the
    /// frame takes responsibility (handler found, resolution requested, or
    /// internal continuation claimed it), `false` to propagate to the
    /// caller frame.
    pub(crate) fn frame_catch(&mut self, tid: ThreadId, e: Value) -> bool {
        let kind = match self.pool.thread(tid).stack.last() {
            Some(frame) => frame.kind(),
            None => vm_bug!("exception offered to empty stack on thread {}", tid.raw()),
        };
        match kind {
            // Native frames do not catch bytecode-level exceptions.
            FrameKind::Native => false,
            FrameKind::Internal => {
                if let Some(StackFrame::Internal(frame)) =
                    self.pool.thread_mut(tid).stack.last_mut()
                {
                    frame.pending = Some(MethodResult::Throw(e));
                }
                true
            }
            FrameKind::Bytecode => self.bytecode_frame_catch(tid, e),
        }
    }

    /// Scans the exception table of the top bytecode frame for `e`.
    fn bytecode_frame_catch(&mut self, tid: ThreadId, e: Value) -> bool {
        enum Decision {
            Handler(u32),
            Resolve(Vec<String>),
            Propagate,
        }

        let (method_id, pc) = match self.pool.thread(tid).stack.last() {
            Some(StackFrame::Bytecode(f)) => (f.method, f.pc),
            _ => vm_bug!("bytecode exception scan without a bytecode frame"),
        };
        let exception_cls = match e {
            Value::Ref(r) => self.heap.object(r).class,
            ref other => vm_bug!("thrown value {other} is not an object reference"),
        };

        let decision = {
            let method = self.loader.method(method_id);
            let handlers = &method.exception_handlers;
            let mut decision = Decision::Propagate;
            for (i, handler) in handlers.iter().enumerate() {
                if !handler.covers(pc) {
                    continue;
                }
                match &handler.catch_type {
                    CatchType::Any => {
                        decision = Decision::Handler(handler.handler_pc);
                        break;
                    }
                    CatchType::Class(name) => {
                        if let Some(catch_cls) = self.loader.get_resolved_class(name) {
                            if self.is_castable(exception_cls, catch_cls) {
                                decision = Decision::Handler(handler.handler_pc);
                                break;
                            }
                        } else if self.loader.resolution_failed(name) {
                            // Terminal resolution failure: non-matching.
                        } else {
                            // Collect every unresolved catch type among the
                            // remaining covering handlers, then suspend for
                            // resolution.
                            let mut names: Vec<String> = Vec::new();
                            for later in &handlers[i..] {
                                if !later.covers(pc) {
                                    continue;
                                }
                                if let CatchType::Class(n) = &later.catch_type {
                                    if self.loader.get_resolved_class(n).is_none()
                                        && !self.loader.resolution_failed(n)
                                        && !names.contains(n)
                                    {
                                        names.push(n.clone());
                                    }
                                }
                            }
                            decision = Decision::Resolve(names);
                            break;
                        }
                    }
                }
            }
            decision
        };

        match decision {
            Decision::Handler(handler_pc) => {
                debug!(
                    thread = tid.raw(),
                    handler_pc,
                    "exception handler selected"
                );
                let frame = self.top_bytecode_frame_mut(tid);
                frame.operand_stack.clear();
                frame.operand_stack.push(e);
                frame.pc = handler_pc;
                true
            }
            Decision::Resolve(names) => {
                debug!(
                    thread = tid.raw(),
                    classes = ?names,
                    "suspending for catch-type resolution"
                );
                self.set_status(tid, ThreadStatus::AsyncWaiting, None);
                self.resolve_classes(
                    tid,
                    names,
                    Box::new(move |jvm: &mut Jvm, _outcome| {
                        // Re-throw regardless: resolved types now match or
                        // failed types scan as non-matching.
                        jvm.throw_exception(tid, e);
                    }),
                );
                true
            }
            Decision::Propagate => {
                let locked = match self.pool.thread(tid).stack.last() {
                    Some(StackFrame::Bytecode(f)) => f.locked_method_lock,
                    _ => false,
                };
                if locked {
                    let mon = self.method_lock(method_id, tid);
                    self.monitor_exit(mon, tid);
                }
                false
            }
        }
    }

    /// Releases the top bytecode frame's synchronized-method monitor if it
    /// is held. Used by return opcodes before completing the frame.
    pub(crate) fn release_method_lock(&mut self, tid: ThreadId) {
        let (method_id, locked) = match self.pool.thread(tid).stack.last() {
            Some(StackFrame::Bytecode(f)) => (f.method, f.locked_method_lock),
            _ => vm_bug!("method lock release without a bytecode frame on top"),
        };
        if locked {
            let mon = self.method_lock(method_id, tid);
            self.monitor_exit(mon, tid);
        }
    }

    /// The monitor guarding a synchronized method's entry: the class
    /// monitor for static methods, the receiver object's monitor
    /// otherwise.
    pub(crate) fn method_lock(&mut self, method_id: MethodId, tid: ThreadId) -> MonitorId {
        let (is_static, cls) = {
            let method = self.loader.method(method_id);
            (method.is_static(), method.cls)
        };
        if is_static {
            self.loader.class(cls).monitor
        } else {
            let receiver = match self.pool.thread(tid).stack.last() {
                Some(StackFrame::Bytecode(f)) => f.local(0).clone(),
                _ => vm_bug!("method lock of instance method without a bytecode frame"),
            };
            match receiver {
                Value::Ref(r) => self.monitor_for_object(r),
                other => vm_bug!("synchronized instance method with receiver {other}"),
            }
        }
    }

    /// Mutable access to the top frame, which must be a bytecode frame.
    pub(crate) fn top_bytecode_frame_mut(&mut self, tid: ThreadId) -> &mut BytecodeFrame {
        match self.pool.thread_mut(tid).stack.last_mut() {
            Some(StackFrame::Bytecode(f)) => f,
            _ => vm_bug!("expected a bytecode frame on top of thread {}", tid.raw()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytecode_frame_seeds_locals() {
        let frame = BytecodeFrame::new(MethodId::new(0), 4, vec![Value::Int(7), Value::Null]);
        assert_eq!(frame.locals.len(), 4);
        assert_eq!(*frame.local(0), Value::Int(7));
        assert_eq!(*frame.local(3), Value::Null);
        assert_eq!(frame.pc, 0);
        assert!(!frame.locked_method_lock);
    }

    #[test]
    #[should_panic(expected = "host invariant violation")]
    fn test_too_many_args_is_fatal() {
        let _ = BytecodeFrame::new(MethodId::new(0), 1, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_stack_trace_entry_is_a_snapshot() {
        let mut frame = BytecodeFrame::new(MethodId::new(0), 1, vec![Value::Int(1)]);
        frame.operand_stack.push(Value::Int(9));
        let wrapped = StackFrame::Bytecode(frame);
        let entry = wrapped.stack_trace_frame().unwrap();
        assert_eq!(entry.stack, vec![Value::Int(9)]);
        assert_eq!(entry.locals, vec![Value::Int(1)]);
        assert_eq!(entry.pc, Some(0));

        // Mutating the live frame must not affect the snapshot.
        let StackFrame::Bytecode(mut frame) = wrapped else {
            unreachable!()
        };
        frame.operand_stack.clear();
        assert_eq!(entry.stack, vec![Value::Int(9)]);
    }

    #[test]
    fn test_internal_frames_are_invisible_in_traces() {
        let frame = StackFrame::Internal(InternalFrame::new(Box::new(|_, _| {})));
        assert!(frame.stack_trace_frame().is_none());
        assert_eq!(frame.kind(), FrameKind::Internal);
        assert!(frame.method().is_none());
    }
}
