//! The threading core: stack frames, the per-thread state machine, and the
//! pool scheduler.
//!
//! Execution is single-threaded cooperative — exactly one thread is RUNNING
//! at any instant, all logical threads share one host executor, and
//! yielding happens only at designated suspension points (opcodes that set
//! `return_to_thread_loop`, and transitions into non-RUNNING states).

pub mod frame;
pub mod pool;
pub mod status;
pub mod thread;

pub use frame::{
    BytecodeFrame, FrameKind, InternalFrame, MethodCallback, MethodResult, NativeFrame,
    StackFrame, StackTraceEntry,
};
pub use pool::{EmptyPoolCallback, ThreadPool};
pub use status::ThreadStatus;
pub use thread::{JvmThread, ThreadId};
