// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # kona
//!
//! A cooperative, single-threaded JVM thread scheduler and bytecode
//! execution core, designed to be hosted inside an event-driven
//! environment. Built in pure Rust, `kona` provides the thread lifecycle,
//! the synchronized-method lock discipline, the exception unwinding
//! contract, the mid-operation suspension protocol for asynchronous class
//! resolution, and the cooperative scheduling of many logical threads onto
//! one executor.
//!
//! # Architecture
//!
//! The crate is organized into layers that work together to execute JVM
//! methods cooperatively:
//!
//! - **Threading core**: stack frames ([`StackFrame`]), the per-thread
//!   state machine ([`ThreadStatus`], [`JvmThread`]), and the pool
//!   scheduler ([`ThreadPool`])
//! - **Runtime model**: values, the managed heap, classes and methods,
//!   the bootstrap loader, monitors, and the instruction set
//! - **Host executor**: the single-threaded task queue every deferred
//!   action runs on ([`Jvm::tick`], [`Jvm::run_until_idle`])
//! - **Orchestrator**: [`Jvm`] owns every arena and exposes the whole
//!   public surface
//!
//! ## Key Components
//!
//! - [`Jvm`] - Main entry point owning all VM state
//! - [`Jvm::run_method`], [`Jvm::async_return`], [`Jvm::throw_exception`] -
//!   the runtime glue driving invocations
//! - [`ClassBuilder`] / [`MethodBuilder`] - class registration
//! - [`crate::prelude`] - Convenient re-exports of commonly used types
//! - [`Error`] and [`Result`] - Error handling for the collaborator
//!   surface
//!
//! # Execution Model
//!
//! Execution is **single-threaded cooperative**: exactly one thread is
//! RUNNING at any instant, the interpreter's inner loop is synchronous,
//! and yielding is cooperative — it occurs only at designated suspension
//! points (method invocation, blocking monitor entry, returns, throws,
//! asynchronous class resolution, and explicit status transitions).
//! Scheduling decisions are deferred to the next executor tick, which
//! bounds recursion and lets pending asynchronous callbacks complete
//! between thread quanta.
//!
//! # Usage Example
//!
//! ```rust
//! use kona::prelude::*;
//!
//! let mut jvm = Jvm::new();
//! let object = jvm.bootstrap().object;
//!
//! // Register a class with one method that computes 6 * 7.
//! let cls = ClassBuilder::new("demo/Main")
//!     .extends(object)
//!     .method(MethodBuilder::new("answer", "()I").code(vec![
//!         Opcode::Const(Value::Int(6)),
//!         Opcode::Const(Value::Int(7)),
//!         Opcode::IMul,
//!         Opcode::ReturnValue,
//!     ]))
//!     .build(&mut jvm)?;
//!
//! // Start a thread on it and pump the executor to quiescence.
//! let tid = jvm.new_thread(jvm.bootstrap().thread);
//! let method = jvm.method_lookup(cls, "answer()I")?;
//! jvm.run_method(tid, method, vec![], None);
//! jvm.run_until_idle();
//!
//! assert_eq!(jvm.thread_status(tid), ThreadStatus::Terminated);
//! # Ok::<(), kona::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Two distinct error planes are kept strictly apart:
//!
//! 1. **JVM exceptions** — `java/lang/Throwable` instances propagated by
//!    [`Jvm::throw_exception`] unwinding frames; uncaught exceptions are
//!    dispatched to `Thread.dispatchUncaughtException`.
//! 2. **Host-side invariant violations** — illegal status transitions,
//!    return-value mismatches, wrong-kind frames. These signal bugs in the
//!    embedding host and abort with a diagnostic; they are never surfaced
//!    as JVM exceptions.
//!
//! Recoverable collaborator failures (lookups, descriptor parsing) use
//! [`Error`] / [`Result`].
//!
//! # Thread Safety
//!
//! The VM is deliberately not [`std::marker::Send`] or
//! [`std::marker::Sync`]: all logical JVM threads are multiplexed onto one
//! host thread, so no internal locking exists anywhere in the core.

#[macro_use]
pub(crate) mod error;
pub(crate) mod executor;

/// Shared functionality which is used in unit tests.
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust
/// use kona::prelude::*;
///
/// let jvm = Jvm::new();
/// let _ = jvm.bootstrap().object;
/// ```
pub mod prelude;

/// The runtime collaborator model: values, heap, classes, methods, loader,
/// monitors, and the instruction set.
pub mod runtime;

/// The threading core: frames, threads, statuses, and the pool scheduler.
pub mod threading;

mod jvm;

pub use error::{Error, Result};
pub use jvm::{BootstrapClasses, Jvm};
pub use runtime::{
    CatchType, Class, ClassBuilder, ClassId, ClassState, ExceptionHandler, Heap, Method,
    MethodAccessFlags, MethodBuilder, MethodId, Monitor, MonitorId, NativeFn, ObjRef, Object,
    Opcode, Value,
};
pub use threading::{
    BytecodeFrame, FrameKind, JvmThread, MethodCallback, MethodResult, StackFrame,
    StackTraceEntry, ThreadId, ThreadPool, ThreadStatus,
};
