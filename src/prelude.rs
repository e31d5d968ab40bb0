//! Convenient re-exports of the most commonly used types and traits.
//!
//! This module provides a curated selection of the most frequently used
//! types from across the crate, allowing for convenient glob imports:
//!
//! ```rust
//! use kona::prelude::*;
//!
//! let mut jvm = Jvm::new();
//! let tid = jvm.new_thread(jvm.bootstrap().thread);
//! assert_eq!(jvm.thread_status(tid), ThreadStatus::New);
//! ```

pub use crate::{
    error::{Error, Result},
    jvm::{BootstrapClasses, Jvm},
    runtime::{
        CatchType, ClassBuilder, ClassId, ClassState, MethodAccessFlags, MethodBuilder, MethodId,
        MonitorId, NativeFn, ObjRef, Opcode, Value,
    },
    threading::{
        FrameKind, MethodCallback, MethodResult, StackTraceEntry, ThreadId, ThreadStatus,
    },
};
