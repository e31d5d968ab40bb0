//! The central VM object owning every arena.
//!
//! [`Jvm`] is the single owner: the thread pool, the bootstrap class
//! loader (classes and methods), the managed heap, the monitor table, and
//! the host executor all live here. Every cross-reference in the system —
//! thread ↔ pool, frame → method → class → loader — is an integer handle
//! into one of these arenas, so there are no reference cycles and no
//! shared-ownership juggling anywhere in the core.

use std::rc::Rc;

use tracing::error;

use crate::{
    executor::Executor,
    runtime::{
        class::{Class, ClassId},
        heap::{Heap, ObjRef, Object},
        loader::{BootstrapClassLoader, ClassBuilder, MethodBuilder},
        method::{Method, MethodId, NativeFn},
        monitor::{Monitor, MonitorId, MonitorTable},
        value::Value,
    },
    threading::pool::ThreadPool,
};

/// Handles to the classes every VM registers at startup.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapClasses {
    /// `java/lang/Object`, the hierarchy root.
    pub object: ClassId,
    /// `java/lang/String`; instances back interned message strings.
    pub string: ClassId,
    /// `java/lang/Throwable` with `<init>(Ljava/lang/String;)V`.
    pub throwable: ClassId,
    /// `java/lang/Exception`.
    pub exception: ClassId,
    /// `java/lang/NullPointerException`, thrown by null-sensitive opcodes.
    pub null_pointer_exception: ClassId,
    /// `java/lang/Thread` with the default `dispatchUncaughtException`.
    pub thread: ClassId,
}

/// The JVM execution core.
///
/// Owns all state and exposes the whole public surface: thread admission
/// and scheduling ([`Jvm::new_thread`], [`Jvm::park`]…), the runtime glue
/// ([`Jvm::run_method`], [`Jvm::async_return`], [`Jvm::throw_exception`]),
/// class registration ([`ClassBuilder`]), and the executor pump
/// ([`Jvm::tick`], [`Jvm::run_until_idle`]).
///
/// # Example
///
/// ```rust
/// use kona::{ClassBuilder, Jvm, MethodBuilder, Opcode, ThreadStatus, Value};
///
/// let mut jvm = Jvm::new();
/// let object = jvm.bootstrap().object;
/// let cls = ClassBuilder::new("demo/Main")
///     .extends(object)
///     .method(
///         MethodBuilder::new("answer", "()I")
///             .code(vec![Opcode::Const(Value::Int(42)), Opcode::ReturnValue]),
///     )
///     .build(&mut jvm)
///     .unwrap();
///
/// let tid = jvm.new_thread(jvm.bootstrap().thread);
/// let method = jvm.method_lookup(cls, "answer()I").unwrap();
/// jvm.run_method(tid, method, vec![], None);
/// jvm.run_until_idle();
/// assert_eq!(jvm.thread_status(tid), ThreadStatus::Terminated);
/// ```
pub struct Jvm {
    pub(crate) pool: ThreadPool,
    pub(crate) loader: BootstrapClassLoader,
    pub(crate) heap: Heap,
    pub(crate) monitors: MonitorTable,
    pub(crate) executor: Executor,
    bootstrap: BootstrapClasses,
}

impl Jvm {
    /// Creates a VM with the bootstrap classes registered and initialized.
    #[must_use]
    pub fn new() -> Self {
        let placeholder = BootstrapClasses {
            object: ClassId::new(0),
            string: ClassId::new(0),
            throwable: ClassId::new(0),
            exception: ClassId::new(0),
            null_pointer_exception: ClassId::new(0),
            thread: ClassId::new(0),
        };
        let mut jvm = Jvm {
            pool: ThreadPool::new(),
            loader: BootstrapClassLoader::default(),
            heap: Heap::new(),
            monitors: MonitorTable::default(),
            executor: Executor::new(),
            bootstrap: placeholder,
        };

        let object = Self::must_register(&mut jvm, ClassBuilder::new("java/lang/Object"));
        let string =
            Self::must_register(&mut jvm, ClassBuilder::new("java/lang/String").extends(object));

        // Throwable stores its message during construction.
        let throwable_init: NativeFn = Rc::new(|jvm: &mut Jvm, _tid, args: Vec<Value>| {
            let this = args
                .first()
                .and_then(Value::as_ref)
                .unwrap_or_else(|| vm_bug!("Throwable.<init> without a receiver"));
            let msg = args.get(1).cloned().unwrap_or(Value::Null);
            jvm.heap
                .object_mut(this)
                .fields
                .insert("message".to_string(), msg);
            None
        });
        let throwable = Self::must_register(
            &mut jvm,
            ClassBuilder::new("java/lang/Throwable")
                .extends(object)
                .method(
                    MethodBuilder::new("<init>", "(Ljava/lang/String;)V")
                        .public()
                        .instance()
                        .native(throwable_init),
                ),
        );
        let exception = Self::must_register(
            &mut jvm,
            ClassBuilder::new("java/lang/Exception").extends(throwable),
        );
        let null_pointer_exception = Self::must_register(
            &mut jvm,
            ClassBuilder::new("java/lang/NullPointerException").extends(exception),
        );

        // The default uncaught handler logs and lets the thread die.
        let dispatch: NativeFn = Rc::new(|jvm: &mut Jvm, tid, args: Vec<Value>| {
            let throwable = args.get(1).cloned().unwrap_or(Value::Null);
            let detail = jvm.describe_throwable(&throwable);
            error!(thread = tid.raw(), exception = %detail, "uncaught exception");
            None
        });
        let thread = Self::must_register(
            &mut jvm,
            ClassBuilder::new("java/lang/Thread").extends(object).method(
                MethodBuilder::new("dispatchUncaughtException", "(Ljava/lang/Throwable;)V")
                    .public()
                    .instance()
                    .native(dispatch),
            ),
        );

        jvm.bootstrap = BootstrapClasses {
            object,
            string,
            throwable,
            exception,
            null_pointer_exception,
            thread,
        };
        jvm
    }

    fn must_register(jvm: &mut Jvm, builder: ClassBuilder) -> ClassId {
        builder
            .build(jvm)
            .unwrap_or_else(|e| vm_bug!("bootstrap class registration failed: {e}"))
    }

    /// Handles to the bootstrap classes.
    #[must_use]
    pub fn bootstrap(&self) -> BootstrapClasses {
        self.bootstrap
    }

    /// The bootstrap class loader.
    #[must_use]
    pub fn loader(&self) -> &BootstrapClassLoader {
        &self.loader
    }

    /// Returns the class behind `id`.
    #[must_use]
    pub fn class(&self, id: ClassId) -> &Class {
        self.loader.class(id)
    }

    /// Returns the method behind `id`.
    #[must_use]
    pub fn method(&self, id: MethodId) -> &Method {
        self.loader.method(id)
    }

    /// Returns the heap object behind `r`.
    #[must_use]
    pub fn object(&self, r: ObjRef) -> &Object {
        self.heap.object(r)
    }

    /// Returns the monitor behind `id`.
    #[must_use]
    pub fn monitor(&self, id: MonitorId) -> &Monitor {
        self.monitors.monitor(id)
    }

    /// Allocates a bare instance of `cls`.
    pub fn alloc_object(&mut self, cls: ClassId) -> ObjRef {
        self.heap.alloc(cls)
    }

    /// The monitor backing synchronized static methods of `cls`.
    #[must_use]
    pub fn class_monitor(&self, cls: ClassId) -> MonitorId {
        self.loader.class(cls).monitor
    }

    /// Returns the interned `java/lang/String` for `value`.
    pub fn intern_string(&mut self, value: &str) -> Value {
        Value::Ref(self.heap.intern_string(self.bootstrap.string, value))
    }

    /// The monitor of a heap object, created on first use.
    pub fn monitor_for_object(&mut self, r: ObjRef) -> MonitorId {
        if let Some(m) = self.heap.object(r).monitor {
            return m;
        }
        let m = self.monitors.create();
        self.heap.object_mut(r).monitor = Some(m);
        m
    }

    /// Renders a throwable as `Class: message` for diagnostics.
    #[must_use]
    pub fn describe_throwable(&self, e: &Value) -> String {
        match e {
            Value::Ref(r) => {
                let obj = self.heap.object(*r);
                let class_name = &self.loader.class(obj.class).name;
                match self.throwable_message_of(obj) {
                    Some(msg) => format!("{class_name}: {msg}"),
                    None => class_name.clone(),
                }
            }
            other => format!("{other}"),
        }
    }

    /// The `message` a throwable was constructed with, if any.
    #[must_use]
    pub fn throwable_message(&self, e: &Value) -> Option<String> {
        match e {
            Value::Ref(r) => self.throwable_message_of(self.heap.object(*r)),
            _ => None,
        }
    }

    fn throwable_message_of(&self, obj: &Object) -> Option<String> {
        match obj.fields.get("message") {
            Some(Value::Ref(m)) => self.heap.object(*m).string.clone(),
            _ => None,
        }
    }
}

impl Default for Jvm {
    fn default() -> Self {
        Jvm::new()
    }
}

impl std::fmt::Debug for Jvm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jvm")
            .field("threads", &self.pool)
            .field("heap_objects", &self.heap.len())
            .field("pending_tasks", &self.executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_hierarchy() {
        let jvm = Jvm::new();
        let b = jvm.bootstrap();
        assert!(jvm.is_castable(b.null_pointer_exception, b.exception));
        assert!(jvm.is_castable(b.null_pointer_exception, b.throwable));
        assert!(jvm.is_castable(b.exception, b.object));
        assert!(!jvm.is_castable(b.throwable, b.exception));
        assert!(!jvm.is_castable(b.string, b.throwable));
    }

    #[test]
    fn test_bootstrap_classes_are_initialized() {
        let jvm = Jvm::new();
        assert!(jvm.loader().get_initialized_class("java/lang/Object").is_some());
        assert!(jvm
            .loader()
            .get_initialized_class("java/lang/NullPointerException")
            .is_some());
        assert!(jvm.loader().get_initialized_class("java/lang/Thread").is_some());
    }

    #[test]
    fn test_intern_string_round_trip() {
        let mut jvm = Jvm::new();
        let s = jvm.intern_string("hello");
        match s {
            Value::Ref(r) => assert_eq!(jvm.object(r).string.as_deref(), Some("hello")),
            other => panic!("expected a reference, got {other}"),
        }
    }

    #[test]
    fn test_object_monitor_is_lazy_and_stable() {
        let mut jvm = Jvm::new();
        let cls = jvm.bootstrap().object;
        let obj = jvm.alloc_object(cls);
        assert!(jvm.object(obj).monitor.is_none());
        let a = jvm.monitor_for_object(obj);
        let b = jvm.monitor_for_object(obj);
        assert_eq!(a, b);
    }

    #[test]
    fn test_describe_throwable() {
        let mut jvm = Jvm::new();
        let npe = jvm.bootstrap().null_pointer_exception;
        let obj = jvm.alloc_object(npe);
        let msg = jvm.intern_string("was null");
        jvm.heap
            .object_mut(obj)
            .fields
            .insert("message".to_string(), msg);
        assert_eq!(
            jvm.describe_throwable(&Value::Ref(obj)),
            "java/lang/NullPointerException: was null"
        );
        assert_eq!(jvm.describe_throwable(&Value::Null), "null");
    }
}
