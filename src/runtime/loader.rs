//! The bootstrap class loader: class/method arenas, resolution state, and
//! asynchronous resolution/initialization.
//!
//! The loader owns every [`Class`] and [`Method`] for the lifetime of the
//! [`Jvm`]; the rest of the core refers to them through [`ClassId`] and
//! [`MethodId`] handles. Resolution and initialization are modelled as
//! host-asynchronous operations: the request is recorded and completed on
//! the *next executor tick*, mirroring a host that loads class data through
//! asynchronous I/O. Callers suspend the requesting thread (ASYNC_WAITING)
//! before requesting and resume it from the callback.
//!
//! Names whose resolution failed are remembered; the exception-handler scan
//! consults that memory to avoid re-requesting a name that can never
//! resolve.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::{
    runtime::{
        class::{Class, ClassId, ClassState},
        method::{descriptor_arg_slots, CatchType, ExceptionHandler, Method, MethodAccessFlags,
            MethodId, NativeFn},
        opcode::Opcode,
    },
    threading::ThreadId,
    Error, Jvm, Result,
};

/// Callback invoked when an asynchronous class resolution completes.
pub type ResolveCallback = Box<dyn FnOnce(&mut Jvm, Result<()>)>;

/// Callback invoked when an asynchronous class initialization completes.
pub type InitCallback = Box<dyn FnOnce(&mut Jvm, Result<ClassId>)>;

/// The bootstrap class loader and its arenas.
///
/// A single loader serves the whole VM; the per-method delegation chain of
/// a full JVM collapses onto it.
#[derive(Debug, Default)]
pub struct BootstrapClassLoader {
    pub(crate) classes: Vec<Class>,
    pub(crate) methods: Vec<Method>,
    by_name: FxHashMap<String, ClassId>,
    failed: FxHashSet<String>,
}

impl BootstrapClassLoader {
    /// Looks up a class by internal name regardless of state.
    #[must_use]
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    /// Returns the class id for `name` if the class is at least resolved.
    #[must_use]
    pub fn get_resolved_class(&self, name: &str) -> Option<ClassId> {
        self.find_class(name)
            .filter(|&id| self.class(id).is_resolved())
    }

    /// Returns the class id for `name` if the class is initialized.
    #[must_use]
    pub fn get_initialized_class(&self, name: &str) -> Option<ClassId> {
        self.find_class(name)
            .filter(|&id| self.class(id).is_initialized())
    }

    /// Returns `true` if resolving `name` has failed before.
    #[must_use]
    pub fn resolution_failed(&self, name: &str) -> bool {
        self.failed.contains(name)
    }

    /// Returns the class behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if the handle is dangling (host bug).
    #[must_use]
    pub fn class(&self, id: ClassId) -> &Class {
        self.classes
            .get(id.index())
            .unwrap_or_else(|| vm_bug!("dangling class handle #{}", id.index()))
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> &mut Class {
        self.classes
            .get_mut(id.index())
            .unwrap_or_else(|| vm_bug!("dangling class handle #{}", id.index()))
    }

    /// Returns the method behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if the handle is dangling (host bug).
    #[must_use]
    pub fn method(&self, id: MethodId) -> &Method {
        self.methods
            .get(id.index())
            .unwrap_or_else(|| vm_bug!("dangling method handle #{}", id.index()))
    }

    fn record_failure(&mut self, name: &str) {
        self.failed.insert(name.to_string());
    }
}

impl Jvm {
    /// Checks whether `from` is castable to `to` by walking the superclass
    /// chain.
    #[must_use]
    pub fn is_castable(&self, from: ClassId, to: ClassId) -> bool {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            if id == to {
                return true;
            }
            cursor = self.loader.class(id).super_class;
        }
        false
    }

    /// Finds a method by `name(descriptor)` signature on `cls` or its
    /// superclasses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] if no class in the chain declares
    /// a matching method.
    pub fn method_lookup(&self, cls: ClassId, signature: &str) -> Result<MethodId> {
        let mut cursor = Some(cls);
        while let Some(id) = cursor {
            let class = self.loader.class(id);
            for &m in &class.methods {
                if self.loader.method(m).signature() == signature {
                    return Ok(m);
                }
            }
            cursor = class.super_class;
        }
        Err(Error::MethodNotFound {
            signature: signature.to_string(),
            class_name: self.loader.class(cls).name.clone(),
        })
    }

    /// Requests asynchronous resolution of `names` on behalf of `tid`.
    ///
    /// Completion happens on the next executor tick: every registered name
    /// is flipped to at least [`ClassState::Resolved`]; if any name is
    /// unknown it is recorded as failed and the callback receives
    /// [`Error::ClassNotFound`] for the first such name. The caller is
    /// responsible for having suspended the thread (ASYNC_WAITING) before
    /// requesting.
    pub fn resolve_classes(&mut self, tid: ThreadId, names: Vec<String>, cb: ResolveCallback) {
        debug!(thread = tid.raw(), classes = ?names, "resolving classes");
        self.defer(Box::new(move |jvm: &mut Jvm| {
            let mut outcome: Result<()> = Ok(());
            for name in &names {
                match jvm.loader.find_class(name) {
                    Some(id) => {
                        let class = jvm.loader.class_mut(id);
                        if class.state < ClassState::Resolved {
                            class.state = ClassState::Resolved;
                            trace!(class = name.as_str(), "class resolved");
                        }
                    }
                    None => {
                        jvm.loader.record_failure(name);
                        debug!(class = name.as_str(), "class resolution failed");
                        if outcome.is_ok() {
                            outcome = Err(Error::ClassNotFound(name.clone()));
                        }
                    }
                }
            }
            cb(jvm, outcome);
        }));
    }

    /// Requests asynchronous initialization of `name` on behalf of `tid`.
    ///
    /// Completion happens on the next executor tick, resolving first if
    /// needed. Unknown names are recorded as failed and reported as
    /// [`Error::ClassNotFound`].
    pub fn initialize_class(&mut self, tid: ThreadId, name: &str, cb: InitCallback) {
        debug!(thread = tid.raw(), class = name, "initializing class");
        let name = name.to_string();
        self.defer(Box::new(move |jvm: &mut Jvm| {
            let outcome = match jvm.loader.find_class(&name) {
                Some(id) => {
                    let class = jvm.loader.class_mut(id);
                    if class.state < ClassState::Initialized {
                        class.state = ClassState::Initialized;
                        trace!(class = name.as_str(), "class initialized");
                    }
                    Ok(id)
                }
                None => {
                    jvm.loader.record_failure(&name);
                    debug!(class = name.as_str(), "class initialization failed");
                    Err(Error::ClassNotFound(name.clone()))
                }
            };
            cb(jvm, outcome);
        }));
    }
}

/// Builder for registering a class with the bootstrap loader.
///
/// # Example
///
/// ```rust
/// use kona::{ClassBuilder, MethodBuilder, Opcode, Value};
///
/// let mut jvm = kona::Jvm::new();
/// let object = jvm.bootstrap().object;
/// let cls = ClassBuilder::new("demo/Answer")
///     .extends(object)
///     .initialized()
///     .method(
///         MethodBuilder::new("get", "()I")
///             .public()
///             .code(vec![Opcode::Const(Value::Int(42)), Opcode::ReturnValue]),
///     )
///     .build(&mut jvm)
///     .unwrap();
/// assert!(jvm.method_lookup(cls, "get()I").is_ok());
/// ```
#[derive(Debug)]
pub struct ClassBuilder {
    name: String,
    super_class: Option<ClassId>,
    state: ClassState,
    methods: Vec<MethodBuilder>,
}

impl ClassBuilder {
    /// Starts a builder for a class with the given internal name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            super_class: None,
            state: ClassState::Initialized,
            methods: Vec::new(),
        }
    }

    /// Sets the superclass.
    #[must_use]
    pub fn extends(mut self, super_class: ClassId) -> Self {
        self.super_class = Some(super_class);
        self
    }

    /// Registers the class in the `Registered` (unresolved) state.
    #[must_use]
    pub fn registered(mut self) -> Self {
        self.state = ClassState::Registered;
        self
    }

    /// Registers the class in the `Resolved` state.
    #[must_use]
    pub fn resolved(mut self) -> Self {
        self.state = ClassState::Resolved;
        self
    }

    /// Registers the class in the `Initialized` state (the default).
    #[must_use]
    pub fn initialized(mut self) -> Self {
        self.state = ClassState::Initialized;
        self
    }

    /// Adds a method to the class.
    #[must_use]
    pub fn method(mut self, method: MethodBuilder) -> Self {
        self.methods.push(method);
        self
    }

    /// Registers the class and its methods with the VM.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateClass`] if the name is taken, or
    /// [`Error::MalformedDescriptor`] if a method descriptor fails to
    /// parse.
    pub fn build(self, jvm: &mut Jvm) -> Result<ClassId> {
        if jvm.loader.by_name.contains_key(&self.name) {
            return Err(Error::DuplicateClass(self.name));
        }
        let monitor = jvm.monitors.create();
        let cls = ClassId::new(u32::try_from(jvm.loader.classes.len()).unwrap_or_else(|_| {
            vm_bug!("class arena exceeded u32 handle space");
        }));
        jvm.loader.classes.push(Class {
            name: self.name.clone(),
            super_class: self.super_class,
            methods: Vec::new(),
            state: self.state,
            monitor,
        });
        jvm.loader.by_name.insert(self.name.clone(), cls);

        for mb in self.methods {
            let arg_slots = descriptor_arg_slots(&mb.descriptor)?;
            let id = MethodId::new(u32::try_from(jvm.loader.methods.len()).unwrap_or_else(
                |_| {
                    vm_bug!("method arena exceeded u32 handle space");
                },
            ));
            jvm.loader.methods.push(Method {
                name: mb.name,
                descriptor: mb.descriptor,
                access: mb.access,
                cls,
                max_locals: mb.max_locals,
                code: mb.code,
                exception_handlers: mb.exception_handlers,
                arg_slots,
                native: mb.native,
            });
            jvm.loader.class_mut(cls).methods.push(id);
        }
        debug!(class = self.name.as_str(), state = ?self.state, "class registered");
        Ok(cls)
    }
}

/// Builder for a method within a [`ClassBuilder`].
pub struct MethodBuilder {
    name: String,
    descriptor: String,
    access: MethodAccessFlags,
    max_locals: u16,
    code: Vec<Opcode>,
    exception_handlers: Vec<ExceptionHandler>,
    native: Option<NativeFn>,
}

impl MethodBuilder {
    /// Starts a builder for a method with the given name and descriptor.
    ///
    /// Methods default to `STATIC` with `max_locals` sized for the
    /// argument slots.
    #[must_use]
    pub fn new(name: &str, descriptor: &str) -> Self {
        MethodBuilder {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: MethodAccessFlags::STATIC,
            max_locals: 8,
            code: Vec::new(),
            exception_handlers: Vec::new(),
            native: None,
        }
    }

    /// Adds the `PUBLIC` flag.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.access |= MethodAccessFlags::PUBLIC;
        self
    }

    /// Makes the method an instance method (drops the default `STATIC`).
    #[must_use]
    pub fn instance(mut self) -> Self {
        self.access &= !MethodAccessFlags::STATIC;
        self
    }

    /// Adds the `SYNCHRONIZED` flag.
    #[must_use]
    pub fn synchronized(mut self) -> Self {
        self.access |= MethodAccessFlags::SYNCHRONIZED;
        self
    }

    /// Adds the `ABSTRACT` flag.
    #[must_use]
    pub fn abstract_(mut self) -> Self {
        self.access |= MethodAccessFlags::ABSTRACT;
        self
    }

    /// Sets the size of the frame's local variable array.
    #[must_use]
    pub fn max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = max_locals;
        self
    }

    /// Sets the bytecode.
    #[must_use]
    pub fn code(mut self, code: Vec<Opcode>) -> Self {
        self.code = code;
        self
    }

    /// Appends an exception handler covering `[start_pc, end_pc)`.
    #[must_use]
    pub fn handler(mut self, start_pc: u32, end_pc: u32, handler_pc: u32, catch: CatchType) -> Self {
        self.exception_handlers.push(ExceptionHandler {
            start_pc,
            end_pc,
            handler_pc,
            catch_type: catch,
        });
        self
    }

    /// Binds a native function, adding the `NATIVE` flag.
    #[must_use]
    pub fn native(mut self, f: NativeFn) -> Self {
        self.access |= MethodAccessFlags::NATIVE;
        self.native = Some(f);
        self
    }
}

impl std::fmt::Debug for MethodBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodBuilder")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("access", &self.access)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut jvm = Jvm::new();
        let object = jvm.bootstrap().object;
        let cls = ClassBuilder::new("demo/Widget")
            .extends(object)
            .method(MethodBuilder::new("run", "()V").code(vec![Opcode::Return]))
            .build(&mut jvm)
            .unwrap();

        assert_eq!(jvm.loader.get_initialized_class("demo/Widget"), Some(cls));
        let m = jvm.method_lookup(cls, "run()V").unwrap();
        assert_eq!(jvm.loader.method(m).signature(), "run()V");
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut jvm = Jvm::new();
        let object = jvm.bootstrap().object;
        ClassBuilder::new("demo/Dup")
            .extends(object)
            .build(&mut jvm)
            .unwrap();
        let err = ClassBuilder::new("demo/Dup")
            .extends(object)
            .build(&mut jvm)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateClass(_)));
    }

    #[test]
    fn test_method_lookup_walks_superclasses() {
        let mut jvm = Jvm::new();
        let throwable = jvm.bootstrap().throwable;
        let cls = ClassBuilder::new("demo/Oops")
            .extends(throwable)
            .build(&mut jvm)
            .unwrap();
        // <init>(Ljava/lang/String;)V is declared on java/lang/Throwable.
        assert!(jvm.method_lookup(cls, "<init>(Ljava/lang/String;)V").is_ok());
    }

    #[test]
    fn test_registered_class_is_not_resolved() {
        let mut jvm = Jvm::new();
        let object = jvm.bootstrap().object;
        ClassBuilder::new("demo/Slow")
            .extends(object)
            .registered()
            .build(&mut jvm)
            .unwrap();
        assert!(jvm.loader.get_resolved_class("demo/Slow").is_none());
        assert!(jvm.loader.find_class("demo/Slow").is_some());
    }

    #[test]
    fn test_resolve_classes_flips_state_on_tick() {
        let mut jvm = Jvm::new();
        let object = jvm.bootstrap().object;
        ClassBuilder::new("demo/Slow")
            .extends(object)
            .registered()
            .build(&mut jvm)
            .unwrap();

        let tid = jvm.new_thread(jvm.bootstrap().thread);
        jvm.resolve_classes(tid, vec!["demo/Slow".to_string()], Box::new(|_, r| {
            assert!(r.is_ok());
        }));
        // Deferred: nothing happens until the tick runs.
        assert!(jvm.loader.get_resolved_class("demo/Slow").is_none());
        jvm.run_until_idle();
        assert!(jvm.loader.get_resolved_class("demo/Slow").is_some());
    }

    #[test]
    fn test_resolution_failure_is_remembered() {
        let mut jvm = Jvm::new();
        let tid = jvm.new_thread(jvm.bootstrap().thread);
        jvm.resolve_classes(tid, vec!["demo/Ghost".to_string()], Box::new(|_, r| {
            assert!(matches!(r, Err(Error::ClassNotFound(_))));
        }));
        jvm.run_until_idle();
        assert!(jvm.loader.resolution_failed("demo/Ghost"));
    }
}
