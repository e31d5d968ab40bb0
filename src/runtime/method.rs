//! Method representation: access flags, descriptors, exception tables, and
//! native bindings.
//!
//! This module defines the bitflags and supporting types used to represent
//! JVM methods as consumed by the execution core: the access flags that
//! drive frame selection (`NATIVE`), lock discipline (`SYNCHRONIZED`, and
//! `STATIC` for choosing the class monitor), and invocation legality
//! (`ABSTRACT`), plus the per-method exception handler table scanned during
//! unwinding.

use std::rc::Rc;

use bitflags::bitflags;

use crate::{
    runtime::{class::ClassId, opcode::Opcode, value::Value},
    threading::ThreadId,
    Error, Jvm, Result,
};

bitflags! {
    /// Method access and property flags, using the class-file bit values.
    ///
    /// Only the flags the execution core consults are represented; the
    /// remaining class-file bits are accepted and ignored by
    /// [`MethodAccessFlags::from_bits_truncate`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAccessFlags: u16 {
        /// Declared `public`; may be accessed from outside its package.
        const PUBLIC = 0x0001;
        /// Declared `private`; accessible only within the defining class.
        const PRIVATE = 0x0002;
        /// Declared `protected`; may be accessed within subclasses.
        const PROTECTED = 0x0004;
        /// Declared `static`; the method lock is the class monitor.
        const STATIC = 0x0008;
        /// Declared `final`; must not be overridden.
        const FINAL = 0x0010;
        /// Declared `synchronized`; entry acquires the method lock.
        const SYNCHRONIZED = 0x0020;
        /// Declared `native`; runs a bound host function instead of bytecode.
        const NATIVE = 0x0100;
        /// Declared `abstract`; has no implementation and cannot be run.
        const ABSTRACT = 0x0400;
    }
}

/// The catch type of an exception handler entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchType {
    /// Catches every throwable (`finally` in source form).
    Any,
    /// Catches throwables castable to the named class.
    ///
    /// The name is in internal form, e.g. `java/lang/Exception`. The class
    /// may be unresolved at scan time, in which case the scan suspends the
    /// thread and requests asynchronous resolution.
    Class(String),
}

/// Exception handler defining a protected region within a method.
///
/// Handlers are scanned in declaration order; the first entry whose range
/// covers the faulting `pc` and whose catch type matches the thrown object
/// wins.
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    /// Start of the protected region (inclusive), as a code index.
    pub start_pc: u32,
    /// End of the protected region (exclusive), as a code index.
    pub end_pc: u32,
    /// Code index the frame resumes at when this handler is selected.
    pub handler_pc: u32,
    /// What this handler catches.
    pub catch_type: CatchType,
}

impl ExceptionHandler {
    /// Returns `true` if the protected region covers `pc`.
    #[must_use]
    pub fn covers(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

/// A host function bound to a `native` method.
///
/// Invoked synchronously with the calling thread and the argument slots.
/// The returned value is the *raw* return value; the native frame adapts it
/// to the method's return descriptor before handing it to
/// [`Jvm::async_return`]. A native that suspends the thread (or performs a
/// nested call through [`Jvm::run_method`] with a callback) returns `None`
/// and completes its own frame later.
pub type NativeFn = Rc<dyn Fn(&mut Jvm, ThreadId, Vec<Value>) -> Option<Value>>;

/// Handle to a method in the loader arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

impl MethodId {
    /// Creates a handle from a raw arena index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        MethodId(index)
    }

    /// Raw arena index of this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A JVM method as consumed by the execution core.
///
/// Methods are owned by the loader arena and referenced by [`MethodId`]
/// handles. Bytecode methods carry a code array and an exception table;
/// native methods carry a bound [`NativeFn`].
pub struct Method {
    /// Simple name, e.g. `tick` or `<init>`.
    pub name: String,
    /// JVM method descriptor, e.g. `(Ljava/lang/String;)V`.
    pub descriptor: String,
    /// Access and property flags.
    pub access: MethodAccessFlags,
    /// Defining class.
    pub cls: ClassId,
    /// Size of the local variable array of a frame for this method.
    pub max_locals: u16,
    /// Bytecode, one [`Opcode`] per code index.
    pub code: Vec<Opcode>,
    /// Exception handler table in declaration order.
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Number of argument slots (category-2 arguments count twice).
    pub(crate) arg_slots: usize,
    /// Bound native function for `NATIVE` methods.
    pub(crate) native: Option<NativeFn>,
}

impl Method {
    /// Returns `true` for `native` methods.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.access.contains(MethodAccessFlags::NATIVE)
    }

    /// Returns `true` for `abstract` methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access.contains(MethodAccessFlags::ABSTRACT)
    }

    /// Returns `true` for `synchronized` methods.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.access.contains(MethodAccessFlags::SYNCHRONIZED)
    }

    /// Returns `true` for `static` methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccessFlags::STATIC)
    }

    /// The `name(descriptor)` signature used for method lookup.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }

    /// The return portion of the descriptor (after the closing `)`).
    #[must_use]
    pub fn return_descriptor(&self) -> &str {
        match self.descriptor.find(')') {
            Some(at) => &self.descriptor[at + 1..],
            None => vm_bug!("descriptor without ')': {}", self.descriptor),
        }
    }

    /// Number of argument slots this method receives, not counting the
    /// receiver of instance methods.
    #[must_use]
    pub fn arg_slots(&self) -> usize {
        self.arg_slots
    }

    /// Total slots a caller must supply: [`Method::arg_slots`] plus one for
    /// the receiver of instance methods.
    #[must_use]
    pub fn invoke_slots(&self) -> usize {
        self.arg_slots + usize::from(!self.is_static())
    }

    /// Returns the bound native function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingNativeBinding`] if no function was bound.
    pub fn native_function(&self, class_name: &str) -> Result<NativeFn> {
        self.native
            .clone()
            .ok_or_else(|| Error::MissingNativeBinding(self.full_signature(class_name)))
    }

    /// The fully qualified `class/name(descriptor)` signature.
    #[must_use]
    pub fn full_signature(&self, class_name: &str) -> String {
        format!("{}/{}{}", class_name, self.name, self.descriptor)
    }

    /// Validates that `args` are in slot form for this method's descriptor
    /// and hands them to the native invocation.
    ///
    /// Slot form means category-2 values are followed by their
    /// [`Value::Null`] filler. A mismatched slot count or a missing filler
    /// is a host bug and fatal.
    pub(crate) fn convert_args(&self, class_name: &str, args: Vec<Value>) -> Vec<Value> {
        let expected = self.invoke_slots();
        if args.len() != expected {
            vm_bug!(
                "{} expects {} argument slots, got {}",
                self.full_signature(class_name),
                expected,
                args.len()
            );
        }
        let mut i = 0;
        while i < args.len() {
            if args[i].is_category_2() {
                if args.get(i + 1) != Some(&Value::Null) {
                    vm_bug!(
                        "{}: category-2 argument slot {} lacks its null filler",
                        self.full_signature(class_name),
                        i
                    );
                }
                i += 2;
            } else {
                i += 1;
            }
        }
        args
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("access", &self.access)
            .field("max_locals", &self.max_locals)
            .field("code_len", &self.code.len())
            .field("handlers", &self.exception_handlers.len())
            .field("native", &self.native.is_some())
            .finish()
    }
}

/// Counts the argument slots of a method descriptor.
///
/// `J` and `D` count two slots, every other parameter one.
///
/// # Errors
///
/// Returns [`Error::MalformedDescriptor`] if the descriptor does not follow
/// the JVM grammar.
pub fn descriptor_arg_slots(descriptor: &str) -> Result<usize> {
    let bytes = descriptor.as_bytes();
    let malformed = |at: usize| Error::MalformedDescriptor(format!("{descriptor} at {at}"));

    if bytes.first() != Some(&b'(') {
        return Err(malformed(0));
    }
    let mut slots = 0;
    let mut i = 1;
    loop {
        match bytes.get(i) {
            None => return Err(malformed(i)),
            Some(b')') => break,
            Some(b'J' | b'D') => {
                slots += 2;
                i += 1;
            }
            Some(b'B' | b'C' | b'F' | b'I' | b'S' | b'Z') => {
                slots += 1;
                i += 1;
            }
            Some(b'L') => {
                let end = descriptor[i..].find(';').ok_or_else(|| malformed(i))?;
                slots += 1;
                i += end + 1;
            }
            Some(b'[') => {
                // Array dimensions collapse onto the element type's slot.
                while bytes.get(i) == Some(&b'[') {
                    i += 1;
                }
                match bytes.get(i) {
                    Some(b'L') => {
                        let end = descriptor[i..].find(';').ok_or_else(|| malformed(i))?;
                        i += end + 1;
                    }
                    Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => i += 1,
                    _ => return Err(malformed(i)),
                }
                slots += 1;
            }
            Some(_) => return Err(malformed(i)),
        }
    }
    // The return descriptor must be present and non-empty.
    if i + 1 >= bytes.len() {
        return Err(malformed(i));
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_arg_slots() {
        assert_eq!(descriptor_arg_slots("()V").unwrap(), 0);
        assert_eq!(descriptor_arg_slots("(I)V").unwrap(), 1);
        assert_eq!(descriptor_arg_slots("(IJ)V").unwrap(), 3);
        assert_eq!(descriptor_arg_slots("(Ljava/lang/String;D)J").unwrap(), 3);
        assert_eq!(descriptor_arg_slots("([I[[Ljava/lang/String;)V").unwrap(), 2);
    }

    #[test]
    fn test_descriptor_rejects_garbage() {
        assert!(descriptor_arg_slots("V").is_err());
        assert!(descriptor_arg_slots("(").is_err());
        assert!(descriptor_arg_slots("(Q)V").is_err());
        assert!(descriptor_arg_slots("(Ljava/lang/String)V").is_err());
        assert!(descriptor_arg_slots("()").is_err());
    }

    #[test]
    fn test_handler_covers() {
        let h = ExceptionHandler {
            start_pc: 2,
            end_pc: 5,
            handler_pc: 9,
            catch_type: CatchType::Any,
        };
        assert!(!h.covers(1));
        assert!(h.covers(2));
        assert!(h.covers(4));
        assert!(!h.covers(5));
    }

    #[test]
    fn test_access_flag_bits_match_class_file_values() {
        assert_eq!(MethodAccessFlags::SYNCHRONIZED.bits(), 0x0020);
        assert_eq!(MethodAccessFlags::NATIVE.bits(), 0x0100);
        assert_eq!(MethodAccessFlags::ABSTRACT.bits(), 0x0400);
    }
}
