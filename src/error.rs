use thiserror::Error;

/// Reports a host-side invariant violation and aborts execution.
///
/// The core distinguishes two error planes: JVM exceptions, which are
/// `java/lang/Throwable` instances unwound through stack frames, and
/// host-side invariant violations — illegal status transitions, return
/// descriptor mismatches, frames of the wrong kind — which signal bugs in
/// the embedding host. The latter are fatal and must never be surfaced as
/// JVM exceptions; this macro panics with a uniform diagnostic prefix so
/// they are easy to spot in logs.
macro_rules! vm_bug {
    // Single string version
    ($msg:expr) => {
        panic!("host invariant violation: {}", $msg)
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        panic!("host invariant violation: {}", format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all recoverable errors
/// this library can potentially return.
///
/// This enum covers the failure modes of the collaborator surface: class and
/// method lookups, native-method bindings, and method descriptor parsing.
/// JVM-level exceptions are *not* represented here — they are heap-allocated
/// `Throwable` instances propagated by [`crate::Jvm::throw_exception`] — and
/// host-side invariant violations are fatal panics rather than `Error`
/// values.
///
/// # Error Categories
///
/// ## Registration Errors
/// - [`Error::DuplicateClass`] - A class with the same internal name exists
/// - [`Error::MalformedDescriptor`] - A method descriptor failed to parse
///
/// ## Lookup Errors
/// - [`Error::ClassNotFound`] - Requested class is not registered
/// - [`Error::MethodNotFound`] - No method with the given signature
/// - [`Error::MissingNativeBinding`] - Native method has no bound function
///
/// # Examples
///
/// ```rust
/// use kona::{ClassBuilder, Jvm};
///
/// let mut jvm = Jvm::new();
/// let object = jvm.bootstrap().object;
/// let first = ClassBuilder::new("demo/Main").extends(object).build(&mut jvm);
/// assert!(first.is_ok());
/// let second = ClassBuilder::new("demo/Main").extends(object).build(&mut jvm);
/// assert!(second.is_err());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A class with the same internal name is already registered.
    ///
    /// Class names are unique within the bootstrap loader; registering
    /// `demo/Main` twice is a host configuration error surfaced at build
    /// time rather than a fatal panic, since embedders commonly probe for
    /// it.
    #[error("class already registered - {0}")]
    DuplicateClass(String),

    /// The requested class is not registered with the bootstrap loader.
    ///
    /// Returned by asynchronous resolution and initialization when a name
    /// does not correspond to any registered class. The loader remembers
    /// the failure: subsequent exception-handler scans treat the name as
    /// non-matching instead of re-requesting resolution.
    #[error("class not found - {0}")]
    ClassNotFound(String),

    /// No method with the given signature exists on the class or any of its
    /// superclasses.
    ///
    /// Signatures are the JVM `name(descriptor)` form, e.g.
    /// `dispatchUncaughtException(Ljava/lang/Throwable;)V`.
    #[error("method not found - {signature} on {class_name}")]
    MethodNotFound {
        /// The searched `name(descriptor)` signature.
        signature: String,
        /// Internal name of the class the lookup started at.
        class_name: String,
    },

    /// A native method was invoked without a bound native function.
    ///
    /// Methods flagged `NATIVE` must have an implementation registered via
    /// [`crate::MethodBuilder::native`] before any thread runs them.
    #[error("no native binding for {0}")]
    MissingNativeBinding(String),

    /// A method descriptor could not be parsed.
    ///
    /// Descriptors follow the JVM grammar, e.g. `(Ljava/lang/String;IJ)V`.
    /// The message carries the offending descriptor and the position of the
    /// first invalid character.
    #[error("malformed method descriptor - {0}")]
    MalformedDescriptor(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
