//! Class representation: identity, resolution state, castability, and
//! method lookup.

use crate::runtime::{method::MethodId, monitor::MonitorId};

/// Handle to a class in the loader arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    /// Creates a handle from a raw arena index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        ClassId(index)
    }

    /// Raw arena index of this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Loading state of a registered class.
///
/// Classes progress `Registered` → `Resolved` → `Initialized`; the loader
/// flips states asynchronously on executor ticks. The execution core only
/// consults the thresholds: exception catch types need `Resolved`,
/// exception construction needs `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassState {
    /// Known to the loader, not yet resolved.
    Registered,
    /// Resolved: usable for castability checks.
    Resolved,
    /// Initialized: static state ready, instances may be constructed.
    Initialized,
}

/// A JVM class as consumed by the execution core.
///
/// Classes form a single-inheritance hierarchy through `super_class`;
/// castability walks that chain. Each class owns a monitor used by
/// synchronized `static` methods.
#[derive(Debug)]
pub struct Class {
    /// Internal-form name, e.g. `java/lang/Object`.
    pub name: String,
    /// Superclass, `None` only for the hierarchy root.
    pub super_class: Option<ClassId>,
    /// Methods declared directly on this class.
    pub methods: Vec<MethodId>,
    /// Current loading state.
    pub state: ClassState,
    /// Monitor backing synchronized static methods of this class.
    pub(crate) monitor: MonitorId,
}

impl Class {
    /// The JVM type descriptor of this class, e.g. `Ljava/lang/Object;`.
    #[must_use]
    pub fn type_descriptor(&self) -> String {
        format!("L{};", self.name)
    }

    /// Returns `true` once the class is at least resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state >= ClassState::Resolved
    }

    /// Returns `true` once the class is initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state == ClassState::Initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        assert!(ClassState::Registered < ClassState::Resolved);
        assert!(ClassState::Resolved < ClassState::Initialized);
    }

    #[test]
    fn test_type_descriptor() {
        let cls = Class {
            name: "java/lang/Object".to_string(),
            super_class: None,
            methods: Vec::new(),
            state: ClassState::Initialized,
            monitor: MonitorId::new(0),
        };
        assert_eq!(cls.type_descriptor(), "Ljava/lang/Object;");
        assert!(cls.is_resolved());
        assert!(cls.is_initialized());
    }
}
