//! Managed heap: object arena, interned strings, and per-object monitors.
//!
//! The heap is a plain arena of [`Object`]s addressed by [`ObjRef`] handles.
//! There is no collector — ownership is the only policy specified: the heap
//! owns every object for the lifetime of the [`crate::Jvm`], and everything
//! else refers to objects by handle.

use rustc_hash::FxHashMap;

use crate::runtime::{class::ClassId, monitor::MonitorId, value::Value};

/// Handle to an object on the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Creates a handle from a raw arena index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        ObjRef(index)
    }

    /// Raw arena index of this handle.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A heap-allocated object instance.
///
/// Objects carry their class handle, a name-keyed field map, an optional
/// Rust-string payload (for `java/lang/String` instances), and a lazily
/// created monitor used by `monitorenter`/`monitorexit` and synchronized
/// instance methods.
#[derive(Debug)]
pub struct Object {
    /// The object's class.
    pub class: ClassId,
    /// Instance fields by simple name.
    pub fields: FxHashMap<String, Value>,
    /// Backing string for `java/lang/String` instances.
    pub string: Option<String>,
    /// Monitor owned by this object, created on first use.
    pub(crate) monitor: Option<MonitorId>,
}

/// Arena of heap objects plus the string intern table.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<Object>,
    interned: FxHashMap<String, ObjRef>,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Heap::default()
    }

    /// Allocates a new instance of `class` with no fields set.
    pub fn alloc(&mut self, class: ClassId) -> ObjRef {
        let r = ObjRef::new(u32::try_from(self.objects.len()).unwrap_or_else(|_| {
            vm_bug!("heap arena exceeded u32 handle space");
        }));
        self.objects.push(Object {
            class,
            fields: FxHashMap::default(),
            string: None,
            monitor: None,
        });
        r
    }

    /// Returns the interned string object for `value`, allocating one of
    /// class `string_class` on first use.
    pub fn intern_string(&mut self, string_class: ClassId, value: &str) -> ObjRef {
        if let Some(&r) = self.interned.get(value) {
            return r;
        }
        let r = self.alloc(string_class);
        self.objects[r.index()].string = Some(value.to_string());
        self.interned.insert(value.to_string(), r);
        r
    }

    /// Returns the object behind `r`.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not address a live object (host bug).
    #[must_use]
    pub fn object(&self, r: ObjRef) -> &Object {
        self.objects
            .get(r.index())
            .unwrap_or_else(|| vm_bug!("dangling object handle #{}", r.index()))
    }

    /// Mutable access to the object behind `r`.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not address a live object (host bug).
    pub fn object_mut(&mut self, r: ObjRef) -> &mut Object {
        self.objects
            .get_mut(r.index())
            .unwrap_or_else(|| vm_bug!("dangling object handle #{}", r.index()))
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if no objects have been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_fields() {
        let mut heap = Heap::new();
        let cls = ClassId::new(0);
        let obj = heap.alloc(cls);
        assert_eq!(heap.object(obj).class, cls);

        heap.object_mut(obj)
            .fields
            .insert("message".to_string(), Value::Int(3));
        assert_eq!(heap.object(obj).fields["message"], Value::Int(3));
    }

    #[test]
    fn test_intern_string_dedups() {
        let mut heap = Heap::new();
        let string_cls = ClassId::new(1);
        let a = heap.intern_string(string_cls, "boom");
        let b = heap.intern_string(string_cls, "boom");
        let c = heap.intern_string(string_cls, "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.object(a).string.as_deref(), Some("boom"));
    }

    #[test]
    #[should_panic(expected = "host invariant violation")]
    fn test_dangling_handle_is_fatal() {
        let heap = Heap::new();
        let _ = heap.object(ObjRef::new(7));
    }
}
