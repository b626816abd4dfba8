//! Structural type descriptors
//!
//! Rust carries no runtime type structure, so the host registers descriptors
//! for the types it wants agents to see. Unregistered values still resolve to
//! a descriptor with name, size and alignment. Field offsets are never
//! recorded.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::mem::{align_of_val, size_of_val};
use std::sync::Arc;

/// Named field of a described type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub type_name: String,
}

/// Read-only description of a concrete type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldDescriptor>,
    pub methods: Vec<String>,
}

impl TypeDescriptor {
    /// Start a descriptor for `T` with no fields or methods
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            name: type_name::<T>().to_string(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Add a field of type `F`
    #[must_use]
    pub fn field<F: ?Sized>(mut self, name: &str) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            type_name: type_name::<F>().to_string(),
        });
        self
    }

    /// Add a method name
    #[must_use]
    pub fn method(mut self, name: &str) -> Self {
        self.methods.push(name.to_string());
        self
    }

    fn opaque(name: String, size: usize, align: usize) -> Self {
        Self { name, size, align, fields: Vec::new(), methods: Vec::new() }
    }
}

/// Descriptors registered by the host, keyed by [`TypeId`]
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_id: HashMap<TypeId, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the descriptor for `T`, replacing any earlier one
    pub fn register<T: 'static>(&mut self, descriptor: TypeDescriptor) {
        self.by_id.insert(TypeId::of::<T>(), Arc::new(descriptor));
    }

    /// Descriptor of a statically known value
    #[must_use]
    pub fn describe<T: ?Sized + 'static>(&self, value: &T) -> TypeDescriptor {
        match self.by_id.get(&TypeId::of::<T>()) {
            Some(desc) => desc.as_ref().clone(),
            None => TypeDescriptor::opaque(
                type_name::<T>().to_string(),
                size_of_val(value),
                align_of_val(value),
            ),
        }
    }

    /// Descriptor of a type-erased value
    ///
    /// The concrete name is only known for registered types.
    #[must_use]
    pub fn describe_dyn(&self, value: &dyn Any) -> TypeDescriptor {
        match self.by_id.get(&value.type_id()) {
            Some(desc) => desc.as_ref().clone(),
            None => TypeDescriptor::opaque(
                "<unknown>".to_string(),
                size_of_val(value),
                align_of_val(value),
            ),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    struct Request {
        id: u64,
        path: String,
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register::<Request>(
            TypeDescriptor::of::<Request>()
                .field::<u64>("id")
                .field::<String>("path")
                .method("route"),
        );
        registry
    }

    #[test]
    fn test_registered_type_has_fields() {
        let registry = registry();
        let req = Request { id: 1, path: "/".to_string() };
        let desc = registry.describe(&req);
        assert!(desc.name.ends_with("Request"));
        assert_eq!(desc.fields.len(), 2);
        assert_eq!(desc.fields[1].type_name, type_name::<String>());
        assert_eq!(desc.methods, vec!["route".to_string()]);
    }

    #[test]
    fn test_unregistered_type_never_fails() {
        let registry = registry();
        let desc = registry.describe(&[1u32, 2, 3][..]);
        assert_eq!(desc.name, "[u32]");
        assert_eq!(desc.size, 12);
        assert_eq!(desc.align, 4);
        assert!(desc.fields.is_empty());
    }

    #[test]
    fn test_describe_dyn_uses_concrete_type() {
        let registry = registry();
        let req = Request { id: 1, path: "/".to_string() };
        let erased: &dyn Any = &req;
        assert!(registry.describe_dyn(erased).name.ends_with("Request"));

        let other: &dyn Any = &5u16;
        let desc = registry.describe_dyn(other);
        assert_eq!(desc.name, "<unknown>");
        assert_eq!(desc.size, 2);
    }
}
