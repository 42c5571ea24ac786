//! Class registry: host classes and interfaces addressable by name

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{BridgeError, BridgeResult};
use crate::host::class::{ClassDescriptor, InterfaceDescriptor};

/// Host classes and interfaces visible to script code
#[derive(Debug, Default)]
pub struct ClassRegistry {
    /// Classes indexed by name
    classes: FxHashMap<String, Arc<ClassDescriptor>>,
    /// Interfaces indexed by name
    interfaces: FxHashMap<String, Arc<InterfaceDescriptor>>,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class, replacing any previous class of the same name
    pub fn register_class(&mut self, class: Arc<ClassDescriptor>) -> &mut Self {
        self.classes.insert(class.name().to_string(), class);
        self
    }

    /// Register an interface, replacing any previous interface of the same name
    pub fn register_interface(&mut self, interface: Arc<InterfaceDescriptor>) -> &mut Self {
        self.interfaces.insert(interface.name().to_string(), interface);
        self
    }

    /// Get class by name
    pub fn get_class(&self, name: &str) -> Option<&Arc<ClassDescriptor>> {
        self.classes.get(name)
    }

    /// Get interface by name
    pub fn get_interface(&self, name: &str) -> Option<&Arc<InterfaceDescriptor>> {
        self.interfaces.get(name)
    }

    /// Resolve a class name
    pub fn class(&self, name: &str) -> BridgeResult<Arc<ClassDescriptor>> {
        self.get_class(name)
            .cloned()
            .ok_or_else(|| BridgeError::ClassResolution(name.to_string()))
    }

    /// Resolve an interface name
    pub fn interface(&self, name: &str) -> BridgeResult<Arc<InterfaceDescriptor>> {
        self.get_interface(name)
            .cloned()
            .ok_or_else(|| BridgeError::ClassResolution(name.to_string()))
    }

    /// Class is `name`, or reaches it through supertypes. Supertypes that
    /// name registered classes are followed, so the check is transitive.
    pub fn is_assignable(&self, class: &ClassDescriptor, name: &str) -> bool {
        if class.is_assignable_to(name) {
            return true;
        }
        let mut seen = FxHashSet::default();
        let mut pending: Vec<&str> = class.supertypes().iter().map(String::as_str).collect();
        while let Some(next) = pending.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(parent) = self.classes.get(next) {
                if parent.is_assignable_to(name) {
                    return true;
                }
                pending.extend(parent.supertypes().iter().map(String::as_str));
            }
        }
        false
    }

    /// Number of registered classes
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Number of registered interfaces
    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// Iterate over all classes
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClassDescriptor>> {
        self.classes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::value::HostType;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ClassRegistry::new();
        registry
            .register_class(ClassDescriptor::builder("Point").build())
            .register_class(ClassDescriptor::builder("Circle").build());

        assert_eq!(registry.class_count(), 2);
        assert_eq!(registry.class("Point").unwrap().name(), "Point");
        assert!(registry.get_class("Line").is_none());
    }

    #[test]
    fn test_unknown_names_fail_resolution() {
        let registry = ClassRegistry::new();
        assert!(matches!(
            registry.class("Nope"),
            Err(BridgeError::ClassResolution(name)) if name == "Nope"
        ));
        assert!(matches!(
            registry.interface("Greeter"),
            Err(BridgeError::ClassResolution(_))
        ));
    }

    #[test]
    fn test_assignability_follows_registered_supertypes() {
        let mut registry = ClassRegistry::new();
        registry
            .register_class(ClassDescriptor::builder("Shape").implements("Drawable").build())
            .register_class(ClassDescriptor::builder("Polygon").implements("Shape").build())
            .register_class(ClassDescriptor::builder("Square").implements("Polygon").build());
        let square = registry.class("Square").unwrap();

        assert!(square.is_assignable_to("Polygon"));
        assert!(!square.is_assignable_to("Shape"));
        assert!(registry.is_assignable(&square, "Square"));
        assert!(registry.is_assignable(&square, "Shape"));
        assert!(registry.is_assignable(&square, "Drawable"));
        assert!(!registry.is_assignable(&square, "Circle"));
    }

    #[test]
    fn test_assignability_survives_supertype_cycles() {
        let mut registry = ClassRegistry::new();
        registry
            .register_class(ClassDescriptor::builder("A").implements("B").build())
            .register_class(ClassDescriptor::builder("B").implements("A").build());
        let a = registry.class("A").unwrap();
        assert!(registry.is_assignable(&a, "B"));
        assert!(!registry.is_assignable(&a, "C"));
    }

    #[test]
    fn test_interfaces_are_separate_namespace() {
        let mut registry = ClassRegistry::new();
        registry.register_interface(
            InterfaceDescriptor::new("Greeter")
                .method("greet", vec![HostType::Str], HostType::Str)
                .build(),
        );

        assert_eq!(registry.interface_count(), 1);
        assert!(registry.interface("Greeter").is_ok());
        assert!(registry.class("Greeter").is_err());
    }
}
