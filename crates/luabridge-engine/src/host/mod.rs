//! Host type model
//!
//! Values, declared types, class and interface descriptors, and the class
//! registry that script code resolves names against.

pub mod class;
pub mod registry;
pub mod value;

pub use class::{
    CallScope, ClassBuilder, ClassDescriptor, ConstructorDescriptor, ConstructorInvoker, FieldDescriptor,
    FieldGetter, InterfaceDescriptor, LibraryEntry, LibraryLoader, MethodDescriptor, MethodInvoker,
    MethodSignature, Signature,
};
pub use registry::ClassRegistry;
pub use value::{HostObject, HostType, HostValue};
