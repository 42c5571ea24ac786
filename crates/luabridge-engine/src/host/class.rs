//! Class and interface descriptors
//!
//! A `ClassDescriptor` is the capability table the bridge consults instead
//! of runtime reflection: the fields, methods, constructors and library
//! entry points script code may reach by name. Descriptors are built once
//! with [`ClassBuilder`] and shared behind an `Arc`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::context::BridgeContext;
use crate::host::value::{HostObject, HostType, HostValue};

// ============================================================================
// Invokers
// ============================================================================

/// Reads a field; receives the instance for non-static fields
pub type FieldGetter = Arc<dyn Fn(Option<&HostObject>) -> anyhow::Result<HostValue> + Send + Sync>;

/// Invokes a method with already converted arguments
pub type MethodInvoker = Arc<dyn Fn(&CallScope<'_>, &[HostValue]) -> anyhow::Result<HostValue> + Send + Sync>;

/// Builds a new instance payload from already converted arguments
pub type ConstructorInvoker =
    Arc<dyn Fn(&CallScope<'_>, &[HostValue]) -> anyhow::Result<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// Library entry point; returns the values handed back to the script
pub type LibraryLoader = Arc<dyn Fn(&Arc<BridgeContext>) -> anyhow::Result<Vec<HostValue>> + Send + Sync>;

/// What an invoker can see about the call in progress.
pub struct CallScope<'a> {
    context: &'a Arc<BridgeContext>,
    receiver: Option<&'a HostObject>,
}

impl<'a> CallScope<'a> {
    /// Scope for a call on `receiver` (or a static call when `None`)
    pub fn new(context: &'a Arc<BridgeContext>, receiver: Option<&'a HostObject>) -> Self {
        Self { context, receiver }
    }

    /// Context the call runs in
    pub fn context(&self) -> &'a Arc<BridgeContext> {
        self.context
    }

    /// Instance the method was invoked on
    pub fn receiver(&self) -> Option<&'a HostObject> {
        self.receiver
    }

    /// Receiver payload as `T`, failing for static calls or other payload types
    pub fn this<T: Any>(&self) -> anyhow::Result<&'a T> {
        let receiver = self
            .receiver
            .ok_or_else(|| anyhow::anyhow!("instance method called without a receiver"))?;
        receiver.downcast_ref::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "receiver of class `{}` has an unexpected payload type",
                receiver.class().name()
            )
        })
    }
}

// ============================================================================
// Member descriptors
// ============================================================================

/// Parameter list of a callable member
pub trait Signature {
    /// Declared parameter types, in order
    fn params(&self) -> &[HostType];
}

/// A readable field
#[derive(Clone)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Declared type
    pub ty: HostType,
    /// Reachable from the class itself
    pub is_static: bool,
    /// Reader
    pub getter: FieldGetter,
}

/// A method
#[derive(Clone)]
pub struct MethodDescriptor {
    /// Method name (overloads share it)
    pub name: String,
    /// Declared parameter types
    pub params: Vec<HostType>,
    /// Declared return type
    pub returns: HostType,
    /// Reachable from the class itself
    pub is_static: bool,
    /// Body
    pub invoker: MethodInvoker,
}

impl Signature for MethodDescriptor {
    fn params(&self) -> &[HostType] {
        &self.params
    }
}

/// A constructor
#[derive(Clone)]
pub struct ConstructorDescriptor {
    /// Declared parameter types
    pub params: Vec<HostType>,
    /// Body
    pub invoker: ConstructorInvoker,
}

impl Signature for ConstructorDescriptor {
    fn params(&self) -> &[HostType] {
        &self.params
    }
}

/// A named library entry point reachable through `loadLib`
#[derive(Clone)]
pub struct LibraryEntry {
    /// Entry name
    pub name: String,
    /// Loader
    pub loader: LibraryLoader,
}

// ============================================================================
// ClassDescriptor
// ============================================================================

/// Everything the bridge knows about a host class
pub struct ClassDescriptor {
    name: String,
    supertypes: Vec<String>,
    fields: Vec<FieldDescriptor>,
    methods: Vec<MethodDescriptor>,
    constructors: Vec<ConstructorDescriptor>,
    libraries: Vec<LibraryEntry>,
}

impl ClassDescriptor {
    /// Start describing a class
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            class: ClassDescriptor {
                name: name.into(),
                supertypes: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                constructors: Vec::new(),
                libraries: Vec::new(),
            },
        }
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interfaces and parent classes this class is assignable to
    pub fn supertypes(&self) -> &[String] {
        &self.supertypes
    }

    /// All fields, in declaration order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// All methods, in declaration order
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// All constructors, in declaration order
    pub fn constructors(&self) -> &[ConstructorDescriptor] {
        &self.constructors
    }

    /// Field by name; `static_only` hides instance fields
    pub fn field(&self, name: &str, static_only: bool) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name && (f.is_static || !static_only))
    }

    /// Methods sharing `name`; `static_only` hides instance methods
    pub fn methods_named<'a, 'n>(
        &'a self,
        name: &'n str,
        static_only: bool,
    ) -> impl Iterator<Item = &'a MethodDescriptor> + use<'a, 'n> {
        self.methods
            .iter()
            .filter(move |m| m.name == name && (m.is_static || !static_only))
    }

    /// At least one visible method is called `name`
    pub fn has_method(&self, name: &str, static_only: bool) -> bool {
        self.methods_named(name, static_only).next().is_some()
    }

    /// Library entry point by name
    pub fn library(&self, name: &str) -> Option<&LibraryEntry> {
        self.libraries.iter().find(|l| l.name == name)
    }

    /// Class is `name` or lists it as a direct supertype. Use
    /// [`ClassRegistry::is_assignable`](crate::host::ClassRegistry::is_assignable)
    /// to follow supertypes that are themselves registered classes.
    pub fn is_assignable_to(&self, name: &str) -> bool {
        self.name == name || self.supertypes.iter().any(|s| s == name)
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("supertypes", &self.supertypes)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .field("constructors", &self.constructors.len())
            .finish()
    }
}

/// Builder for [`ClassDescriptor`]
pub struct ClassBuilder {
    class: ClassDescriptor,
}

impl ClassBuilder {
    /// Declare an interface or parent class this class is assignable to
    pub fn implements(mut self, name: impl Into<String>) -> Self {
        self.class.supertypes.push(name.into());
        self
    }

    /// Instance field
    pub fn field<F>(mut self, name: impl Into<String>, ty: HostType, getter: F) -> Self
    where
        F: Fn(&HostObject) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        let name = name.into();
        let field = name.clone();
        self.class.fields.push(FieldDescriptor {
            name,
            ty,
            is_static: false,
            getter: Arc::new(move |this: Option<&HostObject>| match this {
                Some(this) => getter(this),
                None => Err(anyhow::anyhow!("field `{}` needs an instance", field)),
            }),
        });
        self
    }

    /// Static field
    pub fn static_field<F>(mut self, name: impl Into<String>, ty: HostType, getter: F) -> Self
    where
        F: Fn() -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        self.class.fields.push(FieldDescriptor {
            name: name.into(),
            ty,
            is_static: true,
            getter: Arc::new(move |_: Option<&HostObject>| getter()),
        });
        self
    }

    /// Instance method
    pub fn method<F>(self, name: impl Into<String>, params: Vec<HostType>, returns: HostType, f: F) -> Self
    where
        F: Fn(&CallScope<'_>, &[HostValue]) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        self.push_method(name.into(), params, returns, false, Arc::new(f))
    }

    /// Static method
    pub fn static_method<F>(self, name: impl Into<String>, params: Vec<HostType>, returns: HostType, f: F) -> Self
    where
        F: Fn(&CallScope<'_>, &[HostValue]) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        self.push_method(name.into(), params, returns, true, Arc::new(f))
    }

    /// Method with a prebuilt invoker
    pub fn method_descriptor(mut self, method: MethodDescriptor) -> Self {
        self.class.methods.push(method);
        self
    }

    fn push_method(
        mut self,
        name: String,
        params: Vec<HostType>,
        returns: HostType,
        is_static: bool,
        invoker: MethodInvoker,
    ) -> Self {
        self.class.methods.push(MethodDescriptor {
            name,
            params,
            returns,
            is_static,
            invoker,
        });
        self
    }

    /// Constructor producing a `T` payload
    pub fn constructor<T, F>(mut self, params: Vec<HostType>, f: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&CallScope<'_>, &[HostValue]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.class.constructors.push(ConstructorDescriptor {
            params,
            invoker: Arc::new(move |scope: &CallScope<'_>, args: &[HostValue]| {
                f(scope, args).map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>)
            }),
        });
        self
    }

    /// Library entry point reachable through `loadLib(class, name)`
    pub fn library<F>(mut self, name: impl Into<String>, loader: F) -> Self
    where
        F: Fn(&Arc<BridgeContext>) -> anyhow::Result<Vec<HostValue>> + Send + Sync + 'static,
    {
        self.class.libraries.push(LibraryEntry {
            name: name.into(),
            loader: Arc::new(loader),
        });
        self
    }

    /// Finish
    pub fn build(self) -> Arc<ClassDescriptor> {
        Arc::new(self.class)
    }
}

// ============================================================================
// InterfaceDescriptor
// ============================================================================

/// Method signature declared by an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    /// Method name
    pub name: String,
    /// Declared parameter types
    pub params: Vec<HostType>,
    /// Declared return type
    pub returns: HostType,
}

/// A host interface a script table can be made to implement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    name: String,
    methods: Vec<MethodSignature>,
}

impl InterfaceDescriptor {
    /// Empty interface
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method signature
    pub fn method(mut self, name: impl Into<String>, params: Vec<HostType>, returns: HostType) -> Self {
        self.methods.push(MethodSignature {
            name: name.into(),
            params,
            returns,
        });
        self
    }

    /// Finish
    pub fn build(self) -> Arc<InterfaceDescriptor> {
        Arc::new(self)
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared methods
    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }
}
