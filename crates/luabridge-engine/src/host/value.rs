//! Host values, declared types and host objects

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::function::HostFunction;
use crate::handle::ReferenceHandle;
use crate::host::class::ClassDescriptor;

// ============================================================================
// HostValue
// ============================================================================

/// A value on the host side of the bridge.
#[derive(Debug, Clone)]
pub enum HostValue {
    /// Absence of a value (`nil` in script)
    Null,
    /// Boolean
    Bool(bool),
    /// 8-bit integer
    I8(i8),
    /// 16-bit integer
    I16(i16),
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// Single precision float
    F32(f32),
    /// Double precision float
    F64(f64),
    /// UTF-8 text
    Str(String),
    /// Binary string
    Bytes(Vec<u8>),
    /// Host closure callable from script
    Function(HostFunction),
    /// Alias to a value living in the engine
    Ref(ReferenceHandle),
    /// Host object instance
    Object(HostObject),
    /// Host class (static members, constructors)
    Class(Arc<ClassDescriptor>),
}

impl HostValue {
    /// Short description of the value's runtime type
    pub fn type_name(&self) -> String {
        match self {
            HostValue::Null => "null".to_string(),
            HostValue::Bool(_) => "bool".to_string(),
            HostValue::I8(_) => "i8".to_string(),
            HostValue::I16(_) => "i16".to_string(),
            HostValue::I32(_) => "i32".to_string(),
            HostValue::I64(_) => "i64".to_string(),
            HostValue::F32(_) => "f32".to_string(),
            HostValue::F64(_) => "f64".to_string(),
            HostValue::Str(_) => "string".to_string(),
            HostValue::Bytes(_) => "bytes".to_string(),
            HostValue::Function(f) => format!("function {}", f.name()),
            HostValue::Ref(_) => "script value".to_string(),
            HostValue::Object(o) => o.class().name().to_string(),
            HostValue::Class(c) => format!("class {}", c.name()),
        }
    }

    /// Check for `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Check for any numeric variant
    pub fn is_number(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any numeric payload widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            HostValue::I8(n) => Some(n as f64),
            HostValue::I16(n) => Some(n as f64),
            HostValue::I32(n) => Some(n as f64),
            HostValue::I64(n) => Some(n as f64),
            HostValue::F32(n) => Some(n as f64),
            HostValue::F64(n) => Some(n),
            _ => None,
        }
    }

    /// Any numeric payload as `i64` (floats truncate)
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            HostValue::I8(n) => Some(n as i64),
            HostValue::I16(n) => Some(n as i64),
            HostValue::I32(n) => Some(n as i64),
            HostValue::I64(n) => Some(n),
            HostValue::F32(n) => Some(n as i64),
            HostValue::F64(n) => Some(n as i64),
            _ => None,
        }
    }

    /// Text payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Text or binary payload as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HostValue::Str(s) => Some(s.as_bytes()),
            HostValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Host object payload
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Reference handle payload
    pub fn as_handle(&self) -> Option<&ReferenceHandle> {
        match self {
            HostValue::Ref(h) => Some(h),
            _ => None,
        }
    }

    /// Class payload
    pub fn as_class(&self) -> Option<&Arc<ClassDescriptor>> {
        match self {
            HostValue::Class(c) => Some(c),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for HostValue {
                fn from(v: $ty) -> Self {
                    HostValue::$variant(v)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Vec<u8> => Bytes,
    HostFunction => Function,
    ReferenceHandle => Ref,
    HostObject => Object,
    Arc<ClassDescriptor> => Class,
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::Str(v.to_string())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(HostValue::Null, Into::into)
    }
}

// ============================================================================
// HostType
// ============================================================================

/// Declared type of a parameter, return value or field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostType {
    /// `bool`
    Bool,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// UTF-8 text
    Str,
    /// Binary string
    Bytes,
    /// Script value kept as a reference handle (functions, tables, foreign userdata)
    Script,
    /// Host object assignable to the named class or interface
    Object(String),
    /// Host class
    Class,
    /// Host function
    Function,
    /// Anything
    Any,
    /// No value (return types only)
    Void,
}

impl HostType {
    /// Shorthand for [`HostType::Object`]
    pub fn object(name: impl Into<String>) -> Self {
        HostType::Object(name.into())
    }

    /// Numeric types
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            HostType::I8 | HostType::I16 | HostType::I32 | HostType::I64 | HostType::F32 | HostType::F64
        )
    }

    /// Primitive types cannot hold `Null`
    pub fn is_primitive(&self) -> bool {
        matches!(self, HostType::Bool) || self.is_numeric()
    }

    /// Check whether an already-typed host value fits this declared type
    pub fn accepts(&self, value: &HostValue) -> bool {
        match (self, value) {
            (HostType::Void, _) => false,
            (HostType::Any, _) => true,
            (ty, HostValue::Null) => !ty.is_primitive(),
            (HostType::Bool, HostValue::Bool(_)) => true,
            (ty, v) if ty.is_numeric() => v.is_number(),
            (HostType::Str, HostValue::Str(_)) => true,
            (HostType::Bytes, HostValue::Str(_) | HostValue::Bytes(_)) => true,
            (HostType::Script, HostValue::Ref(_)) => true,
            (HostType::Object(name), HostValue::Object(o)) => o.is_instance_of(name),
            (HostType::Class, HostValue::Class(_)) => true,
            (HostType::Function, HostValue::Function(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Bool => f.write_str("bool"),
            HostType::I8 => f.write_str("i8"),
            HostType::I16 => f.write_str("i16"),
            HostType::I32 => f.write_str("i32"),
            HostType::I64 => f.write_str("i64"),
            HostType::F32 => f.write_str("f32"),
            HostType::F64 => f.write_str("f64"),
            HostType::Str => f.write_str("string"),
            HostType::Bytes => f.write_str("bytes"),
            HostType::Script => f.write_str("script value"),
            HostType::Object(name) => f.write_str(name),
            HostType::Class => f.write_str("class"),
            HostType::Function => f.write_str("function"),
            HostType::Any => f.write_str("any"),
            HostType::Void => f.write_str("void"),
        }
    }
}

// ============================================================================
// HostObject
// ============================================================================

/// A host object instance: a shared payload tagged with its class.
///
/// Cloning shares the payload; identity is the payload's address.
#[derive(Clone)]
pub struct HostObject {
    class: Arc<ClassDescriptor>,
    value: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    /// Wrap a value as an instance of `class`
    pub fn new<T: Any + Send + Sync>(class: Arc<ClassDescriptor>, value: T) -> Self {
        Self {
            class,
            value: Arc::new(value),
        }
    }

    /// Wrap an already shared payload
    pub fn from_arc(class: Arc<ClassDescriptor>, value: Arc<dyn Any + Send + Sync>) -> Self {
        Self { class, value }
    }

    /// Class descriptor of this object
    pub fn class(&self) -> &Arc<ClassDescriptor> {
        &self.class
    }

    /// Borrow the payload as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Same payload
    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        self.addr() == other.addr()
    }

    /// Payload address, used for identity and display
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.value) as *const () as usize
    }

    /// Class or one of its supertypes is named `name`
    pub fn is_instance_of(&self, name: &str) -> bool {
        self.class.is_assignable_to(name)
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x}", self.class.name(), self.addr())
    }
}
