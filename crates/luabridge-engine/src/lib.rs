//! luabridge-engine - Host object bridge for embedded Lua
//!
//! Exposes host classes, objects and functions to script code running in an
//! embedded engine, and script values back to host code:
//!
//! - **Contexts**: one engine per [`BridgeContext`], listed in a
//!   [`ContextRegistry`] under a small dense integer id
//! - **Marshalling**: primitives by value, host objects as userdata, script
//!   tables and functions as [`ReferenceHandle`]s
//! - **Overloads**: script calls pick the cheapest compatible overload,
//!   declaration order breaking ties
//! - **Members**: fields shadow methods; methods resolve when called
//! - **Proxies**: a script table can implement host interfaces
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use luabridge_engine::{BridgeContext, BridgeOptions, ClassDescriptor, ClassRegistry, ContextRegistry, HostType, HostValue};
//!
//! let mut classes = ClassRegistry::new();
//! classes.register_class(
//!     ClassDescriptor::builder("Math")
//!         .static_method("twice", vec![HostType::I32], HostType::I32, |_, args| {
//!             Ok(HostValue::I32(args[0].as_i64().unwrap_or(0) as i32 * 2))
//!         })
//!         .build(),
//! );
//!
//! let ctx = BridgeContext::create(&ContextRegistry::new(), Arc::new(classes), BridgeOptions::default())?;
//! let values = ctx.exec("return luajava.bindClass('Math'):twice(21)")?;
//! assert_eq!(values[0].as_f64(), Some(42.0));
//! ```

#![warn(missing_docs)]

pub mod context;
mod dispatch;
pub mod error;
pub mod function;
pub mod handle;
pub mod host;
pub mod index;
mod marshal;
pub mod options;
pub mod proxy;
pub mod registry;
pub mod resolve;

pub use context::{BridgeContext, NativeHandle};
pub use error::{BridgeError, BridgeResult, EngineStatus};
pub use function::{HostFn, HostFunction};
pub use handle::ReferenceHandle;
pub use host::{
    CallScope, ClassBuilder, ClassDescriptor, ClassRegistry, ConstructorDescriptor, FieldDescriptor, HostObject,
    HostType, HostValue, InterfaceDescriptor, LibraryEntry, MethodDescriptor, MethodSignature, Signature,
};
pub use index::{lookup_member, Member};
pub use options::{BridgeOptions, NumericCoercion};
pub use proxy::ScriptProxy;
pub use registry::{ContextId, ContextRegistry};
pub use resolve::{check_argument, check_value, coerce_number, narrow_number, number_fits};

/// Re-export of the stack adapter
pub use luabridge_stack as stack;
