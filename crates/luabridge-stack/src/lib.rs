//! luabridge-stack - Stack adapter over the Lua 5.4 C API
//!
//! This crate is the only place in luabridge that talks to the native engine
//! directly. It exposes a small, typed surface over the raw stack machine:
//! pushing and reading primitives, registry references, metatables,
//! protected calls, and chunk loading.
//!
//! # Example
//!
//! ```ignore
//! use luabridge_stack::LuaStack;
//!
//! let stack = LuaStack::new_state()?;
//! stack.open_libs();
//! stack.load_buffer(b"return 40 + 2", "=example")?;
//! stack.pcall(0, 1)?;
//! assert_eq!(stack.to_number(-1), 42.0);
//! unsafe { stack.close() };
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod kind;
pub mod stack;
pub mod status;

pub use error::{StackError, StackResult};
pub use kind::{RegistryKey, ValueKind};
pub use stack::{CFunction, LuaStack};
pub use status::StatusCode;

/// Re-export of the raw bindings for code that needs to define C entrypoints
pub use mlua::ffi;
