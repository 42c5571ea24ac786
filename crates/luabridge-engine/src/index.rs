//! Member index resolution
//!
//! Indexing a host class or instance by name yields, in order of precedence:
//! the value of an accessible field of that name, a deferred method marker
//! if any accessible method has that name (overload selection waits for the
//! call), or `NoSuchMember`. Class-level lookups see static members only.

use std::os::raw::c_int;
use std::sync::Arc;

use luabridge_stack::LuaStack;

use crate::context::BridgeContext;
use crate::dispatch;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{CallScope, ClassDescriptor, FieldDescriptor, HostObject, HostType, HostValue};
use crate::marshal::{self, HostCell};
use crate::resolve;

/// Result of looking a name up on a class
#[derive(Clone, Copy)]
pub enum Member<'c> {
    /// A field; fields shadow methods
    Field(&'c FieldDescriptor),
    /// One or more methods share the name
    Method,
    /// Nothing visible has the name
    Missing,
}

/// Resolve `name` against `class`
pub fn lookup_member<'c>(class: &'c ClassDescriptor, name: &str, static_only: bool) -> Member<'c> {
    if let Some(field) = class.field(name, static_only) {
        Member::Field(field)
    } else if class.has_method(name, static_only) {
        Member::Method
    } else {
        Member::Missing
    }
}

fn qualified(class: &ClassDescriptor, member: &str) -> String {
    format!("{}.{}", class.name(), member)
}

/// Push the result of indexing `class` (or `receiver`) with the key at `key_idx`
pub(crate) fn index_member(
    ctx: &Arc<BridgeContext>,
    stack: LuaStack,
    class: &ClassDescriptor,
    receiver: Option<&HostObject>,
    key_idx: i32,
) -> BridgeResult<c_int> {
    let Some(name) = stack.read_string_lossy(key_idx) else {
        return Err(BridgeError::NoSuchMember {
            class: class.name().to_string(),
            member: format!("<{}>", marshal::describe_slot(stack, key_idx)),
        });
    };

    match lookup_member(class, &name, receiver.is_none()) {
        Member::Field(field) => {
            let value = (field.getter)(receiver).map_err(|e| BridgeError::invocation(qualified(class, &name), e))?;
            marshal::push_value(ctx, stack, &value)?;
        }
        Member::Method => dispatch::push_method_marker(ctx, stack, &name)?,
        Member::Missing => {
            return Err(BridgeError::NoSuchMember {
                class: class.name().to_string(),
                member: name,
            })
        }
    }
    Ok(1)
}

/// Invoke method `name` on the receiver at slot 1 with the arguments above it
pub(crate) fn call_member(ctx: &Arc<BridgeContext>, stack: LuaStack, name: &str) -> BridgeResult<c_int> {
    let (class, receiver) = match marshal::host_cell_at(stack, 1) {
        Some(HostCell::Object(o)) => (o.class().clone(), Some(o)),
        Some(HostCell::Class(c)) => (c, None),
        _ => {
            return Err(BridgeError::NotCallable(format!(
                "method `{}` needs a host receiver (use `obj:{}(...)`)",
                name, name
            )))
        }
    };

    let (method, args) = resolve::resolve_method(ctx, stack, &class, name, 2, receiver.is_none())?;
    let scope = CallScope::new(ctx, receiver.as_ref());
    let result = (method.invoker)(&scope, &args).map_err(|e| BridgeError::invocation(qualified(&class, name), e))?;

    if method.returns == HostType::Void {
        return Ok(0);
    }
    marshal::push_value(ctx, stack, &result)?;
    Ok(1)
}

/// Host-side method call on `target`. Overloads are chosen exactly as for a
/// script call; numbers are narrowed to the declared type. Holds the engine
/// lock for the whole call, so it fails once the context is closed.
pub(crate) fn call_method(
    ctx: &Arc<BridgeContext>,
    target: &HostObject,
    name: &str,
    args: &[HostValue],
) -> BridgeResult<HostValue> {
    let _guard = ctx.lock()?;
    let class = target.class();
    let (method, args) = resolve::resolve_method_for_values(ctx, class, name, args, false)?;

    let scope = CallScope::new(ctx, Some(target));
    let result = (method.invoker)(&scope, &args).map_err(|e| BridgeError::invocation(qualified(class, name), e))?;
    Ok(if method.returns == HostType::Void { HostValue::Null } else { result })
}
