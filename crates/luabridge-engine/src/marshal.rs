//! Value marshalling between host values and engine stack slots
//!
//! Host → stack: `Null` is nil, numbers of every width become doubles,
//! text and binary strings become (length-delimited) strings, handles push
//! the value they alias, and host objects, classes and functions travel as
//! full userdata carrying a [`HostCell`] under the shared host metatable.
//!
//! Stack → host: booleans, strings (UTF-8 as `Str`, otherwise `Bytes`),
//! numbers as `F64`, host userdata back to their payload, nil as `Null`.
//! Functions, tables, threads and foreign userdata are kept in the engine
//! and surface as reference handles.

use std::ffi::CStr;
use std::sync::Arc;

use luabridge_stack::{LuaStack, ValueKind};

use crate::context::BridgeContext;
use crate::error::BridgeResult;
use crate::function::HostFunction;
use crate::handle::ReferenceHandle;
use crate::host::{ClassDescriptor, HostObject, HostValue};

/// Registry name of the metatable shared by every host userdata
pub(crate) const HOST_METATABLE: &CStr = c"luabridge.host";

/// Payload of a host userdata block
#[derive(Clone)]
pub(crate) enum HostCell {
    Object(HostObject),
    Class(Arc<ClassDescriptor>),
    Function(HostFunction),
    /// Payload already released by `__gc`
    Dropped,
}

impl HostCell {
    pub(crate) fn into_value(self) -> Option<HostValue> {
        match self {
            HostCell::Object(o) => Some(HostValue::Object(o)),
            HostCell::Class(c) => Some(HostValue::Class(c)),
            HostCell::Function(f) => Some(HostValue::Function(f)),
            HostCell::Dropped => None,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            HostCell::Object(o) => o.class().name().to_string(),
            HostCell::Class(c) => format!("class {}", c.name()),
            HostCell::Function(f) => format!("host function {}", f.name()),
            HostCell::Dropped => "finalized userdata".to_string(),
        }
    }
}

/// Copy of the host payload at `idx`, if the slot is live host userdata
pub(crate) fn host_cell_at(stack: LuaStack, idx: i32) -> Option<HostCell> {
    if stack.kind(idx) != ValueKind::Userdata {
        return None;
    }
    let cell = stack.test_userdata(idx, HOST_METATABLE) as *const HostCell;
    if cell.is_null() {
        return None;
    }
    match unsafe { &*cell } {
        HostCell::Dropped => None,
        live => Some(live.clone()),
    }
}

/// Push a host payload as userdata under the host metatable
pub(crate) fn push_cell(stack: LuaStack, cell: HostCell) -> BridgeResult<()> {
    stack.reserve(2)?;
    stack.push_userdata(cell);
    stack.set_named_metatable(HOST_METATABLE);
    Ok(())
}

/// Push a host value
pub(crate) fn push_value(ctx: &Arc<BridgeContext>, stack: LuaStack, value: &HostValue) -> BridgeResult<()> {
    stack.reserve(1)?;
    match value {
        HostValue::Null => stack.push_nil(),
        HostValue::Bool(b) => stack.push_boolean(*b),
        HostValue::I8(n) => stack.push_number(*n as f64),
        HostValue::I16(n) => stack.push_number(*n as f64),
        HostValue::I32(n) => stack.push_number(*n as f64),
        HostValue::I64(n) => stack.push_number(*n as f64),
        HostValue::F32(n) => stack.push_number(*n as f64),
        HostValue::F64(n) => stack.push_number(*n),
        HostValue::Str(s) => stack.push_str(s),
        HostValue::Bytes(b) => stack.push_bytes(b),
        HostValue::Ref(handle) => handle.push(ctx, stack)?,
        HostValue::Function(f) => push_cell(stack, HostCell::Function(f.clone()))?,
        HostValue::Object(o) => push_cell(stack, HostCell::Object(o.clone()))?,
        HostValue::Class(c) => push_cell(stack, HostCell::Class(c.clone()))?,
    }
    Ok(())
}

/// Push several host values in order
pub(crate) fn push_values(ctx: &Arc<BridgeContext>, stack: LuaStack, values: &[HostValue]) -> BridgeResult<()> {
    stack.reserve(values.len())?;
    for value in values {
        push_value(ctx, stack, value)?;
    }
    Ok(())
}

/// Convert the slot at `idx` without popping it
pub(crate) fn to_host(ctx: &Arc<BridgeContext>, stack: LuaStack, idx: i32) -> BridgeResult<HostValue> {
    let value = match stack.kind(idx) {
        ValueKind::Boolean => HostValue::Bool(stack.to_boolean(idx)),
        ValueKind::String => {
            let bytes = stack.read_bytes(idx).unwrap_or_default();
            match String::from_utf8(bytes) {
                Ok(text) => HostValue::Str(text),
                Err(e) => HostValue::Bytes(e.into_bytes()),
            }
        }
        ValueKind::Number => HostValue::F64(stack.to_number(idx)),
        ValueKind::Userdata => match host_cell_at(stack, idx).and_then(HostCell::into_value) {
            Some(value) => value,
            None => HostValue::Ref(ReferenceHandle::from_stack(ctx, stack, idx)?),
        },
        ValueKind::Function | ValueKind::Table | ValueKind::Thread | ValueKind::LightUserdata => {
            HostValue::Ref(ReferenceHandle::from_stack(ctx, stack, idx)?)
        }
        ValueKind::Nil | ValueKind::None => HostValue::Null,
    };
    Ok(value)
}

/// Convert every slot from `first` up to the top
pub(crate) fn values_from(ctx: &Arc<BridgeContext>, stack: LuaStack, first: i32) -> BridgeResult<Vec<HostValue>> {
    let top = stack.top();
    (first..=top).map(|idx| to_host(ctx, stack, idx)).collect()
}

/// Short description of a slot for error messages
pub(crate) fn describe_slot(stack: LuaStack, idx: i32) -> String {
    match host_cell_at(stack, idx) {
        Some(cell) => cell.describe(),
        None => stack.kind(idx).name().to_string(),
    }
}
