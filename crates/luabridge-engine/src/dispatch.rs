//! Script entrypoints
//!
//! C functions the engine calls back into: the metamethods of host userdata
//! and the functions of the script-visible library table. Every entrypoint
//! except `__gc` is a closure whose first two upvalues are the address of
//! the `ContextRegistry` and the context id, so it can find its context
//! without any process-wide state.
//!
//! Entrypoints never unwind into the engine. Bridge errors and host panics
//! are turned into a message, every Rust value is dropped, and only then is
//! the engine error raised.

use std::any::Any;
use std::os::raw::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use luabridge_stack::{ffi, CFunction, LuaStack};
use tracing::{debug, warn};

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::ReferenceHandle;
use crate::host::{CallScope, ClassDescriptor, HostObject};
use crate::index;
use crate::marshal::{self, HostCell, HOST_METATABLE};
use crate::proxy;
use crate::registry::ContextRegistry;

const LIBRARY_VERSION: &str = concat!("luabridge ", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Installation
// ============================================================================

fn push_context_upvalues(ctx: &BridgeContext, stack: LuaStack) {
    stack.push_light_userdata(Arc::as_ptr(ctx.registry()) as *mut c_void);
    stack.push_integer(ctx.id() as i64);
}

fn set_entry(ctx: &BridgeContext, stack: LuaStack, name: &str, f: CFunction) {
    push_context_upvalues(ctx, stack);
    stack.push_closure(f, 2);
    stack.raw_set_field(-2, name);
}

/// Create the host metatable and the library table of a fresh engine
pub(crate) fn install(ctx: &BridgeContext, stack: LuaStack) -> BridgeResult<()> {
    stack.reserve(6)?;

    stack.new_metatable(HOST_METATABLE);
    set_entry(ctx, stack, "__index", meta_index);
    set_entry(ctx, stack, "__call", meta_call);
    set_entry(ctx, stack, "__eq", meta_eq);
    set_entry(ctx, stack, "__tostring", meta_tostring);
    stack.push_function(meta_gc);
    stack.raw_set_field(-2, "__gc");
    stack.pop(1);

    let library = &ctx.options().library_name;
    stack.create_table(0, 7);
    set_entry(ctx, stack, "bindClass", lib_bind_class);
    set_entry(ctx, stack, "new", lib_new);
    set_entry(ctx, stack, "newInstance", lib_new_instance);
    set_entry(ctx, stack, "loadLib", lib_load_lib);
    set_entry(ctx, stack, "createProxy", lib_create_proxy);
    stack.push_str(library);
    stack.raw_set_field(-2, "_NAME");
    stack.push_str(LIBRARY_VERSION);
    stack.raw_set_field(-2, "_VERSION");
    stack.set_global(library)?;
    Ok(())
}

/// Push a callable that invokes method `name` on the receiver it is called with
pub(crate) fn push_method_marker(ctx: &BridgeContext, stack: LuaStack, name: &str) -> BridgeResult<()> {
    stack.reserve(4)?;
    push_context_upvalues(ctx, stack);
    stack.push_str(name);
    stack.push_closure(method_marker, 3);
    Ok(())
}

// ============================================================================
// Protection
// ============================================================================

fn context_of(stack: LuaStack) -> BridgeResult<Arc<BridgeContext>> {
    let registry = stack.to_userdata(LuaStack::upvalue_index(1)) as *const ContextRegistry;
    let id = stack.to_integer(LuaStack::upvalue_index(2));
    if registry.is_null() || id < 0 {
        return Err(BridgeError::ContextNotFound(id.max(0) as usize));
    }
    // The registry is owned by the context, which outlives its engine
    unsafe { &*registry }.lookup(id as usize)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("host panic: {}", detail)
}

/// Raise `message` as an engine error. Never returns.
unsafe fn raise(stack: LuaStack, message: String) -> c_int {
    stack.push_str(&message);
    drop(message);
    stack.raise()
}

/// Run `body` with the context locked; turn failures into engine errors
unsafe fn protect<F>(state: *mut ffi::lua_State, body: F) -> c_int
where
    F: FnOnce(&Arc<BridgeContext>, LuaStack) -> BridgeResult<c_int>,
{
    let Some(stack) = LuaStack::from_raw(state) else {
        return 0;
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let ctx = context_of(stack)?;
        let _guard = ctx.lock()?;
        body(&ctx, stack)
    }));
    let message = match outcome {
        Ok(Ok(results)) => return results,
        Ok(Err(err)) => {
            debug!(target: "luabridge::dispatch", error = %err, "entrypoint failed");
            err.to_string()
        }
        Err(payload) => {
            let message = panic_message(payload);
            warn!(target: "luabridge::dispatch", %message, "host code panicked inside an entrypoint");
            message
        }
    };
    raise(stack, message)
}

fn string_arg(stack: LuaStack, idx: i32, expected: &str) -> BridgeResult<String> {
    stack.read_string_lossy(idx).ok_or_else(|| BridgeError::InvalidParameter {
        position: idx as usize,
        expected: expected.to_string(),
        found: marshal::describe_slot(stack, idx),
    })
}

// ============================================================================
// Metamethods
// ============================================================================

unsafe extern "C-unwind" fn meta_index(state: *mut ffi::lua_State) -> c_int {
    protect(state, |ctx, stack| match marshal::host_cell_at(stack, 1) {
        Some(HostCell::Object(o)) => {
            let class = o.class().clone();
            index::index_member(ctx, stack, &class, Some(&o), 2)
        }
        Some(HostCell::Class(c)) => index::index_member(ctx, stack, &c, None, 2),
        _ => Err(BridgeError::NotIndexable(marshal::describe_slot(stack, 1))),
    })
}

unsafe extern "C-unwind" fn meta_call(state: *mut ffi::lua_State) -> c_int {
    protect(state, |ctx, stack| match marshal::host_cell_at(stack, 1) {
        Some(HostCell::Function(f)) => {
            let args = marshal::values_from(ctx, stack, 2)?;
            let scope = CallScope::new(ctx, None);
            let results = f
                .call(&scope, &args)
                .map_err(|e| BridgeError::invocation(f.name(), e))?;
            marshal::push_values(ctx, stack, &results)?;
            Ok(results.len() as c_int)
        }
        _ => Err(BridgeError::NotCallable(marshal::describe_slot(stack, 1))),
    })
}

unsafe extern "C-unwind" fn meta_eq(state: *mut ffi::lua_State) -> c_int {
    protect(state, |_, stack| {
        let equal = match (marshal::host_cell_at(stack, 1), marshal::host_cell_at(stack, 2)) {
            (Some(HostCell::Object(a)), Some(HostCell::Object(b))) => a.ptr_eq(&b),
            (Some(HostCell::Class(a)), Some(HostCell::Class(b))) => Arc::ptr_eq(&a, &b),
            (Some(HostCell::Function(a)), Some(HostCell::Function(b))) => a.ptr_eq(&b),
            _ => false,
        };
        stack.push_boolean(equal);
        Ok(1)
    })
}

unsafe extern "C-unwind" fn meta_tostring(state: *mut ffi::lua_State) -> c_int {
    protect(state, |_, stack| {
        let text = match marshal::host_cell_at(stack, 1) {
            Some(HostCell::Object(o)) => o.to_string(),
            Some(cell) => cell.describe(),
            None => marshal::describe_slot(stack, 1),
        };
        stack.push_str(&text);
        Ok(1)
    })
}

/// Drops the host payload. Runs without a context lookup, so it also works
/// while the engine is being closed.
unsafe extern "C-unwind" fn meta_gc(state: *mut ffi::lua_State) -> c_int {
    let Some(stack) = LuaStack::from_raw(state) else {
        return 0;
    };
    let cell = stack.test_userdata(1, HOST_METATABLE) as *mut HostCell;
    if cell.is_null() {
        return 0;
    }
    let payload = ptr::replace(cell, HostCell::Dropped);
    if panic::catch_unwind(AssertUnwindSafe(move || drop(payload))).is_err() {
        warn!(target: "luabridge::dispatch", "host payload panicked while being dropped");
    }
    0
}

unsafe extern "C-unwind" fn method_marker(state: *mut ffi::lua_State) -> c_int {
    protect(state, |ctx, stack| {
        let name = stack
            .read_string_lossy(LuaStack::upvalue_index(3))
            .unwrap_or_default();
        index::call_member(ctx, stack, &name)
    })
}

// ============================================================================
// Library table
// ============================================================================

fn construct(ctx: &Arc<BridgeContext>, stack: LuaStack, class: &Arc<ClassDescriptor>, first: i32) -> BridgeResult<c_int> {
    let (constructor, args) = crate::resolve::resolve_constructor(ctx, stack, class, first)?;
    let scope = CallScope::new(ctx, None);
    let value = (constructor.invoker)(&scope, &args)
        .map_err(|e| BridgeError::invocation(format!("{}.<init>", class.name()), e))?;
    marshal::push_cell(stack, HostCell::Object(HostObject::from_arc(class.clone(), value)))?;
    Ok(1)
}

unsafe extern "C-unwind" fn lib_bind_class(state: *mut ffi::lua_State) -> c_int {
    protect(state, |ctx, stack| {
        let name = string_arg(stack, 1, "class name")?;
        let class = ctx.classes().class(&name)?;
        marshal::push_cell(stack, HostCell::Class(class))?;
        Ok(1)
    })
}

unsafe extern "C-unwind" fn lib_new(state: *mut ffi::lua_State) -> c_int {
    protect(state, |ctx, stack| match marshal::host_cell_at(stack, 1) {
        Some(HostCell::Class(class)) => construct(ctx, stack, &class, 2),
        _ => Err(BridgeError::InvalidParameter {
            position: 1,
            expected: "class".to_string(),
            found: marshal::describe_slot(stack, 1),
        }),
    })
}

unsafe extern "C-unwind" fn lib_new_instance(state: *mut ffi::lua_State) -> c_int {
    protect(state, |ctx, stack| {
        let name = string_arg(stack, 1, "class name")?;
        let class = ctx.classes().class(&name)?;
        construct(ctx, stack, &class, 2)
    })
}

unsafe extern "C-unwind" fn lib_load_lib(state: *mut ffi::lua_State) -> c_int {
    protect(state, |ctx, stack| {
        let class_name = string_arg(stack, 1, "class name")?;
        let entry_name = string_arg(stack, 2, "entry point name")?;
        let class = ctx.classes().class(&class_name)?;
        let entry = class.library(&entry_name).ok_or_else(|| BridgeError::NoSuchMember {
            class: class_name.clone(),
            member: entry_name.clone(),
        })?;
        let results = (entry.loader)(ctx)
            .map_err(|e| BridgeError::invocation(format!("{}.{}", class_name, entry_name), e))?;
        marshal::push_values(ctx, stack, &results)?;
        Ok(results.len() as c_int)
    })
}

unsafe extern "C-unwind" fn lib_create_proxy(state: *mut ffi::lua_State) -> c_int {
    protect(state, |ctx, stack| {
        let names = string_arg(stack, 1, "interface list")?;
        if !stack.is_table(2) {
            return Err(BridgeError::InvalidParameter {
                position: 2,
                expected: "table".to_string(),
                found: marshal::describe_slot(stack, 2),
            });
        }
        let interfaces: Vec<&str> = names.split(',').map(str::trim).filter(|n| !n.is_empty()).collect();
        let table = ReferenceHandle::from_stack(ctx, stack, 2)?;
        let object = proxy::create_proxy(ctx, &table, &interfaces)?;
        marshal::push_cell(stack, HostCell::Object(object))?;
        Ok(1)
    })
}
