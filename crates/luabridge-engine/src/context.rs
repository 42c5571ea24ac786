//! Bridge context
//!
//! A `BridgeContext` owns exactly one native engine instance together with
//! the class registry it resolves names against and its options. Every
//! operation that touches engine state runs under the context's re-entrant
//! lock, so host → script → host chains on one thread nest freely while
//! other threads serialize.
//!
//! # Lifetime
//!
//! `close` is terminal and idempotent in effect (a second call reports
//! `ContextClosed`). Dropping the last `Arc` closes the context too. Host
//! values stored inside the engine may hold handles back to the context, so
//! a context that has handed out proxies or handles to script code should be
//! closed explicitly.

use std::cell::Cell;
use std::fmt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use luabridge_stack::{ffi, LuaStack};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::debug;

use crate::dispatch;
use crate::error::{BridgeError, BridgeResult};
use crate::function::HostFunction;
use crate::handle::{call_function, ReferenceHandle};
use crate::host::{ClassRegistry, HostObject, HostValue};
use crate::index;
use crate::marshal;
use crate::options::BridgeOptions;
use crate::proxy;
use crate::registry::{ContextId, ContextRegistry};

// ============================================================================
// NativeHandle
// ============================================================================

/// Opaque 64-bit identity of a native engine instance; `0` once closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(u64);

impl NativeHandle {
    /// Handle of a closed context
    pub const CLOSED: NativeHandle = NativeHandle(0);

    /// Raw value
    pub fn raw(self) -> u64 {
        self.0
    }

    /// True for [`NativeHandle::CLOSED`]
    pub fn is_closed(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ============================================================================
// Engine state behind the lock
// ============================================================================

struct Engine {
    /// Null once the engine has been closed
    state: Cell<*mut ffi::lua_State>,
    /// Number of live `EngineGuard`s (re-entrant depth)
    depth: Cell<u32>,
    /// `close` was requested while a guard was live
    close_pending: Cell<bool>,
}

// Only reachable through the context's ReentrantMutex
unsafe impl Send for Engine {}

/// Exclusive access to a context's engine for the guard's lifetime
pub(crate) struct EngineGuard<'a> {
    context: &'a BridgeContext,
    engine: ReentrantMutexGuard<'a, Engine>,
    stack: LuaStack,
}

impl EngineGuard<'_> {
    /// Main stack of the engine
    pub(crate) fn stack(&self) -> LuaStack {
        self.stack
    }
}

impl Drop for EngineGuard<'_> {
    fn drop(&mut self) {
        let depth = self.engine.depth.get().saturating_sub(1);
        self.engine.depth.set(depth);
        if depth == 0 && self.engine.close_pending.replace(false) {
            self.context.shutdown(&self.engine);
        }
    }
}

// ============================================================================
// BridgeContext
// ============================================================================

/// One engine instance and everything the bridge needs around it
pub struct BridgeContext {
    id: ContextId,
    registry: Arc<ContextRegistry>,
    classes: Arc<ClassRegistry>,
    options: BridgeOptions,
    engine: ReentrantMutex<Engine>,
    closed: AtomicBool,
}

impl BridgeContext {
    /// Create a context, register it, and install the library table
    pub fn create(
        registry: &Arc<ContextRegistry>,
        classes: Arc<ClassRegistry>,
        options: BridgeOptions,
    ) -> BridgeResult<Arc<Self>> {
        let stack = LuaStack::new_state()?;
        let context = registry.allocate(|id| BridgeContext {
            id,
            registry: registry.clone(),
            classes,
            options,
            engine: ReentrantMutex::new(Engine {
                state: Cell::new(stack.as_ptr()),
                depth: Cell::new(0),
                close_pending: Cell::new(false),
            }),
            closed: AtomicBool::new(false),
        });

        {
            let guard = context.lock()?;
            let stack = guard.stack();
            if context.options.open_std_libs {
                stack.open_libs();
            }
            dispatch::install(&context, stack)?;
        }

        debug!(
            target: "luabridge::registry",
            id = context.id,
            peer = stack.peer(),
            library = %context.options.library_name,
            "context created"
        );
        Ok(context)
    }

    /// Registry id
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Registry this context is listed in
    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Classes visible to script code
    pub fn classes(&self) -> &Arc<ClassRegistry> {
        &self.classes
    }

    /// Options the context was created with
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Context has been closed (or a close is pending)
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Identity of the native engine instance
    pub fn native_handle(&self) -> NativeHandle {
        let engine = self.engine.lock();
        NativeHandle(engine.state.get() as usize as u64)
    }

    /// Acquire the context lock; fails once the context is closed
    pub(crate) fn lock(&self) -> BridgeResult<EngineGuard<'_>> {
        if self.is_closed() {
            return Err(BridgeError::ContextClosed);
        }
        let engine = self.engine.lock();
        if self.is_closed() {
            return Err(BridgeError::ContextClosed);
        }
        let stack = unsafe { LuaStack::from_raw(engine.state.get()) }.ok_or(BridgeError::ContextClosed)?;
        engine.depth.set(engine.depth.get() + 1);
        Ok(EngineGuard {
            context: self,
            engine,
            stack,
        })
    }

    /// Run `f` on the main stack, restoring the stack top afterwards
    pub(crate) fn with_frame<R>(&self, f: impl FnOnce(LuaStack) -> BridgeResult<R>) -> BridgeResult<R> {
        let guard = self.lock()?;
        let stack = guard.stack();
        let top = stack.top();
        let result = f(stack);
        stack.set_top(top);
        result
    }

    /// Close the engine.
    ///
    /// Called from inside a script callback, the engine is torn down once
    /// the outermost operation on this context returns; everything fails
    /// with `ContextClosed` from now on either way.
    pub fn close(&self) -> BridgeResult<()> {
        let engine = self.engine.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::ContextClosed);
        }
        if engine.depth.get() > 0 {
            engine.close_pending.set(true);
            debug!(target: "luabridge::registry", id = self.id, "close deferred until the engine is idle");
            return Ok(());
        }
        self.shutdown(&engine);
        Ok(())
    }

    fn shutdown(&self, engine: &Engine) {
        let state = engine.state.replace(ptr::null_mut());
        self.finish(state);
    }

    fn finish(&self, state: *mut ffi::lua_State) {
        if let Some(stack) = unsafe { LuaStack::from_raw(state) } {
            unsafe { stack.close() };
        }
        self.registry.release(self.id, self);
        debug!(target: "luabridge::registry", id = self.id, "context closed");
    }

    // ========================================================================
    // Raw stack access
    // ========================================================================

    /// Run `f` with the locked main stack. The stack is left as `f` leaves it.
    pub(crate) fn with_stack<R>(&self, f: impl FnOnce(LuaStack) -> R) -> BridgeResult<R> {
        let guard = self.lock()?;
        Ok(f(guard.stack()))
    }

    /// Handle to the value at `index` of the main stack. `index` must name a
    /// live slot (`1..=top` or `-top..=-1`); anything else is rejected before
    /// the engine sees it.
    pub fn handle_at(self: &Arc<Self>, index: i32) -> BridgeResult<ReferenceHandle> {
        let guard = self.lock()?;
        let stack = guard.stack();
        if !stack.is_valid_index(index) {
            return Err(BridgeError::InvalidParameter {
                position: index.unsigned_abs() as usize,
                expected: "stack slot".to_string(),
                found: format!("index {} with {} value(s) on the stack", index, stack.top()),
            });
        }
        ReferenceHandle::from_stack(self, stack, index)
    }

    // ========================================================================
    // Libraries and chunks
    // ========================================================================

    /// Open every standard library
    pub fn open_libs(&self) -> BridgeResult<()> {
        let guard = self.lock()?;
        guard.stack().open_libs();
        Ok(())
    }

    /// Compile source text into a function handle
    pub fn load_string(self: &Arc<Self>, source: &str) -> BridgeResult<ReferenceHandle> {
        let name = self.options.chunk_name.clone();
        self.load_bytes(source.as_bytes(), &name)
    }

    /// Compile a (text or precompiled) chunk into a function handle
    pub fn load_bytes(self: &Arc<Self>, chunk: &[u8], name: &str) -> BridgeResult<ReferenceHandle> {
        self.with_frame(|stack| {
            stack.load_buffer(chunk, name)?;
            ReferenceHandle::from_stack(self, stack, -1)
        })
    }

    /// Compile a file into a function handle
    pub fn load_file(self: &Arc<Self>, path: impl AsRef<Path>) -> BridgeResult<ReferenceHandle> {
        self.with_frame(|stack| {
            stack.load_file(path.as_ref())?;
            ReferenceHandle::from_stack(self, stack, -1)
        })
    }

    /// Protected call returning every result
    pub fn pcall(self: &Arc<Self>, function: &ReferenceHandle, args: &[HostValue]) -> BridgeResult<Vec<HostValue>> {
        self.with_frame(|stack| {
            function.push(self, stack)?;
            call_function(self, stack, args, None)
        })
    }

    /// Compile and run source text, returning every result
    pub fn exec(self: &Arc<Self>, source: &str) -> BridgeResult<Vec<HostValue>> {
        self.with_frame(|stack| {
            stack.load_buffer(source.as_bytes(), &self.options.chunk_name)?;
            call_function(self, stack, &[], None)
        })
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Value of a global
    pub fn get_global(self: &Arc<Self>, name: &str) -> BridgeResult<HostValue> {
        self.with_frame(|stack| {
            stack.get_global(name)?;
            marshal::to_host(self, stack, -1)
        })
    }

    /// Assign a global
    pub fn set_global(self: &Arc<Self>, name: &str, value: impl Into<HostValue>) -> BridgeResult<()> {
        let value = value.into();
        self.with_frame(|stack| {
            marshal::push_value(self, stack, &value)?;
            stack.set_global(name)?;
            Ok(())
        })
    }

    /// Handle to the current value of a global
    pub fn global_handle(self: &Arc<Self>, name: &str) -> BridgeResult<ReferenceHandle> {
        self.with_frame(|stack| {
            stack.get_global(name)?;
            ReferenceHandle::from_stack(self, stack, -1)
        })
    }

    /// Handle to a fresh empty table
    pub fn new_table(self: &Arc<Self>) -> BridgeResult<ReferenceHandle> {
        self.with_frame(|stack| {
            stack.new_table();
            ReferenceHandle::from_stack(self, stack, -1)
        })
    }

    // ========================================================================
    // Host objects
    // ========================================================================

    /// Expose a host function as a global under its own name
    pub fn register_function(self: &Arc<Self>, function: HostFunction) -> BridgeResult<()> {
        let name = function.name().to_string();
        self.set_global(&name, function)
    }

    /// Host object implementing `interfaces` by dispatching into `table`
    pub fn create_proxy(self: &Arc<Self>, table: &ReferenceHandle, interfaces: &[&str]) -> BridgeResult<HostObject> {
        proxy::create_proxy(self, table, interfaces)
    }

    /// Call a method of a host object from host code
    pub fn invoke_method(
        self: &Arc<Self>,
        target: &HostObject,
        name: &str,
        args: &[HostValue],
    ) -> BridgeResult<HostValue> {
        index::call_method(self, target, name, args)
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for BridgeContext {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let state = self.engine.get_mut().state.replace(ptr::null_mut());
            self.finish(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luabridge_stack::StatusCode;

    fn context() -> Arc<BridgeContext> {
        BridgeContext::create(
            &ContextRegistry::new(),
            Arc::new(ClassRegistry::new()),
            BridgeOptions::default().with_std_libs(true),
        )
        .unwrap()
    }

    #[test]
    fn test_exec_returns_all_results() {
        let ctx = context();
        let values = ctx.exec("return 1, 'two', true, nil").unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values[0].as_f64(), Some(1.0));
        assert_eq!(values[1].as_str(), Some("two"));
        assert_eq!(values[2].as_bool(), Some(true));
        assert!(values[3].is_null());
    }

    #[test]
    fn test_globals_roundtrip() {
        let ctx = context();
        ctx.set_global("answer", 42i32).unwrap();
        assert_eq!(ctx.get_global("answer").unwrap().as_f64(), Some(42.0));
        let doubled = ctx.exec("return answer * 2").unwrap();
        assert_eq!(doubled[0].as_f64(), Some(84.0));
        assert!(ctx.get_global("missing").unwrap().is_null());
    }

    #[test]
    fn test_load_then_pcall() {
        let ctx = context();
        let chunk = ctx.load_string("local a, b = ... return a + b").unwrap();
        assert!(chunk.is_function());
        let values = ctx.pcall(&chunk, &[2i32.into(), 3.5f64.into()]).unwrap();
        assert_eq!(values[0].as_f64(), Some(5.5));
    }

    #[test]
    fn test_syntax_error_status() {
        let ctx = context();
        match ctx.load_string("return +") {
            Err(BridgeError::Engine { status, .. }) => assert_eq!(status, StatusCode::Syntax),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_runtime_error_status() {
        let ctx = context();
        let err = ctx.exec("error('bad thing', 0)").unwrap_err();
        assert_eq!(err.to_string(), "Runtime error. bad thing");
    }

    #[test]
    fn test_stack_is_balanced() {
        let ctx = context();
        let before = ctx.with_stack(|s| s.top()).unwrap();
        ctx.exec("return 1, 2, 3").unwrap();
        let _ = ctx.exec("error('x')");
        ctx.get_global("print").unwrap();
        assert_eq!(ctx.with_stack(|s| s.top()).unwrap(), before);
    }

    #[test]
    fn test_handle_at() {
        let ctx = context();
        ctx.with_stack(|s| s.push_str("pinned")).unwrap();
        let handle = ctx.handle_at(-1).unwrap();
        ctx.with_stack(|s| s.pop(1)).unwrap();
        assert_eq!(handle.to_host().unwrap().as_str(), Some("pinned"));
    }

    #[test]
    fn test_handle_at_rejects_dead_slots() {
        let ctx = context();
        let top = ctx.with_stack(|s| s.top()).unwrap();
        for index in [0, top + 1, -(top + 1), -3 - top, ffi::LUA_REGISTRYINDEX] {
            assert!(
                matches!(ctx.handle_at(index), Err(BridgeError::InvalidParameter { .. })),
                "index {index}"
            );
        }
        assert_eq!(ctx.with_stack(|s| s.top()).unwrap(), top);
    }

    #[test]
    fn test_close_is_terminal() {
        let ctx = context();
        assert!(!ctx.native_handle().is_closed());
        ctx.close().unwrap();

        assert!(ctx.is_closed());
        assert!(ctx.native_handle().is_closed());
        assert!(matches!(ctx.close(), Err(BridgeError::ContextClosed)));
        assert!(matches!(ctx.exec("return 1"), Err(BridgeError::ContextClosed)));
        assert!(matches!(ctx.get_global("x"), Err(BridgeError::ContextClosed)));
    }

    #[test]
    fn test_std_libs_are_optional() {
        let ctx = BridgeContext::create(
            &ContextRegistry::new(),
            Arc::new(ClassRegistry::new()),
            BridgeOptions::default(),
        )
        .unwrap();
        assert!(ctx.get_global("string").unwrap().is_null());
        ctx.open_libs().unwrap();
        assert!(!ctx.get_global("string").unwrap().is_null());
    }
}
