//! Reference handles: long-lived host aliases to engine values
//!
//! A handle pins its value in the engine's registry table under an integer
//! key and always denotes the value currently stored under that key. The
//! key is released exactly once, on `release()` or on drop, whichever comes
//! first; after the owning context is closed release is a logged no-op.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use luabridge_stack::{ffi, LuaStack, RegistryKey, ValueKind};
use tracing::{debug, trace};

use crate::context::BridgeContext;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HostObject, HostValue};
use crate::marshal::{self, HostCell};
use crate::proxy;

/// Stable, comparable alias to a value living inside an engine
pub struct ReferenceHandle {
    ctx: Arc<BridgeContext>,
    key: RegistryKey,
    released: AtomicBool,
}

impl ReferenceHandle {
    /// Pin the value at `idx`
    pub(crate) fn from_stack(ctx: &Arc<BridgeContext>, stack: LuaStack, idx: i32) -> BridgeResult<Self> {
        stack.reserve(1)?;
        stack.push_value(idx);
        let key = stack.create_ref();
        trace!(target: "luabridge::handle", ctx = ctx.id(), key = key.raw(), "handle created");
        Ok(Self {
            ctx: ctx.clone(),
            key,
            released: AtomicBool::new(false),
        })
    }

    /// Owning context
    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    /// Registry key the value is pinned under
    pub fn key(&self) -> RegistryKey {
        self.key
    }

    /// `release()` has run (explicitly or through a failed clone)
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Push the aliased value onto `stack` of `ctx`
    pub(crate) fn push(&self, ctx: &Arc<BridgeContext>, stack: LuaStack) -> BridgeResult<()> {
        if !Arc::ptr_eq(&self.ctx, ctx) {
            return Err(BridgeError::CrossContext);
        }
        stack.reserve(1)?;
        if self.is_released() {
            stack.push_nil();
        } else {
            stack.push_ref(self.key);
        }
        Ok(())
    }

    /// Unpin the value. Later calls, and calls after the context closed, do nothing.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.ctx.lock() {
            Ok(guard) => {
                guard.stack().release_ref(self.key);
                trace!(target: "luabridge::handle", ctx = self.ctx.id(), key = self.key.raw(), "handle released");
            }
            Err(_) => {
                debug!(
                    target: "luabridge::handle",
                    ctx = self.ctx.id(),
                    key = self.key.raw(),
                    "release after context close ignored"
                );
            }
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Kind of the aliased value
    pub fn kind(&self) -> BridgeResult<ValueKind> {
        self.ctx.with_frame(|stack| {
            self.push(&self.ctx, stack)?;
            Ok(stack.kind(-1))
        })
    }

    fn is_kind(&self, kind: ValueKind) -> bool {
        self.kind().is_ok_and(|k| k == kind)
    }

    /// Value is nil
    pub fn is_nil(&self) -> bool {
        self.is_kind(ValueKind::Nil)
    }

    /// Value is a boolean
    pub fn is_boolean(&self) -> bool {
        self.is_kind(ValueKind::Boolean)
    }

    /// Value is a number
    pub fn is_number(&self) -> bool {
        self.is_kind(ValueKind::Number)
    }

    /// Value is a string
    pub fn is_string(&self) -> bool {
        self.is_kind(ValueKind::String)
    }

    /// Value is a function
    pub fn is_function(&self) -> bool {
        self.is_kind(ValueKind::Function)
    }

    /// Value is a table
    pub fn is_table(&self) -> bool {
        self.is_kind(ValueKind::Table)
    }

    /// Value is full or light userdata
    pub fn is_userdata(&self) -> bool {
        self.kind().is_ok_and(ValueKind::is_userdata)
    }

    /// Value is a host object, class or function
    pub fn is_host_value(&self) -> bool {
        self.ctx
            .with_frame(|stack| {
                self.push(&self.ctx, stack)?;
                Ok(marshal::host_cell_at(stack, -1).is_some())
            })
            .unwrap_or(false)
    }

    /// Marshal the aliased value to the host
    pub fn to_host(&self) -> BridgeResult<HostValue> {
        self.ctx.with_frame(|stack| {
            self.push(&self.ctx, stack)?;
            marshal::to_host(&self.ctx, stack, -1)
        })
    }

    // ========================================================================
    // Indexing
    // ========================================================================

    /// `value[name]`
    pub fn field(&self, name: &str) -> BridgeResult<ReferenceHandle> {
        self.get(&HostValue::Str(name.to_string()))
    }

    /// `value[n]`
    pub fn index(&self, n: i64) -> BridgeResult<ReferenceHandle> {
        self.get(&HostValue::I64(n))
    }

    /// `value[key]` where the key is itself a handle of the same context
    pub fn field_by_handle(&self, key: &ReferenceHandle) -> BridgeResult<ReferenceHandle> {
        if !Arc::ptr_eq(&self.ctx, &key.ctx) {
            return Err(BridgeError::CrossContext);
        }
        self.get(&HostValue::Ref(key.clone()))
    }

    /// `value[key]`, honoring `__index`
    pub fn get(&self, key: &HostValue) -> BridgeResult<ReferenceHandle> {
        self.ctx.with_frame(|stack| {
            self.push(&self.ctx, stack)?;
            match stack.kind(-1) {
                ValueKind::Table | ValueKind::Userdata | ValueKind::LightUserdata => {}
                other => return Err(BridgeError::NotIndexable(other.name().to_string())),
            }
            marshal::push_value(&self.ctx, stack, key)?;
            stack.get_table(-2)?;
            ReferenceHandle::from_stack(&self.ctx, stack, -1)
        })
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Protected call expecting exactly `nresults` results
    pub fn call(&self, args: &[HostValue], nresults: usize) -> BridgeResult<Vec<HostValue>> {
        self.ctx.with_frame(|stack| {
            self.push(&self.ctx, stack)?;
            match stack.kind(-1) {
                ValueKind::Function | ValueKind::Table | ValueKind::Userdata => {}
                other => return Err(BridgeError::NotCallable(other.name().to_string())),
            }
            call_function(&self.ctx, stack, args, Some(nresults))
        })
    }

    /// Protected call returning the first result
    pub fn call1(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        let mut values = self.call(args, 1)?;
        values.pop().ok_or(BridgeError::InvalidResults { expected: 1, found: 0 })
    }

    /// Host object implementing `interfaces` by dispatching into this table
    pub fn create_proxy(&self, interfaces: &[&str]) -> BridgeResult<HostObject> {
        proxy::create_proxy(&self.ctx, self, interfaces)
    }
}

/// Call the function on top of `stack` with `args`.
///
/// Consumes the function; `None` returns every result.
pub(crate) fn call_function(
    ctx: &Arc<BridgeContext>,
    stack: LuaStack,
    args: &[HostValue],
    nresults: Option<usize>,
) -> BridgeResult<Vec<HostValue>> {
    let base = stack.top() - 1;
    marshal::push_values(ctx, stack, args)?;
    let wanted = nresults.map_or(ffi::LUA_MULTRET, |n| n as i32);
    stack.pcall(args.len() as i32, wanted)?;
    let values = marshal::values_from(ctx, stack, base + 1)?;
    stack.set_top(base);
    Ok(values)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn describe_value(stack: LuaStack, idx: i32) -> String {
    match stack.kind(idx) {
        ValueKind::Nil | ValueKind::None => "nil".to_string(),
        ValueKind::Boolean => stack.to_boolean(idx).to_string(),
        ValueKind::Number => format_number(stack.to_number(idx)),
        ValueKind::String => stack.read_string_lossy(idx).unwrap_or_default(),
        ValueKind::Function => "Lua Function".to_string(),
        ValueKind::Table => "Lua Table".to_string(),
        ValueKind::Thread => "Lua Thread".to_string(),
        ValueKind::Userdata => match marshal::host_cell_at(stack, idx) {
            Some(HostCell::Object(o)) => o.to_string(),
            Some(cell) => cell.describe(),
            None => "Userdata".to_string(),
        },
        ValueKind::LightUserdata => "Userdata".to_string(),
    }
}

impl Clone for ReferenceHandle {
    /// Pins the same value under a fresh key
    fn clone(&self) -> Self {
        let key = if self.is_released() {
            RegistryKey::NONE
        } else {
            self.ctx
                .with_frame(|stack| {
                    self.push(&self.ctx, stack)?;
                    Ok(stack.create_ref())
                })
                .unwrap_or(RegistryKey::NONE)
        };
        Self {
            ctx: self.ctx.clone(),
            key,
            released: AtomicBool::new(key == RegistryKey::NONE),
        }
    }
}

impl PartialEq for ReferenceHandle {
    /// Same owning engine and raw-equal values
    fn eq(&self, other: &Self) -> bool {
        if !Arc::ptr_eq(&self.ctx, &other.ctx) {
            return false;
        }
        self.ctx
            .with_frame(|stack| {
                self.push(&self.ctx, stack)?;
                other.push(&self.ctx, stack)?;
                Ok(stack.raw_equal(-1, -2))
            })
            .unwrap_or(false)
    }
}

impl Drop for ReferenceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Display for ReferenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.ctx.with_frame(|stack| {
            self.push(&self.ctx, stack)?;
            Ok(describe_value(stack, -1))
        });
        match text {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<closed>"),
        }
    }
}

impl fmt::Debug for ReferenceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceHandle")
            .field("ctx", &self.ctx.id())
            .field("key", &self.key.raw())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ClassRegistry;
    use crate::options::BridgeOptions;
    use crate::registry::ContextRegistry;

    fn context() -> Arc<BridgeContext> {
        BridgeContext::create(
            &ContextRegistry::new(),
            Arc::new(ClassRegistry::new()),
            BridgeOptions::default().with_std_libs(true),
        )
        .unwrap()
    }

    #[test]
    fn test_handle_tracks_current_value() {
        let ctx = context();
        ctx.exec("t = { n = 1 }").unwrap();
        let t = ctx.global_handle("t").unwrap();
        ctx.exec("t.n = 2").unwrap();
        assert_eq!(t.field("n").unwrap().to_host().unwrap().as_f64(), Some(2.0));
    }

    #[test]
    fn test_equality_is_by_value_not_key() {
        let ctx = context();
        ctx.exec("t = {} ; u = t ; v = {}").unwrap();
        let t = ctx.global_handle("t").unwrap();
        let u = ctx.global_handle("u").unwrap();
        let v = ctx.global_handle("v").unwrap();
        assert_ne!(t.key(), u.key());
        assert_eq!(t, u);
        assert_ne!(t, v);
        assert_eq!(t, t.clone());
    }

    #[test]
    fn test_release_is_idempotent() {
        let ctx = context();
        let t = ctx.new_table().unwrap();
        t.release();
        t.release();
        assert!(t.is_released());
        assert!(t.is_nil());
    }

    #[test]
    fn test_release_after_close_is_noop() {
        let ctx = context();
        let t = ctx.new_table().unwrap();
        ctx.close().unwrap();
        t.release();
        assert!(matches!(t.kind(), Err(BridgeError::ContextClosed)));
        assert_eq!(t.to_string(), "<closed>");
    }

    #[test]
    fn test_field_on_non_indexable() {
        let ctx = context();
        ctx.exec("n = 5").unwrap();
        let n = ctx.global_handle("n").unwrap();
        assert!(matches!(n.field("x"), Err(BridgeError::NotIndexable(_))));
    }

    #[test]
    fn test_index_and_field_by_handle() {
        let ctx = context();
        ctx.exec("list = { 'a', 'b' } ; key = 'k' ; map = { k = 'v' }").unwrap();
        let list = ctx.global_handle("list").unwrap();
        assert_eq!(list.index(2).unwrap().to_host().unwrap().as_str(), Some("b"));

        let map = ctx.global_handle("map").unwrap();
        let key = ctx.global_handle("key").unwrap();
        assert_eq!(map.field_by_handle(&key).unwrap().to_string(), "v");
    }

    #[test]
    fn test_cross_context_rejected() {
        let registry = ContextRegistry::new();
        let a = BridgeContext::create(&registry, Arc::new(ClassRegistry::new()), BridgeOptions::default()).unwrap();
        let b = BridgeContext::create(&registry, Arc::new(ClassRegistry::new()), BridgeOptions::default()).unwrap();
        let ta = a.new_table().unwrap();
        let tb = b.new_table().unwrap();

        assert!(matches!(ta.field_by_handle(&tb), Err(BridgeError::CrossContext)));
        assert!(matches!(b.set_global("x", ta.clone()), Err(BridgeError::CrossContext)));
        assert_ne!(ta, tb);
    }

    #[test]
    fn test_call_and_call1() {
        let ctx = context();
        ctx.exec("function pair(a) return a, a * 2 end").unwrap();
        let pair = ctx.global_handle("pair").unwrap();

        let values = pair.call(&[3i32.into()], 2).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].as_f64(), Some(6.0));
        assert_eq!(pair.call1(&[4i32.into()]).unwrap().as_f64(), Some(4.0));
        // missing results are filled with nil
        assert!(pair.call(&[1i32.into()], 3).unwrap()[2].is_null());
    }

    #[test]
    fn test_call_non_callable() {
        let ctx = context();
        ctx.exec("s = 'text'").unwrap();
        let s = ctx.global_handle("s").unwrap();
        assert!(matches!(s.call(&[], 0), Err(BridgeError::NotCallable(_))));
    }

    #[test]
    fn test_display() {
        let ctx = context();
        let values = ctx.exec("return {}, function() end, 3, 2.5, 'x', false").unwrap();
        let shown: Vec<String> = [&values[0], &values[1]]
            .iter()
            .map(|v| v.as_handle().unwrap().to_string())
            .collect();
        assert_eq!(shown, vec!["Lua Table", "Lua Function"]);

        ctx.exec("n = 3 ; f = 2.5").unwrap();
        assert_eq!(ctx.global_handle("n").unwrap().to_string(), "3");
        assert_eq!(ctx.global_handle("f").unwrap().to_string(), "2.5");
        assert_eq!(ctx.global_handle("none").unwrap().to_string(), "nil");
    }
}
