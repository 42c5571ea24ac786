//! `LuaStack`: typed access to one engine's evaluation stack
//!
//! Every method is a thin pass-through to the C API. Operations that may run
//! arbitrary metamethods (`get_table`, `set_table`, `get_global`,
//! `set_global`) go through a protected call so that an engine error comes
//! back as a `StackError` instead of unwinding through host frames.
//!
//! Index arguments are not validated; the engine assumes they address a live
//! slot. Callers holding an index from outside use [`LuaStack::is_valid_index`]
//! first.

use std::ffi::{CStr, CString};
use std::mem;
use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;

use mlua::ffi;

use crate::error::{StackError, StackResult};
use crate::kind::{RegistryKey, ValueKind};
use crate::status::StatusCode;

/// C function signature accepted by the engine
pub type CFunction = ffi::lua_CFunction;

/// Non-owning view of a native engine state.
///
/// A `LuaStack` is only a pointer; copying it does not duplicate the
/// engine. The owner decides when [`LuaStack::close`] runs.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LuaStack {
    state: NonNull<ffi::lua_State>,
}

impl std::fmt::Debug for LuaStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LuaStack({:#x})", self.peer())
    }
}

// ============================================================================
// Protected thunks
// ============================================================================

unsafe extern "C-unwind" fn get_table_thunk(state: *mut ffi::lua_State) -> c_int {
    // [table, key] -> [table, value]
    ffi::lua_gettable(state, 1);
    1
}

unsafe extern "C-unwind" fn set_table_thunk(state: *mut ffi::lua_State) -> c_int {
    // [table, key, value] -> [table]
    ffi::lua_settable(state, 1);
    0
}

impl LuaStack {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Allocate a fresh engine state with the default allocator
    pub fn new_state() -> StackResult<Self> {
        let state = unsafe { ffi::luaL_newstate() };
        NonNull::new(state)
            .map(|state| LuaStack { state })
            .ok_or(StackError::StateAllocation)
    }

    /// Wrap a raw state pointer.
    ///
    /// # Safety
    /// `state` must be null or a live engine state that outlives every use
    /// of the returned view.
    pub unsafe fn from_raw(state: *mut ffi::lua_State) -> Option<Self> {
        NonNull::new(state).map(|state| LuaStack { state })
    }

    /// Raw state pointer
    #[inline]
    pub fn as_ptr(self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    /// Opaque 64-bit identity of the state
    #[inline]
    pub fn peer(self) -> u64 {
        self.state.as_ptr() as usize as u64
    }

    /// Destroy the engine state, running every pending finalizer.
    ///
    /// # Safety
    /// No copy of this view (or of the raw pointer) may be used afterwards.
    pub unsafe fn close(self) {
        ffi::lua_close(self.as_ptr());
    }

    /// Open every standard library into the global table
    pub fn open_libs(self) {
        unsafe { ffi::luaL_openlibs(self.as_ptr()) }
    }

    // ========================================================================
    // Stack manipulation
    // ========================================================================

    /// Index of the top slot (number of slots in the current frame)
    #[inline]
    pub fn top(self) -> i32 {
        unsafe { ffi::lua_gettop(self.as_ptr()) as i32 }
    }

    /// Set the top, filling with nil or discarding slots
    pub fn set_top(self, idx: i32) {
        unsafe { ffi::lua_settop(self.as_ptr(), idx as c_int) }
    }

    /// Convert a relative index to an absolute one
    pub fn abs_index(self, idx: i32) -> i32 {
        unsafe { ffi::lua_absindex(self.as_ptr(), idx as c_int) as i32 }
    }

    /// `idx` addresses a live slot: `1..=top` or `-top..=-1`
    pub fn is_valid_index(self, idx: i32) -> bool {
        let top = self.top();
        idx != 0 && idx.unsigned_abs() <= top as u32
    }

    /// Make sure `extra` more slots can be pushed
    pub fn reserve(self, extra: usize) -> StackResult<()> {
        let ok = unsafe { ffi::lua_checkstack(self.as_ptr(), extra as c_int) };
        if ok != 0 {
            Ok(())
        } else {
            Err(StackError::StackOverflow(extra))
        }
    }

    /// Push a copy of the slot at `idx`
    pub fn push_value(self, idx: i32) {
        unsafe { ffi::lua_pushvalue(self.as_ptr(), idx as c_int) }
    }

    /// Pop `n` slots
    pub fn pop(self, n: i32) {
        unsafe { ffi::lua_pop(self.as_ptr(), n as c_int) }
    }

    /// Remove the slot at `idx`, shifting the ones above it down
    pub fn remove(self, idx: i32) {
        unsafe { ffi::lua_remove(self.as_ptr(), idx as c_int) }
    }

    /// Move the top slot into position `idx`
    pub fn insert(self, idx: i32) {
        unsafe { ffi::lua_insert(self.as_ptr(), idx as c_int) }
    }

    /// Pseudo-index of the `n`th upvalue of the running C closure
    pub fn upvalue_index(n: i32) -> i32 {
        ffi::lua_upvalueindex(n as c_int) as i32
    }

    // ========================================================================
    // Type predicates
    // ========================================================================

    /// Basic type of the slot
    pub fn kind(self, idx: i32) -> ValueKind {
        ValueKind::from_raw(unsafe { ffi::lua_type(self.as_ptr(), idx as c_int) })
    }

    /// Slot holds a boolean
    pub fn is_boolean(self, idx: i32) -> bool {
        self.kind(idx) == ValueKind::Boolean
    }

    /// Slot holds a string (numbers are not considered strings here)
    pub fn is_string(self, idx: i32) -> bool {
        self.kind(idx) == ValueKind::String
    }

    /// Slot holds a number (strings are not considered numbers here)
    pub fn is_number(self, idx: i32) -> bool {
        self.kind(idx) == ValueKind::Number
    }

    /// Slot holds a function
    pub fn is_function(self, idx: i32) -> bool {
        self.kind(idx) == ValueKind::Function
    }

    /// Slot holds a table
    pub fn is_table(self, idx: i32) -> bool {
        self.kind(idx) == ValueKind::Table
    }

    /// Slot holds full or light userdata
    pub fn is_userdata(self, idx: i32) -> bool {
        self.kind(idx).is_userdata()
    }

    /// Slot holds nil
    pub fn is_nil(self, idx: i32) -> bool {
        self.kind(idx) == ValueKind::Nil
    }

    /// Index is past the top
    pub fn is_none(self, idx: i32) -> bool {
        self.kind(idx) == ValueKind::None
    }

    /// Primitive equality without metamethods
    pub fn raw_equal(self, a: i32, b: i32) -> bool {
        unsafe { ffi::lua_rawequal(self.as_ptr(), a as c_int, b as c_int) != 0 }
    }

    // ========================================================================
    // Primitive extraction
    // ========================================================================

    /// Truthiness of the slot
    pub fn to_boolean(self, idx: i32) -> bool {
        unsafe { ffi::lua_toboolean(self.as_ptr(), idx as c_int) != 0 }
    }

    /// Numeric value (0 when not convertible)
    pub fn to_number(self, idx: i32) -> f64 {
        unsafe { ffi::lua_tonumberx(self.as_ptr(), idx as c_int, ptr::null_mut()) as f64 }
    }

    /// Integer value (0 when not convertible)
    pub fn to_integer(self, idx: i32) -> i64 {
        unsafe { ffi::lua_tointegerx(self.as_ptr(), idx as c_int, ptr::null_mut()) as i64 }
    }

    /// Bytes of a string slot; `None` for any other kind
    pub fn read_bytes(self, idx: i32) -> Option<Vec<u8>> {
        if !self.is_string(idx) {
            return None;
        }
        let mut len: usize = 0;
        unsafe {
            let data = ffi::lua_tolstring(self.as_ptr(), idx as c_int, &mut len);
            if data.is_null() {
                return None;
            }
            Some(slice::from_raw_parts(data as *const u8, len).to_vec())
        }
    }

    /// String slot decoded lossily as UTF-8
    pub fn read_string_lossy(self, idx: i32) -> Option<String> {
        self.read_bytes(idx)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Block address of a userdata slot (null for other kinds)
    pub fn to_userdata(self, idx: i32) -> *mut c_void {
        unsafe { ffi::lua_touserdata(self.as_ptr(), idx as c_int) }
    }

    /// Block address if the slot is a userdata whose metatable is the one
    /// registered under `tname`, else null
    pub fn test_userdata(self, idx: i32, tname: &CStr) -> *mut c_void {
        unsafe { ffi::luaL_testudata(self.as_ptr(), idx as c_int, tname.as_ptr()) }
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Push nil
    pub fn push_nil(self) {
        unsafe { ffi::lua_pushnil(self.as_ptr()) }
    }

    /// Push a boolean
    pub fn push_boolean(self, b: bool) {
        unsafe { ffi::lua_pushboolean(self.as_ptr(), b as c_int) }
    }

    /// Push a float number
    pub fn push_number(self, n: f64) {
        unsafe { ffi::lua_pushnumber(self.as_ptr(), n as ffi::lua_Number) }
    }

    /// Push an integer number
    pub fn push_integer(self, n: i64) {
        unsafe { ffi::lua_pushinteger(self.as_ptr(), n as ffi::lua_Integer) }
    }

    /// Push a binary-safe string
    pub fn push_bytes(self, bytes: &[u8]) {
        unsafe {
            ffi::lua_pushlstring(self.as_ptr(), bytes.as_ptr() as *const c_char, bytes.len());
        }
    }

    /// Push a UTF-8 string
    pub fn push_str(self, s: &str) {
        self.push_bytes(s.as_bytes())
    }

    /// Push a light userdata pointer
    pub fn push_light_userdata(self, p: *mut c_void) {
        unsafe { ffi::lua_pushlightuserdata(self.as_ptr(), p) }
    }

    /// Push a C function
    pub fn push_function(self, f: CFunction) {
        self.push_closure(f, 0)
    }

    /// Pop `upvalues` slots and push a C closure capturing them
    pub fn push_closure(self, f: CFunction, upvalues: i32) {
        unsafe { ffi::lua_pushcclosure(self.as_ptr(), f, upvalues as c_int) }
    }

    /// Allocate a full userdata block, move `value` into it and push it.
    ///
    /// The engine never runs `Drop` by itself: pair this with a metatable
    /// whose `__gc` drops the value in place.
    pub fn push_userdata<T>(self, value: T) -> NonNull<T> {
        debug_assert!(mem::align_of::<T>() <= 16);
        unsafe {
            let raw = ffi::lua_newuserdatauv(self.as_ptr(), mem::size_of::<T>(), 0) as *mut T;
            ptr::write(raw, value);
            NonNull::new_unchecked(raw)
        }
    }

    /// Push an empty table
    pub fn new_table(self) {
        self.create_table(0, 0)
    }

    /// Push an empty table with preallocated space
    pub fn create_table(self, narr: i32, nrec: i32) {
        unsafe { ffi::lua_createtable(self.as_ptr(), narr as c_int, nrec as c_int) }
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// `t[k]` without metamethods; pops the key, pushes the value
    pub fn raw_get(self, idx: i32) -> ValueKind {
        ValueKind::from_raw(unsafe { ffi::lua_rawget(self.as_ptr(), idx as c_int) })
    }

    /// `t[k] = v` without metamethods; pops key and value
    pub fn raw_set(self, idx: i32) {
        unsafe { ffi::lua_rawset(self.as_ptr(), idx as c_int) }
    }

    /// Push `t[name]` without metamethods
    pub fn raw_get_field(self, idx: i32, name: &str) -> ValueKind {
        let table = self.abs_index(idx);
        self.push_str(name);
        self.raw_get(table)
    }

    /// `t[name] = top` without metamethods; pops the value
    pub fn raw_set_field(self, idx: i32, name: &str) {
        let table = self.abs_index(idx);
        self.push_str(name);
        self.insert(-2);
        self.raw_set(table);
    }

    /// `t[key]` with metamethods, protected; pops the key, pushes the value.
    ///
    /// On failure the key is still consumed and nothing is pushed.
    pub fn get_table(self, idx: i32) -> StackResult<()> {
        let table = self.abs_index(idx);
        if let Err(e) = self.reserve(3) {
            self.pop(1);
            return Err(e);
        }
        unsafe {
            ffi::lua_pushcfunction(self.as_ptr(), get_table_thunk);
            ffi::lua_pushvalue(self.as_ptr(), table as c_int);
            ffi::lua_pushvalue(self.as_ptr(), -3);
        }
        match self.pcall(2, 1) {
            Ok(()) => {
                self.remove(-2);
                Ok(())
            }
            Err(e) => {
                self.pop(1);
                Err(e)
            }
        }
    }

    /// `t[key] = value` with metamethods, protected; pops key and value
    pub fn set_table(self, idx: i32) -> StackResult<()> {
        let table = self.abs_index(idx);
        if let Err(e) = self.reserve(4) {
            self.pop(2);
            return Err(e);
        }
        unsafe {
            ffi::lua_pushcfunction(self.as_ptr(), set_table_thunk);
            ffi::lua_pushvalue(self.as_ptr(), table as c_int);
            ffi::lua_pushvalue(self.as_ptr(), -4);
            ffi::lua_pushvalue(self.as_ptr(), -4);
        }
        let result = self.pcall(3, 0);
        self.pop(2);
        result
    }

    /// Push the global table
    pub fn push_globals(self) {
        unsafe {
            ffi::lua_rawgeti(
                self.as_ptr(),
                ffi::LUA_REGISTRYINDEX,
                ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
            );
        }
    }

    /// Push the global `name` (protected)
    pub fn get_global(self, name: &str) -> StackResult<()> {
        self.push_globals();
        self.push_str(name);
        let result = self.get_table(-2);
        match result {
            Ok(()) => {
                self.remove(-2);
                Ok(())
            }
            Err(e) => {
                self.pop(1);
                Err(e)
            }
        }
    }

    /// Pop the top slot into the global `name` (protected)
    pub fn set_global(self, name: &str) -> StackResult<()> {
        self.push_globals();
        self.push_str(name);
        self.push_value(-3);
        let result = self.set_table(-3);
        self.pop(2);
        result
    }

    // ========================================================================
    // Metatables
    // ========================================================================

    /// Create (or find) the registry metatable `tname` and push it.
    /// Returns true when it was freshly created.
    pub fn new_metatable(self, tname: &CStr) -> bool {
        unsafe { ffi::luaL_newmetatable(self.as_ptr(), tname.as_ptr()) != 0 }
    }

    /// Set the registry metatable `tname` on the top slot
    pub fn set_named_metatable(self, tname: &CStr) {
        unsafe { ffi::luaL_setmetatable(self.as_ptr(), tname.as_ptr()) }
    }

    /// Push the metatable of the slot at `idx`; returns false (pushing
    /// nothing) when it has none
    pub fn get_metatable(self, idx: i32) -> bool {
        unsafe { ffi::lua_getmetatable(self.as_ptr(), idx as c_int) != 0 }
    }

    // ========================================================================
    // Registry references
    // ========================================================================

    /// Pop the top slot and pin it in the registry table
    pub fn create_ref(self) -> RegistryKey {
        RegistryKey::from_raw(unsafe { ffi::luaL_ref(self.as_ptr(), ffi::LUA_REGISTRYINDEX) })
    }

    /// Push the value pinned under `key` (nil for `NONE`/`NIL`)
    pub fn push_ref(self, key: RegistryKey) {
        unsafe {
            ffi::lua_rawgeti(
                self.as_ptr(),
                ffi::LUA_REGISTRYINDEX,
                key.raw() as ffi::lua_Integer,
            );
        }
    }

    /// Unpin `key`, making the slot reusable
    pub fn release_ref(self, key: RegistryKey) {
        unsafe { ffi::luaL_unref(self.as_ptr(), ffi::LUA_REGISTRYINDEX, key.raw()) }
    }

    // ========================================================================
    // Calls and chunks
    // ========================================================================

    /// Protected call of the function below `nargs` arguments.
    ///
    /// On failure the error object is popped and returned as the message.
    pub fn pcall(self, nargs: i32, nresults: i32) -> StackResult<()> {
        let status = unsafe { ffi::lua_pcall(self.as_ptr(), nargs as c_int, nresults as c_int, 0) };
        self.check_status(status)
    }

    /// Compile a chunk and push it as a function
    pub fn load_buffer(self, chunk: &[u8], chunk_name: &str) -> StackResult<()> {
        let name = CString::new(chunk_name.replace('\0', "")).unwrap_or_default();
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.as_ptr(),
                chunk.as_ptr() as *const c_char,
                chunk.len(),
                name.as_ptr(),
                ptr::null(),
            )
        };
        self.check_status(status)
    }

    /// Compile a chunk read from a file and push it as a function
    pub fn load_file(self, path: &Path) -> StackResult<()> {
        let chunk = std::fs::read(path).map_err(|e| StackError::ChunkIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.load_buffer(&chunk, &format!("@{}", path.display()))
    }

    /// Raise the top slot as an engine error.
    ///
    /// # Safety
    /// Must be called from inside a C function invoked by the engine, with
    /// no live Rust value that needs dropping in any frame between here and
    /// the enclosing protected call.
    pub unsafe fn raise(self) -> c_int {
        ffi::lua_error(self.as_ptr())
    }

    fn check_status(self, status: c_int) -> StackResult<()> {
        if status == ffi::LUA_OK {
            return Ok(());
        }
        let message = match self.kind(-1) {
            ValueKind::String => self.read_string_lossy(-1).unwrap_or_default(),
            ValueKind::Number => self.to_number(-1).to_string(),
            _ => String::new(),
        };
        self.pop(1);
        Err(StackError::Status {
            status: StatusCode::from_raw(status),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> LuaStack {
        let stack = LuaStack::new_state().expect("state");
        stack.open_libs();
        stack
    }

    #[test]
    fn test_push_and_read_primitives() {
        let stack = fresh();
        stack.push_boolean(true);
        stack.push_number(2.5);
        stack.push_bytes(b"a\0b");
        stack.push_nil();

        assert_eq!(stack.top(), 4);
        assert!(stack.is_boolean(1));
        assert!(stack.to_boolean(1));
        assert!(stack.is_number(2));
        assert_eq!(stack.to_number(2), 2.5);
        assert_eq!(stack.read_bytes(3), Some(b"a\0b".to_vec()));
        assert!(stack.is_nil(4));
        assert!(stack.is_none(5));
        unsafe { stack.close() }
    }

    #[test]
    fn test_valid_indices() {
        let stack = fresh();
        assert!(!stack.is_valid_index(1));
        assert!(!stack.is_valid_index(-1));
        stack.push_integer(1);
        stack.push_integer(2);
        assert!(stack.is_valid_index(2));
        assert!(stack.is_valid_index(-2));
        assert!(!stack.is_valid_index(0));
        assert!(!stack.is_valid_index(3));
        assert!(!stack.is_valid_index(-3));
        assert!(!stack.is_valid_index(ffi::LUA_REGISTRYINDEX));
        unsafe { stack.close() };
    }

    #[test]
    fn test_load_and_pcall() {
        let stack = fresh();
        stack.load_buffer(b"return 1 + 2", "=test").unwrap();
        stack.pcall(0, 1).unwrap();
        assert_eq!(stack.to_number(-1), 3.0);
        stack.pop(1);
        assert_eq!(stack.top(), 0);
        unsafe { stack.close() }
    }

    #[test]
    fn test_runtime_error_message() {
        let stack = fresh();
        stack.load_buffer(b"error('boom', 0)", "=test").unwrap();
        let err = stack.pcall(0, 0).unwrap_err();
        match err {
            StackError::Status { status, message } => {
                assert_eq!(status, StatusCode::Runtime);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(stack.top(), 0);
        unsafe { stack.close() }
    }

    #[test]
    fn test_syntax_error() {
        let stack = fresh();
        let err = stack.load_buffer(b"return +", "=bad").unwrap_err();
        assert!(matches!(
            err,
            StackError::Status {
                status: StatusCode::Syntax,
                ..
            }
        ));
        unsafe { stack.close() }
    }

    #[test]
    fn test_registry_refs() {
        let stack = fresh();
        stack.new_table();
        let key = stack.create_ref();
        assert!(key.is_slot());
        assert_eq!(stack.top(), 0);

        stack.push_ref(key);
        stack.push_ref(key);
        assert!(stack.is_table(-1));
        assert!(stack.raw_equal(-1, -2));
        stack.pop(2);

        stack.release_ref(key);
        stack.push_ref(key);
        assert!(!stack.is_table(-1));
        stack.pop(1);
        unsafe { stack.close() }
    }

    #[test]
    fn test_globals_roundtrip() {
        let stack = fresh();
        stack.push_str("value");
        stack.set_global("answer").unwrap();
        assert_eq!(stack.top(), 0);

        stack.get_global("answer").unwrap();
        assert_eq!(stack.read_string_lossy(-1).as_deref(), Some("value"));
        stack.pop(1);
        unsafe { stack.close() }
    }

    #[test]
    fn test_get_table_metamethod_error_is_caught() {
        let stack = fresh();
        stack
            .load_buffer(
                b"return setmetatable({}, { __index = function() error('nope', 0) end })",
                "=mt",
            )
            .unwrap();
        stack.pcall(0, 1).unwrap();
        stack.push_str("missing");
        let err = stack.get_table(-2).unwrap_err();
        assert!(err.to_string().contains("nope"));
        assert_eq!(stack.top(), 1);
        unsafe { stack.close() }
    }
}
