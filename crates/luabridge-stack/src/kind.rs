//! Value kinds and registry keys
//!
//! `ValueKind` mirrors the engine's basic type tags. `RegistryKey` is the
//! integer returned by `luaL_ref` for a value pinned in the registry table.

use std::fmt;
use std::os::raw::c_int;

use mlua::ffi;

/// Basic type of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Index refers to no slot at all
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Light userdata (raw pointer)
    LightUserdata,
    /// Number (integer or float subtype)
    Number,
    /// String (binary safe)
    String,
    /// Table
    Table,
    /// Function (script or C)
    Function,
    /// Full userdata
    Userdata,
    /// Coroutine
    Thread,
}

impl ValueKind {
    /// Decode the result of `lua_type`
    pub fn from_raw(tag: c_int) -> Self {
        match tag {
            ffi::LUA_TNIL => ValueKind::Nil,
            ffi::LUA_TBOOLEAN => ValueKind::Boolean,
            ffi::LUA_TLIGHTUSERDATA => ValueKind::LightUserdata,
            ffi::LUA_TNUMBER => ValueKind::Number,
            ffi::LUA_TSTRING => ValueKind::String,
            ffi::LUA_TTABLE => ValueKind::Table,
            ffi::LUA_TFUNCTION => ValueKind::Function,
            ffi::LUA_TUSERDATA => ValueKind::Userdata,
            ffi::LUA_TTHREAD => ValueKind::Thread,
            _ => ValueKind::None,
        }
    }

    /// Type name as the engine spells it
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::None => "no value",
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::LightUserdata | ValueKind::Userdata => "userdata",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::Thread => "thread",
        }
    }

    /// Either kind of userdata
    pub const fn is_userdata(self) -> bool {
        matches!(self, ValueKind::Userdata | ValueKind::LightUserdata)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key of a value pinned in the engine's registry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RegistryKey(c_int);

impl RegistryKey {
    /// Key that refers to nothing (`LUA_NOREF`)
    pub const NONE: RegistryKey = RegistryKey(ffi::LUA_NOREF);

    /// Key returned when the pinned value was nil (`LUA_REFNIL`)
    pub const NIL: RegistryKey = RegistryKey(ffi::LUA_REFNIL);

    /// Wrap a raw key
    pub const fn from_raw(raw: c_int) -> Self {
        RegistryKey(raw)
    }

    /// Raw key value
    pub const fn raw(self) -> c_int {
        self.0
    }

    /// True for keys that actually occupy a registry slot
    pub const fn is_slot(self) -> bool {
        self.0 != ffi::LUA_NOREF && self.0 != ffi::LUA_REFNIL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ValueKind::Table.name(), "table");
        assert_eq!(ValueKind::LightUserdata.name(), "userdata");
        assert_eq!(ValueKind::from_raw(ffi::LUA_TSTRING), ValueKind::String);
        assert_eq!(ValueKind::from_raw(-1), ValueKind::None);
    }

    #[test]
    fn test_registry_key_slots() {
        assert!(!RegistryKey::NONE.is_slot());
        assert!(!RegistryKey::NIL.is_slot());
        assert!(RegistryKey::from_raw(3).is_slot());
    }
}
