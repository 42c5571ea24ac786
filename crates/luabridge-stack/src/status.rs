//! Engine status codes returned by protected calls and chunk loading

use std::os::raw::c_int;

use mlua::ffi;

/// Status code of a protected call or chunk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// `LUA_OK`
    Ok,
    /// `LUA_YIELD` (never produced by the bridge; kept for completeness)
    Yield,
    /// `LUA_ERRRUN`
    Runtime,
    /// `LUA_ERRSYNTAX`
    Syntax,
    /// `LUA_ERRMEM`
    Memory,
    /// `LUA_ERRERR`
    HandlerFailure,
    /// Any code the adapter does not know about
    Other(i32),
}

impl StatusCode {
    /// Decode a raw status returned by the C API
    pub fn from_raw(code: c_int) -> Self {
        match code {
            ffi::LUA_OK => StatusCode::Ok,
            ffi::LUA_YIELD => StatusCode::Yield,
            ffi::LUA_ERRRUN => StatusCode::Runtime,
            ffi::LUA_ERRSYNTAX => StatusCode::Syntax,
            ffi::LUA_ERRMEM => StatusCode::Memory,
            ffi::LUA_ERRERR => StatusCode::HandlerFailure,
            other => StatusCode::Other(other as i32),
        }
    }

    /// Raw numeric value of the code
    pub fn raw(self) -> i32 {
        match self {
            StatusCode::Ok => ffi::LUA_OK as i32,
            StatusCode::Yield => ffi::LUA_YIELD as i32,
            StatusCode::Runtime => ffi::LUA_ERRRUN as i32,
            StatusCode::Syntax => ffi::LUA_ERRSYNTAX as i32,
            StatusCode::Memory => ffi::LUA_ERRMEM as i32,
            StatusCode::HandlerFailure => ffi::LUA_ERRERR as i32,
            StatusCode::Other(code) => code,
        }
    }

    /// Check for `LUA_OK`
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Human-readable prefix used when reporting a failure with this code
    pub fn prefix(self) -> String {
        match self {
            StatusCode::Ok => String::new(),
            StatusCode::Yield => "Coroutine yielded.".to_string(),
            StatusCode::Runtime => "Runtime error.".to_string(),
            StatusCode::Syntax => "Syntax error.".to_string(),
            StatusCode::Memory => "Memory allocation error.".to_string(),
            StatusCode::HandlerFailure => {
                "Error while running the error handler function.".to_string()
            }
            StatusCode::Other(code) => format!("Lua error code {}.", code),
        }
    }

    /// Prefix joined with the engine's own message
    pub fn describe(self, message: &str) -> String {
        if message.is_empty() {
            self.prefix()
        } else {
            format!("{} {}", self.prefix(), message)
        }
    }
}
