//! Bridge configuration

use serde::{Deserialize, Serialize};

/// How a script number is narrowed into a host numeric parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericCoercion {
    /// Saturating truncation (`as` casts); fractional parts are dropped
    #[default]
    Truncate,
    /// Reject fractional or out-of-range numbers
    Strict,
}

/// Per-context options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Global name of the script-visible library table
    pub library_name: String,
    /// Open the standard libraries when the context is created
    pub open_std_libs: bool,
    /// Narrowing rule for numeric arguments and proxy results
    pub numeric_coercion: NumericCoercion,
    /// Chunk name used by `load_string` / `exec`
    pub chunk_name: String,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            library_name: "luajava".to_string(),
            open_std_libs: false,
            numeric_coercion: NumericCoercion::Truncate,
            chunk_name: "=luabridge".to_string(),
        }
    }
}

impl BridgeOptions {
    /// Parse options from JSON; missing keys take their defaults
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Builder-style setter for the library name
    pub fn with_library_name(mut self, name: impl Into<String>) -> Self {
        self.library_name = name.into();
        self
    }

    /// Builder-style setter for standard library loading
    pub fn with_std_libs(mut self, open: bool) -> Self {
        self.open_std_libs = open;
        self
    }

    /// Builder-style setter for numeric coercion
    pub fn with_numeric_coercion(mut self, coercion: NumericCoercion) -> Self {
        self.numeric_coercion = coercion;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BridgeOptions::default();
        assert_eq!(options.library_name, "luajava");
        assert!(!options.open_std_libs);
        assert_eq!(options.numeric_coercion, NumericCoercion::Truncate);
    }

    #[test]
    fn test_from_json_partial() {
        let options =
            BridgeOptions::from_json(r#"{ "numeric_coercion": "strict", "open_std_libs": true }"#)
                .unwrap();
        assert_eq!(options.numeric_coercion, NumericCoercion::Strict);
        assert!(options.open_std_libs);
        assert_eq!(options.library_name, "luajava");
    }

    #[test]
    fn test_json_roundtrip() {
        let options = BridgeOptions::default().with_library_name("host");
        let text = serde_json::to_string(&options).unwrap();
        assert_eq!(BridgeOptions::from_json(&text).unwrap(), options);
    }
}
