//! Error types for the bridge

use luabridge_stack::{ffi, StackError, StatusCode};

use crate::registry::ContextId;

/// Status of a failed protected call or chunk load
pub type EngineStatus = StatusCode;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No method of that name accepts the given arguments
    #[error("Invalid method call: no method `{member}` of `{class}` accepts {arity} argument(s) of the given types")]
    NoMatchingMember {
        /// Class that was searched
        class: String,
        /// Method name
        member: String,
        /// Number of arguments supplied
        arity: usize,
    },

    /// No constructor accepts the given arguments
    #[error("Invalid constructor call: no constructor of `{class}` accepts {arity} argument(s) of the given types")]
    NoMatchingConstructor {
        /// Class that was searched
        class: String,
        /// Number of arguments supplied
        arity: usize,
    },

    /// An argument does not fit the declared parameter type
    #[error("Invalid parameter {position}: expected {expected}, found {found}")]
    InvalidParameter {
        /// 1-based argument position
        position: usize,
        /// Declared parameter type
        expected: String,
        /// What was actually supplied
        found: String,
    },

    /// The value cannot be indexed
    #[error("Object is not indexable: {0}")]
    NotIndexable(String),

    /// The value cannot be called
    #[error("Object is not callable: {0}")]
    NotCallable(String),

    /// Neither a field nor a method of that name exists
    #[error("Class `{class}` has no member `{member}`")]
    NoSuchMember {
        /// Class that was searched
        class: String,
        /// Requested member name
        member: String,
    },

    /// A class or interface name is not registered
    #[error("Class or interface `{0}` not found")]
    ClassResolution(String),

    /// Protected call or chunk load failure
    #[error("{}", status.describe(message))]
    Engine {
        /// Engine status code
        status: EngineStatus,
        /// Engine message
        message: String,
    },

    /// The context has been closed
    #[error("Lua context is closed")]
    ContextClosed,

    /// No live context is registered under the id
    #[error("No Lua context with id {0}")]
    ContextNotFound(ContextId),

    /// A handle or value was used with a context that does not own it
    #[error("Reference belongs to a different Lua context")]
    CrossContext,

    /// A call produced a different number of results than expected
    #[error("Invalid number of results: expected {expected}, got {found}")]
    InvalidResults {
        /// Declared result count
        expected: usize,
        /// Actual result count
        found: usize,
    },

    /// A host invoker failed
    #[error("Error invoking `{member}`: {source}")]
    Invocation {
        /// Qualified member name (`Class.member`)
        member: String,
        /// Underlying host failure
        #[source]
        source: anyhow::Error,
    },
}

impl BridgeError {
    /// Wrap a host failure raised while invoking `member`
    pub fn invocation(member: impl Into<String>, source: anyhow::Error) -> Self {
        BridgeError::Invocation {
            member: member.into(),
            source,
        }
    }
}

impl From<StackError> for BridgeError {
    fn from(err: StackError) -> Self {
        match err {
            StackError::Status { status, message } => BridgeError::Engine { status, message },
            StackError::StateAllocation => BridgeError::Engine {
                status: StatusCode::Memory,
                message: "unable to allocate a new state".to_string(),
            },
            StackError::StackOverflow(n) => BridgeError::Engine {
                status: StatusCode::Memory,
                message: format!("stack overflow (cannot reserve {} slots)", n),
            },
            StackError::ChunkIo { path, reason } => BridgeError::Engine {
                status: StatusCode::Other(ffi::LUA_ERRFILE as i32),
                message: format!("cannot open {}: {}", path, reason),
            },
        }
    }
}
