//! Error types for the stack adapter

use crate::status::StatusCode;

/// Result type for stack operations
pub type StackResult<T> = Result<T, StackError>;

/// Stack adapter error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum StackError {
    /// `luaL_newstate` returned null
    #[error("Unable to allocate a new Lua state")]
    StateAllocation,

    /// The stack could not grow by the requested number of slots
    #[error("Stack overflow: cannot reserve {0} more slots")]
    StackOverflow(usize),

    /// A protected call or chunk load returned a non-zero status
    #[error("{}", status.describe(message))]
    Status {
        /// Status code reported by the engine
        status: StatusCode,
        /// Message found on top of the stack (empty if it was not a string)
        message: String,
    },

    /// A file chunk could not be read from disk
    #[error("Cannot read chunk {path}: {reason}")]
    ChunkIo {
        /// Path that failed
        path: String,
        /// I/O error text
        reason: String,
    },
}
