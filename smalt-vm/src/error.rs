//! Runtime error taxonomy.
//!
//! Errors raised inside opcode handlers propagate out of the dispatch loop
//! unmodified; the loop logs a backtrace and maps them onto
//! [`crate::state::ExecuteResult`]. Primitive failure is not an error (it
//! is a bytecode-level protocol, see
//! [`crate::state::PrimitiveOutcome::Failed`]).

use smalt_asm::{DecodeError, Instruction};

/// Interpreter runtime error variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// Allocation failed after a full collection released nothing.
    #[error("memory manager failed to allocate after collection")]
    OutOfMemory,

    /// The host requested that the current process stop executing.
    #[error("execution of the current process was halted")]
    HaltExecution,

    /// The final `doesNotUnderstand:` lookup failed.
    #[error("message #{selector} not understood")]
    BadMethod {
        /// Selector of the original, unanswered message.
        selector: String,
    },

    /// No handler is installed for a fetched instruction.
    #[error("no handler for instruction '{0}'")]
    MissingHandler(Instruction),

    /// A push-constant argument outside the encodable constants.
    #[error("invalid inline constant {0}")]
    InvalidConstant(u8),

    /// A send-unary or send-binary argument outside the built-in set.
    #[error("unknown built-in message {0}")]
    UnknownBuiltin(u8),

    /// The method byte array could not be decoded. A compiled image never
    /// produces this; it indicates a corrupted image or a compiler defect.
    #[error("malformed bytecode: {0}")]
    MalformedBytecode(#[from] DecodeError),
}

impl VmError {
    /// Whether this error carries its own result mapping (BadMethod) as
    /// opposed to the generic Failure mapping.
    pub const fn is_bad_method(&self) -> bool {
        matches!(self, Self::BadMethod { .. })
    }
}
