//! Execution outcome representation.

use crate::object::RawValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Resulting state of [`crate::Interpreter::execute`].
pub enum ExecuteResult {
    /// The outermost context returned; the result is stored on the process.
    Success,
    /// An error unwound the dispatch loop. The context chain is preserved
    /// for post-mortem inspection.
    Failure,
    /// The final `doesNotUnderstand:` lookup failed.
    BadMethod,
    /// The tick budget ran out. Calling `execute` again resumes the
    /// process where it stopped.
    TimeExpired,
}

impl ExecuteResult {
    /// Whether the process ran to completion.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether the process can be resumed with another `execute` call.
    pub const fn is_resumable(&self) -> bool {
        matches!(self, Self::TimeExpired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a primitive handler did with the operands it was given.
///
/// Handlers read their operands through [`crate::Runtime::stack_top`]
/// without popping; the dispatcher completes the stack effect so that a
/// failed primitive leaves its arguments in place for the method's
/// Smalltalk-level failure code.
pub enum PrimitiveOutcome {
    /// The primitive produced a value: the dispatcher pops the operands
    /// and pushes the value.
    Value(RawValue),
    /// The primitive replaced the current context or process (block
    /// invocation, process switch) and managed the stack itself.
    Switched,
    /// Soft failure: operands stay on the stack and execution continues
    /// with the bytecode following the primitive call.
    Failed,
}
