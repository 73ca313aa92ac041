//! Smalt VM core: object memory, copying garbage collector, method lookup
//! cache and the bytecode interpreter.
//!
//! The VM executes compiled methods in the wire format defined by
//! [`smalt_asm`]. All execution state lives inside heap objects (contexts,
//! processes), so a collection at any allocation point keeps the machine
//! consistent; native code that holds raw object pointers across an
//! allocation must protect them with [`memory::Handle`]s.

#![warn(missing_docs)]

pub mod backtrace;
pub mod cache;
pub mod error;
pub mod image;
pub mod interpreter;
pub mod memory;
pub mod object;
pub mod state;

pub use cache::{CacheStat, MethodCache};
pub use error::VmError;
pub use image::{CoreObjects, Image, ImageBuilder};
pub use interpreter::{Interpreter, PrimitiveHandler, Runtime, SpecialHandler, UsualHandler};
pub use memory::{CopyingMemoryManager, Handle, MemoryManager, NonCollectMemoryManager};
pub use object::{ObjectPtr, RawValue, Word, WORD_SIZE};
pub use state::{ExecuteResult, PrimitiveOutcome};
