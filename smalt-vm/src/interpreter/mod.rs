//! Opcode dispatch tables and the execution loop.
//!
//! One handler object per usual opcode, special instruction and primitive
//! number. The default set is installed at construction; hosts may
//! replace or extend any table entry before running a process.

mod primitives;
mod runtime;
mod special;
mod usual;

pub use runtime::Runtime;

use std::collections::BTreeMap;

use smalt_asm::{Instruction, Opcode, Special};

use crate::error::VmError;
use crate::image::Image;
use crate::memory::Handle;
use crate::object::{MethodRef, ProcessRef, RawValue};
use crate::state::{ExecuteResult, PrimitiveOutcome};

/// Handler of one usual opcode.
pub trait UsualHandler {
    /// Perform the instruction's effect on the runtime.
    fn execute(&self, runtime: &mut Runtime, argument: u8, extra: u16) -> Result<(), VmError>;
}

/// Handler of one special instruction.
pub trait SpecialHandler {
    /// Perform the instruction's effect on the runtime.
    fn execute(&self, runtime: &mut Runtime, extra: u16) -> Result<(), VmError>;
}

/// Handler of one primitive number.
///
/// Handlers read their operands with [`Runtime::stack_top`] and leave the
/// popping to the dispatcher, so that a [`PrimitiveOutcome::Failed`]
/// naturally leaves the arguments in place.
pub trait PrimitiveHandler {
    /// Perform the primitive with `argument_count` stack operands.
    fn execute(
        &self,
        runtime: &mut Runtime,
        argument_count: u8,
    ) -> Result<PrimitiveOutcome, VmError>;
}

const TABLE_SIZE: usize = 16;

/// The bytecode interpreter: dispatch tables plus the runtime state.
pub struct Interpreter {
    usual: [Option<Box<dyn UsualHandler>>; TABLE_SIZE],
    special: [Option<Box<dyn SpecialHandler>>; TABLE_SIZE],
    primitives: BTreeMap<u8, Box<dyn PrimitiveHandler>>,
    runtime: Runtime,
}

impl Interpreter {
    /// Create an interpreter over a booted image, with the default
    /// handler set installed.
    pub fn new(image: Image) -> Self {
        let mut interpreter = Self {
            usual: std::array::from_fn(|_| None),
            special: std::array::from_fn(|_| None),
            primitives: BTreeMap::new(),
            runtime: Runtime::new(image),
        };
        usual::install(&mut interpreter);
        special::install(&mut interpreter);
        primitives::install(&mut interpreter);
        interpreter
    }

    /// The runtime state.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Mutable runtime state.
    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    /// Install (or replace) the handler of a usual opcode.
    pub fn install_usual(&mut self, opcode: Opcode, handler: Box<dyn UsualHandler>) {
        self.usual[opcode as usize] = Some(handler);
    }

    /// Install (or replace) the handler of a special instruction.
    pub fn install_special(&mut self, special: Special, handler: Box<dyn SpecialHandler>) {
        self.special[special as usize] = Some(handler);
    }

    /// Install (or replace) the handler of a primitive number.
    pub fn install_primitive(&mut self, number: u8, handler: Box<dyn PrimitiveHandler>) {
        self.primitives.insert(number, handler);
    }

    /// Create a process whose initial context runs `method` with a nil
    /// receiver and no further arguments.
    pub fn spawn_process(&mut self, method: MethodRef) -> Result<Handle, VmError> {
        let nil = self.runtime.core().nil;
        self.spawn_process_on(method, nil)
    }

    /// Create a process whose initial context runs `method` on `receiver`.
    pub fn spawn_process_on(
        &mut self,
        method: MethodRef,
        receiver: RawValue,
    ) -> Result<Handle, VmError> {
        let runtime = &mut self.runtime;
        let core = *runtime.core();

        let method = runtime.protect(method.as_value());
        let receiver = runtime.protect(receiver);
        let arguments = runtime.new_array(1)?;
        arguments.at_put(0, receiver.get());
        let arguments = runtime.protect(arguments.as_value());

        let context = usual::new_activation(runtime, &method, &arguments, core.nil)?;
        let context = runtime.protect(context);

        let process = runtime.new_ordinary(core.process_class, ProcessRef::SLOT_COUNT)?;
        ProcessRef::new(process).set_context(context.get());

        Ok(runtime.protect(RawValue::from_object(process)))
    }

    /// Run `process` for at most `ticks` instructions; 0 means unbounded.
    ///
    /// [`ExecuteResult::TimeExpired`] leaves the process resumable:
    /// calling `execute` again picks up exactly where it stopped.
    pub fn execute(&mut self, process: &Handle, ticks: u32) -> ExecuteResult {
        self.runtime.set_process(process.get());
        let mut remaining = ticks;

        loop {
            let context = self.runtime.current_context();
            if self.runtime.is_nil(context) {
                return ExecuteResult::Success;
            }

            let instruction = {
                let context = self.runtime.context();
                let code = context.method().bytecodes();
                let mut pc = context.pc();
                match smalt_asm::decode(code.bytes(), &mut pc) {
                    Ok(instruction) => {
                        context.set_pc(pc);
                        instruction
                    }
                    Err(error) => {
                        return self.abort(VmError::from(error));
                    }
                }
            };

            if let Err(error) = self.dispatch(instruction) {
                return self.abort(error);
            }

            if remaining > 0 {
                remaining -= 1;
                if remaining == 0 {
                    return ExecuteResult::TimeExpired;
                }
            }
        }
    }

    /// Dispatch one decoded instruction to its handler table.
    fn dispatch(&mut self, instruction: Instruction) -> Result<(), VmError> {
        match instruction.opcode() {
            Opcode::DoSpecial => {
                let handler = self
                    .special
                    .get(instruction.argument() as usize)
                    .and_then(|slot| slot.as_deref())
                    .ok_or(VmError::MissingHandler(instruction))?;
                handler.execute(&mut self.runtime, instruction.extra())
            }
            Opcode::DoPrimitive => {
                let handler = self
                    .primitives
                    .get(&(instruction.extra() as u8))
                    .ok_or(VmError::MissingHandler(instruction))?;
                match handler.execute(&mut self.runtime, instruction.argument())? {
                    PrimitiveOutcome::Value(value) => {
                        self.runtime.stack_drop(instruction.argument() as usize);
                        self.runtime.stack_push(value);
                    }
                    PrimitiveOutcome::Switched | PrimitiveOutcome::Failed => {}
                }
                Ok(())
            }
            opcode => {
                let handler = self
                    .usual
                    .get(opcode as usize)
                    .and_then(|slot| slot.as_deref())
                    .ok_or(VmError::MissingHandler(instruction))?;
                handler.execute(&mut self.runtime, instruction.argument(), instruction.extra())
            }
        }
    }

    /// Log the backtrace and map the error onto the returned result. The
    /// context chain stays as it was for post-mortem inspection.
    fn abort(&self, error: VmError) -> ExecuteResult {
        let result = if error.is_bad_method() {
            ExecuteResult::BadMethod
        } else {
            ExecuteResult::Failure
        };
        tracing::error!(%error, backtrace = %self.runtime.backtrace(), "process aborted");
        result
    }
}
