//! Handlers of the special instructions: returns, stack shuffling, the
//! branch family and the super-send.

use smalt_asm::Special;

use super::{usual, Interpreter, Runtime, SpecialHandler};
use crate::error::VmError;
use crate::object::{BlockRef, RawValue};

pub(super) fn install(interpreter: &mut Interpreter) {
    interpreter.install_special(Special::SelfReturn, Box::new(SelfReturn));
    interpreter.install_special(Special::StackReturn, Box::new(StackReturn));
    interpreter.install_special(Special::BlockReturn, Box::new(BlockReturn));
    interpreter.install_special(Special::Duplicate, Box::new(Duplicate));
    interpreter.install_special(Special::PopTop, Box::new(PopTop));
    interpreter.install_special(Special::Branch, Box::new(Branch));
    interpreter.install_special(Special::BranchIfTrue, Box::new(BranchIfTrue));
    interpreter.install_special(Special::BranchIfFalse, Box::new(BranchIfFalse));
    interpreter.install_special(Special::SendToSuper, Box::new(SendToSuper));
}

/// Unwind to `target`. The outermost return writes the process result;
/// every other return pushes the value on the caller's stack.
fn do_return(runtime: &mut Runtime, value: RawValue, target: RawValue) {
    runtime.set_context(target);
    if runtime.is_nil(target) {
        runtime.set_process_result(value);
    } else {
        runtime.stack_push(value);
    }
}

struct SelfReturn;

impl SpecialHandler for SelfReturn {
    fn execute(&self, runtime: &mut Runtime, _extra: u16) -> Result<(), VmError> {
        let receiver = runtime.argument_var(0);
        let target = runtime.context().previous();
        do_return(runtime, receiver, target);
        Ok(())
    }
}

struct StackReturn;

impl SpecialHandler for StackReturn {
    fn execute(&self, runtime: &mut Runtime, _extra: u16) -> Result<(), VmError> {
        let value = runtime.stack_pop();
        let target = runtime.context().previous();
        do_return(runtime, value, target);
        Ok(())
    }
}

struct BlockReturn;

impl SpecialHandler for BlockReturn {
    fn execute(&self, runtime: &mut Runtime, _extra: u16) -> Result<(), VmError> {
        let value = runtime.stack_pop();
        // return past the creating context of this block activation
        let block = BlockRef::new(runtime.current_context().as_object());
        let target = block.creating_context().previous();
        do_return(runtime, value, target);
        Ok(())
    }
}

struct Duplicate;

impl SpecialHandler for Duplicate {
    fn execute(&self, runtime: &mut Runtime, _extra: u16) -> Result<(), VmError> {
        let top = runtime.stack_top(0);
        runtime.stack_push(top);
        Ok(())
    }
}

struct PopTop;

impl SpecialHandler for PopTop {
    fn execute(&self, runtime: &mut Runtime, _extra: u16) -> Result<(), VmError> {
        runtime.stack_drop(1);
        Ok(())
    }
}

struct Branch;

impl SpecialHandler for Branch {
    fn execute(&self, runtime: &mut Runtime, extra: u16) -> Result<(), VmError> {
        runtime.set_pc(extra as usize);
        Ok(())
    }
}

struct BranchIfTrue;

impl SpecialHandler for BranchIfTrue {
    fn execute(&self, runtime: &mut Runtime, extra: u16) -> Result<(), VmError> {
        let condition = runtime.stack_pop();
        if condition == runtime.core().true_object {
            runtime.set_pc(extra as usize);
        }
        Ok(())
    }
}

struct BranchIfFalse;

impl SpecialHandler for BranchIfFalse {
    fn execute(&self, runtime: &mut Runtime, extra: u16) -> Result<(), VmError> {
        let condition = runtime.stack_pop();
        if condition == runtime.core().false_object {
            runtime.set_pc(extra as usize);
        }
        Ok(())
    }
}

struct SendToSuper;

impl SpecialHandler for SendToSuper {
    fn execute(&self, runtime: &mut Runtime, extra: u16) -> Result<(), VmError> {
        let selector = runtime.literal_var(extra as usize);
        // lookup starts above the defining class of the running method
        let parent = runtime.context().method().class().parent();
        let arguments = runtime.stack_pop();
        usual::send_message(runtime, selector, arguments, Some(parent))
    }
}
