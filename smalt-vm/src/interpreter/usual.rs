//! Handlers of the usual opcodes, plus the message-send machinery shared
//! with `sendToSuper` and the binary-message fallback.

use smalt_asm::{BinaryBuiltin, Opcode, UnaryBuiltin, CONSTANT_FALSE, CONSTANT_NIL, CONSTANT_TRUE};

use super::{Interpreter, Runtime, UsualHandler};
use crate::error::VmError;
use crate::memory::Handle;
use crate::object::{ArrayRef, BlockRef, ContextRef, MethodRef, RawValue, SymbolRef};

pub(super) fn install(interpreter: &mut Interpreter) {
    interpreter.install_usual(Opcode::PushInstance, Box::new(PushInstance));
    interpreter.install_usual(Opcode::PushArgument, Box::new(PushArgument));
    interpreter.install_usual(Opcode::PushTemporary, Box::new(PushTemporary));
    interpreter.install_usual(Opcode::PushLiteral, Box::new(PushLiteral));
    interpreter.install_usual(Opcode::PushConstant, Box::new(PushConstant));
    interpreter.install_usual(Opcode::AssignInstance, Box::new(AssignInstance));
    interpreter.install_usual(Opcode::AssignTemporary, Box::new(AssignTemporary));
    interpreter.install_usual(Opcode::MarkArguments, Box::new(MarkArguments));
    interpreter.install_usual(Opcode::SendMessage, Box::new(SendMessage));
    interpreter.install_usual(Opcode::SendUnary, Box::new(SendUnary));
    interpreter.install_usual(Opcode::SendBinary, Box::new(SendBinary));
    interpreter.install_usual(Opcode::PushBlock, Box::new(PushBlock));
}

struct PushInstance;

impl UsualHandler for PushInstance {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let value = runtime.instance_var(argument as usize);
        runtime.stack_push(value);
        Ok(())
    }
}

struct PushArgument;

impl UsualHandler for PushArgument {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let value = runtime.argument_var(argument as usize);
        runtime.stack_push(value);
        Ok(())
    }
}

struct PushTemporary;

impl UsualHandler for PushTemporary {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let value = runtime.temporary_var(argument as usize);
        runtime.stack_push(value);
        Ok(())
    }
}

struct PushLiteral;

impl UsualHandler for PushLiteral {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let value = runtime.literal_var(argument as usize);
        runtime.stack_push(value);
        Ok(())
    }
}

struct PushConstant;

impl UsualHandler for PushConstant {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let value = match argument {
            0..=9 => RawValue::small_int(argument as _),
            CONSTANT_NIL => runtime.core().nil,
            CONSTANT_TRUE => runtime.core().true_object,
            CONSTANT_FALSE => runtime.core().false_object,
            other => return Err(VmError::InvalidConstant(other)),
        };
        runtime.stack_push(value);
        Ok(())
    }
}

struct AssignInstance;

impl UsualHandler for AssignInstance {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        // the top stays on the stack
        let value = runtime.stack_top(0);
        runtime.set_instance_var(argument as usize, value);
        Ok(())
    }
}

struct AssignTemporary;

impl UsualHandler for AssignTemporary {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let value = runtime.stack_top(0);
        runtime.set_temporary_var(argument as usize, value);
        Ok(())
    }
}

struct MarkArguments;

impl UsualHandler for MarkArguments {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let count = argument as usize;
        // Allocate first: the pending operands survive a collection on
        // the context's stack, which is reachable from the process root.
        let array = runtime.new_array(count)?;
        for index in (0..count).rev() {
            array.at_put(index, runtime.stack_pop());
        }
        runtime.stack_push(array.as_value());
        Ok(())
    }
}

struct SendMessage;

impl UsualHandler for SendMessage {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let selector = runtime.literal_var(argument as usize);
        let arguments = runtime.stack_pop();
        send_message(runtime, selector, arguments, None)
    }
}

struct SendUnary;

impl UsualHandler for SendUnary {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let builtin =
            UnaryBuiltin::try_from(argument).map_err(|_| VmError::UnknownBuiltin(argument))?;
        let receiver = runtime.stack_pop();
        let is_nil = runtime.is_nil(receiver);
        let result = match builtin {
            UnaryBuiltin::IsNil => runtime.core().boolean(is_nil),
            UnaryBuiltin::NotNil => runtime.core().boolean(!is_nil),
        };
        runtime.stack_push(result);
        Ok(())
    }
}

struct SendBinary;

impl UsualHandler for SendBinary {
    fn execute(&self, runtime: &mut Runtime, argument: u8, _extra: u16) -> Result<(), VmError> {
        let builtin =
            BinaryBuiltin::try_from(argument).map_err(|_| VmError::UnknownBuiltin(argument))?;
        let rhs = runtime.stack_pop();
        let lhs = runtime.stack_pop();

        // Tagged operands evaluate inline; everything else becomes a
        // plain message send.
        if lhs.is_small_int() && rhs.is_small_int() {
            let a = lhs.as_small_int();
            let b = rhs.as_small_int();
            let result = match builtin {
                BinaryBuiltin::Less => runtime.core().boolean(a < b),
                BinaryBuiltin::LessOrEqual => runtime.core().boolean(a <= b),
                BinaryBuiltin::Plus => RawValue::small_int(a.wrapping_add(b)),
            };
            runtime.stack_push(result);
            return Ok(());
        }

        let lhs = runtime.protect(lhs);
        let rhs = runtime.protect(rhs);
        let arguments = runtime.new_array(2)?;
        arguments.at_put(0, lhs.get());
        arguments.at_put(1, rhs.get());

        let selector = runtime.core().binary_selector(builtin);
        send_message(runtime, selector, arguments.as_value(), None)
    }
}

struct PushBlock;

impl UsualHandler for PushBlock {
    fn execute(&self, runtime: &mut Runtime, argument: u8, extra: u16) -> Result<(), VmError> {
        let core = *runtime.core();
        // The decoder already advanced past this instruction, so the
        // current pc is the first byte of the block body.
        let body_start = runtime.pc();

        let block = runtime.new_ordinary(core.block_class, BlockRef::SLOT_COUNT)?;
        let context = runtime.context();
        block.set_slot(ContextRef::METHOD, context.method().as_value());
        block.set_slot(ContextRef::ARGUMENTS, context.arguments().as_value());
        block.set_slot(ContextRef::TEMPORARIES, context.temporaries().as_value());
        block.set_slot(ContextRef::BYTE_POINTER, RawValue::small_int(body_start as _));
        block.set_slot(ContextRef::STACK_TOP, RawValue::small_int(0));
        block.set_slot(
            BlockRef::ARGUMENT_LOCATION,
            RawValue::small_int(argument as _),
        );
        block.set_slot(BlockRef::CREATING_CONTEXT, context.as_value());
        block.set_slot(
            BlockRef::BLOCK_BYTE_POINTER,
            RawValue::small_int(body_start as _),
        );

        // skip over the block body
        runtime.set_pc(extra as usize);
        runtime.stack_push(RawValue::from_object(block));
        Ok(())
    }
}

/// Allocate an activation of `method` with `arguments`, chained to
/// `previous`. The caller provides handles because every allocation here
/// is a potential collection point.
pub(crate) fn new_activation(
    runtime: &mut Runtime,
    method: &Handle,
    arguments: &Handle,
    previous: RawValue,
) -> Result<RawValue, VmError> {
    let core = *runtime.core();
    let previous = runtime.protect(previous);

    let (temporary_size, stack_size) = {
        let method = MethodRef::new(method.object());
        (method.temporary_size(), method.stack_size())
    };

    let temporaries = runtime.new_array(temporary_size)?;
    let temporaries = runtime.protect(temporaries.as_value());
    let stack = runtime.new_array(stack_size)?;
    let stack = runtime.protect(stack.as_value());

    let context = runtime.new_ordinary(core.context_class, ContextRef::SLOT_COUNT)?;
    context.set_slot(ContextRef::METHOD, method.get());
    context.set_slot(ContextRef::ARGUMENTS, arguments.get());
    context.set_slot(ContextRef::TEMPORARIES, temporaries.get());
    context.set_slot(ContextRef::STACK, stack.get());
    context.set_slot(ContextRef::BYTE_POINTER, RawValue::small_int(0));
    context.set_slot(ContextRef::STACK_TOP, RawValue::small_int(0));
    context.set_slot(ContextRef::PREVIOUS, previous.get());

    Ok(RawValue::from_object(context))
}

/// Look `selector` up and activate the found method on `arguments`
/// (element 0 is the receiver). A failed lookup re-sends
/// `doesNotUnderstand:` to the receiver with the selector and the
/// original argument array boxed into a single message argument; a
/// failed re-send aborts with [`VmError::BadMethod`].
pub(crate) fn send_message(
    runtime: &mut Runtime,
    selector: RawValue,
    arguments: RawValue,
    lookup_class: Option<RawValue>,
) -> Result<(), VmError> {
    let core = *runtime.core();
    let selector = runtime.protect(selector);
    let arguments = runtime.protect(arguments);

    let receiver_class = match lookup_class {
        Some(class) => class,
        None => {
            let receiver = ArrayRef::new(arguments.object()).at(0);
            runtime.class_of(receiver)
        }
    };

    let (method, arguments) = match runtime.lookup_method(selector.get(), receiver_class) {
        Some(method) => (method, arguments),
        None => {
            // Box the unanswered message as [selector, argument array].
            let boxed = runtime.new_array(2)?;
            boxed.at_put(0, selector.get());
            boxed.at_put(1, arguments.get());
            let boxed = runtime.protect(boxed.as_value());

            // The re-send keeps the receiver in argument slot 0; the
            // boxed message rides along as the keyword argument.
            let dnu_arguments = runtime.new_array(2)?;
            let receiver = ArrayRef::new(arguments.object()).at(0);
            dnu_arguments.at_put(0, receiver);
            dnu_arguments.at_put(1, boxed.get());
            let dnu_arguments = runtime.protect(dnu_arguments.as_value());

            let receiver_class = runtime.class_of(receiver);
            match runtime.lookup_method(core.does_not_understand, receiver_class) {
                Some(method) => (method, dnu_arguments),
                None => {
                    let selector = SymbolRef::new(selector.object()).as_str().to_owned();
                    return Err(VmError::BadMethod { selector });
                }
            }
        }
    };

    let method = runtime.protect(method.as_value());
    let previous = runtime.current_context();
    let context = new_activation(runtime, &method, &arguments, previous)?;
    runtime.set_context(context);
    Ok(())
}
