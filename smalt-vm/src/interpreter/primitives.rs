//! Handlers of the primitive dispatch table.
//!
//! Primitives never raise for operand problems: a handler that cannot
//! perform its operation answers [`PrimitiveOutcome::Failed`], the
//! operands stay on the stack, and execution continues with the method's
//! failure code. Host I/O primitives are not part of the core; front-ends
//! install them with [`Interpreter::install_primitive`].

use smalt_asm::primitive;

use super::{Interpreter, PrimitiveHandler, Runtime};
use crate::error::VmError;
use crate::object::{ArrayRef, BlockRef, ContextRef, RawValue, SmallInt};
use crate::state::PrimitiveOutcome;

pub(super) fn install(interpreter: &mut Interpreter) {
    interpreter.install_primitive(primitive::OBJECTS_ARE_EQUAL, Box::new(ObjectsAreEqual));
    interpreter.install_primitive(primitive::GET_CLASS, Box::new(GetClass));
    interpreter.install_primitive(primitive::GET_SIZE, Box::new(GetSize));
    interpreter.install_primitive(primitive::AT_PUT, Box::new(ArrayAtPut));
    interpreter.install_primitive(primitive::START_NEW_PROCESS, Box::new(StartNewProcess));
    interpreter.install_primitive(primitive::ALLOCATE_OBJECT, Box::new(AllocateObject));
    interpreter.install_primitive(primitive::BLOCK_INVOKE, Box::new(BlockInvoke));
    interpreter.install_primitive(primitive::THROW_ERROR, Box::new(ThrowError));
    interpreter.install_primitive(primitive::ALLOCATE_BYTE_ARRAY, Box::new(AllocateByteArray));
    interpreter.install_primitive(primitive::STRING_AT, Box::new(StringAt));
    interpreter.install_primitive(primitive::STRING_AT_PUT, Box::new(StringAtPut));
    interpreter.install_primitive(primitive::CLONE_BYTE_OBJECT, Box::new(CloneByteObject));
    interpreter.install_primitive(primitive::ARRAY_AT, Box::new(ArrayAt));
    interpreter.install_primitive(primitive::INTEGER_NEW, Box::new(IntegerNew));
    interpreter.install_primitive(primitive::FLUSH_CACHE, Box::new(FlushCache));
    interpreter.install_primitive(primitive::BULK_REPLACE, Box::new(BulkReplace));

    for number in [
        primitive::SMALLINT_ADD,
        primitive::SMALLINT_DIV,
        primitive::SMALLINT_MOD,
        primitive::SMALLINT_LESS,
        primitive::SMALLINT_EQUAL,
        primitive::SMALLINT_MUL,
        primitive::SMALLINT_SUB,
        primitive::SMALLINT_BIT_OR,
        primitive::SMALLINT_BIT_AND,
        primitive::SMALLINT_BIT_SHIFT,
    ] {
        interpreter.install_primitive(number, Box::new(SmallIntOp(number)));
    }
}

/// Operand `index` counted from the first pushed argument.
fn argument(runtime: &Runtime, count: u8, index: usize) -> RawValue {
    runtime.stack_top(count as usize - 1 - index)
}

fn small_index(value: RawValue, len: usize) -> Option<usize> {
    if !value.is_small_int() {
        return None;
    }
    let index = value.as_small_int();
    if index < 0 || index as usize >= len {
        return None;
    }
    Some(index as usize)
}

struct ObjectsAreEqual;

impl PrimitiveHandler for ObjectsAreEqual {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let left = argument(runtime, count, 0);
        let right = argument(runtime, count, 1);
        Ok(PrimitiveOutcome::Value(runtime.core().boolean(left == right)))
    }
}

struct GetClass;

impl PrimitiveHandler for GetClass {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let class = runtime.class_of(argument(runtime, count, 0));
        Ok(PrimitiveOutcome::Value(class))
    }
}

struct GetSize;

impl PrimitiveHandler for GetSize {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let operand = argument(runtime, count, 0);
        let size = if operand.is_small_int() {
            0
        } else {
            operand.as_object().size()
        };
        Ok(PrimitiveOutcome::Value(RawValue::small_int(size as _)))
    }
}

struct ArrayAt;

impl PrimitiveHandler for ArrayAt {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let array = argument(runtime, count, 0);
        let index = argument(runtime, count, 1);
        if !array.is_pointer() || array.as_object().header().is_binary() {
            return Ok(PrimitiveOutcome::Failed);
        }
        let array = ArrayRef::new(array.as_object());
        match small_index(index, array.len()) {
            Some(index) => Ok(PrimitiveOutcome::Value(array.at(index))),
            None => Ok(PrimitiveOutcome::Failed),
        }
    }
}

struct ArrayAtPut;

impl PrimitiveHandler for ArrayAtPut {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let array = argument(runtime, count, 0);
        let index = argument(runtime, count, 1);
        let value = argument(runtime, count, 2);
        if !array.is_pointer() || array.as_object().header().is_binary() {
            return Ok(PrimitiveOutcome::Failed);
        }
        let array = ArrayRef::new(array.as_object());
        match small_index(index, array.len()) {
            Some(index) => {
                array.at_put(index, value);
                Ok(PrimitiveOutcome::Value(value))
            }
            None => Ok(PrimitiveOutcome::Failed),
        }
    }
}

struct StringAt;

impl PrimitiveHandler for StringAt {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let string = argument(runtime, count, 0);
        let index = argument(runtime, count, 1);
        if !string.is_pointer() || !string.as_object().header().is_binary() {
            return Ok(PrimitiveOutcome::Failed);
        }
        let object = string.as_object();
        match small_index(index, object.size()) {
            Some(index) => Ok(PrimitiveOutcome::Value(RawValue::small_int(
                object.bytes()[index] as _,
            ))),
            None => Ok(PrimitiveOutcome::Failed),
        }
    }
}

struct StringAtPut;

impl PrimitiveHandler for StringAtPut {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let string = argument(runtime, count, 0);
        let index = argument(runtime, count, 1);
        let value = argument(runtime, count, 2);
        if !string.is_pointer() || !string.as_object().header().is_binary() {
            return Ok(PrimitiveOutcome::Failed);
        }
        let mut object = string.as_object();
        let byte = match value.is_small_int().then(|| value.as_small_int()) {
            Some(byte @ 0..=255) => byte as u8,
            _ => return Ok(PrimitiveOutcome::Failed),
        };
        match small_index(index, object.size()) {
            Some(index) => {
                object.bytes_mut()[index] = byte;
                Ok(PrimitiveOutcome::Value(value))
            }
            None => Ok(PrimitiveOutcome::Failed),
        }
    }
}

struct AllocateObject;

impl PrimitiveHandler for AllocateObject {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let class = argument(runtime, count, 0);
        let size = argument(runtime, count, 1);
        if !class.is_pointer() || !size.is_small_int() || size.as_small_int() < 0 {
            return Ok(PrimitiveOutcome::Failed);
        }
        let class = runtime.protect(class);
        let object = runtime.new_ordinary(class.get(), size.as_small_int() as usize)?;
        Ok(PrimitiveOutcome::Value(RawValue::from_object(object)))
    }
}

struct AllocateByteArray;

impl PrimitiveHandler for AllocateByteArray {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let class = argument(runtime, count, 0);
        let size = argument(runtime, count, 1);
        if !class.is_pointer() || !size.is_small_int() || size.as_small_int() < 0 {
            return Ok(PrimitiveOutcome::Failed);
        }
        let class = runtime.protect(class);
        let object = runtime.new_binary(class.get(), size.as_small_int() as usize)?;
        Ok(PrimitiveOutcome::Value(RawValue::from_object(object)))
    }
}

struct CloneByteObject;

impl PrimitiveHandler for CloneByteObject {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let source = argument(runtime, count, 0);
        let class = argument(runtime, count, 1);
        if !source.is_pointer() || !source.as_object().header().is_binary() || !class.is_pointer() {
            return Ok(PrimitiveOutcome::Failed);
        }
        let source = runtime.protect(source);
        let class = runtime.protect(class);

        let byte_len = source.object().size();
        let mut clone = runtime.new_binary(class.get(), byte_len)?;
        // reload through the handle: the allocation may have moved it
        clone.bytes_mut().copy_from_slice(source.object().bytes());
        Ok(PrimitiveOutcome::Value(RawValue::from_object(clone)))
    }
}

struct BlockInvoke;

impl PrimitiveHandler for BlockInvoke {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let count = count as usize;
        if count == 0 {
            return Ok(PrimitiveOutcome::Failed);
        }
        let core = *runtime.core();

        let block_value = argument(runtime, count as u8, 0);
        if runtime.class_of(block_value) != core.block_class {
            return Ok(PrimitiveOutcome::Failed);
        }
        let block = runtime.protect(block_value);

        let provided = count - 1;
        {
            let source = BlockRef::new(block.object());
            let location = source.argument_location();
            if location + provided > source.as_context().temporaries().len() {
                return Ok(PrimitiveOutcome::Failed);
            }
        }

        // A fresh activation per invocation keeps the block re-entrant.
        let stack_size = BlockRef::new(block.object())
            .as_context()
            .method()
            .stack_size();
        let stack = runtime.new_array(stack_size)?;
        let stack = runtime.protect(stack.as_value());
        let activation = runtime.new_ordinary(core.block_class, BlockRef::SLOT_COUNT)?;

        let source = BlockRef::new(block.object());
        let source_context = source.as_context();
        activation.set_slot(ContextRef::METHOD, source_context.method().as_value());
        activation.set_slot(ContextRef::ARGUMENTS, source_context.arguments().as_value());
        activation.set_slot(
            ContextRef::TEMPORARIES,
            source_context.temporaries().as_value(),
        );
        activation.set_slot(ContextRef::STACK, stack.get());
        activation.set_slot(
            ContextRef::BYTE_POINTER,
            RawValue::small_int(source.block_byte_pointer() as _),
        );
        activation.set_slot(ContextRef::STACK_TOP, RawValue::small_int(0));
        activation.set_slot(ContextRef::PREVIOUS, runtime.current_context());
        activation.set_slot(
            BlockRef::ARGUMENT_LOCATION,
            RawValue::small_int(source.argument_location() as _),
        );
        activation.set_slot(
            BlockRef::CREATING_CONTEXT,
            source_context.as_object().slot(BlockRef::CREATING_CONTEXT),
        );
        activation.set_slot(
            BlockRef::BLOCK_BYTE_POINTER,
            RawValue::small_int(source.block_byte_pointer() as _),
        );

        // Block arguments land in the shared temporaries of the creating
        // context, starting at the recorded location.
        let location = source.argument_location();
        let temporaries = source_context.temporaries();
        for index in 0..provided {
            temporaries.at_put(location + index, argument(runtime, count as u8, 1 + index));
        }

        runtime.stack_drop(count);
        runtime.set_context(RawValue::from_object(activation));
        Ok(PrimitiveOutcome::Switched)
    }
}

struct StartNewProcess;

impl PrimitiveHandler for StartNewProcess {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let process = argument(runtime, count, 0);
        if runtime.class_of(process) != runtime.core().process_class {
            return Ok(PrimitiveOutcome::Failed);
        }
        runtime.stack_drop(count as usize);
        runtime.set_process(process);
        Ok(PrimitiveOutcome::Switched)
    }
}

struct ThrowError;

impl PrimitiveHandler for ThrowError {
    fn execute(&self, _runtime: &mut Runtime, _count: u8) -> Result<PrimitiveOutcome, VmError> {
        Err(VmError::HaltExecution)
    }
}

struct IntegerNew;

impl PrimitiveHandler for IntegerNew {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let value = argument(runtime, count, 0);
        if value.is_small_int() {
            Ok(PrimitiveOutcome::Value(value))
        } else {
            Ok(PrimitiveOutcome::Failed)
        }
    }
}

struct FlushCache;

impl PrimitiveHandler for FlushCache {
    fn execute(&self, runtime: &mut Runtime, _count: u8) -> Result<PrimitiveOutcome, VmError> {
        runtime.flush_cache();
        Ok(PrimitiveOutcome::Value(runtime.core().nil))
    }
}

struct BulkReplace;

impl PrimitiveHandler for BulkReplace {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let destination = argument(runtime, count, 0);
        let start = argument(runtime, count, 1);
        let stop = argument(runtime, count, 2);
        let source = argument(runtime, count, 3);
        let source_start = argument(runtime, count, 4);

        let ordinary = |value: RawValue| {
            value.is_pointer() && !value.as_object().header().is_binary()
        };
        if !ordinary(destination) || !ordinary(source) {
            return Ok(PrimitiveOutcome::Failed);
        }
        let destination = ArrayRef::new(destination.as_object());
        let source = ArrayRef::new(source.as_object());

        let (Some(start), Some(stop), Some(source_start)) = (
            small_index(start, destination.len()),
            small_index(stop, destination.len()),
            small_index(source_start, source.len()),
        ) else {
            return Ok(PrimitiveOutcome::Failed);
        };
        if stop < start {
            return Ok(PrimitiveOutcome::Failed);
        }
        let run = stop - start + 1;
        if source_start + run > source.len() {
            return Ok(PrimitiveOutcome::Failed);
        }

        // staging buffer keeps overlapping self-copies correct
        let staged: Vec<RawValue> = (0..run).map(|i| source.at(source_start + i)).collect();
        for (offset, value) in staged.into_iter().enumerate() {
            destination.at_put(start + offset, value);
        }
        Ok(PrimitiveOutcome::Value(destination.as_value()))
    }
}

/// The small-integer arithmetic and bit-operation family; one handler
/// parameterized by its primitive number.
struct SmallIntOp(u8);

impl PrimitiveHandler for SmallIntOp {
    fn execute(&self, runtime: &mut Runtime, count: u8) -> Result<PrimitiveOutcome, VmError> {
        let left = argument(runtime, count, 0);
        let right = argument(runtime, count, 1);
        if !left.is_small_int() || !right.is_small_int() {
            return Ok(PrimitiveOutcome::Failed);
        }
        let a = left.as_small_int();
        let b = right.as_small_int();

        let value = match self.0 {
            primitive::SMALLINT_ADD => RawValue::small_int(a.wrapping_add(b)),
            primitive::SMALLINT_SUB => RawValue::small_int(a.wrapping_sub(b)),
            primitive::SMALLINT_MUL => RawValue::small_int(a.wrapping_mul(b)),
            primitive::SMALLINT_DIV => match b {
                0 => return Ok(PrimitiveOutcome::Failed),
                _ => RawValue::small_int(a.wrapping_div(b)),
            },
            primitive::SMALLINT_MOD => match b {
                0 => return Ok(PrimitiveOutcome::Failed),
                _ => RawValue::small_int(a.wrapping_rem(b)),
            },
            primitive::SMALLINT_LESS => runtime.core().boolean(a < b),
            primitive::SMALLINT_EQUAL => runtime.core().boolean(a == b),
            primitive::SMALLINT_BIT_OR => RawValue::small_int(a | b),
            primitive::SMALLINT_BIT_AND => RawValue::small_int(a & b),
            primitive::SMALLINT_BIT_SHIFT => {
                // negative shift counts shift right
                if b >= 0 {
                    match b as u32 {
                        shift if shift < SmallInt::BITS => RawValue::small_int(a << shift),
                        _ => return Ok(PrimitiveOutcome::Failed),
                    }
                } else {
                    match (-b) as u32 {
                        shift if shift < SmallInt::BITS => RawValue::small_int(a >> shift),
                        _ => return Ok(PrimitiveOutcome::Failed),
                    }
                }
            }
            _ => return Ok(PrimitiveOutcome::Failed),
        };
        Ok(PrimitiveOutcome::Value(value))
    }
}
