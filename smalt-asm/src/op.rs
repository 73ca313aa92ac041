//! Constructor shorthands, one per instruction, plus an [`assemble`] helper
//! for building method byte arrays in tests and image construction.

use crate::encoding;
use crate::instruction::Instruction;
use crate::opcode::{BinaryBuiltin, Opcode, Special, UnaryBuiltin};

/// Push instance variable `index` of the receiver.
pub fn push_instance(index: u8) -> Instruction {
    Instruction::new(Opcode::PushInstance, index, 0)
}

/// Push method argument `index`; argument 0 is the receiver.
pub fn push_argument(index: u8) -> Instruction {
    Instruction::new(Opcode::PushArgument, index, 0)
}

/// Push temporary variable `index`.
pub fn push_temporary(index: u8) -> Instruction {
    Instruction::new(Opcode::PushTemporary, index, 0)
}

/// Push method literal `index`.
pub fn push_literal(index: u8) -> Instruction {
    Instruction::new(Opcode::PushLiteral, index, 0)
}

/// Push an inline constant; see [`crate::CONSTANT_NIL`] and friends for the
/// non-integer arguments.
pub fn push_constant(constant: u8) -> Instruction {
    Instruction::new(Opcode::PushConstant, constant, 0)
}

/// Store the stack top into instance variable `index`.
pub fn assign_instance(index: u8) -> Instruction {
    Instruction::new(Opcode::AssignInstance, index, 0)
}

/// Store the stack top into temporary variable `index`.
pub fn assign_temporary(index: u8) -> Instruction {
    Instruction::new(Opcode::AssignTemporary, index, 0)
}

/// Pop `count` values into a fresh argument array.
pub fn mark_arguments(count: u8) -> Instruction {
    Instruction::new(Opcode::MarkArguments, count, 0)
}

/// Send the selector held in literal `index`.
pub fn send_message(index: u8) -> Instruction {
    Instruction::new(Opcode::SendMessage, index, 0)
}

/// Send a built-in unary message.
pub fn send_unary(builtin: UnaryBuiltin) -> Instruction {
    Instruction::new(Opcode::SendUnary, builtin as u8, 0)
}

/// Send a built-in binary message.
pub fn send_binary(builtin: BinaryBuiltin) -> Instruction {
    Instruction::new(Opcode::SendBinary, builtin as u8, 0)
}

/// Push a block whose arguments land at `argument_location` in the
/// temporaries and whose body ends at byte offset `end`.
pub fn push_block(argument_location: u8, end: u16) -> Instruction {
    Instruction::new(Opcode::PushBlock, argument_location, end)
}

/// Invoke primitive `number` with `argument_count` stack operands.
pub fn do_primitive(argument_count: u8, number: u8) -> Instruction {
    Instruction::new(Opcode::DoPrimitive, argument_count, number as u16)
}

/// Return the receiver.
pub fn self_return() -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::SelfReturn as u8, 0)
}

/// Return the stack top.
pub fn stack_return() -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::StackReturn as u8, 0)
}

/// Return the stack top past the block's creating context.
pub fn block_return() -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::BlockReturn as u8, 0)
}

/// Push a copy of the stack top.
pub fn duplicate() -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::Duplicate as u8, 0)
}

/// Drop the stack top.
pub fn pop_top() -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::PopTop as u8, 0)
}

/// Jump to byte offset `target`.
pub fn branch(target: u16) -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::Branch as u8, target)
}

/// Pop the top and jump to `target` if it is the true object.
pub fn branch_if_true(target: u16) -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::BranchIfTrue as u8, target)
}

/// Pop the top and jump to `target` if it is the false object.
pub fn branch_if_false(target: u16) -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::BranchIfFalse as u8, target)
}

/// Send literal selector `index` starting the lookup at the superclass.
pub fn send_to_super(index: u8) -> Instruction {
    Instruction::new(Opcode::DoSpecial, Special::SendToSuper as u8, index as u16)
}

/// Encode a sequence of instructions into a method byte array.
pub fn assemble(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instructions.len() * 2);
    for instruction in instructions {
        encoding::encode(instruction, &mut out);
    }
    out
}
