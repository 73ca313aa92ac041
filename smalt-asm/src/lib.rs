//! Bytecode instruction set of the Smalt virtual machine.
//!
//! A compiled method is a flat byte array in a variable-width wire format.
//! This crate defines the logical instruction `(opcode, argument, extra)`,
//! the codec between the two representations, and the instruction
//! classification used by both the interpreter and the analysis layer.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod encoding;
mod instruction;
mod opcode;

pub mod op;


pub use encoding::{decode, encode, from_bytes, DecodeError, InstructionDecoder};
pub use instruction::Instruction;
pub use opcode::{
    primitive, BinaryBuiltin, InvalidOpcode, Opcode, Special, UnaryBuiltin, CONSTANT_FALSE,
    CONSTANT_NIL, CONSTANT_TRUE,
};
