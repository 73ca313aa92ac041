//! Wire codec between byte arrays and [`Instruction`]s.
//!
//! The first byte packs the opcode in its high nibble and the argument in
//! its low nibble. A zero high nibble selects the extended form: the low
//! nibble holds the opcode and the next byte the full 8-bit argument.
//! A few opcodes carry extra payload bytes after the argument.

use crate::instruction::Instruction;
use crate::opcode::{Opcode, Special, EXTENDED};

/// Decoding failure. Compiled methods are produced by a trusted compiler,
/// so a decode error is a fatal image defect rather than a runtime
/// condition the interpreter recovers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The byte array ended in the middle of an instruction.
    #[error("bytecode truncated at offset {offset}")]
    UnexpectedEnd {
        /// Offset of the first missing byte.
        offset: usize,
    },
    /// The opcode nibble does not map to any instruction.
    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode {
        /// The unmapped opcode value.
        opcode: u8,
        /// Offset of the instruction's first byte.
        offset: usize,
    },
}

fn fetch(bytes: &[u8], pc: &mut usize) -> Result<u8, DecodeError> {
    let byte = *bytes
        .get(*pc)
        .ok_or(DecodeError::UnexpectedEnd { offset: *pc })?;
    *pc += 1;
    Ok(byte)
}

fn fetch_u16(bytes: &[u8], pc: &mut usize) -> Result<u16, DecodeError> {
    let lo = fetch(bytes, pc)?;
    let hi = fetch(bytes, pc)?;
    Ok(u16::from_le_bytes([lo, hi]))
}

/// Decode one instruction at `*pc`, advancing `*pc` past it.
pub fn decode(bytes: &[u8], pc: &mut usize) -> Result<Instruction, DecodeError> {
    let start = *pc;
    let first = fetch(bytes, pc)?;

    let mut opcode = first >> 4;
    let mut argument = first & 0x0F;

    // Extended opcodes keep the opcode in the low nibble and the argument
    // in a separate byte.
    if opcode == EXTENDED {
        opcode = argument;
        argument = fetch(bytes, pc)?;
    }

    let opcode = Opcode::try_from(opcode).map_err(|e| DecodeError::InvalidOpcode {
        opcode: e.0,
        offset: start,
    })?;

    let extra = match opcode {
        // Offset of the first byte past the block body.
        Opcode::PushBlock => fetch_u16(bytes, pc)?,
        // The primitive number does not fit the argument nibble.
        Opcode::DoPrimitive => fetch(bytes, pc)? as u16,
        Opcode::DoSpecial => match Special::try_from(argument) {
            Ok(Special::Branch | Special::BranchIfTrue | Special::BranchIfFalse) => {
                fetch_u16(bytes, pc)?
            }
            Ok(Special::SendToSuper) => fetch(bytes, pc)? as u16,
            _ => 0,
        },
        _ => 0,
    };

    Ok(Instruction::new(opcode, argument, extra))
}

/// Append the canonical wire encoding of `instruction` to `out`.
pub fn encode(instruction: &Instruction, out: &mut Vec<u8>) {
    let opcode = instruction.opcode() as u8;
    let argument = instruction.argument();

    if argument <= 0x0F {
        out.push(opcode << 4 | argument);
    } else {
        out.push(opcode);
        out.push(argument);
    }

    match instruction.opcode() {
        Opcode::PushBlock => out.extend_from_slice(&instruction.extra().to_le_bytes()),
        Opcode::DoPrimitive => out.push(instruction.extra() as u8),
        Opcode::DoSpecial => match Special::try_from(argument) {
            Ok(Special::Branch | Special::BranchIfTrue | Special::BranchIfFalse) => {
                out.extend_from_slice(&instruction.extra().to_le_bytes())
            }
            Ok(Special::SendToSuper) => out.push(instruction.extra() as u8),
            _ => {}
        },
        _ => {}
    }
}

/// A cursor decoding instructions out of a byte array.
#[derive(Debug, Clone)]
pub struct InstructionDecoder<'a> {
    bytes: &'a [u8],
    pc: usize,
}

impl<'a> InstructionDecoder<'a> {
    /// Create a decoder positioned at `pc`.
    pub const fn new(bytes: &'a [u8], pc: usize) -> Self {
        Self { bytes, pc }
    }

    /// Current byte offset.
    pub const fn pc(&self) -> usize {
        self.pc
    }

    /// Reposition the cursor.
    pub fn set_pc(&mut self, pc: usize) {
        debug_assert!(pc <= self.bytes.len());
        self.pc = pc;
    }

    /// Whether the cursor reached the end of the byte array.
    pub fn is_at_end(&self) -> bool {
        self.pc >= self.bytes.len()
    }

    /// Decode the instruction under the cursor and advance past it.
    pub fn decode_next(&mut self) -> Result<Instruction, DecodeError> {
        decode(self.bytes, &mut self.pc)
    }
}

/// Iterate `(offset, instruction)` pairs over a whole byte array.
pub fn from_bytes(
    bytes: &[u8],
) -> impl Iterator<Item = Result<(usize, Instruction), DecodeError>> + '_ {
    let mut pc = 0;
    core::iter::from_fn(move || {
        if pc >= bytes.len() {
            return None;
        }
        let offset = pc;
        Some(decode(bytes, &mut pc).map(|instruction| (offset, instruction)))
    })
}
