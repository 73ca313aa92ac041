//! Basic-block decomposition of compiled methods.
//!
//! Two passes over the byte array. The first records every branch target
//! as a block start and recursively parses nested block literals
//! (registered flat on the containing method). The second populates the
//! blocks, adds a predecessor edge per control transfer, and makes
//! fall-through into a block start explicit by synthesizing an
//! unconditional branch.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use smalt_asm::{decode, op, DecodeError, Instruction, Opcode, Special};

/// One basic block: a run of instructions with their byte offsets and the
/// set of predecessor blocks.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    start: usize,
    instructions: Vec<(usize, Instruction)>,
    referrers: BTreeSet<usize>,
    fall_through: Option<usize>,
}

impl BasicBlock {
    fn new(start: usize) -> Self {
        Self {
            start,
            instructions: Vec::new(),
            referrers: BTreeSet::new(),
            fall_through: None,
        }
    }

    /// Byte offset of the first instruction.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Instructions with their byte offsets. A synthesized fall-through
    /// branch carries the offset of the block it jumps to.
    pub fn instructions(&self) -> &[(usize, Instruction)] {
        &self.instructions
    }

    /// Ids of the blocks that transfer control here.
    pub fn referrers(&self) -> &BTreeSet<usize> {
        &self.referrers
    }

    /// The block's last instruction, if it is a terminator.
    pub fn terminator(&self) -> Option<Instruction> {
        self.instructions
            .last()
            .map(|(_, instruction)| *instruction)
            .filter(Instruction::is_terminator)
    }

    /// The block the not-taken path of a conditional terminator falls
    /// into, when the next offset starts a block.
    pub fn fall_through(&self) -> Option<usize> {
        self.fall_through
    }
}

/// Basic blocks of one bytecode range (a method body or one nested block
/// literal). Block ids are assigned in insertion order; the entry block
/// is id 0.
#[derive(Debug, Clone)]
pub struct ParsedCode {
    start: usize,
    stop: usize,
    blocks: Vec<BasicBlock>,
    offset_to_block: IndexMap<usize, usize>,
}

impl ParsedCode {
    /// All blocks, entry first.
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// The block starting at byte `offset`.
    pub fn block_at(&self, offset: usize) -> Option<&BasicBlock> {
        self.offset_to_block
            .get(&offset)
            .map(|index| &self.blocks[*index])
    }

    /// Id of the block starting at byte `offset`.
    pub fn block_id_at(&self, offset: usize) -> Option<usize> {
        self.offset_to_block.get(&offset).copied()
    }

    /// First byte offset of the range.
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last byte offset of the range.
    pub fn stop(&self) -> usize {
        self.stop
    }

    fn ensure_block(&mut self, offset: usize) -> usize {
        if let Some(index) = self.offset_to_block.get(&offset) {
            return *index;
        }
        let index = self.blocks.len();
        self.blocks.push(BasicBlock::new(offset));
        self.offset_to_block.insert(offset, index);
        index
    }
}

/// A parsed method: its own basic blocks plus those of every nested
/// block literal, keyed by the body's first byte offset. Nested blocks
/// register on the containing method regardless of nesting depth.
#[derive(Debug, Clone)]
pub struct ParsedMethod {
    bytecode: Vec<u8>,
    code: ParsedCode,
    nested: IndexMap<usize, ParsedCode>,
}

impl ParsedMethod {
    /// Decompose `bytecode` into basic blocks.
    pub fn parse(bytecode: &[u8]) -> Result<Self, DecodeError> {
        let mut nested = IndexMap::new();
        let code = parse_range(bytecode, 0, bytecode.len(), &mut nested)?;
        tracing::trace!(
            blocks = code.blocks.len(),
            nested = nested.len(),
            "parsed method"
        );
        Ok(Self {
            bytecode: bytecode.to_vec(),
            code,
            nested,
        })
    }

    /// The raw byte array this was parsed from.
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Basic blocks of the method body.
    pub fn code(&self) -> &ParsedCode {
        &self.code
    }

    /// Nested block bodies, keyed by body start offset, in discovery
    /// order.
    pub fn nested(&self) -> impl Iterator<Item = (usize, &ParsedCode)> {
        self.nested.iter().map(|(offset, code)| (*offset, code))
    }

    /// The nested block whose body starts at `offset`.
    pub fn nested_at(&self, offset: usize) -> Option<&ParsedCode> {
        self.nested.get(&offset)
    }
}

fn parse_range(
    bytecode: &[u8],
    start: usize,
    stop: usize,
    nested: &mut IndexMap<usize, ParsedCode>,
) -> Result<ParsedCode, DecodeError> {
    // First pass: find branch targets, peel off nested block literals.
    let mut targets = BTreeSet::new();
    let mut pc = start;
    while pc < stop {
        let instruction = decode(bytecode, &mut pc)?;

        if instruction.opcode() == Opcode::PushBlock {
            let body_start = pc;
            let body_stop = instruction.extra() as usize;
            let body = parse_range(bytecode, body_start, body_stop, nested)?;
            nested.insert(body_start, body);
            pc = body_stop;
            continue;
        }

        if instruction.is_branch() {
            targets.insert(instruction.extra() as usize);
        }
    }

    // Second pass: populate the blocks and the predecessor sets.
    let mut code = ParsedCode {
        start,
        stop,
        blocks: Vec::new(),
        offset_to_block: IndexMap::new(),
    };
    let mut current = code.ensure_block(start);

    let mut pc = start;
    while pc < stop {
        // Switch blocks when the offset is a recorded branch target.
        if pc != start && targets.contains(&pc) {
            let next = code.ensure_block(pc);

            match code.blocks[current].terminator() {
                Some(terminator) if terminator.is_branch() => {
                    if terminator.special() == Some(Special::Branch) {
                        // an unconditional branch only falls through when
                        // it happens to target the next block
                        if terminator.extra() as usize == pc {
                            code.blocks[next].referrers.insert(current);
                        }
                    } else {
                        // the not-taken path of a conditional branch
                        code.blocks[next].referrers.insert(current);
                        code.blocks[current].fall_through = Some(next);
                    }
                }
                Some(_) => {
                    // returns do not reach the next block
                }
                None => {
                    // make the fall-through explicit
                    code.blocks[current]
                        .instructions
                        .push((pc, op::branch(pc as u16)));
                    code.blocks[next].referrers.insert(current);
                }
            }
            current = next;
        }

        let offset = pc;
        let instruction = decode(bytecode, &mut pc)?;

        if instruction.opcode() == Opcode::PushBlock {
            // The nested body was parsed in the first pass; the push
            // itself stays in this block.
            code.blocks[current].instructions.push((offset, instruction));
            pc = instruction.extra() as usize;
            continue;
        }

        code.blocks[current].instructions.push((offset, instruction));

        if instruction.is_branch() {
            let target = code.ensure_block(instruction.extra() as usize);
            code.blocks[target].referrers.insert(current);
        }
    }

    Ok(code)
}
