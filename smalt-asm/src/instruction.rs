use core::fmt;

use crate::opcode::{
    BinaryBuiltin, InvalidOpcode, Opcode, Special, UnaryBuiltin, CONSTANT_FALSE, CONSTANT_NIL,
    CONSTANT_TRUE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// A decoded instruction.
///
/// The fixed-width logical form of the variable-width wire encoding: an
/// opcode, an 8-bit argument and a 16-bit extra operand. Instructions that
/// carry no extra operand keep it zero.
pub struct Instruction {
    opcode: Opcode,
    argument: u8,
    extra: u16,
}

impl Instruction {
    /// Create an instruction from its parts.
    pub const fn new(opcode: Opcode, argument: u8, extra: u16) -> Self {
        Self {
            opcode,
            argument,
            extra,
        }
    }

    /// Opcode.
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Argument operand.
    pub const fn argument(&self) -> u8 {
        self.argument
    }

    /// Extra operand.
    pub const fn extra(&self) -> u16 {
        self.extra
    }

    /// Fixed-width representation suitable for storing in side tables.
    pub const fn pack(&self) -> u32 {
        self.opcode as u32 | (self.argument as u32) << 8 | (self.extra as u32) << 16
    }

    /// Rebuild an instruction from its [`pack`](Self::pack)ed form.
    pub fn from_packed(raw: u32) -> Result<Self, InvalidOpcode> {
        Ok(Self {
            opcode: Opcode::try_from(raw as u8)?,
            argument: (raw >> 8) as u8,
            extra: (raw >> 16) as u16,
        })
    }

    /// The special instruction this stands for, if the opcode is
    /// [`Opcode::DoSpecial`] with a known argument.
    pub fn special(&self) -> Option<Special> {
        match self.opcode {
            Opcode::DoSpecial => Special::try_from(self.argument).ok(),
            _ => None,
        }
    }

    /// Whether this instruction transfers control to an explicit target.
    pub fn is_branch(&self) -> bool {
        matches!(
            self.special(),
            Some(Special::Branch | Special::BranchIfTrue | Special::BranchIfFalse)
        )
    }

    /// Whether this instruction ends a basic block: a branch or a return.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.special(),
            Some(
                Special::Branch
                    | Special::BranchIfTrue
                    | Special::BranchIfFalse
                    | Special::SelfReturn
                    | Special::StackReturn
                    | Special::BlockReturn
            )
        )
    }

    /// Whether this instruction leaves a value on the stack that later
    /// instructions may consume.
    pub fn is_value_provider(&self) -> bool {
        match self.opcode {
            Opcode::PushInstance
            | Opcode::PushArgument
            | Opcode::PushTemporary
            | Opcode::PushLiteral
            | Opcode::PushConstant
            | Opcode::PushBlock
            | Opcode::MarkArguments
            | Opcode::SendMessage
            | Opcode::SendUnary
            | Opcode::SendBinary => true,

            Opcode::AssignInstance | Opcode::AssignTemporary | Opcode::DoPrimitive => false,

            Opcode::DoSpecial => {
                matches!(self.special(), Some(Special::Duplicate | Special::SendToSuper))
            }
        }
    }

    /// Number of stack values this instruction reads.
    ///
    /// Assignments and [`Special::Duplicate`] read the top without popping
    /// it; everything else pops what it reads.
    pub fn consumed_values(&self) -> usize {
        match self.opcode {
            Opcode::PushInstance
            | Opcode::PushArgument
            | Opcode::PushTemporary
            | Opcode::PushLiteral
            | Opcode::PushConstant
            | Opcode::PushBlock => 0,

            Opcode::AssignInstance | Opcode::AssignTemporary => 1,
            Opcode::MarkArguments | Opcode::DoPrimitive => self.argument as usize,
            Opcode::SendMessage | Opcode::SendUnary => 1,
            Opcode::SendBinary => 2,

            Opcode::DoSpecial => match self.special() {
                Some(
                    Special::StackReturn
                    | Special::BlockReturn
                    | Special::Duplicate
                    | Special::PopTop
                    | Special::BranchIfTrue
                    | Special::BranchIfFalse
                    | Special::SendToSuper,
                ) => 1,
                _ => 0,
            },
        }
    }

    /// Whether this instruction reads at least one stack value.
    pub fn is_value_consumer(&self) -> bool {
        self.consumed_values() > 0
    }

    /// Whether executing this instruction may allocate, and therefore move
    /// every raw pointer not protected by a handle.
    pub fn may_trigger_gc(&self) -> bool {
        match self.opcode {
            Opcode::MarkArguments
            | Opcode::SendMessage
            | Opcode::SendBinary
            | Opcode::PushBlock
            | Opcode::DoPrimitive => true,
            Opcode::DoSpecial => matches!(self.special(), Some(Special::SendToSuper)),
            _ => false,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode {
            Opcode::PushInstance => write!(f, "PushInstance {}", self.argument),
            Opcode::PushArgument => write!(f, "PushArgument {}", self.argument),
            Opcode::PushTemporary => write!(f, "PushTemporary {}", self.argument),
            Opcode::PushLiteral => write!(f, "PushLiteral {}", self.argument),
            Opcode::PushConstant => match self.argument {
                0..=9 => write!(f, "PushConstant {}", self.argument),
                CONSTANT_NIL => write!(f, "PushConstant nil"),
                CONSTANT_TRUE => write!(f, "PushConstant true"),
                CONSTANT_FALSE => write!(f, "PushConstant false"),
                other => write!(f, "PushConstant ?{other}"),
            },
            Opcode::AssignInstance => write!(f, "AssignInstance {}", self.argument),
            Opcode::AssignTemporary => write!(f, "AssignTemporary {}", self.argument),
            Opcode::MarkArguments => write!(f, "MarkArguments {}", self.argument),
            Opcode::SendMessage => write!(f, "SendMessage {}", self.argument),
            Opcode::SendUnary => match UnaryBuiltin::try_from(self.argument) {
                Ok(UnaryBuiltin::IsNil) => write!(f, "SendUnary isNil"),
                Ok(UnaryBuiltin::NotNil) => write!(f, "SendUnary notNil"),
                Err(_) => write!(f, "SendUnary ?{}", self.argument),
            },
            Opcode::SendBinary => match BinaryBuiltin::try_from(self.argument) {
                Ok(op) => write!(f, "SendBinary {op}"),
                Err(_) => write!(f, "SendBinary ?{}", self.argument),
            },
            Opcode::PushBlock => write!(f, "PushBlock {} end {}", self.argument, self.extra),
            Opcode::DoPrimitive => {
                write!(f, "Primitive {} ({} arguments)", self.extra, self.argument)
            }
            Opcode::DoSpecial => match self.special() {
                Some(Special::SelfReturn) => write!(f, "Special selfReturn"),
                Some(Special::StackReturn) => write!(f, "Special stackReturn"),
                Some(Special::BlockReturn) => write!(f, "Special blockReturn"),
                Some(Special::Duplicate) => write!(f, "Special duplicate"),
                Some(Special::PopTop) => write!(f, "Special popTop"),
                Some(Special::Branch) => write!(f, "Special branch {}", self.extra),
                Some(Special::BranchIfTrue) => write!(f, "Special branchIfTrue {}", self.extra),
                Some(Special::BranchIfFalse) => {
                    write!(f, "Special branchIfFalse {}", self.extra)
                }
                Some(Special::SendToSuper) => write!(f, "Special sendToSuper {}", self.extra),
                None => write!(f, "Special ?{}", self.argument),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op;

    #[test]
    fn packed_round_trip() {
        let instructions = [
            op::push_temporary(3),
            op::mark_arguments(2),
            op::branch_if_false(0x1234),
            op::do_primitive(2, crate::primitive::SMALLINT_ADD),
        ];

        for instruction in instructions {
            let packed = instruction.pack();
            assert_eq!(Instruction::from_packed(packed).unwrap(), instruction);
        }
    }

    #[test]
    fn consumers_follow_the_effect_table() {
        assert_eq!(op::push_constant(1).consumed_values(), 0);
        assert_eq!(op::assign_temporary(0).consumed_values(), 1);
        assert_eq!(op::mark_arguments(3).consumed_values(), 3);
        assert_eq!(op::send_message(0).consumed_values(), 1);
        assert_eq!(op::send_binary(crate::BinaryBuiltin::Plus).consumed_values(), 2);
        assert_eq!(op::stack_return().consumed_values(), 1);
        assert_eq!(op::self_return().consumed_values(), 0);
        assert_eq!(op::branch(8).consumed_values(), 0);
        assert_eq!(op::branch_if_true(8).consumed_values(), 1);

        assert!(op::assign_instance(1).is_value_consumer());
        assert!(!op::push_block(0, 10).is_value_consumer());
        assert!(op::duplicate().is_value_provider());
        assert!(!op::pop_top().is_value_provider());
    }

    #[test]
    fn terminators_and_branches() {
        assert!(op::branch(0).is_branch());
        assert!(op::branch(0).is_terminator());
        assert!(op::stack_return().is_terminator());
        assert!(!op::stack_return().is_branch());
        assert!(!op::push_constant(0).is_terminator());
    }

    #[test]
    fn display_uses_disassembly_vocabulary() {
        assert_eq!(op::push_constant(CONSTANT_NIL).to_string(), "PushConstant nil");
        assert_eq!(
            op::send_binary(BinaryBuiltin::Plus).to_string(),
            "SendBinary +"
        );
        assert_eq!(op::branch_if_false(15).to_string(), "Special branchIfFalse 15");
        assert_eq!(
            op::do_primitive(2, 7).to_string(),
            "Primitive 7 (2 arguments)"
        );
    }
}
