use core::fmt;

/// The opcode byte that selects the extended wire encoding. Never present in
/// a decoded [`crate::Instruction`].
pub(crate) const EXTENDED: u8 = 0x0;

/// The byte can't be mapped to any known opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid opcode byte {0:#04x}")]
pub struct InvalidOpcode(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
/// Usual opcode representation for the interpreter.
///
/// The numeric values are fixed by the wire format: the high nibble of an
/// instruction's first byte, except for the extended form where the opcode
/// moves to the low nibble. Value `0` marks the extended form and `14` is
/// unassigned; neither maps to a variant.
pub enum Opcode {
    /// Push an instance variable of the receiver.
    PushInstance = 0x1,
    /// Push a method argument. Argument 0 is the receiver.
    PushArgument = 0x2,
    /// Push a temporary variable.
    PushTemporary = 0x3,
    /// Push a method literal.
    PushLiteral = 0x4,
    /// Push an inline constant: a small integer 0..=9, nil, true or false.
    PushConstant = 0x5,
    /// Store the stack top into an instance variable. The top is not popped.
    AssignInstance = 0x6,
    /// Store the stack top into a temporary variable. The top is not popped.
    AssignTemporary = 0x7,
    /// Pop `argument` values into a fresh array and push it.
    MarkArguments = 0x8,
    /// Pop an argument array and activate the method named by a literal
    /// selector on the class of its first element.
    SendMessage = 0x9,
    /// Pop a receiver and push the result of a built-in unary message.
    SendUnary = 0xA,
    /// Pop two operands and apply a built-in binary message.
    SendBinary = 0xB,
    /// Allocate a block closure over the current context and skip its body.
    PushBlock = 0xC,
    /// Invoke a numbered primitive with `argument` stack operands.
    DoPrimitive = 0xD,
    /// Escape to the special instruction set selected by `argument`.
    DoSpecial = 0xF,
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(b: u8) -> Result<Self, InvalidOpcode> {
        use Opcode::*;
        match b {
            0x1 => Ok(PushInstance),
            0x2 => Ok(PushArgument),
            0x3 => Ok(PushTemporary),
            0x4 => Ok(PushLiteral),
            0x5 => Ok(PushConstant),
            0x6 => Ok(AssignInstance),
            0x7 => Ok(AssignTemporary),
            0x8 => Ok(MarkArguments),
            0x9 => Ok(SendMessage),
            0xA => Ok(SendUnary),
            0xB => Ok(SendBinary),
            0xC => Ok(PushBlock),
            0xD => Ok(DoPrimitive),
            0xF => Ok(DoSpecial),
            _ => Err(InvalidOpcode(b)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
/// Special instruction selected by the argument nibble of
/// [`Opcode::DoSpecial`].
pub enum Special {
    /// Return the receiver to the previous context.
    SelfReturn = 1,
    /// Pop the stack top and return it to the previous context.
    StackReturn = 2,
    /// Pop the stack top and return it past the creating context of the
    /// current block activation.
    BlockReturn = 3,
    /// Push a copy of the stack top.
    Duplicate = 4,
    /// Drop the stack top.
    PopTop = 5,
    /// Set the program counter to the extra operand.
    Branch = 6,
    /// Pop the top; branch if it is the true object.
    BranchIfTrue = 7,
    /// Pop the top; branch if it is the false object.
    BranchIfFalse = 8,
    /// Send a literal selector starting the lookup at the parent of the
    /// current method's defining class.
    SendToSuper = 11,
}

impl TryFrom<u8> for Special {
    type Error = InvalidOpcode;

    fn try_from(b: u8) -> Result<Self, InvalidOpcode> {
        use Special::*;
        match b {
            1 => Ok(SelfReturn),
            2 => Ok(StackReturn),
            3 => Ok(BlockReturn),
            4 => Ok(Duplicate),
            5 => Ok(PopTop),
            6 => Ok(Branch),
            7 => Ok(BranchIfTrue),
            8 => Ok(BranchIfFalse),
            11 => Ok(SendToSuper),
            _ => Err(InvalidOpcode(b)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
/// Built-in unary message dispatched by [`Opcode::SendUnary`].
pub enum UnaryBuiltin {
    /// Receiver identity with nil.
    IsNil = 0,
    /// Negated identity with nil.
    NotNil = 1,
}

impl TryFrom<u8> for UnaryBuiltin {
    type Error = InvalidOpcode;

    fn try_from(b: u8) -> Result<Self, InvalidOpcode> {
        match b {
            0 => Ok(UnaryBuiltin::IsNil),
            1 => Ok(UnaryBuiltin::NotNil),
            _ => Err(InvalidOpcode(b)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
/// Built-in binary message dispatched by [`Opcode::SendBinary`].
///
/// The interpreter evaluates these inline when both operands are tagged
/// small integers and falls back to a full message send otherwise.
pub enum BinaryBuiltin {
    /// `<`
    Less = 0,
    /// `<=`
    LessOrEqual = 1,
    /// `+`
    Plus = 2,
}

impl BinaryBuiltin {
    /// Selector text of the message this built-in stands for.
    pub const fn selector(&self) -> &'static str {
        match self {
            BinaryBuiltin::Less => "<",
            BinaryBuiltin::LessOrEqual => "<=",
            BinaryBuiltin::Plus => "+",
        }
    }
}

impl TryFrom<u8> for BinaryBuiltin {
    type Error = InvalidOpcode;

    fn try_from(b: u8) -> Result<Self, InvalidOpcode> {
        match b {
            0 => Ok(BinaryBuiltin::Less),
            1 => Ok(BinaryBuiltin::LessOrEqual),
            2 => Ok(BinaryBuiltin::Plus),
            _ => Err(InvalidOpcode(b)),
        }
    }
}

impl fmt::Display for BinaryBuiltin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

/// [`Opcode::PushConstant`] argument for the nil object. Arguments 0..=9
/// push the corresponding small integer.
pub const CONSTANT_NIL: u8 = 10;
/// [`Opcode::PushConstant`] argument for the true object.
pub const CONSTANT_TRUE: u8 = 11;
/// [`Opcode::PushConstant`] argument for the false object.
pub const CONSTANT_FALSE: u8 = 12;

/// Primitive numbers of the [`Opcode::DoPrimitive`] dispatch table.
///
/// The table is sparse; unlisted numbers belong to the host I/O surface
/// which is installed by the front-end, not by the core.
pub mod primitive {
    /// Identity comparison of two objects.
    pub const OBJECTS_ARE_EQUAL: u8 = 1;
    /// Class of the operand.
    pub const GET_CLASS: u8 = 2;
    /// Slot or byte count of the operand.
    pub const GET_SIZE: u8 = 4;
    /// Indexed store into an ordinary object.
    pub const AT_PUT: u8 = 5;
    /// Replace the currently running process.
    pub const START_NEW_PROCESS: u8 = 6;
    /// Allocate an ordinary object of a given class and size.
    pub const ALLOCATE_OBJECT: u8 = 7;
    /// Activate a block closure.
    pub const BLOCK_INVOKE: u8 = 8;

    /// Small integer addition.
    pub const SMALLINT_ADD: u8 = 10;
    /// Small integer division.
    pub const SMALLINT_DIV: u8 = 11;
    /// Small integer modulo.
    pub const SMALLINT_MOD: u8 = 12;
    /// Small integer comparison, `<`.
    pub const SMALLINT_LESS: u8 = 13;
    /// Small integer comparison, `=`.
    pub const SMALLINT_EQUAL: u8 = 14;
    /// Small integer multiplication.
    pub const SMALLINT_MUL: u8 = 15;
    /// Small integer subtraction.
    pub const SMALLINT_SUB: u8 = 16;

    /// Abort the current process with a failure.
    pub const THROW_ERROR: u8 = 19;
    /// Allocate a binary object of a given class and byte size.
    pub const ALLOCATE_BYTE_ARRAY: u8 = 20;
    /// Indexed load from a string.
    pub const STRING_AT: u8 = 21;
    /// Indexed store into a string.
    pub const STRING_AT_PUT: u8 = 22;
    /// Shallow copy of a binary object under a new class.
    pub const CLONE_BYTE_OBJECT: u8 = 23;
    /// Indexed load from an ordinary object.
    pub const ARRAY_AT: u8 = 24;
    /// Box an integer into a small integer value.
    pub const INTEGER_NEW: u8 = 32;
    /// Clear the method lookup cache.
    pub const FLUSH_CACHE: u8 = 34;
    /// Small integer bitwise or.
    pub const SMALLINT_BIT_OR: u8 = 36;
    /// Small integer bitwise and.
    pub const SMALLINT_BIT_AND: u8 = 37;
    /// Copy a run of elements between indexable objects.
    pub const BULK_REPLACE: u8 = 38;
    /// Small integer arithmetic shift.
    pub const SMALLINT_BIT_SHIFT: u8 = 39;
}
