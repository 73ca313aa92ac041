//! Typed views over raw objects.
//!
//! Slot positions of the well-known layouts are fixed by the image format;
//! each view names them and offers accessors over an untyped
//! [`ObjectPtr`]. Views are plain copies of the pointer: they move with
//! the object only if re-read through a handle after an allocation point.

use super::{ObjectPtr, RawValue};

macro_rules! object_view {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(ObjectPtr);

        impl $name {
            /// Wrap an untyped pointer. The caller asserts the layout.
            pub const fn new(object: ObjectPtr) -> Self {
                Self(object)
            }

            /// The underlying untyped pointer.
            pub const fn as_object(self) -> ObjectPtr {
                self.0
            }

            /// The underlying tagged word.
            pub fn as_value(self) -> RawValue {
                RawValue::from_object(self.0)
            }
        }
    };
}

object_view! {
    /// A class: name, parent link, method dictionary and instance size.
    ClassRef
}

impl ClassRef {
    /// Slot holding the class name symbol.
    pub const NAME: usize = 0;
    /// Slot holding the parent class, or nil at the hierarchy root.
    pub const PARENT: usize = 1;
    /// Slot holding the method dictionary.
    pub const METHODS: usize = 2;
    /// Slot holding the instance slot count as a small integer.
    pub const SIZE: usize = 3;
    /// Number of slots in a class object.
    pub const SLOT_COUNT: usize = 4;

    /// Class name symbol.
    pub fn name(self) -> RawValue {
        self.0.slot(Self::NAME)
    }

    /// Parent class, or nil.
    pub fn parent(self) -> RawValue {
        self.0.slot(Self::PARENT)
    }

    /// Method dictionary.
    pub fn methods(self) -> DictionaryRef {
        DictionaryRef::new(self.0.slot(Self::METHODS).as_object())
    }

    /// Replace the method dictionary.
    pub fn set_methods(self, methods: DictionaryRef) {
        self.0.set_slot(Self::METHODS, methods.as_value());
    }

    /// Instance slot count.
    pub fn instance_size(self) -> usize {
        self.0.slot(Self::SIZE).as_small_int() as usize
    }
}

object_view! {
    /// A compiled method.
    MethodRef
}

impl MethodRef {
    /// Slot holding the selector symbol.
    pub const NAME: usize = 0;
    /// Slot holding the binary bytecode array.
    pub const BYTECODES: usize = 1;
    /// Slot holding the literal array.
    pub const LITERALS: usize = 2;
    /// Slot holding the operand stack size as a small integer.
    pub const STACK_SIZE: usize = 3;
    /// Slot holding the temporary count as a small integer.
    pub const TEMPORARY_SIZE: usize = 4;
    /// Slot holding the defining class.
    pub const CLASS: usize = 5;
    /// Slot holding the argument count as a small integer.
    pub const ARGUMENT_COUNT: usize = 6;
    /// Number of slots in a method object.
    pub const SLOT_COUNT: usize = 7;

    /// Selector symbol.
    pub fn selector(self) -> RawValue {
        self.0.slot(Self::NAME)
    }

    /// The bytecode array object.
    pub fn bytecodes(self) -> ObjectPtr {
        self.0.slot(Self::BYTECODES).as_object()
    }

    /// Literal array.
    pub fn literals(self) -> ArrayRef {
        ArrayRef::new(self.0.slot(Self::LITERALS).as_object())
    }

    /// Operand stack size of an activation.
    pub fn stack_size(self) -> usize {
        self.0.slot(Self::STACK_SIZE).as_small_int() as usize
    }

    /// Temporary variable count of an activation.
    pub fn temporary_size(self) -> usize {
        self.0.slot(Self::TEMPORARY_SIZE).as_small_int() as usize
    }

    /// Defining class.
    pub fn class(self) -> ClassRef {
        ClassRef::new(self.0.slot(Self::CLASS).as_object())
    }

    /// Declared argument count, receiver included.
    pub fn argument_count(self) -> usize {
        self.0.slot(Self::ARGUMENT_COUNT).as_small_int() as usize
    }
}

object_view! {
    /// An activation record of a method.
    ContextRef
}

impl ContextRef {
    /// Slot holding the running method.
    pub const METHOD: usize = 0;
    /// Slot holding the argument array; element 0 is the receiver.
    pub const ARGUMENTS: usize = 1;
    /// Slot holding the temporaries array.
    pub const TEMPORARIES: usize = 2;
    /// Slot holding the operand stack array.
    pub const STACK: usize = 3;
    /// Slot holding the program counter as a small integer.
    pub const BYTE_POINTER: usize = 4;
    /// Slot holding the stack top index as a small integer.
    pub const STACK_TOP: usize = 5;
    /// Slot holding the calling context, or nil at the chain head.
    pub const PREVIOUS: usize = 6;
    /// Number of slots in a method activation.
    pub const SLOT_COUNT: usize = 7;

    /// The running method.
    pub fn method(self) -> MethodRef {
        MethodRef::new(self.0.slot(Self::METHOD).as_object())
    }

    /// Argument array of the activation.
    pub fn arguments(self) -> ArrayRef {
        ArrayRef::new(self.0.slot(Self::ARGUMENTS).as_object())
    }

    /// Temporaries array of the activation.
    pub fn temporaries(self) -> ArrayRef {
        ArrayRef::new(self.0.slot(Self::TEMPORARIES).as_object())
    }

    /// Operand stack array.
    pub fn stack(self) -> ArrayRef {
        ArrayRef::new(self.0.slot(Self::STACK).as_object())
    }

    /// Program counter, a byte offset into the method's bytecodes.
    pub fn pc(self) -> usize {
        self.0.slot(Self::BYTE_POINTER).as_small_int() as usize
    }

    /// Reposition the program counter.
    pub fn set_pc(self, pc: usize) {
        self.0.set_slot(Self::BYTE_POINTER, RawValue::small_int(pc as _));
    }

    /// Stack top index; the next push goes here.
    pub fn stack_top(self) -> usize {
        self.0.slot(Self::STACK_TOP).as_small_int() as usize
    }

    /// Move the stack top index.
    pub fn set_stack_top(self, top: usize) {
        self.0.set_slot(Self::STACK_TOP, RawValue::small_int(top as _));
    }

    /// Calling context, or nil.
    pub fn previous(self) -> RawValue {
        self.0.slot(Self::PREVIOUS)
    }
}

object_view! {
    /// A block closure. Shares the activation layout of [`ContextRef`] and
    /// adds the creating context, the location its arguments occupy in the
    /// shared temporaries, and the entry offset of its body.
    BlockRef
}

impl BlockRef {
    /// Slot holding the temporary index where block arguments land.
    pub const ARGUMENT_LOCATION: usize = ContextRef::SLOT_COUNT;
    /// Slot holding the context that pushed the block.
    pub const CREATING_CONTEXT: usize = ContextRef::SLOT_COUNT + 1;
    /// Slot holding the entry byte offset of the block body.
    pub const BLOCK_BYTE_POINTER: usize = ContextRef::SLOT_COUNT + 2;
    /// Number of slots in a block object.
    pub const SLOT_COUNT: usize = ContextRef::SLOT_COUNT + 3;

    /// The activation view of this block.
    pub fn as_context(self) -> ContextRef {
        ContextRef::new(self.0)
    }

    /// Temporary index where the block's arguments are stored.
    pub fn argument_location(self) -> usize {
        self.0.slot(Self::ARGUMENT_LOCATION).as_small_int() as usize
    }

    /// The context that created this block.
    pub fn creating_context(self) -> ContextRef {
        ContextRef::new(self.0.slot(Self::CREATING_CONTEXT).as_object())
    }

    /// Entry byte offset of the block body.
    pub fn block_byte_pointer(self) -> usize {
        self.0.slot(Self::BLOCK_BYTE_POINTER).as_small_int() as usize
    }
}

object_view! {
    /// A process: the head of a context chain plus the final result slot.
    ProcessRef
}

impl ProcessRef {
    /// Slot holding the current context, or nil when terminated.
    pub const CONTEXT: usize = 0;
    /// Slot holding the scheduler state word.
    pub const STATE: usize = 1;
    /// Slot holding the result written by the outermost return.
    pub const RESULT: usize = 2;
    /// Number of slots in a process object.
    pub const SLOT_COUNT: usize = 3;

    /// Current context, or nil.
    pub fn context(self) -> RawValue {
        self.0.slot(Self::CONTEXT)
    }

    /// Replace the current context.
    pub fn set_context(self, context: RawValue) {
        self.0.set_slot(Self::CONTEXT, context);
    }

    /// Result of the outermost return.
    pub fn result(self) -> RawValue {
        self.0.slot(Self::RESULT)
    }

    /// Record the result of the outermost return.
    pub fn set_result(self, result: RawValue) {
        self.0.set_slot(Self::RESULT, result);
    }
}

object_view! {
    /// An indexable ordinary object.
    ArrayRef
}

impl ArrayRef {
    /// Element count.
    pub fn len(self) -> usize {
        self.0.size()
    }

    /// Whether the array has no elements.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Read element `index`.
    pub fn at(self, index: usize) -> RawValue {
        self.0.slot(index)
    }

    /// Write element `index`.
    pub fn at_put(self, index: usize, value: RawValue) {
        self.0.set_slot(index, value);
    }
}

object_view! {
    /// An interned selector or identifier; a binary object whose payload
    /// is the symbol text.
    SymbolRef
}

impl SymbolRef {
    /// Byte content of the symbol.
    pub fn bytes(&self) -> &[u8] {
        self.0.bytes()
    }

    /// Symbol text, if valid UTF-8.
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(self.bytes()).unwrap_or("<non-utf8 symbol>")
    }
}

object_view! {
    /// Sorted parallel-array mapping from symbols to objects.
    DictionaryRef
}

impl DictionaryRef {
    /// Slot holding the sorted key array.
    pub const KEYS: usize = 0;
    /// Slot holding the value array, parallel to the keys.
    pub const VALUES: usize = 1;
    /// Number of slots in a dictionary object.
    pub const SLOT_COUNT: usize = 2;

    /// Sorted key array.
    pub fn keys(self) -> ArrayRef {
        ArrayRef::new(self.0.slot(Self::KEYS).as_object())
    }

    /// Value array, parallel to the keys.
    pub fn values(self) -> ArrayRef {
        ArrayRef::new(self.0.slot(Self::VALUES).as_object())
    }
}
