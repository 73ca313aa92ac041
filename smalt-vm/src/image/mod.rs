//! Image core objects and boot-time construction.
//!
//! The well-known objects (nil, the booleans, the kernel classes and the
//! core selectors) are created in the static arena during boot and handed
//! to every other component through the [`CoreObjects`] registry. Being
//! static, they never move; the collector scans them as a root range.

mod dictionary;

pub use dictionary::lookup;
pub(crate) use dictionary::insertion_point;

use smalt_asm::BinaryBuiltin;

use crate::error::VmError;
use crate::memory::MemoryManager;
use crate::object::{ArrayRef, ClassRef, DictionaryRef, MethodRef, ObjectPtr, RawValue, SymbolRef};

/// The registry of well-known objects. All of them live in the static
/// arena, so the raw values stay valid across collections.
#[derive(Debug, Clone, Copy)]
pub struct CoreObjects {
    /// The nil object.
    pub nil: RawValue,
    /// The true object.
    pub true_object: RawValue,
    /// The false object.
    pub false_object: RawValue,

    /// Class of classes.
    pub class_class: RawValue,
    /// Root of the class hierarchy.
    pub object_class: RawValue,
    /// Class of nil.
    pub undefined_class: RawValue,
    /// Class of the true object.
    pub true_class: RawValue,
    /// Class of the false object.
    pub false_class: RawValue,
    /// Class answered for tagged small integers.
    pub small_int_class: RawValue,
    /// Class of ordinary indexable objects.
    pub array_class: RawValue,
    /// Class of raw byte arrays (bytecode).
    pub byte_array_class: RawValue,
    /// Class of strings.
    pub string_class: RawValue,
    /// Class of interned symbols.
    pub symbol_class: RawValue,
    /// Class of block closures.
    pub block_class: RawValue,
    /// Class of activation records.
    pub context_class: RawValue,
    /// Class of compiled methods.
    pub method_class: RawValue,
    /// Class of processes.
    pub process_class: RawValue,
    /// Class of method dictionaries.
    pub dictionary_class: RawValue,

    /// The `doesNotUnderstand:` selector.
    pub does_not_understand: RawValue,
    binary_selectors: [RawValue; 3],
}

impl CoreObjects {
    /// Selector symbol of a built-in binary message.
    pub fn binary_selector(&self, builtin: BinaryBuiltin) -> RawValue {
        self.binary_selectors[builtin as usize]
    }

    /// Whether `value` is the nil object.
    pub fn is_nil(&self, value: RawValue) -> bool {
        value == self.nil
    }

    /// The true or false object for a native boolean.
    pub fn boolean(&self, value: bool) -> RawValue {
        if value {
            self.true_object
        } else {
            self.false_object
        }
    }
}

/// A booted object memory: the manager plus the well-known registry.
pub struct Image {
    pub(crate) memory: Box<dyn MemoryManager>,
    pub(crate) core: CoreObjects,
}

impl Image {
    /// The well-known objects.
    pub fn core(&self) -> &CoreObjects {
        &self.core
    }
}

/// Boot-time constructor of the static image: kernel classes, interned
/// symbols, user classes and compiled methods.
pub struct ImageBuilder {
    memory: Box<dyn MemoryManager>,
    core: CoreObjects,
    /// Interned symbols, sorted by byte content.
    symbols: Vec<RawValue>,
}

impl ImageBuilder {
    /// Boot the kernel objects into the static arena of `memory`.
    pub fn new(mut memory: Box<dyn MemoryManager>) -> Result<Self, VmError> {
        let class_class = class_shell(&mut *memory)?;
        let object_class = class_shell(&mut *memory)?;
        let undefined_class = class_shell(&mut *memory)?;
        let true_class = class_shell(&mut *memory)?;
        let false_class = class_shell(&mut *memory)?;
        let small_int_class = class_shell(&mut *memory)?;
        let array_class = class_shell(&mut *memory)?;
        let byte_array_class = class_shell(&mut *memory)?;
        let string_class = class_shell(&mut *memory)?;
        let symbol_class = class_shell(&mut *memory)?;
        let block_class = class_shell(&mut *memory)?;
        let context_class = class_shell(&mut *memory)?;
        let method_class = class_shell(&mut *memory)?;
        let process_class = class_shell(&mut *memory)?;
        let dictionary_class = class_shell(&mut *memory)?;

        let shells = [
            class_class,
            object_class,
            undefined_class,
            true_class,
            false_class,
            small_int_class,
            array_class,
            byte_array_class,
            string_class,
            symbol_class,
            block_class,
            context_class,
            method_class,
            process_class,
            dictionary_class,
        ];
        for shell in shells {
            let mut object = shell.as_object();
            object.header_mut().set_class(class_class);
        }

        let nil = RawValue::from_object(memory.new_static_ordinary(
            undefined_class,
            0,
            RawValue::ZERO,
        )?);
        let true_object =
            RawValue::from_object(memory.new_static_ordinary(true_class, 0, RawValue::ZERO)?);
        let false_object =
            RawValue::from_object(memory.new_static_ordinary(false_class, 0, RawValue::ZERO)?);

        let mut builder = Self {
            memory,
            core: CoreObjects {
                nil,
                true_object,
                false_object,
                class_class,
                object_class,
                undefined_class,
                true_class,
                false_class,
                small_int_class,
                array_class,
                byte_array_class,
                string_class,
                symbol_class,
                block_class,
                context_class,
                method_class,
                process_class,
                dictionary_class,
                does_not_understand: RawValue::ZERO,
                binary_selectors: [RawValue::ZERO; 3],
            },
            symbols: Vec::new(),
        };

        builder.initialize_class(object_class, "Object", nil)?;
        builder.initialize_class(class_class, "Class", object_class)?;
        builder.initialize_class(undefined_class, "Undefined", object_class)?;
        builder.initialize_class(true_class, "True", object_class)?;
        builder.initialize_class(false_class, "False", object_class)?;
        builder.initialize_class(small_int_class, "SmallInt", object_class)?;
        builder.initialize_class(array_class, "Array", object_class)?;
        builder.initialize_class(byte_array_class, "ByteArray", object_class)?;
        builder.initialize_class(string_class, "String", object_class)?;
        builder.initialize_class(symbol_class, "Symbol", object_class)?;
        builder.initialize_class(block_class, "Block", object_class)?;
        builder.initialize_class(context_class, "Context", object_class)?;
        builder.initialize_class(method_class, "Method", object_class)?;
        builder.initialize_class(process_class, "Process", object_class)?;
        builder.initialize_class(dictionary_class, "Dictionary", object_class)?;

        builder.core.does_not_understand = builder.intern("doesNotUnderstand:")?;
        builder.core.binary_selectors = [
            builder.intern("<")?,
            builder.intern("<=")?,
            builder.intern("+")?,
        ];

        tracing::debug!(symbols = builder.symbols.len(), "image kernel booted");
        Ok(builder)
    }

    /// The well-known objects booted so far.
    pub fn core(&self) -> &CoreObjects {
        &self.core
    }

    /// Intern `name`, creating the symbol on first use.
    pub fn intern(&mut self, name: &str) -> Result<RawValue, VmError> {
        let bytes = name.as_bytes();
        let position = self
            .symbols
            .binary_search_by(|symbol| SymbolRef::new(symbol.as_object()).bytes().cmp(bytes));
        match position {
            Ok(index) => Ok(self.symbols[index]),
            Err(index) => {
                let mut symbol = self
                    .memory
                    .new_static_binary(self.core.symbol_class, bytes.len())?;
                symbol.bytes_mut().copy_from_slice(bytes);
                let value = RawValue::from_object(symbol);
                self.symbols.insert(index, value);
                Ok(value)
            }
        }
    }

    /// Create a class named `name` under `parent` (the Object class when
    /// `None`), with an empty method dictionary.
    pub fn add_class(&mut self, name: &str, parent: Option<RawValue>) -> Result<RawValue, VmError> {
        let class = class_shell(&mut *self.memory)?;
        class.as_object().header_mut().set_class(self.core.class_class);
        let parent = parent.unwrap_or(self.core.object_class);
        self.initialize_class(class, name, parent)?;
        Ok(class)
    }

    /// Create a static array holding `values`.
    pub fn literal_array(&mut self, values: &[RawValue]) -> Result<RawValue, VmError> {
        let array =
            self.memory
                .new_static_ordinary(self.core.array_class, values.len(), self.core.nil)?;
        let array = ArrayRef::new(array);
        for (index, value) in values.iter().enumerate() {
            array.at_put(index, *value);
        }
        Ok(array.as_value())
    }

    /// Create a static string.
    pub fn string(&mut self, text: &str) -> Result<RawValue, VmError> {
        let mut object = self
            .memory
            .new_static_binary(self.core.string_class, text.len())?;
        object.bytes_mut().copy_from_slice(text.as_bytes());
        Ok(RawValue::from_object(object))
    }

    /// Compile-free method installation: wrap an already-assembled byte
    /// array and its literals into a method object and add it to the
    /// method dictionary of `class`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_method(
        &mut self,
        class: RawValue,
        selector: &str,
        bytecodes: &[u8],
        literals: &[RawValue],
        temporary_size: usize,
        stack_size: usize,
        argument_count: usize,
    ) -> Result<RawValue, VmError> {
        let selector = self.intern(selector)?;

        let mut code = self
            .memory
            .new_static_binary(self.core.byte_array_class, bytecodes.len())?;
        code.bytes_mut().copy_from_slice(bytecodes);

        let literals = self.literal_array(literals)?;

        let method = self.memory.new_static_ordinary(
            self.core.method_class,
            MethodRef::SLOT_COUNT,
            self.core.nil,
        )?;
        method.set_slot(MethodRef::NAME, selector);
        method.set_slot(MethodRef::BYTECODES, RawValue::from_object(code));
        method.set_slot(MethodRef::LITERALS, literals);
        method.set_slot(MethodRef::STACK_SIZE, RawValue::small_int(stack_size as _));
        method.set_slot(
            MethodRef::TEMPORARY_SIZE,
            RawValue::small_int(temporary_size as _),
        );
        method.set_slot(MethodRef::CLASS, class);
        method.set_slot(
            MethodRef::ARGUMENT_COUNT,
            RawValue::small_int(argument_count as _),
        );

        let method = RawValue::from_object(method);
        self.install_method(class, selector, method)?;
        Ok(method)
    }

    /// Finish boot and hand the memory over to the interpreter.
    pub fn finish(self) -> Image {
        Image {
            memory: self.memory,
            core: self.core,
        }
    }

    fn initialize_class(
        &mut self,
        class: RawValue,
        name: &str,
        parent: RawValue,
    ) -> Result<(), VmError> {
        let name = self.intern(name)?;
        let methods = self.new_dictionary()?;

        let object = class.as_object();
        object.set_slot(ClassRef::NAME, name);
        object.set_slot(ClassRef::PARENT, parent);
        object.set_slot(ClassRef::METHODS, methods);
        object.set_slot(ClassRef::SIZE, RawValue::small_int(0));
        Ok(())
    }

    fn new_dictionary(&mut self) -> Result<RawValue, VmError> {
        let keys = self
            .memory
            .new_static_ordinary(self.core.array_class, 0, self.core.nil)?;
        let values = self
            .memory
            .new_static_ordinary(self.core.array_class, 0, self.core.nil)?;
        let dictionary = self.memory.new_static_ordinary(
            self.core.dictionary_class,
            DictionaryRef::SLOT_COUNT,
            self.core.nil,
        )?;
        dictionary.set_slot(DictionaryRef::KEYS, RawValue::from_object(keys));
        dictionary.set_slot(DictionaryRef::VALUES, RawValue::from_object(values));
        Ok(RawValue::from_object(dictionary))
    }

    /// Insert `(selector, method)` into the sorted method dictionary of
    /// `class`, growing the parallel arrays by one.
    fn install_method(
        &mut self,
        class: RawValue,
        selector: RawValue,
        method: RawValue,
    ) -> Result<(), VmError> {
        let class = ClassRef::new(class.as_object());
        let dictionary = class.methods();
        let selector_bytes = SymbolRef::new(selector.as_object());

        let position = insertion_point(dictionary, selector_bytes.bytes());
        let keys = dictionary.keys();
        let values = dictionary.values();

        // Replace in place when the selector is already bound.
        if position < keys.len() {
            let existing = SymbolRef::new(keys.at(position).as_object());
            if existing.bytes() == selector_bytes.bytes() {
                values.at_put(position, method);
                return Ok(());
            }
        }

        let new_keys =
            self.memory
                .new_static_ordinary(self.core.array_class, keys.len() + 1, self.core.nil)?;
        let new_values = self.memory.new_static_ordinary(
            self.core.array_class,
            values.len() + 1,
            self.core.nil,
        )?;
        let new_keys = ArrayRef::new(new_keys);
        let new_values = ArrayRef::new(new_values);

        for index in 0..position {
            new_keys.at_put(index, keys.at(index));
            new_values.at_put(index, values.at(index));
        }
        new_keys.at_put(position, selector);
        new_values.at_put(position, method);
        for index in position..keys.len() {
            new_keys.at_put(index + 1, keys.at(index));
            new_values.at_put(index + 1, values.at(index));
        }

        dictionary
            .as_object()
            .set_slot(DictionaryRef::KEYS, new_keys.as_value());
        dictionary
            .as_object()
            .set_slot(DictionaryRef::VALUES, new_values.as_value());
        Ok(())
    }
}

fn class_shell(memory: &mut dyn MemoryManager) -> Result<RawValue, VmError> {
    let shell: ObjectPtr =
        memory.new_static_ordinary(RawValue::ZERO, ClassRef::SLOT_COUNT, RawValue::ZERO)?;
    Ok(RawValue::from_object(shell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NonCollectMemoryManager;

    fn builder() -> ImageBuilder {
        let memory = Box::new(NonCollectMemoryManager::new(64 * 1024, 64 * 1024));
        ImageBuilder::new(memory).unwrap()
    }

    #[test]
    fn kernel_classes_are_wired() {
        let builder = builder();
        let core = builder.core();

        let small_int = ClassRef::new(core.small_int_class.as_object());
        assert_eq!(SymbolRef::new(small_int.name().as_object()).as_str(), "SmallInt");
        assert_eq!(small_int.parent(), core.object_class);

        // classes are instances of Class
        assert_eq!(core.array_class.as_object().class(), core.class_class);
        // nil is an instance of Undefined
        assert_eq!(core.nil.as_object().class(), core.undefined_class);
    }

    #[test]
    fn interning_is_idempotent() {
        let mut builder = builder();
        let a = builder.intern("foo:bar:").unwrap();
        let b = builder.intern("foo:bar:").unwrap();
        assert_eq!(a, b);

        let other = builder.intern("foo:baz:").unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn method_dictionaries_stay_sorted() {
        let mut builder = builder();
        let class = builder.add_class("Point", None).unwrap();

        for selector in ["y", "x", "setX:", "printOn:", "asString"] {
            builder
                .add_method(class, selector, &[0xF1], &[], 0, 1, 1)
                .unwrap();
        }

        let dictionary = ClassRef::new(class.as_object()).methods();
        let keys = dictionary.keys();
        assert_eq!(keys.len(), 5);
        for index in 1..keys.len() {
            let previous = SymbolRef::new(keys.at(index - 1).as_object());
            let current = SymbolRef::new(keys.at(index).as_object());
            assert!(previous.bytes() < current.bytes());
        }

        for selector in ["x", "y", "setX:", "printOn:", "asString"] {
            assert!(lookup(dictionary, selector.as_bytes()).is_some());
        }
        assert!(lookup(dictionary, b"missing").is_none());
    }

    #[test]
    fn reinstalling_a_selector_replaces_the_method() {
        let mut builder = builder();
        let class = builder.add_class("Point", None).unwrap();

        let first = builder.add_method(class, "x", &[0xF1], &[], 0, 1, 1).unwrap();
        let second = builder.add_method(class, "x", &[0xF2], &[], 0, 1, 1).unwrap();
        assert_ne!(first, second);

        let dictionary = ClassRef::new(class.as_object()).methods();
        assert_eq!(dictionary.keys().len(), 1);
        assert_eq!(lookup(dictionary, b"x"), Some(second));
    }
}
