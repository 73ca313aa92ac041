//! Per-process execution state and the operations opcode handlers use.
//!
//! All mutable interpreter state lives in heap objects reached through the
//! current-process root handle, so a collection at any allocation point
//! leaves the machine consistent and the runtime merely re-reads moved
//! pointers on the next access.

use crate::backtrace::Backtrace;
use crate::cache::{CacheStat, MethodCache};
use crate::error::VmError;
use crate::image::{self, CoreObjects, Image};
use crate::memory::{Handle, MemoryManager};
use crate::object::{
    ArrayRef, ClassRef, ContextRef, MethodRef, ObjectPtr, ProcessRef, RawValue, SymbolRef,
};

/// The interpreter's mutable state and service surface for handlers.
pub struct Runtime {
    memory: Box<dyn MemoryManager>,
    core: CoreObjects,
    cache: MethodCache,
    /// Root handle to the currently running process.
    process: Handle,
}

impl Runtime {
    /// Wrap a booted image.
    pub fn new(image: Image) -> Self {
        let Image { memory, core } = image;
        let process = Handle::new(memory.roots(), core.nil);
        Self {
            memory,
            core,
            cache: MethodCache::new(),
            process,
        }
    }

    /// The well-known objects.
    pub fn core(&self) -> &CoreObjects {
        &self.core
    }

    /// Whether `value` is the nil object.
    pub fn is_nil(&self, value: RawValue) -> bool {
        self.core.is_nil(value)
    }

    // --- process and frame ------------------------------------------------

    /// Switch the runtime to `process`.
    pub fn set_process(&mut self, process: RawValue) {
        self.process.set(process);
    }

    /// The running process.
    pub fn current_process(&self) -> ProcessRef {
        ProcessRef::new(self.process.object())
    }

    /// The current context value; nil once the process terminated.
    pub fn current_context(&self) -> RawValue {
        self.current_process().context()
    }

    /// The current context. Must not be called on a terminated process.
    pub fn context(&self) -> ContextRef {
        ContextRef::new(self.current_context().as_object())
    }

    /// Replace the current context.
    pub fn set_context(&mut self, context: RawValue) {
        self.current_process().set_context(context);
    }

    /// Record the result of the outermost return.
    pub fn set_process_result(&mut self, result: RawValue) {
        self.current_process().set_result(result);
    }

    /// Program counter of the current context.
    pub fn pc(&self) -> usize {
        self.context().pc()
    }

    /// Reposition the program counter of the current context.
    pub fn set_pc(&mut self, pc: usize) {
        self.context().set_pc(pc);
    }

    // --- operand stack ----------------------------------------------------

    /// Push onto the current context's operand stack.
    pub fn stack_push(&mut self, value: RawValue) {
        let context = self.context();
        let top = context.stack_top();
        context.stack().at_put(top, value);
        context.set_stack_top(top + 1);
    }

    /// Pop the operand stack.
    pub fn stack_pop(&mut self) -> RawValue {
        let context = self.context();
        let top = context.stack_top() - 1;
        context.set_stack_top(top);
        context.stack().at(top)
    }

    /// Read `offset` values below the stack top without popping.
    pub fn stack_top(&self, offset: usize) -> RawValue {
        let context = self.context();
        context.stack().at(context.stack_top() - 1 - offset)
    }

    /// Drop `count` values from the operand stack.
    pub fn stack_drop(&mut self, count: usize) {
        let context = self.context();
        context.set_stack_top(context.stack_top() - count);
    }

    // --- variable access --------------------------------------------------

    /// Instance variable `index` of the receiver.
    pub fn instance_var(&self, index: usize) -> RawValue {
        self.receiver().slot(index)
    }

    /// Store into instance variable `index` of the receiver.
    pub fn set_instance_var(&mut self, index: usize, value: RawValue) {
        self.receiver().set_slot(index, value);
    }

    /// Argument `index` of the current activation; 0 is the receiver.
    pub fn argument_var(&self, index: usize) -> RawValue {
        self.context().arguments().at(index)
    }

    /// Temporary variable `index` of the current activation.
    pub fn temporary_var(&self, index: usize) -> RawValue {
        self.context().temporaries().at(index)
    }

    /// Store into temporary variable `index` of the current activation.
    pub fn set_temporary_var(&mut self, index: usize, value: RawValue) {
        self.context().temporaries().at_put(index, value);
    }

    /// Literal `index` of the running method.
    pub fn literal_var(&self, index: usize) -> RawValue {
        self.context().method().literals().at(index)
    }

    fn receiver(&self) -> ObjectPtr {
        self.argument_var(0).as_object()
    }

    // --- classes and lookup -----------------------------------------------

    /// Class of any tagged value: the tag decides before the header is
    /// touched, tagged words have no header.
    pub fn class_of(&self, value: RawValue) -> RawValue {
        if value.is_small_int() {
            self.core.small_int_class
        } else {
            value.as_object().class()
        }
    }

    /// Look `selector` up starting at `class`, walking the parent chain
    /// through the method cache.
    pub fn lookup_method(&mut self, selector: RawValue, class: RawValue) -> Option<MethodRef> {
        if let Some(method) = self.cache.get(selector, class) {
            return Some(method);
        }

        let selector_bytes = SymbolRef::new(selector.as_object());
        let mut current = class;
        while !self.is_nil(current) && current.is_pointer() {
            let dictionary = ClassRef::new(current.as_object()).methods();
            if let Some(method) = image::lookup(dictionary, selector_bytes.bytes()) {
                let method = MethodRef::new(method.as_object());
                self.cache.set(selector, class, method);
                return Some(method);
            }
            current = ClassRef::new(current.as_object()).parent();
        }
        None
    }

    /// Counters of the method cache.
    pub fn cache_stat(&self) -> CacheStat {
        self.cache.stat()
    }

    /// Drop every method cache entry.
    pub fn flush_cache(&mut self) {
        self.cache.clear();
    }

    // --- allocation -------------------------------------------------------

    /// Allocate an ordinary object, nil-filled. `class` must survive a
    /// collection (static, or handle-protected by the caller).
    pub fn new_ordinary(&mut self, class: RawValue, slots: usize) -> Result<ObjectPtr, VmError> {
        let mut gc_occurred = false;
        let nil = self.core.nil;
        let object = self.memory.new_ordinary(class, slots, nil, &mut gc_occurred)?;
        if gc_occurred {
            // method pointers moved
            self.cache.clear();
        }
        Ok(object)
    }

    /// Allocate a zeroed binary object.
    pub fn new_binary(&mut self, class: RawValue, byte_len: usize) -> Result<ObjectPtr, VmError> {
        let mut gc_occurred = false;
        let object = self.memory.new_binary(class, byte_len, &mut gc_occurred)?;
        if gc_occurred {
            self.cache.clear();
        }
        Ok(object)
    }

    /// Allocate a new array of `len` nil elements.
    pub fn new_array(&mut self, len: usize) -> Result<ArrayRef, VmError> {
        let class = self.core.array_class;
        Ok(ArrayRef::new(self.new_ordinary(class, len)?))
    }

    /// Protect `value` with a scoped root slot.
    pub fn protect(&self, value: RawValue) -> Handle {
        self.memory.protect(value)
    }

    /// Run an explicit collection.
    pub fn collect_garbage(&mut self) {
        self.memory.collect_garbage();
        self.cache.clear();
    }

    /// Collections run by the memory manager so far.
    pub fn collections(&self) -> u64 {
        self.memory.collections()
    }

    // --- diagnostics ------------------------------------------------------

    /// Snapshot the context chain of the running process.
    pub fn backtrace(&self) -> Backtrace {
        Backtrace::capture(&self.core, self.current_context())
    }
}
