//! Allocation interface and the two memory managers.
//!
//! Collection happens only inside [`MemoryManager::allocate`] and
//! [`MemoryManager::collect_garbage`]; there are no other safe points and
//! therefore no write barrier. Any raw pointer held across an allocation
//! must be wrapped in a [`Handle`].

mod copying;
mod noncollect;
mod roots;

pub use copying::CopyingMemoryManager;
pub use noncollect::NonCollectMemoryManager;
pub use roots::{Handle, RootSlots, SharedRoots};

use core::ptr::NonNull;

use crate::error::VmError;
use crate::object::{
    binary_byte_len, ordinary_byte_len, HeaderFlags, ObjectHeader, ObjectPtr, RawValue,
};

/// Allocation interface of the virtual machine.
///
/// All returned memory is word-aligned and zeroed. The `gc_occurred`
/// out-flag reports that a collection (or a heap growth) ran during the
/// call, which invalidates every raw pointer not protected by a
/// [`Handle`].
pub trait MemoryManager {
    /// Bump-allocate `byte_len` bytes in the dynamic heap, collecting on
    /// exhaustion.
    fn allocate(
        &mut self,
        byte_len: usize,
        gc_occurred: &mut bool,
    ) -> Result<NonNull<ObjectHeader>, VmError>;

    /// Allocate in the static arena. Static objects are scanned as roots
    /// but never moved or reclaimed.
    fn static_allocate(&mut self, byte_len: usize) -> Result<NonNull<ObjectHeader>, VmError>;

    /// Run an explicit collection.
    fn collect_garbage(&mut self);

    /// The shared root slot registry scanned during collection.
    fn roots(&self) -> SharedRoots;

    /// Number of collections run so far.
    fn collections(&self) -> u64;

    /// Allocate and initialize an ordinary object of `class` with `slots`
    /// data slots, each set to `fill`.
    ///
    /// `class` and `fill` are read after the allocation point: they must
    /// be immune to collection (static-heap objects) or handle-protected
    /// by the caller.
    fn new_ordinary(
        &mut self,
        class: RawValue,
        slots: usize,
        fill: RawValue,
        gc_occurred: &mut bool,
    ) -> Result<ObjectPtr, VmError> {
        let raw = self.allocate(ordinary_byte_len(slots), gc_occurred)?;
        let mut object = ObjectPtr::from_header(raw);
        object.header_mut().init(slots, HeaderFlags::empty(), class);
        for index in 0..slots {
            object.set_slot(index, fill);
        }
        Ok(object)
    }

    /// Allocate and initialize a binary object of `class` with `byte_len`
    /// zeroed payload bytes.
    fn new_binary(
        &mut self,
        class: RawValue,
        byte_len: usize,
        gc_occurred: &mut bool,
    ) -> Result<ObjectPtr, VmError> {
        let raw = self.allocate(binary_byte_len(byte_len), gc_occurred)?;
        let mut object = ObjectPtr::from_header(raw);
        object.header_mut().init(byte_len, HeaderFlags::BINARY, class);
        Ok(object)
    }

    /// [`Self::new_ordinary`] in the static arena.
    fn new_static_ordinary(
        &mut self,
        class: RawValue,
        slots: usize,
        fill: RawValue,
    ) -> Result<ObjectPtr, VmError> {
        let raw = self.static_allocate(ordinary_byte_len(slots))?;
        let mut object = ObjectPtr::from_header(raw);
        object.header_mut().init(slots, HeaderFlags::empty(), class);
        for index in 0..slots {
            object.set_slot(index, fill);
        }
        Ok(object)
    }

    /// [`Self::new_binary`] in the static arena.
    fn new_static_binary(
        &mut self,
        class: RawValue,
        byte_len: usize,
    ) -> Result<ObjectPtr, VmError> {
        let raw = self.static_allocate(binary_byte_len(byte_len))?;
        let mut object = ObjectPtr::from_header(raw);
        object.header_mut().init(byte_len, HeaderFlags::BINARY, class);
        Ok(object)
    }

    /// Protect `value` with a scoped root slot.
    fn protect(&self, value: RawValue) -> Handle {
        Handle::new(self.roots(), value)
    }
}

pub(crate) fn zeroed_words(words: usize) -> Box<[crate::object::Word]> {
    vec![0; words].into_boxed_slice()
}
