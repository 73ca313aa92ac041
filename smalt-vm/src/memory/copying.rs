//! Semi-space copying collector.
//!
//! The dynamic heap is two equal semi-spaces; allocation bumps a pointer
//! in the active one. A collection swaps the spaces, copies the objects
//! reachable from the roots into the fresh space Cheney-style, then zeroes
//! the evacuated space. Contexts are allocated on every send, so keeping
//! allocation a plain bump is what pays for the copying.

use core::mem;
use core::ptr::NonNull;

use super::{zeroed_words, MemoryManager, SharedRoots};
use crate::error::VmError;
use crate::object::{ObjectHeader, RawValue, Word, WORD_SIZE};

/// The copying memory manager.
pub struct CopyingMemoryManager {
    active: Box<[Word]>,
    inactive: Box<[Word]>,
    /// Bump offset into the active space, in words.
    allocation_offset: usize,
    max_semi_words: usize,
    static_heap: Box<[Word]>,
    static_offset: usize,
    roots: SharedRoots,
    collections: u64,
}

impl CopyingMemoryManager {
    /// Create a manager with a dynamic heap of `heap_size` bytes (split
    /// into two semi-spaces), growable up to `heap_max` bytes, and a
    /// static arena of `static_size` bytes.
    pub fn new(heap_size: usize, heap_max: usize, static_size: usize) -> Self {
        let semi_words = (heap_size / 2).div_ceil(WORD_SIZE).max(ObjectHeader::WORDS);
        let max_semi_words = (heap_max / 2).div_ceil(WORD_SIZE).max(semi_words);

        Self {
            active: zeroed_words(semi_words),
            inactive: zeroed_words(semi_words),
            allocation_offset: 0,
            max_semi_words,
            static_heap: zeroed_words(static_size.div_ceil(WORD_SIZE)),
            static_offset: 0,
            roots: SharedRoots::default(),
            collections: 0,
        }
    }

    /// Size of one semi-space in words.
    pub fn semi_space_words(&self) -> usize {
        self.active.len()
    }

    /// Words currently allocated in the active semi-space.
    pub fn allocated_words(&self) -> usize {
        self.allocation_offset
    }

    fn bump(&mut self, words: usize) -> Option<NonNull<ObjectHeader>> {
        if self.allocation_offset + words > self.active.len() {
            return None;
        }
        // The backing store is a word slice, so the result is word-aligned
        // and its low tag bit is clear.
        let ptr = unsafe { self.active.as_mut_ptr().add(self.allocation_offset) };
        self.allocation_offset += words;
        NonNull::new(ptr.cast::<ObjectHeader>())
    }

    /// Evacuate the live graph from the current active space into `to`,
    /// making `to` the active space. Returns the evacuated space, zeroed.
    fn collect_into(&mut self, to: Box<[Word]>) -> Box<[Word]> {
        let mut from = mem::replace(&mut self.active, to);
        let from_base = from.as_mut_ptr() as Word;
        let from_end = from_base + from.len() * WORD_SIZE;
        self.allocation_offset = 0;

        // Root set: every live handle slot.
        let roots = self.roots.clone();
        for slot in roots.borrow_mut().iter_mut() {
            *slot = self.forward_value(*slot, from_base, from_end);
        }

        // The static arena is a root range: walk its objects and forward
        // their class words and slots, without moving the objects
        // themselves.
        let mut offset = 0;
        while offset < self.static_offset {
            let (words, slots, binary) = {
                let header =
                    unsafe { &*self.static_heap.as_ptr().add(offset).cast::<ObjectHeader>() };
                (header.object_word_len(), header.size(), header.is_binary())
            };
            let class_at = offset + 1;
            let forwarded =
                self.forward_value(RawValue::from_word(self.static_heap[class_at]), from_base, from_end);
            self.static_heap[class_at] = forwarded.to_word();
            if !binary {
                for index in 0..slots {
                    let at = offset + ObjectHeader::WORDS + index;
                    let forwarded =
                        self.forward_value(RawValue::from_word(self.static_heap[at]), from_base, from_end);
                    self.static_heap[at] = forwarded.to_word();
                }
            }
            offset += words;
        }

        // Cheney scan: forward the class word and slots of everything
        // already copied; copying appends, so the scan chases the
        // allocation pointer.
        let mut scan = 0;
        while scan < self.allocation_offset {
            let (words, slots, binary) = {
                let header = unsafe { &*self.active.as_ptr().add(scan).cast::<ObjectHeader>() };
                (header.object_word_len(), header.size(), header.is_binary())
            };
            let class_at = scan + 1;
            let forwarded =
                self.forward_value(RawValue::from_word(self.active[class_at]), from_base, from_end);
            self.active[class_at] = forwarded.to_word();
            if !binary {
                for index in 0..slots {
                    let at = scan + ObjectHeader::WORDS + index;
                    let forwarded =
                        self.forward_value(RawValue::from_word(self.active[at]), from_base, from_end);
                    self.active[at] = forwarded.to_word();
                }
            }
            scan += words;
        }

        from.fill(0);
        self.collections += 1;
        tracing::debug!(
            live_words = self.allocation_offset,
            collections = self.collections,
            "scavenge complete"
        );
        from
    }

    /// Forward one tagged word: immediates and pointers outside the
    /// from-space pass through; from-space pointers are copied (or their
    /// existing forwarding address is taken).
    fn forward_value(&mut self, value: RawValue, from_base: Word, from_end: Word) -> RawValue {
        if !value.is_pointer() {
            return value;
        }
        let addr = value.to_word();
        if addr < from_base || addr >= from_end {
            return value;
        }

        let mut old = value.as_object();
        if old.header().is_relocated() {
            return old.header().forwarding();
        }

        let words = old.word_len();
        let dest = self
            .bump(words)
            .expect("to-space holds at least the live data of the from-space");
        unsafe {
            core::ptr::copy_nonoverlapping(addr as *const Word, dest.as_ptr().cast::<Word>(), words);
        }
        let forwarded = RawValue::from_word(dest.as_ptr() as Word);
        old.header_mut().relocate_to(forwarded);
        forwarded
    }

    /// Grow both semi-spaces toward the cap, evacuating into the larger
    /// space. Returns false once the cap is reached.
    fn grow(&mut self) -> bool {
        let current = self.active.len();
        if current >= self.max_semi_words {
            return false;
        }
        let new_words = (current * 2).min(self.max_semi_words);
        tracing::debug!(from_words = current, to_words = new_words, "growing semi-spaces");

        let evacuated = self.collect_into(zeroed_words(new_words));
        drop(evacuated);
        self.inactive = zeroed_words(new_words);
        true
    }
}

impl MemoryManager for CopyingMemoryManager {
    fn allocate(
        &mut self,
        byte_len: usize,
        gc_occurred: &mut bool,
    ) -> Result<NonNull<ObjectHeader>, VmError> {
        let words = byte_len.div_ceil(WORD_SIZE);

        if let Some(ptr) = self.bump(words) {
            return Ok(ptr);
        }

        *gc_occurred = true;
        self.collect_garbage();
        if let Some(ptr) = self.bump(words) {
            return Ok(ptr);
        }

        while self.grow() {
            if let Some(ptr) = self.bump(words) {
                return Ok(ptr);
            }
        }

        tracing::error!(requested_bytes = byte_len, "allocation failed after collection");
        Err(VmError::OutOfMemory)
    }

    fn static_allocate(&mut self, byte_len: usize) -> Result<NonNull<ObjectHeader>, VmError> {
        let words = byte_len.div_ceil(WORD_SIZE);
        if self.static_offset + words > self.static_heap.len() {
            tracing::error!(requested_bytes = byte_len, "static arena exhausted");
            return Err(VmError::OutOfMemory);
        }
        let ptr = unsafe { self.static_heap.as_mut_ptr().add(self.static_offset) };
        self.static_offset += words;
        Ok(NonNull::new(ptr.cast::<ObjectHeader>()).expect("static arena is non-null"))
    }

    fn collect_garbage(&mut self) {
        let to = mem::replace(&mut self.inactive, zeroed_words(0));
        let from = self.collect_into(to);
        self.inactive = from;
    }

    fn roots(&self) -> SharedRoots {
        self.roots.clone()
    }

    fn collections(&self) -> u64 {
        self.collections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Handle;
    use crate::object::ObjectPtr;

    const KIB: usize = 1024;

    fn manager() -> CopyingMemoryManager {
        CopyingMemoryManager::new(8 * KIB, 8 * KIB, 4 * KIB)
    }

    fn alloc_array(mm: &mut CopyingMemoryManager, slots: usize) -> ObjectPtr {
        let mut gc = false;
        mm.new_ordinary(RawValue::ZERO, slots, RawValue::ZERO, &mut gc)
            .unwrap()
    }

    #[test]
    fn allocations_are_word_aligned_and_untagged() {
        let mut mm = manager();
        for slots in 0..16 {
            let object = alloc_array(&mut mm, slots);
            assert_eq!(object.addr() & 1, 0);
            assert_eq!(object.addr() % WORD_SIZE, 0);
        }
    }

    #[test]
    fn collection_preserves_reachable_graph() {
        let mut mm = manager();

        let head = alloc_array(&mut mm, 2);
        let tail = alloc_array(&mut mm, 1);
        tail.set_slot(0, RawValue::small_int(99));
        head.set_slot(0, RawValue::small_int(7));
        head.set_slot(1, RawValue::from_object(tail));

        let handle = mm.protect(RawValue::from_object(head));
        let before = head.addr();

        // Unreachable garbage between the live objects.
        for _ in 0..10 {
            alloc_array(&mut mm, 8);
        }

        mm.collect_garbage();

        let moved = handle.object();
        assert_ne!(moved.addr(), before, "live object must have been copied");
        assert_eq!(moved.slot(0).as_small_int(), 7);

        let tail = moved.slot(1).as_object();
        assert_eq!(tail.slot(0).as_small_int(), 99);

        drop(handle);
        let live_before = mm.allocated_words();
        mm.collect_garbage();
        assert!(mm.allocated_words() < live_before);
    }

    #[test]
    fn shared_objects_are_copied_once() {
        let mut mm = manager();

        let shared = alloc_array(&mut mm, 1);
        shared.set_slot(0, RawValue::small_int(5));

        let a = alloc_array(&mut mm, 1);
        a.set_slot(0, RawValue::from_object(shared));
        let b = alloc_array(&mut mm, 1);
        b.set_slot(0, RawValue::from_object(shared));

        let ha = mm.protect(RawValue::from_object(a));
        let hb = mm.protect(RawValue::from_object(b));

        mm.collect_garbage();

        let a = ha.object();
        let b = hb.object();
        assert_eq!(a.slot(0), b.slot(0), "both parents must see one copy");
        assert_eq!(a.slot(0).as_object().slot(0).as_small_int(), 5);

        drop(hb);
        drop(ha);
    }

    #[test]
    fn static_objects_never_move_but_their_slots_are_forwarded() {
        let mut mm = manager();

        let static_cell = mm
            .new_static_ordinary(RawValue::ZERO, 1, RawValue::ZERO)
            .unwrap();
        let dynamic = alloc_array(&mut mm, 1);
        dynamic.set_slot(0, RawValue::small_int(11));
        static_cell.set_slot(0, RawValue::from_object(dynamic));

        let static_addr = static_cell.addr();
        mm.collect_garbage();

        assert_eq!(static_cell.addr(), static_addr);
        let forwarded = static_cell.slot(0).as_object();
        assert_ne!(forwarded.addr(), dynamic.addr());
        assert_eq!(forwarded.slot(0).as_small_int(), 11);
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let mut mm = CopyingMemoryManager::new(KIB, KIB, KIB);
        let mut handles: Vec<Handle> = Vec::new();

        // Keep everything alive so the collector can free nothing.
        let mut gc = false;
        let result = loop {
            match mm.new_ordinary(RawValue::ZERO, 8, RawValue::ZERO, &mut gc) {
                Ok(object) => handles.push(mm.protect(RawValue::from_object(object))),
                Err(error) => break error,
            }
        };
        assert_eq!(result, VmError::OutOfMemory);
        assert!(gc, "a collection must have been attempted");
    }

    #[test]
    fn growth_up_to_the_cap() {
        let mut mm = CopyingMemoryManager::new(KIB, 4 * KIB, KIB);
        let initial = mm.semi_space_words();

        let mut handles = Vec::new();
        for _ in 0..24 {
            let mut gc = false;
            let object = mm
                .new_ordinary(RawValue::ZERO, 8, RawValue::ZERO, &mut gc)
                .expect("heap grows to fit");
            handles.push(mm.protect(RawValue::from_object(object)));
        }

        assert!(mm.semi_space_words() > initial);
    }
}
