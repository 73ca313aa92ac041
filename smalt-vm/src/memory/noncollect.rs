//! Non-collecting memory manager.
//!
//! Services every request by continuous allocation and never reclaims:
//! when a chunk fills up, a fresh one is appended. Not meant for long
//! runs; it exists for test scenarios where a small task runs in one
//! shot and for ruling the collector out while debugging.

use core::ptr::NonNull;

use super::{zeroed_words, MemoryManager, SharedRoots};
use crate::error::VmError;
use crate::object::{ObjectHeader, Word, WORD_SIZE};

/// The appending, never-collecting memory manager.
pub struct NonCollectMemoryManager {
    chunk_words: usize,
    chunks: Vec<Box<[Word]>>,
    /// Bump offset into the newest chunk, in words.
    offset: usize,
    static_heap: Box<[Word]>,
    static_offset: usize,
    roots: SharedRoots,
}

impl NonCollectMemoryManager {
    /// Create a manager with `heap_size`-byte chunks and a static arena of
    /// `static_size` bytes.
    pub fn new(heap_size: usize, static_size: usize) -> Self {
        let chunk_words = heap_size.div_ceil(WORD_SIZE).max(ObjectHeader::WORDS);
        Self {
            chunk_words,
            chunks: vec![zeroed_words(chunk_words)],
            offset: 0,
            static_heap: zeroed_words(static_size.div_ceil(WORD_SIZE)),
            static_offset: 0,
            roots: SharedRoots::default(),
        }
    }

    /// Number of chunks appended so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl MemoryManager for NonCollectMemoryManager {
    fn allocate(
        &mut self,
        byte_len: usize,
        gc_occurred: &mut bool,
    ) -> Result<NonNull<ObjectHeader>, VmError> {
        let words = byte_len.div_ceil(WORD_SIZE);

        let chunk_len = self.chunks.last().map_or(0, |chunk| chunk.len());
        if self.offset + words > chunk_len {
            self.chunks.push(zeroed_words(self.chunk_words.max(words)));
            self.offset = 0;
            // The heap moved under the caller the same way a collection
            // would have, as far as reload obligations go.
            *gc_occurred = true;
            tracing::debug!(chunks = self.chunks.len(), "appended heap chunk");
        }

        let chunk = self.chunks.last_mut().expect("at least one chunk exists");
        let ptr = unsafe { chunk.as_mut_ptr().add(self.offset) };
        self.offset += words;
        Ok(NonNull::new(ptr.cast::<ObjectHeader>()).expect("chunk is non-null"))
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
        // Nothing is ever released.
    }

    fn roots(&self) -> SharedRoots {
        self.roots.clone()
    }

    fn collections(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::RawValue;

    #[test]
    fn appends_chunks_instead_of_collecting() {
        let mut mm = NonCollectMemoryManager::new(256, 256);
        assert_eq!(mm.chunk_count(), 1);

        let mut grew = false;
        for _ in 0..64 {
            let mut gc = false;
            let object = mm
                .new_ordinary(RawValue::ZERO, 4, RawValue::ZERO, &mut gc)
                .unwrap();
            assert_eq!(object.addr() & 1, 0);
            grew |= gc;
        }

        assert!(grew);
        assert!(mm.chunk_count() > 1);
    }

    #[test]
    fn objects_stay_put() {
        let mut mm = NonCollectMemoryManager::new(256, 256);
        let mut gc = false;
        let object = mm
            .new_ordinary(RawValue::ZERO, 1, RawValue::ZERO, &mut gc)
            .unwrap();
        object.set_slot(0, RawValue::small_int(3));

        let before = object.addr();
        mm.collect_garbage();
        assert_eq!(object.addr(), before);
        assert_eq!(object.slot(0).as_small_int(), 3);
    }
}
