//! Shared scaffolding: booted images over either memory manager.

#![allow(dead_code)] // each test binary uses a different subset

use smalt_vm::{
    CopyingMemoryManager, ImageBuilder, Interpreter, MemoryManager, NonCollectMemoryManager,
};

pub const KIB: usize = 1024;

pub fn copying_builder(heap: usize, heap_max: usize) -> ImageBuilder {
    let memory: Box<dyn MemoryManager> =
        Box::new(CopyingMemoryManager::new(heap, heap_max, 128 * KIB));
    ImageBuilder::new(memory).expect("kernel boot")
}

pub fn noncollect_builder() -> ImageBuilder {
    let memory: Box<dyn MemoryManager> =
        Box::new(NonCollectMemoryManager::new(256 * KIB, 128 * KIB));
    ImageBuilder::new(memory).expect("kernel boot")
}

pub fn interpreter(builder: ImageBuilder) -> Interpreter {
    Interpreter::new(builder.finish())
}
