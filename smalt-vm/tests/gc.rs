//! Collector behavior across real allocation patterns.

mod common;

use common::{copying_builder, interpreter, KIB};
use smalt_asm::{op, BinaryBuiltin};
use smalt_vm::object::ProcessRef;
use smalt_vm::{
    CopyingMemoryManager, ExecuteResult, Handle, MemoryManager, RawValue, WORD_SIZE,
};

#[test]
fn named_roots_survive_a_forced_collection() {
    let mut mm = CopyingMemoryManager::new(16 * KIB, 16 * KIB, KIB);

    // Hold a set of named roots, then fill the semi-space past 90%.
    let mut roots: Vec<(Handle, isize)> = Vec::new();
    for seed in 0..8 {
        let mut gc = false;
        let object = mm
            .new_ordinary(RawValue::ZERO, 4, RawValue::ZERO, &mut gc)
            .unwrap();
        for slot in 0..4 {
            object.set_slot(slot, RawValue::small_int(seed * 10 + slot as isize));
        }
        roots.push((mm.protect(RawValue::from_object(object)), seed));
    }

    let budget = mm.semi_space_words() * 9 / 10;
    while mm.allocated_words() < budget {
        let mut gc = false;
        mm.new_ordinary(RawValue::ZERO, 8, RawValue::ZERO, &mut gc)
            .unwrap();
    }

    mm.collect_garbage();

    for (handle, seed) in &roots {
        let object = handle.object();
        assert_eq!(object.addr() & 1, 0);
        assert_eq!(object.size(), 4);
        for slot in 0..4 {
            assert_eq!(object.slot(slot).as_small_int(), seed * 10 + slot as isize);
        }
    }
}

#[test]
fn collections_run_during_execution_without_corrupting_state() {
    // A heap this small forces many collections while the loop allocates
    // an argument array per iteration.
    let mut builder = copying_builder(4 * KIB, 8 * KIB);
    let class = builder.add_class("Scratch", None).unwrap();

    let limit = RawValue::small_int(500);
    // while temp0 < 500: [temp0] markArguments; popTop; temp0 := temp0 + 1
    let code = op::assemble(&[
        op::push_constant(0),
        op::assign_temporary(0),
        op::pop_top(),
        op::push_temporary(0),
        op::push_literal(0),
        op::send_binary(BinaryBuiltin::Less),
        op::branch_if_false(20),
        op::push_temporary(0),
        op::mark_arguments(1),
        op::pop_top(),
        op::push_temporary(0),
        op::push_constant(1),
        op::send_binary(BinaryBuiltin::Plus),
        op::assign_temporary(0),
        op::pop_top(),
        op::branch(3),
        op::push_temporary(0),
        op::stack_return(),
    ]);
    let method = builder
        .add_method(class, "run", &code, &[limit], 1, 8, 1)
        .unwrap();

    let mut vm = interpreter(builder);
    let method = smalt_vm::object::MethodRef::new(method.as_object());
    let process = vm.spawn_process(method).unwrap();

    assert_eq!(vm.execute(&process, 0), ExecuteResult::Success);
    assert_eq!(
        ProcessRef::new(process.object()).result().as_small_int(),
        500
    );
    assert!(
        vm.runtime().collections() > 0,
        "the loop must have forced at least one collection"
    );
}

#[test]
fn tagged_values_never_alias_heap_pointers() {
    let mut mm = CopyingMemoryManager::new(8 * KIB, 8 * KIB, KIB);
    for value in [0isize, 1, -1, 4095, -4096] {
        assert_eq!(RawValue::small_int(value).to_word() & 1, 1);
    }
    for _ in 0..32 {
        let mut gc = false;
        let object = mm
            .new_ordinary(RawValue::ZERO, 3, RawValue::ZERO, &mut gc)
            .unwrap();
        assert_eq!(object.addr() & 1, 0);
        assert_eq!(object.addr() % WORD_SIZE, 0);
    }
}

#[test]
fn explicit_collection_reclaims_garbage() {
    let mut mm = CopyingMemoryManager::new(16 * KIB, 16 * KIB, KIB);

    let mut gc = false;
    for _ in 0..32 {
        mm.new_ordinary(RawValue::ZERO, 8, RawValue::ZERO, &mut gc)
            .unwrap();
    }
    let allocated = mm.allocated_words();
    mm.collect_garbage();
    assert!(mm.allocated_words() < allocated);
    assert_eq!(mm.allocated_words(), 0, "nothing was reachable");
}
