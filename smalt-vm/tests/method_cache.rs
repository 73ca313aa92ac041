//! Method cache statistics over a real send loop.

mod common;

use common::{interpreter, noncollect_builder};
use smalt_asm::{op, BinaryBuiltin};
use smalt_vm::object::{MethodRef, ProcessRef};
use smalt_vm::{ExecuteResult, RawValue};

#[test]
fn one_miss_then_hits_for_a_thousand_sends() {
    // The non-collecting manager keeps the cache warm: a collection
    // would clear it and skew the counters.
    let mut builder = noncollect_builder();
    let class = builder.add_class("Scratch", None).unwrap();

    let small_int_class = builder.core().small_int_class;
    let noop_code = op::assemble(&[op::self_return()]);
    builder
        .add_method(small_int_class, "noop", &noop_code, &[], 0, 2, 1)
        .unwrap();

    let limit = RawValue::small_int(1000);
    let noop = builder.intern("noop").unwrap();
    // while temp0 < 1000: (5 noop); temp0 := temp0 + 1
    let code = op::assemble(&[
        op::push_constant(0),
        op::assign_temporary(0),
        op::pop_top(),
        op::push_temporary(0),
        op::push_literal(0),
        op::send_binary(BinaryBuiltin::Less),
        op::branch_if_false(21),
        op::push_constant(5),
        op::mark_arguments(1),
        op::send_message(1),
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
        .add_method(class, "run", &code, &[limit, noop], 1, 8, 1)
        .unwrap();

    let mut vm = interpreter(builder);
    let method = MethodRef::new(method.as_object());
    let process = vm.spawn_process(method).unwrap();

    assert_eq!(vm.execute(&process, 0), ExecuteResult::Success);
    assert_eq!(
        ProcessRef::new(process.object()).result().as_small_int(),
        1000
    );

    let stat = vm.runtime().cache_stat();
    assert_eq!(stat.misses, 1);
    assert_eq!(stat.hits, 999);
    assert!((stat.ratio() - 99.9).abs() < 0.01);
}

#[test]
fn flushing_the_cache_costs_one_extra_miss() {
    let mut builder = noncollect_builder();
    let class = builder.add_class("Scratch", None).unwrap();

    let small_int_class = builder.core().small_int_class;
    let noop_code = op::assemble(&[op::self_return()]);
    builder
        .add_method(small_int_class, "noop", &noop_code, &[], 0, 2, 1)
        .unwrap();

    let noop = builder.intern("noop").unwrap();
    let code = op::assemble(&[
        op::push_constant(5),
        op::mark_arguments(1),
        op::send_message(0),
        op::stack_return(),
    ]);
    let method = builder
        .add_method(class, "run", &code, &[noop], 0, 4, 1)
        .unwrap();

    let mut vm = interpreter(builder);
    let method = MethodRef::new(method.as_object());

    for _ in 0..3 {
        let process = vm.spawn_process(method).unwrap();
        assert_eq!(vm.execute(&process, 0), ExecuteResult::Success);
    }
    let stat = vm.runtime().cache_stat();
    assert_eq!(stat.misses, 1);
    assert_eq!(stat.hits, 2);

    vm.runtime_mut().flush_cache();
    let process = vm.spawn_process(method).unwrap();
    assert_eq!(vm.execute(&process, 0), ExecuteResult::Success);

    let stat = vm.runtime().cache_stat();
    assert_eq!(stat.misses, 2);
    assert_eq!(stat.hits, 2);
}
