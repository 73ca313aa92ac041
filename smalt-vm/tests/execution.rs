//! End-to-end execution scenarios over hand-assembled methods.

mod common;

use common::{copying_builder, interpreter, KIB};
use smalt_asm::{op, primitive, BinaryBuiltin, CONSTANT_FALSE, CONSTANT_NIL};
use smalt_vm::object::{ArrayRef, ProcessRef, SymbolRef};
use smalt_vm::{ExecuteResult, ImageBuilder, Interpreter, RawValue};

fn builder() -> ImageBuilder {
    copying_builder(64 * KIB, 256 * KIB)
}

fn result_of(interpreter: &mut Interpreter, method: RawValue, ticks: u32) -> (ExecuteResult, RawValue) {
    let method = smalt_vm::object::MethodRef::new(method.as_object());
    let process = interpreter.spawn_process(method).expect("spawn");
    let result = interpreter.execute(&process, ticks);
    let value = ProcessRef::new(process.object()).result();
    (result, value)
}

#[test]
fn integer_add() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    let code = op::assemble(&[
        op::push_constant(1),
        op::push_constant(2),
        op::send_binary(BinaryBuiltin::Plus),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert!(value.is_small_int());
    assert_eq!(value.as_small_int(), 3);
}

#[test]
fn branch_false_taken() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    // 0: pushConstant false  1: branchIfFalse 6  4: pushConstant 1
    // 5: stackReturn         6: pushConstant 2   7: stackReturn
    let code = op::assemble(&[
        op::push_constant(CONSTANT_FALSE),
        op::branch_if_false(6),
        op::push_constant(1),
        op::stack_return(),
        op::push_constant(2),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert_eq!(value.as_small_int(), 2);
}

#[test]
fn unanswered_message_is_bad_method() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    let foo = builder.intern("foo").unwrap();
    let code = op::assemble(&[
        op::push_constant(5),
        op::mark_arguments(1),
        op::send_message(0),
        op::stack_return(),
    ]);
    let method = builder
        .add_method(class, "run", &code, &[foo], 0, 4, 1)
        .unwrap();

    let mut vm = interpreter(builder);
    let (result, _) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::BadMethod);
}

#[test]
fn does_not_understand_reenters_with_the_boxed_message() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    let object_class = builder.core().object_class;

    // the handler answers its message argument: [selector, arguments]
    let dnu_code = op::assemble(&[op::push_argument(1), op::stack_return()]);
    builder
        .add_method(object_class, "doesNotUnderstand:", &dnu_code, &[], 0, 4, 2)
        .unwrap();

    let foo = builder.intern("foo").unwrap();
    let code = op::assemble(&[
        op::push_constant(5),
        op::mark_arguments(1),
        op::send_message(0),
        op::stack_return(),
    ]);
    let method = builder
        .add_method(class, "run", &code, &[foo], 0, 4, 1)
        .unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);

    let boxed = ArrayRef::new(value.as_object());
    assert_eq!(boxed.len(), 2);

    let selector = boxed.at(0);
    assert_eq!(
        selector.as_object().class(),
        vm.runtime().core().symbol_class
    );
    assert_eq!(SymbolRef::new(selector.as_object()).bytes(), b"foo");

    let original_arguments = ArrayRef::new(boxed.at(1).as_object());
    assert_eq!(original_arguments.len(), 1);
    assert_eq!(original_arguments.at(0).as_small_int(), 5);
}

#[test]
fn does_not_understand_keeps_the_receiver_in_slot_zero() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    let object_class = builder.core().object_class;

    // the handler answers self, which must still be the failing receiver
    let dnu_code = op::assemble(&[op::push_argument(0), op::stack_return()]);
    builder
        .add_method(object_class, "doesNotUnderstand:", &dnu_code, &[], 0, 4, 2)
        .unwrap();

    let foo = builder.intern("foo").unwrap();
    let code = op::assemble(&[
        op::push_constant(5),
        op::mark_arguments(1),
        op::send_message(0),
        op::stack_return(),
    ]);
    let method = builder
        .add_method(class, "run", &code, &[foo], 0, 4, 1)
        .unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert_eq!(value.as_small_int(), 5);
}

#[test]
fn tick_budget_expires_and_resumes() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    let limit = RawValue::small_int(10_000);
    // 0:  pushConstant 0      1: assignTemporary 0   2: popTop
    // 3:  pushTemporary 0     4: pushLiteral 0       5: sendBinary <
    // 6:  branchIfFalse 17    9: pushTemporary 0    10: pushConstant 1
    // 11: sendBinary +       12: assignTemporary 0  13: popTop
    // 14: branch 3           17: pushTemporary 0    18: stackReturn
    let code = op::assemble(&[
        op::push_constant(0),
        op::assign_temporary(0),
        op::pop_top(),
        op::push_temporary(0),
        op::push_literal(0),
        op::send_binary(BinaryBuiltin::Less),
        op::branch_if_false(17),
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

    assert_eq!(vm.execute(&process, 100), ExecuteResult::TimeExpired);
    // resume without a budget
    assert_eq!(vm.execute(&process, 0), ExecuteResult::Success);
    assert_eq!(
        ProcessRef::new(process.object()).result().as_small_int(),
        10_000
    );
}

#[test]
fn instance_variables_read_and_write() {
    let mut builder = builder();
    let class = builder.add_class("Counter", None).unwrap();
    let code = op::assemble(&[
        op::push_constant(9),
        op::assign_instance(0),
        op::pop_top(),
        op::push_instance(0),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let receiver = {
        let runtime = vm.runtime_mut();
        let instance = runtime.new_ordinary(class, 1).unwrap();
        RawValue::from_object(instance)
    };
    let method = smalt_vm::object::MethodRef::new(method.as_object());
    let process = vm.spawn_process_on(method, receiver).unwrap();

    assert_eq!(vm.execute(&process, 0), ExecuteResult::Success);
    assert_eq!(
        ProcessRef::new(process.object()).result().as_small_int(),
        9
    );
}

#[test]
fn block_stack_return_resumes_the_caller() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    // 0: pushBlock 0 end=5   3: pushConstant 4   4: stackReturn
    // 5: primitive 8 (1 arg) 7: stackReturn
    let code = op::assemble(&[
        op::push_block(0, 5),
        op::push_constant(4),
        op::stack_return(),
        op::do_primitive(1, primitive::BLOCK_INVOKE),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert_eq!(value.as_small_int(), 4);
}

#[test]
fn block_return_unwinds_past_the_creating_context() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    // blockReturn exits the method itself: the trailing pushConstant 9
    // and stackReturn never run.
    let code = op::assemble(&[
        op::push_block(0, 5),
        op::push_constant(6),
        op::block_return(),
        op::do_primitive(1, primitive::BLOCK_INVOKE),
        op::pop_top(),
        op::push_constant(9),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert_eq!(value.as_small_int(), 6);
}

#[test]
fn block_arguments_land_in_shared_temporaries() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    // 0: pushBlock 0 end=5   3: pushTemporary 0   4: stackReturn
    // 5: pushConstant 7      6: primitive 8 (2 args)   8: stackReturn
    let code = op::assemble(&[
        op::push_block(0, 5),
        op::push_temporary(0),
        op::stack_return(),
        op::push_constant(7),
        op::do_primitive(2, primitive::BLOCK_INVOKE),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 1, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert_eq!(value.as_small_int(), 7);
}

#[test]
fn failed_primitive_falls_through_to_the_failure_code() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    // smallIntAdd on nil fails softly: both operands stay, the method's
    // failure code cleans up and answers 9 instead.
    let code = op::assemble(&[
        op::push_constant(CONSTANT_NIL),
        op::push_constant(1),
        op::do_primitive(2, primitive::SMALLINT_ADD),
        op::pop_top(),
        op::pop_top(),
        op::push_constant(9),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert_eq!(value.as_small_int(), 9);
}

#[test]
fn successful_primitive_pops_operands_and_pushes_the_value() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    let code = op::assemble(&[
        op::push_constant(3),
        op::push_constant(4),
        op::do_primitive(2, primitive::SMALLINT_MUL),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert_eq!(value.as_small_int(), 12);
}

#[test]
fn identity_primitive_answers_booleans() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    let code = op::assemble(&[
        op::push_constant(CONSTANT_NIL),
        op::push_constant(CONSTANT_NIL),
        op::do_primitive(2, primitive::OBJECTS_ARE_EQUAL),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, value) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Success);
    assert_eq!(value, vm.runtime().core().true_object);
}

#[test]
fn missing_primitive_handler_fails_the_process() {
    let mut builder = builder();
    let class = builder.add_class("Scratch", None).unwrap();
    let code = op::assemble(&[
        op::do_primitive(0, 200),
        op::stack_return(),
    ]);
    let method = builder.add_method(class, "run", &code, &[], 0, 4, 1).unwrap();

    let mut vm = interpreter(builder);
    let (result, _) = result_of(&mut vm, method, 0);
    assert_eq!(result, ExecuteResult::Failure);
}
