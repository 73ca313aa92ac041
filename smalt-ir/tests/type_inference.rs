//! Inference behavior over assembled methods: folding, joins,
//! signatures, determinism.

use smalt_asm::{op, BinaryBuiltin, Instruction, UnaryBuiltin, CONSTANT_NIL, CONSTANT_TRUE};
use smalt_ir::{CallContext, ControlGraph, ParsedMethod, Type, TypeAnalyzer, TypeSystem};
use smalt_vm::object::MethodRef;
use smalt_vm::{Image, ImageBuilder, MemoryManager, NonCollectMemoryManager, RawValue};

struct Fixture {
    image: Image,
    method: MethodRef,
    parsed: ParsedMethod,
    graph: ControlGraph,
}

fn fixture(instructions: &[Instruction], literals: &[RawValue]) -> Fixture {
    let memory: Box<dyn MemoryManager> =
        Box::new(NonCollectMemoryManager::new(64 * 1024, 64 * 1024));
    let mut builder = ImageBuilder::new(memory).unwrap();
    let class = builder.add_class("Scratch", None).unwrap();

    let code = op::assemble(instructions);
    let method = builder
        .add_method(class, "run", &code, literals, 2, 8, 1)
        .unwrap();
    let method = MethodRef::new(method.as_object());

    let parsed = ParsedMethod::parse(method.bytecodes().bytes()).unwrap();
    let graph = ControlGraph::build(parsed.code()).unwrap();

    Fixture {
        image: builder.finish(),
        method,
        parsed,
        graph,
    }
}

fn analyze(fixture: &Fixture, arguments: Type) -> CallContext {
    let mut context = CallContext::new(0, arguments, fixture.graph.len());
    let analyzer = TypeAnalyzer::new(&fixture.graph, fixture.method, fixture.image.core());
    analyzer.run(&mut context);
    context
}

#[test]
fn literal_addition_folds() {
    let fixture = fixture(
        &[
            op::push_constant(1),
            op::push_constant(2),
            op::send_binary(BinaryBuiltin::Plus),
            op::stack_return(),
        ],
        &[],
    );
    let context = analyze(&fixture, Type::Polytype);
    assert_eq!(
        context.return_type(),
        &Type::Literal(RawValue::small_int(3))
    );
}

#[test]
fn literal_comparison_folds_to_a_boolean_literal() {
    let fixture = fixture(
        &[
            op::push_constant(1),
            op::push_constant(2),
            op::send_binary(BinaryBuiltin::Less),
            op::stack_return(),
        ],
        &[],
    );
    let context = analyze(&fixture, Type::Polytype);
    assert_eq!(
        context.return_type(),
        &Type::Literal(fixture.image.core().true_object)
    );
}

#[test]
fn is_nil_on_a_literal_folds() {
    let fixture = fixture(
        &[
            op::push_constant(CONSTANT_NIL),
            op::send_unary(UnaryBuiltin::IsNil),
            op::stack_return(),
        ],
        &[],
    );
    let context = analyze(&fixture, Type::Polytype);
    assert_eq!(
        context.return_type(),
        &Type::Literal(fixture.image.core().true_object)
    );
}

#[test]
fn disagreeing_literals_join_to_their_class() {
    // 0: pushConstant true  1: branchIfTrue 8   4: pushConstant 1
    // 5: branch 9           8: pushConstant 2   9: stackReturn
    let fixture = fixture(
        &[
            op::push_constant(CONSTANT_TRUE),
            op::branch_if_true(8),
            op::push_constant(1),
            op::branch(9),
            op::push_constant(2),
            op::stack_return(),
        ],
        &[],
    );
    let context = analyze(&fixture, Type::Polytype);

    let core = fixture.image.core();
    assert_eq!(
        context.return_type(),
        &Type::Monotype(core.small_int_class)
    );

    // the join slot carries exactly one phi, typed like the return
    let join = fixture.parsed.code().block_id_at(9).unwrap();
    let phis = fixture.graph.phis_in(join);
    assert_eq!(phis.len(), 1);
    assert_eq!(
        context.node_type(phis[0]),
        &Type::Monotype(core.small_int_class)
    );
}

#[test]
fn mark_arguments_produces_an_array_type() {
    let fixture = fixture(
        &[
            op::push_constant(1),
            op::push_constant(CONSTANT_TRUE),
            op::mark_arguments(2),
            op::stack_return(),
        ],
        &[],
    );
    let context = analyze(&fixture, Type::Polytype);

    let core = fixture.image.core();
    assert_eq!(
        context.return_type(),
        &Type::Array(vec![
            Type::Literal(RawValue::small_int(1)),
            Type::Literal(core.true_object),
        ])
    );
}

#[test]
fn argument_signature_flows_into_the_return_type() {
    let instructions = [op::push_argument(1), op::stack_return()];
    let fixture = fixture(&instructions, &[]);

    let open = analyze(&fixture, Type::Polytype);
    assert_eq!(open.return_type(), &Type::Polytype);

    let concrete = analyze(
        &fixture,
        Type::Array(vec![
            Type::Polytype,
            Type::Literal(RawValue::small_int(5)),
        ]),
    );
    assert_eq!(
        concrete.return_type(),
        &Type::Literal(RawValue::small_int(5))
    );
}

#[test]
fn analysis_is_deterministic_and_idempotent() {
    let fixture = fixture(
        &[
            op::push_constant(CONSTANT_TRUE),
            op::branch_if_true(8),
            op::push_constant(1),
            op::branch(9),
            op::push_constant(2),
            op::stack_return(),
        ],
        &[],
    );

    let first = analyze(&fixture, Type::Polytype);
    let second = analyze(&fixture, Type::Polytype);

    for (id, _) in fixture.graph.nodes() {
        assert_eq!(first.node_type(id), second.node_type(id));
    }
    assert_eq!(first.return_type(), second.return_type());

    // a second run over an already-converged context changes nothing
    let mut resumed = analyze(&fixture, Type::Polytype);
    let before: Vec<Type> = fixture
        .graph
        .nodes()
        .map(|(id, _)| resumed.node_type(id).clone())
        .collect();
    TypeAnalyzer::new(&fixture.graph, fixture.method, fixture.image.core()).run(&mut resumed);
    for (index, (id, _)) in fixture.graph.nodes().enumerate() {
        assert_eq!(&before[index], resumed.node_type(id));
    }
}

#[test]
fn tau_on_the_nil_edge_refines_to_nil() {
    // 0: pushArgument 0   1: sendUnary isNil   2: branchIfTrue 7
    // 5: pushConstant 1   6: stackReturn       7: pushConstant 2   8: stackReturn
    let fixture = fixture(
        &[
            op::push_argument(0),
            op::send_unary(UnaryBuiltin::IsNil),
            op::branch_if_true(7),
            op::push_constant(1),
            op::stack_return(),
            op::push_constant(2),
            op::stack_return(),
        ],
        &[],
    );
    let context = analyze(&fixture, Type::Polytype);

    let taken = fixture.parsed.code().block_id_at(7).unwrap();
    let taus = fixture.graph.taus_in(taken);
    assert_eq!(taus.len(), 1);
    assert_eq!(
        context.node_type(taus[0]),
        &Type::Literal(fixture.image.core().nil)
    );
}

#[test]
fn call_contexts_are_keyed_by_method_and_signature() {
    let fixture = fixture(&[op::push_argument(1), op::stack_return()], &[]);

    let mut system = TypeSystem::new();
    let open = system.context_for(fixture.method, Type::Polytype, fixture.graph.len());
    let open_again = system.context_for(fixture.method, Type::Polytype, fixture.graph.len());
    assert_eq!(open, open_again);
    assert_eq!(system.len(), 1);

    let concrete = system.context_for(
        fixture.method,
        Type::Array(vec![Type::Polytype, Type::Literal(RawValue::small_int(5))]),
        fixture.graph.len(),
    );
    assert_ne!(open, concrete);
    assert_eq!(system.len(), 2);
}

#[test]
fn rendering_matches_the_type_vocabulary() {
    let fixture = fixture(
        &[op::push_constant(1), op::stack_return()],
        &[],
    );
    let core = fixture.image.core();

    assert_eq!(Type::Undefined.render(core), "?");
    assert_eq!(Type::Polytype.render(core), "*");
    assert_eq!(Type::Literal(RawValue::small_int(42)).render(core), "42");
    assert_eq!(Type::Literal(core.nil).render(core), "nil");
    assert_eq!(
        Type::Monotype(core.small_int_class).render(core),
        "(SmallInt)"
    );
    assert_eq!(
        Type::Composite(vec![
            Type::Monotype(core.true_class),
            Type::Monotype(core.false_class)
        ])
        .render(core),
        "((True), (False))"
    );
    assert_eq!(
        Type::Array(vec![Type::Literal(RawValue::small_int(1)), Type::Polytype]).render(core),
        "Array[1, *]"
    );
}
