//! Abstract type inference over control graphs.
//!
//! A forward walker visits every node and applies a per-opcode transfer
//! function, joining at phis and refining at taus, until a full pass
//! changes nothing. Results live in a [`CallContext`] keyed by method
//! and argument signature, so one method analyzed under different
//! argument types yields separate contexts.

use std::collections::HashMap;

use smalt_asm::{
    primitive, BinaryBuiltin, Opcode, Special, UnaryBuiltin, CONSTANT_FALSE, CONSTANT_NIL,
    CONSTANT_TRUE,
};
use smalt_vm::object::{ClassRef, MethodRef, SymbolRef};
use smalt_vm::{CoreObjects, RawValue};

use crate::graph::{ControlGraph, ControlNode, InstructionNode, NodeId, PhiNode, TauNode};

#[derive(Debug, Clone, PartialEq)]
/// An abstract value.
pub enum Type {
    /// Nothing known yet; the lattice bottom.
    Undefined,
    /// Exactly this value.
    Literal(RawValue),
    /// Any instance of this class.
    Monotype(RawValue),
    /// One of a known set of classes.
    Composite(Vec<Type>),
    /// An array with known element types.
    Array(Vec<Type>),
    /// Anything; the lattice top.
    Polytype,
}

impl Type {
    /// The representative class word, for widening.
    fn class_word(&self, core: &CoreObjects) -> Option<RawValue> {
        match self {
            Type::Literal(value) => Some(class_of_value(*value, core)),
            Type::Monotype(class) => Some(*class),
            Type::Array(_) => Some(core.array_class),
            _ => None,
        }
    }

    fn collect_classes(&self, core: &CoreObjects, out: &mut Vec<RawValue>) {
        match self {
            Type::Composite(members) => {
                for member in members {
                    member.collect_classes(core, out);
                }
            }
            other => {
                if let Some(class) = other.class_word(core) {
                    if !out.contains(&class) {
                        out.push(class);
                    }
                }
            }
        }
    }

    /// The least upper bound of two types.
    pub fn join(&self, other: &Type, core: &CoreObjects) -> Type {
        use Type::*;
        match (self, other) {
            (Undefined, t) | (t, Undefined) => t.clone(),
            (Polytype, _) | (_, Polytype) => Polytype,
            (Literal(a), Literal(b)) if a == b => Literal(*a),
            (Array(a), Array(b)) => {
                if a.len() == b.len() {
                    Array(
                        a.iter()
                            .zip(b.iter())
                            .map(|(x, y)| x.join(y, core))
                            .collect(),
                    )
                } else {
                    Monotype(core.array_class)
                }
            }
            (a, b) => {
                let mut classes = Vec::new();
                a.collect_classes(core, &mut classes);
                b.collect_classes(core, &mut classes);
                match classes.len() {
                    0 => Polytype,
                    1 => Monotype(classes[0]),
                    _ => Composite(classes.into_iter().map(Monotype).collect()),
                }
            }
        }
    }

    /// Canonical signature text, stable across runs; used to key call
    /// contexts by argument shape.
    fn key(&self) -> String {
        match self {
            Type::Undefined => "?".to_owned(),
            Type::Polytype => "*".to_owned(),
            Type::Literal(value) => format!("L{:x}", value.to_word()),
            Type::Monotype(class) => format!("M{:x}", class.to_word()),
            Type::Composite(members) => {
                let inner: Vec<String> = members.iter().map(Type::key).collect();
                format!("C({})", inner.join(","))
            }
            Type::Array(members) => {
                let inner: Vec<String> = members.iter().map(Type::key).collect();
                format!("A[{}]", inner.join(","))
            }
        }
    }

    /// Human-readable rendering: `?` and `*` for the lattice ends,
    /// literal values, `(Class)` for monotypes, `(A, B)` for composites
    /// and `Array[...]` for arrays.
    pub fn render(&self, core: &CoreObjects) -> String {
        match self {
            Type::Undefined => "?".to_owned(),
            Type::Polytype => "*".to_owned(),
            Type::Literal(value) => render_literal(*value, core),
            Type::Monotype(class) => format!("({})", class_name(*class)),
            Type::Composite(members) => {
                let inner: Vec<String> = members.iter().map(|m| m.render(core)).collect();
                format!("({})", inner.join(", "))
            }
            Type::Array(members) => {
                let inner: Vec<String> = members.iter().map(|m| m.render(core)).collect();
                format!("Array[{}]", inner.join(", "))
            }
        }
    }
}

fn class_of_value(value: RawValue, core: &CoreObjects) -> RawValue {
    if value.is_small_int() {
        core.small_int_class
    } else {
        value.as_object().class()
    }
}

fn class_name(class: RawValue) -> String {
    let class = ClassRef::new(class.as_object());
    SymbolRef::new(class.name().as_object()).as_str().to_owned()
}

fn render_literal(value: RawValue, core: &CoreObjects) -> String {
    if value.is_small_int() {
        return value.as_small_int().to_string();
    }
    if value == core.nil {
        return "nil".to_owned();
    }
    if value == core.true_object {
        return "true".to_owned();
    }
    if value == core.false_object {
        return "false".to_owned();
    }
    if value.as_object().class() == core.symbol_class {
        return format!("#{}", SymbolRef::new(value.as_object()).as_str());
    }
    format!("{}.instance", class_name(class_of_value(value, core)))
}

/// Identifier of a [`CallContext`] inside its [`TypeSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub usize);

/// Inference results of one method under one argument signature.
#[derive(Debug, Clone)]
pub struct CallContext {
    index: usize,
    arguments: Type,
    instructions: Vec<Type>,
    return_type: Type,
}

impl CallContext {
    /// Fresh context over `node_count` graph nodes.
    pub fn new(index: usize, arguments: Type, node_count: usize) -> Self {
        Self {
            index,
            arguments,
            instructions: vec![Type::Undefined; node_count],
            return_type: Type::Undefined,
        }
    }

    /// Position of this context in its type system.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The argument signature this context was created for.
    pub fn arguments(&self) -> &Type {
        &self.arguments
    }

    /// Type of argument `index`; polytype when the signature carries no
    /// per-argument information.
    pub fn argument(&self, index: usize) -> Type {
        match &self.arguments {
            Type::Array(members) => members.get(index).cloned().unwrap_or(Type::Polytype),
            _ => Type::Polytype,
        }
    }

    /// Inferred type of a graph node.
    pub fn node_type(&self, id: NodeId) -> &Type {
        &self.instructions[id.0]
    }

    /// Inferred return type of the method.
    pub fn return_type(&self) -> &Type {
        &self.return_type
    }
}

/// Registry of call contexts, one per `(method, argument signature)`.
#[derive(Default)]
pub struct TypeSystem {
    contexts: Vec<CallContext>,
    index: HashMap<(usize, String), usize>,
}

impl TypeSystem {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The context for `method` called with `arguments`, creating it on
    /// first request. `node_count` sizes the per-node table of a fresh
    /// context.
    pub fn context_for(
        &mut self,
        method: MethodRef,
        arguments: Type,
        node_count: usize,
    ) -> ContextId {
        let key = (method.as_value().to_word(), arguments.key());
        if let Some(&index) = self.index.get(&key) {
            return ContextId(index);
        }
        let index = self.contexts.len();
        self.contexts
            .push(CallContext::new(index, arguments, node_count));
        self.index.insert(key, index);
        ContextId(index)
    }

    /// A context by id.
    pub fn context(&self, id: ContextId) -> &CallContext {
        &self.contexts[id.0]
    }

    /// Mutable context access, for running the analyzer.
    pub fn context_mut(&mut self, id: ContextId) -> &mut CallContext {
        &mut self.contexts[id.0]
    }

    /// Number of contexts created so far.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether no context was created yet.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Forward abstract interpreter over one control graph.
pub struct TypeAnalyzer<'a> {
    graph: &'a ControlGraph,
    method: MethodRef,
    core: &'a CoreObjects,
}

impl<'a> TypeAnalyzer<'a> {
    /// Analyzer for `method`'s graph.
    pub fn new(graph: &'a ControlGraph, method: MethodRef, core: &'a CoreObjects) -> Self {
        Self {
            graph,
            method,
            core,
        }
    }

    /// Run to fixpoint, filling `context` with per-node and return
    /// types. Idempotent: a second run changes nothing.
    pub fn run(&self, context: &mut CallContext) {
        if self.graph.is_empty() {
            return;
        }

        let mut passes = 0usize;
        loop {
            let mut changed = false;
            for block in 0..self.graph.block_count() {
                for &id in self.graph.phis_in(block) {
                    changed |= self.update(context, id);
                }
                for &id in self.graph.taus_in(block) {
                    changed |= self.update(context, id);
                }
                for &id in self.graph.instructions_in(block) {
                    changed |= self.update(context, id);
                }
            }
            passes += 1;
            if !changed {
                break;
            }
        }
        tracing::trace!(passes, nodes = self.graph.len(), "type inference converged");
    }

    fn update(&self, context: &mut CallContext, id: NodeId) -> bool {
        let computed = match self.graph.node(id) {
            ControlNode::Instruction(node) => self.infer_instruction(context, node),
            ControlNode::Phi(node) => self.infer_phi(context, node),
            ControlNode::Tau(node) => self.infer_tau(context, node),
        };

        // join with the previous value: the walk only moves up the
        // lattice, which is what makes the fixpoint well-defined
        let old = context.instructions[id.0].clone();
        let joined = old.join(&computed, self.core);
        let changed = joined != old;
        context.instructions[id.0] = joined;

        if let ControlNode::Instruction(node) = self.graph.node(id) {
            self.note_return(context, node);
        }
        changed
    }

    fn operand(&self, context: &CallContext, node: &InstructionNode, index: usize) -> Type {
        node.arguments
            .get(index)
            .map(|id| context.instructions[id.0].clone())
            .unwrap_or(Type::Undefined)
    }

    fn boolean_composite(&self) -> Type {
        Type::Composite(vec![
            Type::Monotype(self.core.true_class),
            Type::Monotype(self.core.false_class),
        ])
    }

    fn literal_boolean(&self, value: bool) -> Type {
        Type::Literal(self.core.boolean(value))
    }

    fn infer_instruction(&self, context: &CallContext, node: &InstructionNode) -> Type {
        let instruction = node.instruction;
        match instruction.opcode() {
            Opcode::PushConstant => match instruction.argument() {
                n @ 0..=9 => Type::Literal(RawValue::small_int(n as _)),
                CONSTANT_NIL => Type::Literal(self.core.nil),
                CONSTANT_TRUE => Type::Literal(self.core.true_object),
                CONSTANT_FALSE => Type::Literal(self.core.false_object),
                _ => Type::Polytype,
            },
            Opcode::PushLiteral => {
                let literal = self
                    .method
                    .literals()
                    .at(instruction.argument() as usize);
                Type::Literal(literal)
            }
            Opcode::PushArgument => context.argument(instruction.argument() as usize),
            // temporaries and instance variables are flow-dependent
            // stores; the core analysis keeps them open
            Opcode::PushTemporary | Opcode::PushInstance => Type::Polytype,
            Opcode::PushBlock => Type::Monotype(self.core.block_class),
            Opcode::AssignTemporary | Opcode::AssignInstance => self.operand(context, node, 0),
            Opcode::MarkArguments => {
                let members = (0..node.arguments.len())
                    .map(|index| self.operand(context, node, index))
                    .collect();
                Type::Array(members)
            }
            Opcode::SendMessage => Type::Polytype,
            Opcode::SendUnary => self.infer_unary(context, node),
            Opcode::SendBinary => self.infer_binary(context, node),
            Opcode::DoPrimitive => self.infer_primitive(instruction.extra() as u8),
            Opcode::DoSpecial => match instruction.special() {
                Some(Special::Duplicate) => self.operand(context, node, 0),
                Some(Special::StackReturn | Special::BlockReturn) => {
                    self.operand(context, node, 0)
                }
                Some(Special::SelfReturn) => context.argument(0),
                Some(Special::SendToSuper) => Type::Polytype,
                _ => Type::Undefined,
            },
        }
    }

    fn infer_unary(&self, context: &CallContext, node: &InstructionNode) -> Type {
        let Ok(builtin) = UnaryBuiltin::try_from(node.instruction.argument()) else {
            return Type::Polytype;
        };
        let operand = self.operand(context, node, 0);

        let receiver_is_nil = match &operand {
            Type::Undefined => return Type::Undefined,
            Type::Literal(value) => Some(*value == self.core.nil),
            Type::Monotype(class) => Some(*class == self.core.undefined_class),
            _ => None,
        };
        match receiver_is_nil {
            Some(is_nil) => match builtin {
                UnaryBuiltin::IsNil => self.literal_boolean(is_nil),
                UnaryBuiltin::NotNil => self.literal_boolean(!is_nil),
            },
            None => self.boolean_composite(),
        }
    }

    fn infer_binary(&self, context: &CallContext, node: &InstructionNode) -> Type {
        let Ok(builtin) = BinaryBuiltin::try_from(node.instruction.argument()) else {
            return Type::Polytype;
        };
        let left = self.operand(context, node, 0);
        let right = self.operand(context, node, 1);

        if left == Type::Undefined || right == Type::Undefined {
            return Type::Undefined;
        }

        let literal_int = |t: &Type| match t {
            Type::Literal(value) if value.is_small_int() => Some(value.as_small_int()),
            _ => None,
        };
        if let (Some(a), Some(b)) = (literal_int(&left), literal_int(&right)) {
            return match builtin {
                BinaryBuiltin::Plus => Type::Literal(RawValue::small_int(a.wrapping_add(b))),
                BinaryBuiltin::Less => self.literal_boolean(a < b),
                BinaryBuiltin::LessOrEqual => self.literal_boolean(a <= b),
            };
        }

        let is_small = |t: &Type| {
            literal_int(t).is_some() || *t == Type::Monotype(self.core.small_int_class)
        };
        if is_small(&left) && is_small(&right) {
            return match builtin {
                BinaryBuiltin::Plus => Type::Monotype(self.core.small_int_class),
                BinaryBuiltin::Less | BinaryBuiltin::LessOrEqual => self.boolean_composite(),
            };
        }

        // a non-integer pair degenerates into a full message send
        Type::Polytype
    }

    fn infer_primitive(&self, number: u8) -> Type {
        match number {
            primitive::SMALLINT_ADD
            | primitive::SMALLINT_DIV
            | primitive::SMALLINT_MOD
            | primitive::SMALLINT_MUL
            | primitive::SMALLINT_SUB
            | primitive::SMALLINT_BIT_OR
            | primitive::SMALLINT_BIT_AND
            | primitive::SMALLINT_BIT_SHIFT
            | primitive::GET_SIZE
            | primitive::INTEGER_NEW => Type::Monotype(self.core.small_int_class),
            primitive::SMALLINT_LESS | primitive::SMALLINT_EQUAL | primitive::OBJECTS_ARE_EQUAL => {
                self.boolean_composite()
            }
            primitive::GET_CLASS => Type::Monotype(self.core.class_class),
            primitive::ALLOCATE_BYTE_ARRAY | primitive::CLONE_BYTE_OBJECT => Type::Polytype,
            _ => Type::Polytype,
        }
    }

    fn infer_phi(&self, context: &CallContext, node: &PhiNode) -> Type {
        let mut joined = Type::Undefined;
        for (_, provider) in &node.incomings {
            joined = joined.join(&context.instructions[provider.0], self.core);
        }
        joined
    }

    fn infer_tau(&self, context: &CallContext, node: &TauNode) -> Type {
        let asserts_nil = match node.predicate {
            UnaryBuiltin::IsNil => node.holds,
            UnaryBuiltin::NotNil => !node.holds,
        };
        if asserts_nil {
            Type::Literal(self.core.nil)
        } else {
            // the lattice cannot subtract nil; keep the operand's type
            context.instructions[node.operand.0].clone()
        }
    }

    fn note_return(&self, context: &mut CallContext, node: &InstructionNode) {
        let contribution = match node.instruction.special() {
            Some(Special::StackReturn | Special::BlockReturn) => self.operand(context, node, 0),
            Some(Special::SelfReturn) => context.argument(0),
            _ => return,
        };
        context.return_type = context.return_type.join(&contribution, self.core);
    }
}
