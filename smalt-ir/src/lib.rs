//! Static analysis over compiled Smalt methods.
//!
//! Three layers, each feeding the next:
//!
//! 1. [`ParsedMethod`] decodes a method's byte array into basic blocks
//!    with explicit terminators and predecessor edges, recursively
//!    parsing nested block literals.
//! 2. [`ControlGraph`] lifts the stack effects of the parsed code into
//!    data-flow edges between instruction nodes, inserting phi nodes
//!    where control-flow joins produce disagreeing stack-top providers
//!    and tau nodes where branches assert a predicate.
//! 3. [`TypeAnalyzer`] runs a forward abstract interpretation over the
//!    graph, producing per-instruction types and per-call-context
//!    argument/return types for a downstream code generator.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod graph;
mod inference;
mod parsed;

pub use graph::{
    ControlGraph, ControlNode, GraphError, InstructionNode, NodeId, PhiNode, TauNode,
};
pub use inference::{CallContext, ContextId, Type, TypeAnalyzer, TypeSystem};
pub use parsed::{BasicBlock, ParsedCode, ParsedMethod};
