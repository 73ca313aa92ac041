//! Data-flow graph over parsed code.
//!
//! Every instruction becomes a node; the operand stack is simulated
//! symbolically per block, so a consumer's arguments point straight at
//! the providers whose values it reads. At a control-flow join the
//! providers per stack slot either agree (used directly) or a phi node
//! is inserted with one incoming per predecessor. Conditional branches
//! guarded by a unary type predicate get a tau node on the taken edge.
//! Dead providers are kept; elimination belongs to a later layer.

use std::collections::{BTreeMap, BTreeSet};

use smalt_asm::{Instruction, Opcode, Special, UnaryBuiltin};

use crate::parsed::ParsedCode;

/// Index of a node in its [`ControlGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// An instruction node: one executed bytecode with data-flow edges to the
/// providers it consumes.
#[derive(Debug, Clone)]
pub struct InstructionNode {
    /// Block the instruction belongs to.
    pub block: usize,
    /// Byte offset of the instruction.
    pub offset: usize,
    /// The decoded instruction.
    pub instruction: Instruction,
    /// Providers of the consumed stack values, deepest first.
    pub arguments: Vec<NodeId>,
}

/// A phi node joining disagreeing providers of one stack slot.
#[derive(Debug, Clone)]
pub struct PhiNode {
    /// The join block.
    pub block: usize,
    /// Stack slot the phi selects for; 0 is the deepest slot.
    pub slot: usize,
    /// One `(predecessor block, provider)` pair per incoming edge.
    pub incomings: Vec<(usize, NodeId)>,
}

/// A tau node recording that a unary predicate held (or failed) on the
/// edge into its block.
#[derive(Debug, Clone)]
pub struct TauNode {
    /// Target block of the asserting edge.
    pub block: usize,
    /// The value the predicate speaks about.
    pub operand: NodeId,
    /// Whether the predicate holds on this edge.
    pub holds: bool,
    /// The asserted predicate.
    pub predicate: UnaryBuiltin,
}

/// A node of the control graph.
#[derive(Debug, Clone)]
pub enum ControlNode {
    /// An executed instruction.
    Instruction(InstructionNode),
    /// A stack-slot join.
    Phi(PhiNode),
    /// A type assertion on an edge.
    Tau(TauNode),
}

/// Stack-effect inconsistencies found while lifting a method. A compiled
/// image never produces these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// An instruction consumed more values than the stack held.
    #[error("operand stack underflow at offset {offset}")]
    StackUnderflow {
        /// Byte offset of the consuming instruction.
        offset: usize,
    },
    /// Predecessors reached a join with different stack depths.
    #[error("inconsistent stack depth joining block at offset {block_start}")]
    DepthMismatch {
        /// Start offset of the join block.
        block_start: usize,
    },
}

/// The SSA-style graph of one bytecode range.
#[derive(Debug, Clone)]
pub struct ControlGraph {
    nodes: Vec<ControlNode>,
    block_phis: Vec<Vec<NodeId>>,
    block_taus: Vec<Vec<NodeId>>,
    block_instructions: Vec<Vec<NodeId>>,
}

impl ControlGraph {
    /// Lift `code` into a data-flow graph.
    pub fn build(code: &ParsedCode) -> Result<Self, GraphError> {
        Builder::new(code).run()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of blocks (mirrors the parsed code).
    pub fn block_count(&self) -> usize {
        self.block_instructions.len()
    }

    /// A node by id.
    pub fn node(&self, id: NodeId) -> &ControlNode {
        &self.nodes[id.0]
    }

    /// All nodes with their ids.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &ControlNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index), node))
    }

    /// Phi nodes of `block`, by slot order.
    pub fn phis_in(&self, block: usize) -> &[NodeId] {
        &self.block_phis[block]
    }

    /// Tau nodes of `block`.
    pub fn taus_in(&self, block: usize) -> &[NodeId] {
        &self.block_taus[block]
    }

    /// Instruction nodes of `block`, in execution order.
    pub fn instructions_in(&self, block: usize) -> &[NodeId] {
        &self.block_instructions[block]
    }

    /// The first instruction node at byte `offset`.
    pub fn instruction_at(&self, offset: usize) -> Option<(NodeId, &InstructionNode)> {
        self.nodes().find_map(|(id, node)| match node {
            ControlNode::Instruction(instruction) if instruction.offset == offset => {
                Some((id, instruction))
            }
            _ => None,
        })
    }
}

struct Builder<'a> {
    code: &'a ParsedCode,
    nodes: Vec<ControlNode>,
    block_phis: Vec<Vec<NodeId>>,
    block_taus: Vec<Vec<NodeId>>,
    block_instructions: Vec<Vec<NodeId>>,
    /// `(from, to, stack at the transfer)`. A branch can sit mid-block
    /// (blocks split only at branch targets), so the stack flowing along
    /// an edge is the snapshot at the branch, not the block's output.
    edges: Vec<(usize, usize, Vec<NodeId>)>,
    /// Expected incoming edge count per block, precomputed so a join can
    /// be told apart from straight-line flow before every edge arrived.
    incoming_count: Vec<usize>,
}

impl<'a> Builder<'a> {
    fn new(code: &'a ParsedCode) -> Self {
        let block_count = code.blocks().len();
        let mut incoming_count = vec![0usize; block_count];
        for block in code.blocks() {
            for (_, instruction) in block.instructions() {
                if instruction.is_branch() {
                    if let Some(target) = code.block_id_at(instruction.extra() as usize) {
                        incoming_count[target] += 1;
                    }
                }
            }
            if let Some(next) = block.fall_through() {
                incoming_count[next] += 1;
            }
        }

        Self {
            code,
            nodes: Vec::new(),
            block_phis: vec![Vec::new(); block_count],
            block_taus: vec![Vec::new(); block_count],
            block_instructions: vec![Vec::new(); block_count],
            edges: Vec::new(),
            incoming_count,
        }
    }

    fn run(mut self) -> Result<ControlGraph, GraphError> {
        for block in self.traversal_order() {
            let input = self.block_input(block)?;
            let mut stack = input;
            // clone the instruction list: simulation appends nodes
            let instructions = self.code.blocks()[block].instructions().to_vec();
            for (offset, instruction) in instructions {
                self.simulate(block, offset, instruction, &mut stack)?;
            }
            if let Some(next) = self.code.blocks()[block].fall_through() {
                self.edges.push((block, next, stack.clone()));
            }
        }

        self.fill_phi_incomings()?;
        self.simplify_phis();
        self.insert_taus();
        Ok(self.finish())
    }

    /// Depth-first preorder over the successor relation, entry first.
    /// Guarantees every reachable non-entry block is visited after at
    /// least one of its predecessors.
    fn traversal_order(&self) -> Vec<usize> {
        let block_count = self.code.blocks().len();
        let mut successors = vec![Vec::new(); block_count];
        for (block, data) in self.code.blocks().iter().enumerate() {
            for &referrer in data.referrers() {
                successors[referrer].push(block);
            }
        }

        let mut order = Vec::with_capacity(block_count);
        let mut visited = vec![false; block_count];
        let mut worklist = vec![0usize];
        while let Some(block) = worklist.pop() {
            if visited[block] {
                continue;
            }
            visited[block] = true;
            order.push(block);
            for &successor in successors[block].iter().rev() {
                if !visited[successor] {
                    worklist.push(successor);
                }
            }
        }
        order
    }

    /// Input stack of `block`: empty for the entry, the single edge's
    /// stack for straight-line flow, and a phi per slot at joins (and at
    /// loop headers, whose back edges are not known yet). Redundant phis
    /// are simplified away after incomings are filled.
    fn block_input(&mut self, block: usize) -> Result<Vec<NodeId>, GraphError> {
        if block == 0 {
            return Ok(Vec::new());
        }

        let arrived: Vec<&Vec<NodeId>> = self
            .edges
            .iter()
            .filter(|(_, to, _)| *to == block)
            .map(|(_, _, stack)| stack)
            .collect();

        if self.incoming_count[block] == 1 && arrived.len() == 1 {
            return Ok(arrived[0].clone());
        }

        let depth = arrived
            .first()
            .expect("DFS visits a join after at least one incoming edge")
            .len();
        for stack in &arrived {
            if stack.len() != depth {
                return Err(GraphError::DepthMismatch {
                    block_start: self.code.blocks()[block].start(),
                });
            }
        }

        let mut input = Vec::with_capacity(depth);
        for slot in 0..depth {
            let id = NodeId(self.nodes.len());
            self.nodes.push(ControlNode::Phi(PhiNode {
                block,
                slot,
                incomings: Vec::new(),
            }));
            self.block_phis[block].push(id);
            input.push(id);
        }
        Ok(input)
    }

    /// One step of symbolic execution: capture the consumed providers,
    /// apply the stack effect, and append the node.
    fn simulate(
        &mut self,
        block: usize,
        offset: usize,
        instruction: Instruction,
        stack: &mut Vec<NodeId>,
    ) -> Result<(), GraphError> {
        let consumed = instruction.consumed_values();
        if stack.len() < consumed {
            return Err(GraphError::StackUnderflow { offset });
        }
        let arguments = stack[stack.len() - consumed..].to_vec();

        // assignments and duplicate read the top without popping it
        let pops = match instruction.opcode() {
            Opcode::AssignInstance | Opcode::AssignTemporary => 0,
            Opcode::DoSpecial if instruction.special() == Some(Special::Duplicate) => 0,
            _ => consumed,
        };
        stack.truncate(stack.len() - pops);

        let id = NodeId(self.nodes.len());
        self.nodes.push(ControlNode::Instruction(InstructionNode {
            block,
            offset,
            instruction,
            arguments,
        }));
        self.block_instructions[block].push(id);

        // a primitive call materializes its result on the success path
        // even though the instruction set does not class it a provider
        if instruction.is_value_provider() || instruction.opcode() == Opcode::DoPrimitive {
            stack.push(id);
        }

        // the stack flowing along a branch edge is the snapshot here
        if instruction.is_branch() {
            if let Some(target) = self.code.block_id_at(instruction.extra() as usize) {
                self.edges.push((block, target, stack.clone()));
            }
        }
        Ok(())
    }

    fn fill_phi_incomings(&mut self) -> Result<(), GraphError> {
        let edges = std::mem::take(&mut self.edges);
        for (from, to, stack) in &edges {
            if self.block_phis[*to].is_empty() {
                continue;
            }
            let depth = self.block_phis[*to].len();
            if stack.len() != depth {
                return Err(GraphError::DepthMismatch {
                    block_start: self.code.blocks()[*to].start(),
                });
            }
            for (slot, &phi) in self.block_phis[*to].iter().enumerate() {
                let ControlNode::Phi(node) = &mut self.nodes[phi.0] else {
                    unreachable!("block_phis only holds phi nodes");
                };
                node.incomings.push((*from, stack[slot]));
            }
        }
        self.edges = edges;
        Ok(())
    }

    /// Replace phis whose incomings all agree with the single provider;
    /// the graph carries a phi only where predecessors disagree.
    fn simplify_phis(&mut self) {
        loop {
            let mut substitution: BTreeMap<NodeId, NodeId> = BTreeMap::new();
            for (index, node) in self.nodes.iter().enumerate() {
                let ControlNode::Phi(phi) = node else { continue };
                let id = NodeId(index);
                if substitution.contains_key(&id) {
                    continue;
                }
                let unique: BTreeSet<NodeId> = phi
                    .incomings
                    .iter()
                    .map(|(_, provider)| *provider)
                    .filter(|provider| *provider != id)
                    .collect();
                if unique.len() == 1 {
                    substitution.insert(id, *unique.iter().next().expect("len is 1"));
                }
            }
            if substitution.is_empty() {
                return;
            }

            let resolve = |id: NodeId| substitution.get(&id).copied().unwrap_or(id);
            for node in &mut self.nodes {
                match node {
                    ControlNode::Instruction(instruction) => {
                        for argument in &mut instruction.arguments {
                            *argument = resolve(*argument);
                        }
                    }
                    ControlNode::Phi(phi) => {
                        for (_, provider) in &mut phi.incomings {
                            *provider = resolve(*provider);
                        }
                    }
                    ControlNode::Tau(tau) => {
                        tau.operand = resolve(tau.operand);
                    }
                }
            }
            for phis in &mut self.block_phis {
                phis.retain(|id| !substitution.contains_key(id));
            }
            // retired phis are dropped during finish(); mark them inert
            for (&id, _) in &substitution {
                if let ControlNode::Phi(phi) = &mut self.nodes[id.0] {
                    phi.incomings.clear();
                }
            }
        }
    }

    /// Put a tau on the taken edge of every conditional branch whose
    /// condition is a unary type predicate.
    fn insert_taus(&mut self) {
        let mut taus = Vec::new();
        for node in &self.nodes {
            let ControlNode::Instruction(branch) = node else { continue };
            let special = branch.instruction.special();
            let holds = match special {
                Some(Special::BranchIfTrue) => true,
                Some(Special::BranchIfFalse) => false,
                _ => continue,
            };
            let &[condition] = branch.arguments.as_slice() else {
                continue;
            };
            let ControlNode::Instruction(condition) = &self.nodes[condition.0] else {
                continue;
            };
            if condition.instruction.opcode() != Opcode::SendUnary {
                continue;
            }
            let Ok(predicate) = UnaryBuiltin::try_from(condition.instruction.argument()) else {
                continue;
            };
            let &[operand] = condition.arguments.as_slice() else {
                continue;
            };
            let Some(target) = self
                .code
                .block_id_at(branch.instruction.extra() as usize)
            else {
                continue;
            };
            taus.push(TauNode {
                block: target,
                operand,
                holds,
                predicate,
            });
        }

        for tau in taus {
            let id = NodeId(self.nodes.len());
            self.block_taus[tau.block].push(id);
            self.nodes.push(ControlNode::Tau(tau));
        }
    }

    /// Compact the arena: drop simplified-away phis and remap ids.
    fn finish(self) -> ControlGraph {
        let retired: BTreeSet<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| match node {
                ControlNode::Phi(phi) if phi.incomings.is_empty() => Some(index),
                _ => None,
            })
            .collect();

        if retired.is_empty() {
            return ControlGraph {
                nodes: self.nodes,
                block_phis: self.block_phis,
                block_taus: self.block_taus,
                block_instructions: self.block_instructions,
            };
        }

        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut nodes = Vec::with_capacity(self.nodes.len() - retired.len());
        for (index, node) in self.nodes.into_iter().enumerate() {
            if retired.contains(&index) {
                continue;
            }
            remap[index] = nodes.len();
            nodes.push(node);
        }

        let fix = |id: &mut NodeId| id.0 = remap[id.0];
        for node in &mut nodes {
            match node {
                ControlNode::Instruction(instruction) => {
                    instruction.arguments.iter_mut().for_each(fix);
                }
                ControlNode::Phi(phi) => {
                    phi.incomings.iter_mut().for_each(|(_, provider)| fix(provider));
                }
                ControlNode::Tau(tau) => fix(&mut tau.operand),
            }
        }

        let fix_list = |list: Vec<Vec<NodeId>>| {
            list.into_iter()
                .map(|ids| {
                    ids.into_iter()
                        .map(|id| NodeId(remap[id.0]))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };

        ControlGraph {
            nodes,
            block_phis: fix_list(self.block_phis),
            block_taus: fix_list(self.block_taus),
            block_instructions: fix_list(self.block_instructions),
        }
    }
}
