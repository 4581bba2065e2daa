use revm::primitives::U256;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::opcodes::{self, MemLen, OpClass, OpSpec};
use crate::tracer::MemoryTracer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// One vertex of the per-frame value dependency DAG: either an executed
/// instruction or a literal word (tagged by its hex form).
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub label: Cow<'static, str>,
    pub pc: u64,
    pub gas: u64,
    pub live: bool,
    pub literal: bool,
    swap: bool,
    jump: bool,
}

/// Per-frame instruction and gas tallies. Literal nodes count in neither the
/// total nor the live columns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub total_inst: u64,
    pub live_inst: u64,
    pub total_gas: u64,
    pub live_gas: u64,
    pub throw_exception: bool,
    pub out_of_gas: bool,
}

/// Run-wide instruction counters, shared across frames and threads.
#[derive(Debug, Default)]
pub struct GraphCounters {
    total: AtomicU64,
    live: AtomicU64,
}

impl GraphCounters {
    pub fn record(&self, stats: &FrameStats) {
        self.total.fetch_add(stats.total_inst, Ordering::Relaxed);
        self.live.fetch_add(stats.live_inst, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.total.load(Ordering::Acquire),
            self.live.load(Ordering::Acquire),
        )
    }
}

/// Value dependency graph of one call frame.
///
/// Nodes live in an arena indexed by [`NodeId`]; the node stack mirrors the
/// VM stack and evolves in lockstep with it over every executed opcode.
#[derive(Debug, Default)]
pub struct FrameGraph {
    nodes: Vec<Node>,
    out_edges: Vec<Vec<NodeId>>,
    in_edges: Vec<Vec<NodeId>>,
    node_stack: Vec<NodeId>,
    tracer: MemoryTracer,
    stats: FrameStats,
}

impl FrameGraph {
    pub fn new() -> Self {
        FrameGraph::default()
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All `source → sink` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.out_edges
            .iter()
            .enumerate()
            .flat_map(|(from, sinks)| sinks.iter().map(move |to| (NodeId(from as u32), *to)))
    }

    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        &self.out_edges[id.0 as usize]
    }

    pub fn node_stack_depth(&self) -> usize {
        self.node_stack.len()
    }

    pub fn close(&mut self, throw_exception: bool, out_of_gas: bool) {
        self.stats.throw_exception = throw_exception;
        self.stats.out_of_gas = out_of_gas;
    }

    fn add_node(
        &mut self,
        label: Cow<'static, str>,
        pc: u64,
        gas: u64,
        literal: bool,
        swap: bool,
        jump: bool,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            label,
            pc,
            gas,
            live: false,
            literal,
            swap,
            jump,
        });
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        id
    }

    fn add_op_node(&mut self, spec: &OpSpec, pc: u64, gas: u64) -> NodeId {
        let swap = matches!(spec.class, OpClass::Swap(_));
        let jump = matches!(spec.class, OpClass::Jump);
        let id = self.add_node(Cow::Borrowed(spec.name), pc, gas, false, swap, jump);
        self.stats.total_inst += 1;
        self.stats.total_gas += gas;
        if spec.live {
            self.mark_live(id);
        }
        id
    }

    fn add_literal_node(&mut self, value: U256, pc: u64) -> NodeId {
        self.add_node(Cow::Owned(format!("{value:#x}")), pc, 0, true, false, false)
    }

    /// Adds `from → to` and, when the sink is already live, back-marks the
    /// source and its ancestors.
    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.out_edges[from.0 as usize].push(to);
        self.in_edges[to.0 as usize].push(from);
        if self.nodes[to.0 as usize].live {
            self.mark_live(from);
        }
    }

    /// Monotone liveness marking: sets `live` on the node and transitively on
    /// every predecessor. A SWAP that consumes a live value is structural and
    /// is marked live as well, without propagating further through it.
    fn mark_live(&mut self, id: NodeId) {
        let mut work = vec![id];
        while let Some(NodeId(n)) = work.pop() {
            let n = n as usize;
            if self.nodes[n].live {
                continue;
            }
            self.set_live_counted(n);

            for i in 0..self.out_edges[n].len() {
                let succ = self.out_edges[n][i].0 as usize;
                if self.nodes[succ].swap && !self.nodes[succ].live {
                    self.set_live_counted(succ);
                }
            }
            for i in 0..self.in_edges[n].len() {
                let pred = self.in_edges[n][i];
                if !self.nodes[pred.0 as usize].live {
                    work.push(pred);
                }
            }
        }
    }

    fn set_live_counted(&mut self, index: usize) {
        self.nodes[index].live = true;
        if !self.nodes[index].literal {
            self.stats.live_inst += 1;
            self.stats.live_gas += self.nodes[index].gas;
        }
    }

    /// A JUMP/JUMPI/JUMPDEST node left on the node stack is consumed by the
    /// next executed instruction, chaining the control transfer to the jump
    /// target's first node.
    fn consume_pending_jump(&mut self, pops: usize, next: NodeId) {
        if self.node_stack.len() > pops {
            let top = *self
                .node_stack
                .last()
                .expect("stack length checked above");
            if self.nodes[top.0 as usize].jump {
                self.node_stack.pop();
                self.add_edge(top, next);
            }
        }
    }

    fn pop_args(&mut self, pops: usize, op: NodeId) {
        for _ in 0..pops {
            let Some(arg) = self.node_stack.pop() else {
                debug_assert!(false, "node stack underflow");
                return;
            };
            self.add_edge(arg, op);
        }
    }

    fn mem_len(&self, len: MemLen, operands: &[U256]) -> u64 {
        match len {
            MemLen::Fixed(len) => len,
            MemLen::Arg(index) => operand_u64(operands, index),
        }
    }

    fn link_region_producers(&mut self, offset: u64, len: u64, op: NodeId) {
        for producer in self.tracer.load(offset, len) {
            self.add_edge(producer, op);
        }
    }

    /// Advances the graph over one executed instruction.
    ///
    /// `operands` are the words the instruction consumed, top of stack first,
    /// captured before execution; `pushed` is the produced word, present for
    /// value ops only.
    pub fn exec_op(&mut self, op: u8, pc: u64, cost: u64, operands: &[U256], pushed: Option<U256>) {
        let Some(spec) = opcodes::spec(op) else {
            return;
        };
        match spec.class {
            OpClass::Stop => {}
            OpClass::Value => {
                let literal = self.add_literal_node(pushed.unwrap_or_default(), pc);
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(0, op);
                self.add_edge(literal, op);
                self.node_stack.push(op);
            }
            OpClass::Pure => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
                self.node_stack.push(op);
            }
            OpClass::Discard => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
            }
            OpClass::MemWrite { offset_arg, len } => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
                let offset = operand_u64(operands, offset_arg);
                let len = self.mem_len(len, operands);
                self.tracer.store(op, offset, len);
            }
            OpClass::MemRead { offset_arg, len } => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
                self.node_stack.push(op);
                let offset = operand_u64(operands, offset_arg);
                let len = self.mem_len(len, operands);
                self.link_region_producers(offset, len, op);
            }
            OpClass::Call {
                in_offset_arg,
                in_len_arg,
                ret_offset_arg,
                ret_len_arg,
            } => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
                self.node_stack.push(op);
                let in_offset = operand_u64(operands, in_offset_arg);
                let in_len = operand_u64(operands, in_len_arg);
                self.link_region_producers(in_offset, in_len, op);
                let ret_offset = operand_u64(operands, ret_offset_arg);
                let ret_len = operand_u64(operands, ret_len_arg);
                self.tracer.store(op, ret_offset, ret_len);
            }
            OpClass::Create { offset_arg, len_arg } => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
                self.node_stack.push(op);
                let offset = operand_u64(operands, offset_arg);
                let len = operand_u64(operands, len_arg);
                self.link_region_producers(offset, len, op);
            }
            OpClass::Terminate => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
                let offset = operand_u64(operands, 0);
                let len = operand_u64(operands, 1);
                self.link_region_producers(offset, len, op);
            }
            OpClass::Log => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
                let offset = operand_u64(operands, 0);
                let len = operand_u64(operands, 1);
                self.link_region_producers(offset, len, op);
            }
            OpClass::Swap(n) => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(0, op);
                let depth = self.node_stack.len();
                if depth < n + 1 {
                    debug_assert!(false, "node stack underflow in SWAP{n}");
                    return;
                }
                let deep = self.node_stack[depth - n - 1];
                let top = self.node_stack[depth - 1];
                self.add_edge(deep, op);
                self.add_edge(top, op);
                self.node_stack.swap(depth - n - 1, depth - 1);

                let either_live =
                    self.nodes[deep.0 as usize].live || self.nodes[top.0 as usize].live;
                if either_live && !self.nodes[op.0 as usize].live {
                    self.set_live_counted(op.0 as usize);
                }
            }
            OpClass::Dup(n) => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(0, op);
                let depth = self.node_stack.len();
                if depth < n {
                    debug_assert!(false, "node stack underflow in DUP{n}");
                    return;
                }
                let source = self.node_stack[depth - n];
                self.add_edge(source, op);
                self.node_stack.push(op);
            }
            OpClass::Jump => {
                let op = self.add_op_node(&spec, pc, cost);
                self.consume_pending_jump(spec.pops, op);
                self.pop_args(spec.pops, op);
                // lingers until the next instruction consumes it
                self.node_stack.push(op);
            }
        }
    }
}

fn operand_u64(operands: &[U256], index: usize) -> u64 {
    operands
        .get(index)
        .map(|word| u64::try_from(*word).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOP: u8 = 0x00;
    const ADD: u8 = 0x01;
    const CALLVALUE: u8 = 0x34;
    const POP: u8 = 0x50;
    const MLOAD: u8 = 0x51;
    const MSTORE: u8 = 0x52;
    const SSTORE: u8 = 0x55;
    const JUMP: u8 = 0x56;
    const JUMPDEST: u8 = 0x5b;
    const PUSH1: u8 = 0x60;
    const DUP1: u8 = 0x80;
    const SWAP1: u8 = 0x90;
    const RETURN: u8 = 0xf3;

    fn word(value: u64) -> U256 {
        U256::from(value)
    }

    fn push(graph: &mut FrameGraph, pc: u64, value: u64) {
        graph.exec_op(PUSH1, pc, 3, &[], Some(word(value)));
    }

    fn find(graph: &FrameGraph, label: &str) -> NodeId {
        graph
            .nodes()
            .iter()
            .find(|node| node.label == label)
            .unwrap_or_else(|| panic!("no node labeled {label}"))
            .id
    }

    fn has_edge(graph: &FrameGraph, from: &str, to: &str) -> bool {
        let (from, to) = (find(graph, from), find(graph, to));
        graph.edges().any(|(a, b)| a == from && b == to)
    }

    /// PUSH1 1; PUSH1 2; ADD; PUSH1 0; SSTORE; STOP — everything feeds the
    /// storage write, so all five instructions are live.
    #[test]
    fn straight_line_store_marks_everything_live() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 1);
        push(&mut graph, 2, 2);
        graph.exec_op(ADD, 4, 3, &[word(2), word(1)], None);
        push(&mut graph, 5, 0);
        graph.exec_op(SSTORE, 7, 5000, &[word(0), word(3)], None);
        graph.exec_op(STOP, 8, 0, &[], None);

        assert_eq!(graph.stats().total_inst, 5);
        assert_eq!(graph.stats().live_inst, 5);
        assert_eq!(graph.node_stack_depth(), 0);

        assert!(has_edge(&graph, "ADD", "SSTORE"));
        let add = find(&graph, "ADD");
        let pushes_into_add = graph
            .edges()
            .filter(|(from, to)| *to == add && !graph.nodes()[from.0 as usize].literal)
            .count();
        assert_eq!(pushes_into_add, 2);
        let sstore = find(&graph, "SSTORE");
        let pushes_into_sstore = graph
            .edges()
            .filter(|(from, to)| *to == sstore && graph.nodes()[from.0 as usize].label == "PUSH1")
            .count();
        assert_eq!(pushes_into_sstore, 1);
    }

    #[test]
    fn dead_code_stays_dead() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 1);
        push(&mut graph, 2, 2);
        graph.exec_op(ADD, 4, 3, &[word(2), word(1)], None);
        graph.exec_op(POP, 5, 2, &[word(3)], None);
        graph.exec_op(STOP, 6, 0, &[], None);

        assert_eq!(graph.stats().total_inst, 4);
        assert_eq!(graph.stats().live_inst, 0);
        assert!(graph.stats().live_inst <= graph.stats().total_inst);
    }

    #[test]
    fn node_stack_tracks_vm_depth() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 1);
        assert_eq!(graph.node_stack_depth(), 1);
        graph.exec_op(DUP1, 2, 3, &[], None);
        assert_eq!(graph.node_stack_depth(), 2);
        graph.exec_op(ADD, 3, 3, &[word(1), word(1)], None);
        assert_eq!(graph.node_stack_depth(), 1);
        graph.exec_op(POP, 4, 2, &[word(2)], None);
        assert_eq!(graph.node_stack_depth(), 0);
    }

    #[test]
    fn memory_store_feeds_later_load() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 7); // value
        push(&mut graph, 2, 0); // offset
        graph.exec_op(MSTORE, 4, 6, &[word(0), word(7)], None);
        push(&mut graph, 5, 0);
        graph.exec_op(MLOAD, 7, 3, &[word(0)], None);
        push(&mut graph, 8, 0);
        graph.exec_op(SSTORE, 10, 5000, &[word(0), word(7)], None);

        assert!(has_edge(&graph, "MSTORE", "MLOAD"));
        assert!(has_edge(&graph, "MLOAD", "SSTORE"));
        assert!(find(&graph, "MSTORE") != find(&graph, "MLOAD"));
        // the store becomes live transitively through the load
        let mstore = find(&graph, "MSTORE");
        assert!(graph.nodes()[mstore.0 as usize].live);
    }

    #[test]
    fn return_reads_memory_region() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 0xff);
        push(&mut graph, 2, 0);
        graph.exec_op(MSTORE, 4, 6, &[word(0), word(0xff)], None);
        push(&mut graph, 5, 32);
        push(&mut graph, 7, 0);
        graph.exec_op(RETURN, 9, 0, &[word(0), word(32)], None);

        assert!(has_edge(&graph, "MSTORE", "RETURN"));
        assert_eq!(graph.node_stack_depth(), 0);
    }

    #[test]
    fn jump_chains_to_target_instruction() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 4);
        graph.exec_op(JUMP, 2, 8, &[word(4)], None);
        assert_eq!(graph.node_stack_depth(), 1); // lingering JUMP node
        graph.exec_op(JUMPDEST, 4, 1, &[], None);
        assert_eq!(graph.node_stack_depth(), 1); // lingering JUMPDEST node
        push(&mut graph, 5, 1);
        assert_eq!(graph.node_stack_depth(), 1);

        assert!(has_edge(&graph, "JUMP", "JUMPDEST"));
        assert!(has_edge(&graph, "JUMPDEST", "PUSH1"));
    }

    #[test]
    fn swap_of_live_value_is_live() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 1);
        push(&mut graph, 2, 2);
        graph.exec_op(SSTORE, 4, 5000, &[word(2), word(1)], None);
        // both swapped slots are dead here, so the swap stays dead
        push(&mut graph, 5, 3);
        push(&mut graph, 7, 4);
        graph.exec_op(SWAP1, 9, 3, &[], None);
        assert_eq!(graph.stats().live_inst, 3); // two pushes + SSTORE

        // make one swapped slot live: the SWAP must become live too
        push(&mut graph, 10, 0);
        graph.exec_op(SSTORE, 12, 5000, &[word(0), word(3)], None);
        let swap = find(&graph, "SWAP1");
        assert!(graph.nodes()[swap.0 as usize].live);
    }

    #[test]
    fn swap_does_not_change_depth_and_swaps_entries() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 1);
        graph.exec_op(CALLVALUE, 2, 2, &[], Some(word(99)));
        assert_eq!(graph.node_stack_depth(), 2);
        graph.exec_op(SWAP1, 3, 3, &[], None);
        assert_eq!(graph.node_stack_depth(), 2);
        // after the swap the PUSH1 node is back on top and gets dropped
        graph.exec_op(POP, 4, 2, &[word(1)], None);
        push(&mut graph, 5, 0);
        // storing the swapped-down CALLVALUE word makes its node live
        graph.exec_op(SSTORE, 7, 5000, &[word(0), word(99)], None);
        let callvalue = find(&graph, "CALLVALUE");
        assert!(graph.nodes()[callvalue.0 as usize].live);
    }

    #[test]
    fn liveness_is_monotone_and_back_closed() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 1);
        push(&mut graph, 2, 2);
        graph.exec_op(ADD, 4, 3, &[word(2), word(1)], None);
        push(&mut graph, 5, 0);
        graph.exec_op(SSTORE, 7, 5000, &[word(0), word(3)], None);

        for node in graph.nodes() {
            if node.live && !node.literal && node.label != "SSTORE" {
                // every live non-sink node has a live successor
                assert!(
                    graph
                        .successors(node.id)
                        .iter()
                        .any(|succ| graph.nodes()[succ.0 as usize].live),
                    "live node {} has no live successor",
                    node.label
                );
            }
        }
    }

    #[test]
    fn literal_nodes_are_not_counted() {
        let mut graph = FrameGraph::new();
        push(&mut graph, 0, 42);
        assert_eq!(graph.stats().total_inst, 1);
        let literal = graph.nodes().iter().find(|node| node.literal).unwrap();
        assert_eq!(literal.label, "0x2a");
    }
}
