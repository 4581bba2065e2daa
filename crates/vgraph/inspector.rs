use revm::{
    Database, EvmContext, Inspector,
    interpreter::{
        CallInputs, CallOutcome, CreateInputs, CreateOutcome, InstructionResult, Interpreter,
    },
    primitives::{Address as RevmAddress, U256},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::dot;
use crate::graph::{FrameGraph, GraphCounters};
use crate::opcodes::{self, OpClass};
use crate::sink::{CallLog, CallLogSender};

/// What to do with finished frames: always feed the shared counters, and
/// optionally emit call logs or per-frame GraphViz files.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub counters: Arc<GraphCounters>,
    pub call_log: Option<CallLogSender>,
    pub graph_dir: Option<PathBuf>,
}

impl GraphConfig {
    pub fn new(counters: Arc<GraphCounters>) -> Self {
        GraphConfig {
            counters,
            call_log: None,
            graph_dir: None,
        }
    }
}

/// Snapshot taken in `step`, consumed in `step_end` once the instruction's
/// gas charge and outcome are known.
#[derive(Debug)]
struct PendingStep {
    opcode: u8,
    pc: u64,
    gas_spent: u64,
    operands: Vec<U256>,
}

#[derive(Debug)]
struct FrameState {
    graph: FrameGraph,
    caller: RevmAddress,
    address: Option<RevmAddress>,
    depth: usize,
    pending: Option<PendingStep>,
}

impl FrameState {
    fn new(caller: RevmAddress, address: Option<RevmAddress>, depth: usize) -> Self {
        FrameState {
            graph: FrameGraph::new(),
            caller,
            address,
            depth,
            pending: None,
        }
    }
}

/// Builds one value dependency graph per call frame while the interpreter
/// runs, via the inspector step hooks. Frames close on `call_end` /
/// `create_end`, contributing their counters and, when configured, a
/// [`CallLog`] row and a `.dot` rendering.
#[derive(Debug)]
pub struct ValueGraphInspector {
    config: GraphConfig,
    block: u64,
    tx_index: usize,
    frames: Vec<FrameState>,
    frame_seq: usize,
}

impl ValueGraphInspector {
    pub fn new(block: u64, tx_index: usize, config: GraphConfig) -> Self {
        ValueGraphInspector {
            config,
            block,
            tx_index,
            frames: Vec::new(),
            frame_seq: 0,
        }
    }

    fn finish_frame(&mut self, result: InstructionResult, address: Option<RevmAddress>) {
        let Some(mut frame) = self.frames.pop() else {
            return;
        };
        if address.is_some() {
            frame.address = address;
        }
        frame
            .graph
            .close(!result.is_ok(), is_out_of_gas(result));

        let stats = *frame.graph.stats();
        self.config.counters.record(&stats);

        if let Some(sink) = &self.config.call_log {
            sink.send(CallLog {
                block: self.block,
                tx_index: self.tx_index,
                depth: frame.depth,
                caller: to_h160(frame.caller),
                address: to_h160(frame.address.unwrap_or_default()),
                total_inst: stats.total_inst,
                live_inst: stats.live_inst,
                total_gas: stats.total_gas,
                live_gas: stats.live_gas,
            });
        }

        if let Some(dir) = &self.config.graph_dir {
            let path = dir.join(format!(
                "{}_{}_{}.dot",
                self.block, self.tx_index, self.frame_seq
            ));
            if let Err(err) = std::fs::write(&path, dot::to_dot(&frame.graph)) {
                warn!("failed to write value graph {}: {err}", path.display());
            }
        }
        self.frame_seq += 1;
    }
}

fn to_h160(address: RevmAddress) -> ethereum_types::Address {
    ethereum_types::Address::from_slice(address.as_slice())
}

fn is_out_of_gas(result: InstructionResult) -> bool {
    matches!(
        result,
        InstructionResult::OutOfGas
            | InstructionResult::MemoryOOG
            | InstructionResult::MemoryLimitOOG
            | InstructionResult::PrecompileOOG
            | InstructionResult::InvalidOperandOOG
    )
}

impl<DB: Database> Inspector<DB> for ValueGraphInspector {
    fn step(&mut self, interp: &mut Interpreter, _context: &mut EvmContext<DB>) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        let opcode = interp.current_opcode();
        let pops = opcodes::stack_inputs(opcode);
        let mut operands = Vec::with_capacity(pops);
        for index in 0..pops {
            match interp.stack.peek(index) {
                Ok(word) => operands.push(word),
                Err(_) => break,
            }
        }
        frame.pending = Some(PendingStep {
            opcode,
            pc: interp.program_counter() as u64,
            gas_spent: interp.gas.spent(),
            operands,
        });
    }

    fn step_end(&mut self, interp: &mut Interpreter, _context: &mut EvmContext<DB>) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        let Some(pending) = frame.pending.take() else {
            return;
        };
        // only instructions that completed advance the graph; a trapped
        // instruction leaves the VM stack in an unusable state anyway
        let result = interp.instruction_result;
        let completed = matches!(
            result,
            InstructionResult::Continue
                | InstructionResult::Stop
                | InstructionResult::Return
                | InstructionResult::Revert
                | InstructionResult::SelfDestruct
                | InstructionResult::CallOrCreate
        );
        if !completed {
            return;
        }

        let cost = interp.gas.spent().saturating_sub(pending.gas_spent);
        let pushed = match opcodes::spec(pending.opcode).map(|spec| spec.class) {
            Some(OpClass::Value) => interp.stack.peek(0).ok(),
            _ => None,
        };
        frame
            .graph
            .exec_op(pending.opcode, pending.pc, cost, &pending.operands, pushed);
    }

    fn call(
        &mut self,
        context: &mut EvmContext<DB>,
        inputs: &mut CallInputs,
    ) -> Option<CallOutcome> {
        let depth = context.journaled_state.depth() as usize;
        self.frames.push(FrameState::new(
            inputs.caller,
            Some(inputs.target_address),
            depth,
        ));
        None
    }

    fn call_end(
        &mut self,
        _context: &mut EvmContext<DB>,
        _inputs: &CallInputs,
        outcome: CallOutcome,
    ) -> CallOutcome {
        self.finish_frame(outcome.result.result, None);
        outcome
    }

    fn create(
        &mut self,
        context: &mut EvmContext<DB>,
        inputs: &mut CreateInputs,
    ) -> Option<CreateOutcome> {
        let depth = context.journaled_state.depth() as usize;
        self.frames.push(FrameState::new(inputs.caller, None, depth));
        None
    }

    fn create_end(
        &mut self,
        _context: &mut EvmContext<DB>,
        _inputs: &CreateInputs,
        outcome: CreateOutcome,
    ) -> CreateOutcome {
        self.finish_frame(outcome.result.result, outcome.address);
        outcome
    }
}
