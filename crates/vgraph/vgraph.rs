mod dot;
mod graph;
mod inspector;
mod opcodes;
mod sink;
mod tracer;

pub use graph::{FrameGraph, FrameStats, GraphCounters, Node, NodeId};
pub use inspector::{GraphConfig, ValueGraphInspector};
pub use sink::{CallLog, CallLogSender, CallLogSink};
