//! Classification of EVM opcodes as seen by the value graph: how many words
//! an instruction consumes, whether it leaves a produced word behind, which
//! memory region it touches, and whether it is an intrinsically live sink.

/// Where a memory region length comes from: a stack operand or a constant.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MemLen {
    Arg(usize),
    Fixed(u64),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum OpClass {
    /// Pushes an environment or literal word, consuming nothing.
    Value,
    /// Pure computation: consumes `pops` words, produces one.
    Pure,
    /// Consumes its arguments and produces nothing (POP, SSTORE, SELFDESTRUCT).
    Discard,
    /// Writes `[offset, offset+len)`; produces nothing.
    MemWrite { offset_arg: usize, len: MemLen },
    /// Produces one word derived from `[offset, offset+len)`.
    MemRead { offset_arg: usize, len: MemLen },
    /// Message call: reads the input region, writes the return region.
    Call {
        in_offset_arg: usize,
        in_len_arg: usize,
        ret_offset_arg: usize,
        ret_len_arg: usize,
    },
    /// CREATE/CREATE2: reads the init code region, produces the address word.
    Create { offset_arg: usize, len_arg: usize },
    /// RETURN/REVERT: consumes offset and size, reads that region, ends the frame.
    Terminate,
    /// LOGn: consumes offset, size and n topics, reads the data region.
    Log,
    Swap(usize),
    Dup(usize),
    /// JUMP/JUMPI/JUMPDEST: the node lingers on the node stack and is chained
    /// to the next executed instruction.
    Jump,
    /// STOP: no node at all.
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpSpec {
    pub name: &'static str,
    pub pops: usize,
    pub class: OpClass,
    /// Live at creation: the instruction's effect is externally observable.
    pub live: bool,
}

const fn pure(name: &'static str, pops: usize) -> OpSpec {
    OpSpec {
        name,
        pops,
        class: OpClass::Pure,
        live: false,
    }
}

const fn value(name: &'static str) -> OpSpec {
    OpSpec {
        name,
        pops: 0,
        class: OpClass::Value,
        live: false,
    }
}

const PUSH_NAMES: [&str; 33] = [
    "PUSH0", "PUSH1", "PUSH2", "PUSH3", "PUSH4", "PUSH5", "PUSH6", "PUSH7", "PUSH8", "PUSH9",
    "PUSH10", "PUSH11", "PUSH12", "PUSH13", "PUSH14", "PUSH15", "PUSH16", "PUSH17", "PUSH18",
    "PUSH19", "PUSH20", "PUSH21", "PUSH22", "PUSH23", "PUSH24", "PUSH25", "PUSH26", "PUSH27",
    "PUSH28", "PUSH29", "PUSH30", "PUSH31", "PUSH32",
];

const DUP_NAMES: [&str; 16] = [
    "DUP1", "DUP2", "DUP3", "DUP4", "DUP5", "DUP6", "DUP7", "DUP8", "DUP9", "DUP10", "DUP11",
    "DUP12", "DUP13", "DUP14", "DUP15", "DUP16",
];

const SWAP_NAMES: [&str; 16] = [
    "SWAP1", "SWAP2", "SWAP3", "SWAP4", "SWAP5", "SWAP6", "SWAP7", "SWAP8", "SWAP9", "SWAP10",
    "SWAP11", "SWAP12", "SWAP13", "SWAP14", "SWAP15", "SWAP16",
];

const LOG_NAMES: [&str; 5] = ["LOG0", "LOG1", "LOG2", "LOG3", "LOG4"];

/// Returns the value-graph classification of `op`, or `None` for undefined
/// opcodes (which trap in the interpreter and never reach the graph).
pub(crate) fn spec(op: u8) -> Option<OpSpec> {
    let spec = match op {
        0x00 => OpSpec {
            name: "STOP",
            pops: 0,
            class: OpClass::Stop,
            live: false,
        },
        0x01 => pure("ADD", 2),
        0x02 => pure("MUL", 2),
        0x03 => pure("SUB", 2),
        0x04 => pure("DIV", 2),
        0x05 => pure("SDIV", 2),
        0x06 => pure("MOD", 2),
        0x07 => pure("SMOD", 2),
        0x08 => pure("ADDMOD", 3),
        0x09 => pure("MULMOD", 3),
        0x0a => pure("EXP", 2),
        0x0b => pure("SIGNEXTEND", 2),
        0x10 => pure("LT", 2),
        0x11 => pure("GT", 2),
        0x12 => pure("SLT", 2),
        0x13 => pure("SGT", 2),
        0x14 => pure("EQ", 2),
        0x15 => pure("ISZERO", 1),
        0x16 => pure("AND", 2),
        0x17 => pure("OR", 2),
        0x18 => pure("XOR", 2),
        0x19 => pure("NOT", 1),
        0x1a => pure("BYTE", 2),
        0x1b => pure("SHL", 2),
        0x1c => pure("SHR", 2),
        0x1d => pure("SAR", 2),
        0x20 => OpSpec {
            name: "SHA3",
            pops: 2,
            class: OpClass::MemRead {
                offset_arg: 0,
                len: MemLen::Arg(1),
            },
            live: false,
        },
        0x30 => value("ADDRESS"),
        0x31 => pure("BALANCE", 1),
        0x32 => value("ORIGIN"),
        0x33 => value("CALLER"),
        0x34 => value("CALLVALUE"),
        0x35 => pure("CALLDATALOAD", 1),
        0x36 => value("CALLDATASIZE"),
        0x37 => OpSpec {
            name: "CALLDATACOPY",
            pops: 3,
            class: OpClass::MemWrite {
                offset_arg: 0,
                len: MemLen::Arg(2),
            },
            live: false,
        },
        0x38 => value("CODESIZE"),
        0x39 => OpSpec {
            name: "CODECOPY",
            pops: 3,
            class: OpClass::MemWrite {
                offset_arg: 0,
                len: MemLen::Arg(2),
            },
            live: false,
        },
        0x3a => value("GASPRICE"),
        0x3b => pure("EXTCODESIZE", 1),
        0x3c => OpSpec {
            name: "EXTCODECOPY",
            pops: 4,
            class: OpClass::MemWrite {
                offset_arg: 1,
                len: MemLen::Arg(3),
            },
            live: false,
        },
        0x3d => value("RETURNDATASIZE"),
        0x3e => OpSpec {
            name: "RETURNDATACOPY",
            pops: 3,
            class: OpClass::MemWrite {
                offset_arg: 0,
                len: MemLen::Arg(2),
            },
            live: false,
        },
        0x3f => pure("EXTCODEHASH", 1),
        0x40 => pure("BLOCKHASH", 1),
        0x41 => value("COINBASE"),
        0x42 => value("TIMESTAMP"),
        0x43 => value("NUMBER"),
        0x44 => value("DIFFICULTY"),
        0x45 => value("GASLIMIT"),
        0x46 => value("CHAINID"),
        0x47 => value("SELFBALANCE"),
        0x48 => value("BASEFEE"),
        0x50 => OpSpec {
            name: "POP",
            pops: 1,
            class: OpClass::Discard,
            live: false,
        },
        0x51 => OpSpec {
            name: "MLOAD",
            pops: 1,
            class: OpClass::MemRead {
                offset_arg: 0,
                len: MemLen::Fixed(32),
            },
            live: false,
        },
        0x52 => OpSpec {
            name: "MSTORE",
            pops: 2,
            class: OpClass::MemWrite {
                offset_arg: 0,
                len: MemLen::Fixed(32),
            },
            live: false,
        },
        0x53 => OpSpec {
            name: "MSTORE8",
            pops: 2,
            class: OpClass::MemWrite {
                offset_arg: 0,
                len: MemLen::Fixed(1),
            },
            live: false,
        },
        0x54 => pure("SLOAD", 1),
        0x55 => OpSpec {
            name: "SSTORE",
            pops: 2,
            class: OpClass::Discard,
            live: true,
        },
        0x56 => OpSpec {
            name: "JUMP",
            pops: 1,
            class: OpClass::Jump,
            live: false,
        },
        0x57 => OpSpec {
            name: "JUMPI",
            pops: 2,
            class: OpClass::Jump,
            live: false,
        },
        0x58 => value("PC"),
        0x59 => value("MSIZE"),
        0x5a => value("GAS"),
        0x5b => OpSpec {
            name: "JUMPDEST",
            pops: 0,
            class: OpClass::Jump,
            live: false,
        },
        0x5f..=0x7f => value(PUSH_NAMES[(op - 0x5f) as usize]),
        0x80..=0x8f => {
            let n = (op - 0x80 + 1) as usize;
            OpSpec {
                name: DUP_NAMES[n - 1],
                pops: 0,
                class: OpClass::Dup(n),
                live: false,
            }
        }
        0x90..=0x9f => {
            let n = (op - 0x90 + 1) as usize;
            OpSpec {
                name: SWAP_NAMES[n - 1],
                pops: 0,
                class: OpClass::Swap(n),
                live: false,
            }
        }
        0xa0..=0xa4 => {
            let n = (op - 0xa0) as usize;
            OpSpec {
                name: LOG_NAMES[n],
                pops: 2 + n,
                class: OpClass::Log,
                live: true,
            }
        }
        0xf0 => OpSpec {
            name: "CREATE",
            pops: 3,
            class: OpClass::Create {
                offset_arg: 1,
                len_arg: 2,
            },
            live: true,
        },
        0xf1 => OpSpec {
            name: "CALL",
            pops: 7,
            class: OpClass::Call {
                in_offset_arg: 3,
                in_len_arg: 4,
                ret_offset_arg: 5,
                ret_len_arg: 6,
            },
            live: true,
        },
        0xf2 => OpSpec {
            name: "CALLCODE",
            pops: 7,
            class: OpClass::Call {
                in_offset_arg: 3,
                in_len_arg: 4,
                ret_offset_arg: 5,
                ret_len_arg: 6,
            },
            live: true,
        },
        0xf3 => OpSpec {
            name: "RETURN",
            pops: 2,
            class: OpClass::Terminate,
            live: true,
        },
        0xf4 => OpSpec {
            name: "DELEGATECALL",
            pops: 6,
            class: OpClass::Call {
                in_offset_arg: 2,
                in_len_arg: 3,
                ret_offset_arg: 4,
                ret_len_arg: 5,
            },
            live: true,
        },
        0xf5 => OpSpec {
            name: "CREATE2",
            pops: 4,
            class: OpClass::Create {
                offset_arg: 1,
                len_arg: 2,
            },
            live: true,
        },
        // STATICCALL cannot write state and is not a sink
        0xfa => OpSpec {
            name: "STATICCALL",
            pops: 6,
            class: OpClass::Call {
                in_offset_arg: 2,
                in_len_arg: 3,
                ret_offset_arg: 4,
                ret_len_arg: 5,
            },
            live: false,
        },
        0xfd => OpSpec {
            name: "REVERT",
            pops: 2,
            class: OpClass::Terminate,
            live: true,
        },
        0xff => OpSpec {
            name: "SELFDESTRUCT",
            pops: 1,
            class: OpClass::Discard,
            live: true,
        },
        _ => return None,
    };
    Some(spec)
}

/// Number of words the instruction consumes from the VM stack; used by the
/// inspector to snapshot operands before execution.
pub(crate) fn stack_inputs(op: u8) -> usize {
    spec(op).map(|spec| spec.pops).unwrap_or(0)
}
