//! Minimal scripted VM used by unit tests across the workspace.
//!
//! The "bytecode" is a flat list of fixed-width instructions:
//!
//! | opcode | operands            | effect                              |
//! |--------|---------------------|-------------------------------------|
//! | `0x01` | key(32), value(32)  | storage write on the recipient      |
//! | `0x02` | key(32)             | storage read (result discarded)     |
//! | `0x03` | key(32), value(32)  | transient write on the recipient    |
//! | `0x04` | key(32)             | transient read (result discarded)   |
//! | `0x05` | len(1), data        | emit a log with the given data      |
//! | `0x06` | addr(20), value(32) | call into `addr` with `value`       |
//! | `0x07` | (none)              | self destruct (always unsupported)  |
//! | `0x0f` | (none)              | revert                              |
//! | `0xfe` | (none)              | invalid instruction                 |
//!
//! Every instruction costs three gas. Reaching the end of the code is a
//! success with empty output.

use bytes::Bytes;
use ethereum_types::{Address, H256};

use crate::{
    backends::{BytecodeVm, CallKind, ExecutionResult, Message, Revision, StatusCode},
    host::{BlockHashProvider, Host},
};

const GAS_PER_OP: u64 = 3;

/// A block-hash provider that knows no blocks.
pub struct NoBlockHashes;

impl BlockHashProvider for NoBlockHashes {
    fn block_hash_at(&self, _height: u64) -> Option<H256> {
        None
    }
}

pub struct ScriptedVm;

impl BytecodeVm for ScriptedVm {
    fn execute(
        &self,
        host: &mut dyn Host,
        _revision: Revision,
        msg: &Message,
        code: &[u8],
    ) -> ExecutionResult {
        let mut gas = msg.gas;
        let mut pc = 0usize;

        macro_rules! operand {
            ($len:expr) => {{
                let start = pc + 1;
                let end = start + $len;
                match code.get(start..end) {
                    Some(bytes) => bytes,
                    None => return ExecutionResult::failure(StatusCode::InternalError),
                }
            }};
        }

        while pc < code.len() {
            if gas < GAS_PER_OP {
                return ExecutionResult::failure(StatusCode::OutOfGas);
            }
            gas -= GAS_PER_OP;

            match code[pc] {
                0x01 => {
                    let operands = operand!(64);
                    let key = H256::from_slice(&operands[..32]);
                    let value = H256::from_slice(&operands[32..]);
                    host.set_storage(msg.recipient, key, value);
                    pc += 65;
                }
                0x02 => {
                    let operands = operand!(32);
                    let _ = host.get_storage(msg.recipient, H256::from_slice(operands));
                    pc += 33;
                }
                0x03 => {
                    let operands = operand!(64);
                    let key = H256::from_slice(&operands[..32]);
                    let value = H256::from_slice(&operands[32..]);
                    host.set_transient_storage(msg.recipient, key, value);
                    pc += 65;
                }
                0x04 => {
                    let operands = operand!(32);
                    let _ = host.get_transient_storage(msg.recipient, H256::from_slice(operands));
                    pc += 33;
                }
                0x05 => {
                    let len = *operand!(1).first().unwrap_or(&0) as usize;
                    let start = pc + 2;
                    let Some(data) = code.get(start..start + len) else {
                        return ExecutionResult::failure(StatusCode::InternalError);
                    };
                    host.emit_log(msg.recipient, data, &[]);
                    pc += 2 + len;
                }
                0x06 => {
                    let operands = operand!(52);
                    let recipient = Address::from_slice(&operands[..20]);
                    let value = ethereum_types::U256::from_big_endian(&operands[20..]);
                    let child_gas = gas / 2;
                    let result = host.call(Message {
                        kind: CallKind::Call,
                        sender: msg.recipient,
                        recipient,
                        value,
                        input: Bytes::new(),
                        gas: child_gas,
                        depth: msg.depth + 1,
                    });
                    gas -= child_gas - child_gas.min(result.gas_left);
                    pc += 53;
                }
                0x07 => {
                    host.self_destruct(msg.recipient, msg.recipient);
                    pc += 1;
                }
                0x0f => {
                    return ExecutionResult {
                        status: StatusCode::Revert,
                        gas_left: gas,
                        output: Bytes::new(),
                        create_address: None,
                    };
                }
                _ => return ExecutionResult::failure(StatusCode::InvalidInstruction),
            }
        }

        ExecutionResult {
            status: StatusCode::Success,
            gas_left: gas,
            output: Bytes::new(),
            create_address: None,
        }
    }
}

/// Script builder helpers for tests.
pub mod script {
    use ethereum_types::{Address, H256, U256};

    pub fn sstore(key: H256, value: H256) -> Vec<u8> {
        let mut op = vec![0x01];
        op.extend_from_slice(key.as_bytes());
        op.extend_from_slice(value.as_bytes());
        op
    }

    pub fn sload(key: H256) -> Vec<u8> {
        let mut op = vec![0x02];
        op.extend_from_slice(key.as_bytes());
        op
    }

    pub fn tstore(key: H256, value: H256) -> Vec<u8> {
        let mut op = vec![0x03];
        op.extend_from_slice(key.as_bytes());
        op.extend_from_slice(value.as_bytes());
        op
    }

    pub fn tload(key: H256) -> Vec<u8> {
        let mut op = vec![0x04];
        op.extend_from_slice(key.as_bytes());
        op
    }

    pub fn emit(data: &[u8]) -> Vec<u8> {
        let mut op = vec![0x05, data.len() as u8];
        op.extend_from_slice(data);
        op
    }

    pub fn call(recipient: Address, value: U256) -> Vec<u8> {
        let mut op = vec![0x06];
        op.extend_from_slice(recipient.as_bytes());
        op.extend_from_slice(&value.to_big_endian());
        op
    }

    pub fn self_destruct() -> Vec<u8> {
        vec![0x07]
    }

    pub fn revert() -> Vec<u8> {
        vec![0x0f]
    }

    pub fn invalid() -> Vec<u8> {
        vec![0xfe]
    }
}
