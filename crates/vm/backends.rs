use bytes::Bytes;
use ethereum_types::{Address, U256};

use crate::host::Host;

/// EVM revision the bytecode is executed under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Revision {
    Paris,
    Shanghai,
    #[default]
    Cancun,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Call,
    Create,
}

/// One call message handed to the VM.
#[derive(Clone, Debug)]
pub struct Message {
    pub kind: CallKind,
    pub sender: Address,
    pub recipient: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas: u64,
    pub depth: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Revert,
    OutOfGas,
    InvalidInstruction,
    InternalError,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

/// Outcome of one VM invocation.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub status: StatusCode,
    pub gas_left: u64,
    pub output: Bytes,
    pub create_address: Option<Address>,
}

impl ExecutionResult {
    pub fn failure(status: StatusCode) -> Self {
        ExecutionResult {
            status,
            gas_left: 0,
            output: Bytes::new(),
            create_address: None,
        }
    }
}

/// The external bytecode interpreter. The host handle gives the VM the
/// callback set it needs for all state access; calls are synchronous and
/// must not suspend.
pub trait BytecodeVm {
    fn execute(
        &self,
        host: &mut dyn Host,
        revision: Revision,
        msg: &Message,
        code: &[u8],
    ) -> ExecutionResult;
}
