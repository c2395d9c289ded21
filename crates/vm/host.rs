use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use tracing::warn;

use ember_common::types::Event;

use crate::{
    backends::{BytecodeVm, ExecutionResult, Message, Revision, StatusCode},
    registry::Contract,
    state::StateStore,
};

/// EIP-2929 access answer. This chain does no cold-access accounting, so
/// every probe reports warm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessStatus {
    Warm,
    Cold,
}

/// Context of the transaction being executed, as exposed to the VM.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxContext {
    pub origin: Address,
    pub gas_price: u64,
    pub coinbase: Address,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub block_gas_limit: u64,
    pub chain_id: u64,
    pub prev_randao: H256,
    pub base_fee: U256,
}

/// Committed block hashes, answered by the chain head.
pub trait BlockHashProvider {
    fn block_hash_at(&self, height: u64) -> Option<H256>;
}

/// The callback set a bytecode VM executes against. All calls are
/// synchronous; none may fault across the VM boundary. Internal problems
/// raise the host's revert flag instead, which the executor promotes to a
/// frame revert when the VM returns.
pub trait Host {
    fn account_exists(&self, address: Address) -> bool;
    fn get_storage(&self, address: Address, key: H256) -> H256;
    fn set_storage(&mut self, address: Address, key: H256, value: H256)
    -> crate::state::StorageStatus;
    fn get_balance(&self, address: Address) -> U256;
    fn get_code_size(&self, address: Address) -> usize;
    fn get_code_hash(&self, address: Address) -> H256;
    fn copy_code(&self, address: Address, offset: usize, buffer: &mut [u8]) -> usize;
    fn self_destruct(&mut self, address: Address, beneficiary: Address) -> bool;
    fn call(&mut self, msg: Message) -> ExecutionResult;
    fn get_tx_context(&self) -> TxContext;
    fn get_block_hash(&self, height: u64) -> H256;
    fn emit_log(&mut self, address: Address, data: &[u8], topics: &[H256]);
    fn access_account(&mut self, address: Address) -> AccessStatus;
    fn access_storage(&mut self, address: Address, key: H256) -> AccessStatus;
    fn get_transient_storage(&self, address: Address, key: H256) -> H256;
    fn set_transient_storage(&mut self, address: Address, key: H256, value: H256);
}

/// Host implementation over the state store. One instance lives for the
/// duration of a single transaction.
pub struct EvmHost<'a> {
    pub state: &'a mut StateStore,
    vm: &'a dyn BytecodeVm,
    blocks: &'a dyn BlockHashProvider,
    context: TxContext,
    current_tx_hash: H256,
    revision: Revision,
    events: Vec<Event>,
    should_revert: bool,
}

impl<'a> EvmHost<'a> {
    pub fn new(
        state: &'a mut StateStore,
        vm: &'a dyn BytecodeVm,
        blocks: &'a dyn BlockHashProvider,
        context: TxContext,
        current_tx_hash: H256,
    ) -> Self {
        EvmHost {
            state,
            vm,
            blocks,
            context,
            current_tx_hash,
            revision: Revision::default(),
            events: Vec::new(),
            should_revert: false,
        }
    }

    /// Hands the transaction's event buffer to the executor.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Runs contract creation: stages the code, registers the contract and
    /// executes the constructor frame. The whole frame reverts atomically
    /// on failure.
    pub fn create(&mut self, msg: Message, code: &Bytes) -> ExecutionResult {
        let checkpoint = self.state.checkpoint_with_events(self.events.len());

        if self.state.set_code(msg.recipient, code.clone()).is_err() {
            return ExecutionResult::failure(StatusCode::Revert);
        }
        self.state.register_contract(
            self.current_tx_hash,
            msg.recipient,
            Contract::Bytecode(code.clone()),
        );
        if self
            .state
            .transfer(msg.sender, msg.recipient, msg.value)
            .is_err()
        {
            self.state.revert_to(&checkpoint);
            return ExecutionResult::failure(StatusCode::Revert);
        }

        let vm = self.vm;
        let revision = self.revision;
        let mut result = vm.execute(self, revision, &msg, code);
        if std::mem::take(&mut self.should_revert) {
            result = ExecutionResult::failure(StatusCode::Revert);
        }
        if result.status.is_success() {
            result.create_address = Some(msg.recipient);
        } else {
            self.events.truncate(checkpoint.events());
            self.state.revert_to(&checkpoint);
        }
        result
    }
}

impl Host for EvmHost<'_> {
    fn account_exists(&self, address: Address) -> bool {
        self.state.account_exists(&address)
    }

    fn get_storage(&self, address: Address, key: H256) -> H256 {
        self.state.get_storage(&address, &key)
    }

    fn set_storage(
        &mut self,
        address: Address,
        key: H256,
        value: H256,
    ) -> crate::state::StorageStatus {
        self.state.set_storage(address, key, value)
    }

    fn get_balance(&self, address: Address) -> U256 {
        self.state.get_balance(&address)
    }

    fn get_code_size(&self, address: Address) -> usize {
        self.state.get_code(&address).len()
    }

    fn get_code_hash(&self, address: Address) -> H256 {
        self.state.get_code_hash(&address)
    }

    fn copy_code(&self, address: Address, offset: usize, buffer: &mut [u8]) -> usize {
        let code = self.state.get_code(&address);
        if offset >= code.len() {
            return 0;
        }
        let n = buffer.len().min(code.len() - offset);
        buffer[..n].copy_from_slice(&code[offset..offset + n]);
        n
    }

    fn self_destruct(&mut self, address: Address, _beneficiary: Address) -> bool {
        warn!(?address, "self destruct requested; not supported");
        self.should_revert = true;
        false
    }

    fn call(&mut self, msg: Message) -> ExecutionResult {
        let checkpoint = self.state.checkpoint_with_events(self.events.len());

        if self
            .state
            .transfer(msg.sender, msg.recipient, msg.value)
            .is_err()
        {
            return ExecutionResult::failure(StatusCode::Revert);
        }

        let handler = self.state.contract(&msg.recipient).cloned();
        let mut result = match handler {
            Some(Contract::Precompile(native)) => match native.dispatch(&msg.input) {
                Ok(output) => ExecutionResult {
                    status: StatusCode::Success,
                    gas_left: msg.gas,
                    output: Bytes::from(output),
                    create_address: None,
                },
                Err(_) => ExecutionResult::failure(StatusCode::Revert),
            },
            _ => {
                let code = self.state.get_code(&msg.recipient);
                if code.is_empty() {
                    // Plain value transfer; nothing to run.
                    ExecutionResult {
                        status: StatusCode::Success,
                        gas_left: msg.gas,
                        output: Bytes::new(),
                        create_address: None,
                    }
                } else {
                    let vm = self.vm;
                    let revision = self.revision;
                    vm.execute(self, revision, &msg, &code)
                }
            }
        };

        if std::mem::take(&mut self.should_revert) {
            result = ExecutionResult::failure(StatusCode::Revert);
        }
        if !result.status.is_success() {
            self.events.truncate(checkpoint.events());
            self.state.revert_to(&checkpoint);
        }
        result
    }

    fn get_tx_context(&self) -> TxContext {
        self.context
    }

    fn get_block_hash(&self, height: u64) -> H256 {
        self.blocks.block_hash_at(height).unwrap_or_default()
    }

    fn emit_log(&mut self, address: Address, data: &[u8], topics: &[H256]) {
        self.events.push(Event {
            creator: address,
            data: Bytes::copy_from_slice(data),
            topics: topics.to_vec(),
        });
    }

    fn access_account(&mut self, _address: Address) -> AccessStatus {
        AccessStatus::Warm
    }

    fn access_storage(&mut self, _address: Address, _key: H256) -> AccessStatus {
        AccessStatus::Warm
    }

    fn get_transient_storage(&self, address: Address, key: H256) -> H256 {
        self.state.get_transient(&address, &key)
    }

    fn set_transient_storage(&mut self, address: Address, key: H256, value: H256) {
        self.state.set_transient(address, key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::CallKind;
    use crate::test_utils::{NoBlockHashes, ScriptedVm};

    fn host_fixture(state: &mut StateStore) -> EvmHost<'_> {
        EvmHost::new(
            state,
            &ScriptedVm,
            &NoBlockHashes,
            TxContext::default(),
            H256::zero(),
        )
    }

    #[test]
    fn self_destruct_marks_frame_for_revert() {
        let mut state = StateStore::new();
        state.begin_transaction();
        let mut host = host_fixture(&mut state);
        assert!(!host.self_destruct(Address::zero(), Address::zero()));
        assert!(host.should_revert);
    }

    #[test]
    fn absent_storage_reads_zero() {
        let mut state = StateStore::new();
        state.begin_transaction();
        let host = host_fixture(&mut state);
        assert_eq!(
            host.get_storage(Address::from_low_u64_be(1), H256::from_low_u64_be(9)),
            H256::zero()
        );
    }

    #[test]
    fn copy_code_respects_offset_and_buffer() {
        let mut state = StateStore::new();
        let address = Address::from_low_u64_be(3);
        state
            .set_code(address, Bytes::from_static(&[1, 2, 3, 4, 5]))
            .unwrap();
        state.begin_transaction();
        let host = host_fixture(&mut state);

        let mut buffer = [0u8; 2];
        assert_eq!(host.copy_code(address, 1, &mut buffer), 2);
        assert_eq!(buffer, [2, 3]);
        assert_eq!(host.copy_code(address, 4, &mut buffer), 1);
        assert_eq!(host.copy_code(address, 5, &mut buffer), 0);
    }

    #[test]
    fn access_probes_always_warm() {
        let mut state = StateStore::new();
        let mut host = host_fixture(&mut state);
        assert_eq!(host.access_account(Address::zero()), AccessStatus::Warm);
        assert_eq!(
            host.access_storage(Address::zero(), H256::zero()),
            AccessStatus::Warm
        );
    }

    #[test]
    fn block_hash_out_of_range_is_zero() {
        let mut state = StateStore::new();
        let host = host_fixture(&mut state);
        assert_eq!(host.get_block_hash(1000), H256::zero());
    }

    #[test]
    fn call_to_account_without_code_is_a_transfer() {
        let mut state = StateStore::new();
        let from = Address::from_low_u64_be(1);
        let to = Address::from_low_u64_be(2);
        state.add_balance(from, U256::from(100));
        state.begin_transaction();
        let mut host = host_fixture(&mut state);

        let result = host.call(Message {
            kind: CallKind::Call,
            sender: from,
            recipient: to,
            value: U256::from(40),
            input: Bytes::new(),
            gas: 1000,
            depth: 1,
        });
        assert!(result.status.is_success());
        assert_eq!(host.state.get_balance(&to), U256::from(40));
    }

    #[test]
    fn call_dispatches_to_native_precompiles() {
        use crate::registry::NativeContract;

        fn echo(input: &[u8]) -> Result<Vec<u8>, crate::errors::VmError> {
            Ok(input.to_vec())
        }

        let mut state = StateStore::new();
        let native = Address::from_low_u64_be(0x100);
        state.install_precompile(
            native,
            Contract::Precompile(NativeContract::new("echo").register([0xde, 0xad, 0xbe, 0xef], echo)),
        );
        state.begin_transaction();
        let mut host = host_fixture(&mut state);

        let result = host.call(Message {
            kind: CallKind::Call,
            sender: Address::from_low_u64_be(1),
            recipient: native,
            value: U256::zero(),
            input: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef, 0x42]),
            gas: 1000,
            depth: 1,
        });
        assert!(result.status.is_success());
        assert_eq!(result.output.as_ref(), &[0x42]);

        // An unknown selector reverts the frame.
        let result = host.call(Message {
            kind: CallKind::Call,
            sender: Address::from_low_u64_be(1),
            recipient: native,
            value: U256::zero(),
            input: Bytes::from_static(&[0, 0, 0, 0]),
            gas: 1000,
            depth: 1,
        });
        assert_eq!(result.status, StatusCode::Revert);
    }

    #[test]
    fn failed_child_call_reverts_its_writes() {
        let mut state = StateStore::new();
        let from = Address::from_low_u64_be(1);
        let to = Address::from_low_u64_be(2);
        // Script: write slot 0 = 7, then revert.
        let mut code = vec![0x01];
        code.extend_from_slice(H256::from_low_u64_be(0).as_bytes());
        code.extend_from_slice(H256::from_low_u64_be(7).as_bytes());
        code.push(0x0f);
        state.set_code(to, Bytes::from(code)).unwrap();
        state.commit_all();

        state.begin_transaction();
        let mut host = host_fixture(&mut state);
        let result = host.call(Message {
            kind: CallKind::Call,
            sender: from,
            recipient: to,
            value: U256::zero(),
            input: Bytes::new(),
            gas: 1000,
            depth: 2,
        });
        assert_eq!(result.status, StatusCode::Revert);
        assert_eq!(
            host.state.get_storage(&to, &H256::from_low_u64_be(0)),
            H256::zero()
        );
    }
}
