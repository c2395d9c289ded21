use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use tracing::debug;

use ember_common::{constants::TX_GAS_COST, types::Event, types::Transaction};
use ember_crypto::keccak_hash;

use crate::{
    backends::{BytecodeVm, CallKind, Message},
    errors::InvalidTransaction,
    host::{BlockHashProvider, EvmHost, Host, TxContext},
    state::StateStore,
};

/// Context of the block the transaction executes in.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockEnv {
    pub number: u64,
    /// Unix timestamp in nanoseconds.
    pub timestamp: u64,
    pub gas_limit: u64,
    pub coinbase: Address,
    pub chain_id: u64,
}

/// Result of one executed transaction. A failed execution is still part
/// of the block; only [`InvalidTransaction`] excludes it.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionOutcome {
    pub tx_hash: H256,
    pub success: bool,
    pub gas_used: u64,
    pub output: Bytes,
    pub events: Vec<Event>,
    pub contract_address: Option<Address>,
}

/// Contract address for a deployment from `sender` at `nonce`: the low 20
/// bytes of KECCAK-256 over the RLP pair `[sender, nonce]`.
pub fn derive_contract_address(sender: Address, nonce: u64) -> Address {
    let nonce_size: u8 = if nonce < 0x80 {
        1
    } else {
        1 + bytes_required(nonce)
    };
    let mut rlp = Vec::with_capacity(21 + nonce_size as usize);
    rlp.push(0xc0 + 20 + nonce_size);
    rlp.extend_from_slice(sender.as_bytes());
    if nonce < 0x80 {
        rlp.push(nonce as u8);
    } else {
        let be = nonce.to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        rlp.push(0x80 + (8 - skip) as u8);
        rlp.extend_from_slice(&be[skip..]);
    }
    Address::from_slice(&keccak_hash(rlp)[12..])
}

fn bytes_required(value: u64) -> u8 {
    (8 - value.to_be_bytes().iter().take_while(|b| **b == 0).count()) as u8
}

/// Executes one transaction against the staged state.
///
/// The sender is pre-charged for the full gas allowance, its nonce bumped,
/// and frame one opened. On success the pending writes stay staged for
/// block acceptance; on revert they are walked back, leaving only the
/// nonce bump and the gas actually consumed. Unused gas is refunded.
pub fn execute_transaction(
    state: &mut StateStore,
    vm: &dyn BytecodeVm,
    blocks: &dyn BlockHashProvider,
    env: &BlockEnv,
    tx: &Transaction,
) -> Result<TransactionOutcome, InvalidTransaction> {
    if tx.gas_limit < TX_GAS_COST {
        return Err(InvalidTransaction::IntrinsicGasTooLow);
    }
    let gas_price = U256::from(tx.gas_price());
    let pre_charge = U256::from(tx.gas_limit) * gas_price;
    if state.pending_balance(&tx.from) < pre_charge {
        return Err(InvalidTransaction::InsufficientFunds);
    }

    state.begin_transaction();
    if state.sub_balance(tx.from, pre_charge).is_err() {
        state.end_transaction();
        return Err(InvalidTransaction::InsufficientFunds);
    }
    state.bump_nonce(tx.from);

    let tx_hash = tx.compute_hash();
    let context = TxContext {
        origin: tx.from,
        gas_price: tx.gas_price(),
        coinbase: env.coinbase,
        block_number: env.number,
        block_timestamp: env.timestamp,
        block_gas_limit: env.gas_limit,
        chain_id: env.chain_id,
        prev_randao: H256::zero(),
        base_fee: U256::zero(),
    };
    let mut host = EvmHost::new(state, vm, blocks, context, tx_hash);

    let vm_gas = tx.gas_limit - TX_GAS_COST;
    let (result, contract_address) = if tx.is_contract_creation() {
        let recipient = derive_contract_address(tx.from, tx.nonce);
        let msg = Message {
            kind: CallKind::Create,
            sender: tx.from,
            recipient,
            value: tx.value,
            input: Bytes::new(),
            gas: vm_gas,
            depth: 1,
        };
        let result = host.create(msg, &tx.data);
        let created = result.create_address;
        (result, created)
    } else {
        let msg = Message {
            kind: CallKind::Call,
            sender: tx.from,
            recipient: tx.to,
            value: tx.value,
            input: tx.data.clone(),
            gas: vm_gas,
            depth: 1,
        };
        (host.call(msg), None)
    };

    let success = result.status.is_success();
    let events = if success { host.take_events() } else { Vec::new() };

    let gas_used = TX_GAS_COST + vm_gas.saturating_sub(result.gas_left);
    let refund = U256::from(tx.gas_limit.saturating_sub(gas_used)) * gas_price;
    state.add_balance(tx.from, refund);
    state.end_transaction();

    debug!(%tx_hash, success, gas_used, "transaction executed");

    Ok(TransactionOutcome {
        tx_hash,
        success,
        gas_used,
        output: result.output,
        events,
        contract_address,
    })
}
