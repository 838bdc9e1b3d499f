//! The block processor and validator (§4.4): turning a proposed block of
//! transactions into state transitions and receipts, and checking a
//! received block's header against the four roots it claims.

pub mod bloom;
pub mod difficulty;
pub mod header;
pub mod receipt;
pub mod transaction;
pub mod validate;

use std::collections::HashSet;
use std::rc::Rc;

use primitive_types::{H160, U256};
use thiserror::Error;

pub use difficulty::calc_difficulty;
pub use header::BlockHeader;
pub use receipt::{PostStateOrStatus, Receipt};
pub use transaction::{Transaction, TransactionError};
pub use validate::{validate_header, HeaderError};

use crate::chain::ChainConfig;
use crate::evm::{self, BlockHashLookup, CallKind, ExecutionEnvironment, Log, SubState};
use crate::rlp::{Decodable, Encodable, RlpError, RlpItem};
use crate::state::AccountBackend;
use crate::trie::{MemoryKvStore, Trie};

/// A full block: header, the ordered transaction list it claims, and the
/// ommer headers it includes for the extra reward (§3 "Block").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub ommers: Vec<BlockHeader>,
}

impl Encodable for Block {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::List(vec![
            self.header.to_rlp(),
            RlpItem::List(self.transactions.iter().map(|t| t.to_rlp()).collect()),
            RlpItem::List(self.ommers.iter().map(|o| o.to_rlp()).collect()),
        ])
    }
}

impl Decodable for Block {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let l = item.as_list()?;
        if l.len() != 3 {
            return Err(RlpError::WrongArity {
                expected: 3,
                found: l.len(),
            });
        }
        let header = BlockHeader::from_rlp(&l[0])?;
        let transactions = l[1]
            .as_list()?
            .iter()
            .map(Transaction::from_rlp)
            .collect::<Result<Vec<_>, _>>()?;
        let ommers = l[2]
            .as_list()?
            .iter()
            .map(BlockHeader::from_rlp)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block {
            header,
            transactions,
            ommers,
        })
    }
}

/// Why a transaction could not even be attempted against a block (§4.4
/// transaction application, step 2's hard-reject checks). Distinct from an
/// `EVM` `Halt`, which is a failure *during* a transaction that is still
/// attempted, charged for, and given a receipt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxRejection {
    #[error("transaction signature does not recover to a valid sender")]
    InvalidSignature,
    #[error("transaction nonce does not match the sender's current nonce")]
    WrongNonce,
    #[error("sender balance cannot cover gas_limit * gas_price + value")]
    InsufficientBalance,
    #[error("gas_limit is below the transaction's intrinsic gas cost")]
    IntrinsicGasExceedsLimit,
}

/// The parameters a block producer chooses for a new child; everything else
/// (`parent_hash`, `difficulty`, the four roots) is derived.
pub struct ChildParams {
    pub beneficiary: H160,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    /// The gas limit the producer would like; `gen_child` clamps it into the
    /// band §4.4.2 allows relative to `parent.gas_limit`.
    pub gas_limit: u64,
}

/// Build the header for a new block on top of `parent`, with the roots set
/// to the parent's state root and empty-list placeholders — callers fill
/// in the real roots via `finalize_block` after applying transactions.
pub fn gen_child(parent: &BlockHeader, params: ChildParams, config: &ChainConfig) -> BlockHeader {
    let difficulty = calc_difficulty(parent, params.timestamp, config);
    let gas_limit = clamp_gas_limit(params.gas_limit, parent.gas_limit, config);

    BlockHeader {
        parent_hash: parent.hash(),
        ommers_hash: empty_list_hash(),
        beneficiary: params.beneficiary,
        state_root: parent.state_root,
        transactions_root: crate::crypto::empty_trie_root(),
        receipts_root: crate::crypto::empty_trie_root(),
        logs_bloom: bloom::empty(),
        difficulty,
        number: parent.number + U256::one(),
        gas_limit,
        gas_used: 0,
        timestamp: params.timestamp,
        extra_data: params.extra_data,
        mix_hash: primitive_types::H256::zero(),
        nonce: 0,
    }
}

/// Clamp `desired` into the open band `validate_header` accepts: §4.4.2
/// rejects a gap of exactly `bound` (and a gas_limit of exactly
/// `min_gas_limit`), so the producer must stay strictly inside it rather
/// than merely within it.
fn clamp_gas_limit(desired: u64, parent_gas_limit: u64, config: &ChainConfig) -> u64 {
    let bound = parent_gas_limit / config.gas_limit_bound_divisor;
    let lo = parent_gas_limit
        .saturating_sub(bound)
        .saturating_add(1)
        .max(config.min_gas_limit.saturating_add(1));
    let hi = parent_gas_limit.saturating_add(bound).saturating_sub(1);
    desired.clamp(lo, hi)
}

fn empty_list_hash() -> primitive_types::H256 {
    crate::crypto::keccak256(&crate::rlp::encode(&RlpItem::List(vec![])))
}

/// What running one transaction against the world state did, short of the
/// `Receipt` itself (which also needs the block's running gas total).
pub struct TxOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Apply one transaction to `state` in place (§4.4 transaction application,
/// steps 1-7). The eight numbered steps of the algorithm:
///
/// 1. recover the sender from the signature;
/// 2. check the sender's nonce and balance can cover the transaction, and
///    that `gas_limit` covers the intrinsic cost — any failure here is a
///    hard reject, the block as a whole cannot include this transaction;
/// 3. deduct `gas_limit * gas_price` up front and increment the sender's
///    nonce, regardless of how execution turns out;
/// 4. dispatch a `CREATE` (no `to`) or `CALL` (`to` present) against the
///    remaining `gas_limit - intrinsic_gas`;
/// 5. refund unused gas to the sender and credit the beneficiary for the
///    gas actually spent;
/// 6. apply the refund counter, capped at half the gas used;
/// 7. delete every self-destructed account.
///
/// Step 8 (receipt emission) is the caller's job, since cumulative gas used
/// is a block-level running total this function doesn't track.
pub fn apply_transaction<B: AccountBackend + Clone>(
    tx: &Transaction,
    header: &BlockHeader,
    config: &ChainConfig,
    block_hashes: &Rc<dyn BlockHashLookup>,
    state: &mut B,
) -> Result<TxOutcome, TxRejection> {
    let sender = tx.sender().map_err(|_| TxRejection::InvalidSignature)?;

    if state.nonce(&sender) != tx.nonce {
        return Err(TxRejection::WrongNonce);
    }
    let upfront_cost = U256::from(tx.gas_limit) * tx.gas_price;
    if state.balance(&sender) < upfront_cost + tx.value {
        return Err(TxRejection::InsufficientBalance);
    }
    let intrinsic = evm::gas::intrinsic_gas(&tx.data, tx.is_contract_creation());
    if tx.gas_limit < intrinsic {
        return Err(TxRejection::IntrinsicGasExceedsLimit);
    }

    // Step 3: charge the whole gas_limit to the beneficiary up front (the
    // unspent portion is handed back to the sender in step 5); no separate
    // "burn" primitive exists on `AccountBackend`, so this and the later
    // refund are both ordinary transfers.
    state
        .transfer(&sender, &header.beneficiary, upfront_cost)
        .map_err(|_| TxRejection::InsufficientBalance)?;
    state
        .increment_nonce(&sender)
        .map_err(|_| TxRejection::InsufficientBalance)?;

    let exec_gas = tx.gas_limit - intrinsic;
    let mut substate = SubState::default();
    let caller_env = ExecutionEnvironment {
        address: sender,
        origin: sender,
        caller: sender,
        call_value: tx.value,
        calldata: Vec::new(),
        code: Vec::new(),
        gas_price: tx.gas_price,
        block_coinbase: header.beneficiary,
        block_number: header.number,
        block_timestamp: header.timestamp,
        block_difficulty: header.difficulty,
        block_gas_limit: header.gas_limit,
        chain_id: U256::from(config.chain_id),
        depth: 0,
        is_static: false,
        block_hashes: block_hashes.clone(),
    };

    let result = if tx.is_contract_creation() {
        let new_address = state.new_contract_address(&sender, tx.nonce);
        evm::dispatch_create(&caller_env, tx.value, tx.data.clone(), exec_gas, new_address, state, &mut substate)
    } else {
        let to = tx.to.expect("to checked by is_contract_creation above");
        evm::dispatch_call(CallKind::Call, &caller_env, to, tx.value, tx.data.clone(), exec_gas, state, &mut substate)
    };

    let gas_used = tx.gas_limit - result.gas_left;

    // Step 6: cap the refund counter at half the gas used, then fold it
    // into the unused-gas figure the sender is refunded for.
    let capped_refund = substate.refund.min(gas_used / 2);
    let effective_gas_used = gas_used - capped_refund;
    let refund_wei = U256::from(tx.gas_limit - effective_gas_used) * tx.gas_price;
    state
        .transfer(&header.beneficiary, &sender, refund_wei)
        .map_err(|_| TxRejection::InsufficientBalance)?;

    // Step 7: self-destructed accounts are deleted only once the
    // transaction that destructed them has fully committed.
    for address in &substate.selfdestructs {
        state.mark_for_deletion(*address);
    }
    state
        .commit_deletions()
        .map_err(|_| TxRejection::InsufficientBalance)?;

    let success = matches!(result.halt, evm::Halt::Normal | evm::Halt::Return(_));
    Ok(TxOutcome {
        success,
        gas_used: effective_gas_used,
        logs: if success { substate.logs } else { Vec::new() },
    })
}

/// Apply every transaction in `transactions` to `state` in order, then
/// finalize rewards and the four roots into `header`. Returns the receipt
/// list (§4.4, transaction application step 8 plus block finalization).
pub fn apply_block<B: AccountBackend + Clone>(
    header: &mut BlockHeader,
    transactions: &[Transaction],
    ommers: &[BlockHeader],
    config: &ChainConfig,
    block_hashes: &Rc<dyn BlockHashLookup>,
    state: &mut B,
) -> Result<Vec<Receipt>, TxRejection> {
    let mut receipts = Vec::with_capacity(transactions.len());
    let mut cumulative_gas = 0u64;
    for tx in transactions {
        let outcome = apply_transaction(tx, header, config, block_hashes, state)?;
        cumulative_gas += outcome.gas_used;
        receipts.push(Receipt::new(outcome.success, cumulative_gas, outcome.logs));
    }
    header.gas_used = cumulative_gas;
    finalize_block(header, transactions, &receipts, ommers, config, state);
    Ok(receipts)
}

/// Block finalization (§4.4): the block and ommer rewards, then the four
/// roots that commit to the block's effects.
fn finalize_block<B: AccountBackend + Clone>(
    header: &mut BlockHeader,
    transactions: &[Transaction],
    receipts: &[Receipt],
    ommers: &[BlockHeader],
    config: &ChainConfig,
    state: &mut B,
) {
    state
        .credit(&header.beneficiary, config.block_reward)
        .expect("crediting the beneficiary of the block being finalized cannot fail");

    for ommer in ommers {
        let depth = header.number.saturating_sub(ommer.number).as_u64();
        let ommer_reward = config.block_reward * U256::from(8u64.saturating_sub(depth)) / U256::from(8u64);
        state
            .credit(&ommer.beneficiary, ommer_reward)
            .expect("crediting an ommer beneficiary cannot fail");
        let nephew_reward = config.block_reward / U256::from(32u64);
        state
            .credit(&header.beneficiary, nephew_reward)
            .expect("crediting the beneficiary with a nephew reward cannot fail");
    }

    header.transactions_root = ordered_root(transactions);
    header.receipts_root = ordered_root(receipts);
    header.ommers_hash = crate::crypto::keccak256(&crate::rlp::encode(&RlpItem::List(
        ommers.iter().map(|o| o.to_rlp()).collect(),
    )));
    header.logs_bloom = bloom::combine(&receipts.iter().map(|r| r.logs_bloom.clone()).collect::<Vec<_>>());
    header.state_root = state.state_root();
}

/// The root of a trie keyed by `rlp(index)` mapping to `rlp(item)`, used for
/// both `transactions_root` and `receipts_root` (§4.4).
fn ordered_root<T: Encodable>(items: &[T]) -> primitive_types::H256 {
    let mut trie = Trie::new(MemoryKvStore::default());
    for (index, item) in items.iter().enumerate() {
        let key = crate::rlp::encode(&(index as u64).to_rlp());
        trie.put(&key, item.rlp_bytes())
            .expect("inserting into a fresh in-memory trie cannot fail");
    }
    trie.root_hash()
}

/// Which of the four committed roots a received block disagrees with its
/// own recomputation of. Holistic validity collects every mismatch rather
/// than stopping at the first (mirroring `validate_header`'s header-level
/// rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mismatch {
    StateRoot,
    TransactionsRoot,
    ReceiptsRoot,
    OmmersHash,
}

/// Check a received block's claimed roots against a recomputation from its
/// transactions, receipts, ommers and the state `state` ends up in. An
/// empty set means the block is holistically valid.
pub fn is_holistic_valid<B: AccountBackend + Clone>(
    header: &BlockHeader,
    transactions: &[Transaction],
    receipts: &[Receipt],
    ommers: &[BlockHeader],
    state: &mut B,
) -> HashSet<Mismatch> {
    let mut mismatches = HashSet::new();

    if ordered_root(transactions) != header.transactions_root {
        mismatches.insert(Mismatch::TransactionsRoot);
    }
    if ordered_root(receipts) != header.receipts_root {
        mismatches.insert(Mismatch::ReceiptsRoot);
    }
    let ommers_hash = crate::crypto::keccak256(&crate::rlp::encode(&RlpItem::List(
        ommers.iter().map(|o| o.to_rlp()).collect(),
    )));
    if ommers_hash != header.ommers_hash {
        mismatches.insert(Mismatch::OmmersHash);
    }
    if state.state_root() != header.state_root {
        mismatches.insert(Mismatch::StateRoot);
    }

    mismatches
}
