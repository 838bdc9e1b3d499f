//! The concrete seed scenarios from the core specification (literal values,
//! not just property checks): run end to end across RLP, the trie, the EVM
//! and the block processor/validator to confirm they agree with the
//! reference numbers a conforming implementation must reproduce exactly.

use std::rc::Rc;

use primitive_types::{H160, H256, U256};

use ethereum_core::block::{self, BlockHeader, Transaction};
use ethereum_core::chain::ChainConfig;
use ethereum_core::crypto;
use ethereum_core::evm::{self, ExecutionEnvironment, Halt, NoBlockHashes, SubState};
use ethereum_core::state::{AccountBackend, TrieState};
use ethereum_core::trie::{MemoryKvStore, Trie};

fn header(number: u64, timestamp: u64, difficulty: u64, gas_limit: u64) -> BlockHeader {
    BlockHeader {
        parent_hash: H256::zero(),
        ommers_hash: H256::zero(),
        beneficiary: H160::zero(),
        state_root: H256::zero(),
        transactions_root: H256::zero(),
        receipts_root: H256::zero(),
        logs_bloom: vec![0; 256],
        difficulty: U256::from(difficulty),
        number: U256::from(number),
        gas_limit,
        gas_used: 0,
        timestamp,
        extra_data: vec![],
        mix_hash: H256::zero(),
        nonce: 0,
    }
}

/// §8.1: the empty trie's root is the well-known constant, independent of
/// which `KvStore` backs it.
#[test]
fn empty_trie_root_matches_the_well_known_constant() {
    let trie: Trie<MemoryKvStore> = Trie::new(MemoryKvStore::default());
    assert_eq!(trie.root_hash(), crypto::empty_trie_root());
    assert_eq!(
        hex::encode(trie.root_hash().as_bytes()),
        "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421",
    );
}

/// §8.2: a bare STOP creation transaction against a funded sender, checked
/// against the exact gas-used and balance figures the spec gives.
#[test]
fn stop_only_creation_transaction_matches_seed_figures() {
    let key = k256::ecdsa::SigningKey::from_bytes(&[0x99u8; 32].into()).unwrap();
    let mut state = TrieState::new(MemoryKvStore::default());

    let mut tx = Transaction {
        nonce: 5,
        gas_price: U256::from(3u64),
        gas_limit: 100_000,
        to: None,
        value: U256::from(5u64),
        data: vec![0x00], // STOP
        v: 0,
        r: U256::zero(),
        s: U256::zero(),
    };
    let hash = tx.signing_hash(None);
    use k256::ecdsa::signature::hazmat::PrehashSigner;
    let (sig, recid): (k256::ecdsa::Signature, k256::ecdsa::RecoveryId) =
        key.sign_prehash_recoverable(hash.as_bytes()).unwrap();
    let bytes = sig.to_bytes();
    tx.r = U256::from_big_endian(&bytes[..32]);
    tx.s = U256::from_big_endian(&bytes[32..]);
    tx.v = 27 + recid.to_byte() as u64;

    let sender = tx.sender().unwrap();
    state.credit(&sender, U256::from(400_000u64)).unwrap();
    for _ in 0..5 {
        state.increment_nonce(&sender).unwrap();
    }

    let mut parent_header = header(0, 1, 131_072, 5_000_000);
    parent_header.beneficiary = H160::repeat_byte(0x05);
    let block_hashes: Rc<dyn evm::BlockHashLookup> = Rc::new(NoBlockHashes);

    let outcome = block::apply_transaction(&tx, &parent_header, &ChainConfig::default(), &block_hashes, &mut state).unwrap();

    assert!(outcome.success);
    assert!(outcome.logs.is_empty());
    assert_eq!(outcome.gas_used, 53_004);
    assert_eq!(state.nonce(&sender), 6);
    assert_eq!(state.balance(&sender), U256::from(240_983u64));
    assert_eq!(state.balance(&parent_header.beneficiary), U256::from(159_012u64));

    let new_contract = state.new_contract_address(&sender, 5);
    assert_eq!(state.balance(&new_contract), U256::from(5u64));
}

/// §8.3: difficulty continuity in both directions from the same parent.
#[test]
fn difficulty_continuity_matches_seed_figures() {
    let config = ChainConfig::default();
    let parent = header(32, 55, 300_000, 5_000_000);

    let quick_child = block::calc_difficulty(&parent, 66, &config);
    assert_eq!(quick_child, U256::from(300_146u64));

    let slow_child = block::calc_difficulty(&parent, 88, &config);
    assert_eq!(slow_child, U256::from(299_854u64));
}

/// §8.4: the gas-limit band around a parent's gas_limit, both the accepted
/// and rejected boundary.
#[test]
fn gas_limit_clamp_matches_seed_figures() {
    let config = ChainConfig::default();
    let parent = header(10, 100, 131_072, 1_000_000);

    let mut valid_child = header(11, 110, 0, 999_500);
    valid_child.difficulty = block::calc_difficulty(&parent, 110, &config);
    valid_child.parent_hash = parent.hash();
    assert!(block::validate_header(&valid_child, &parent, &config).is_empty());

    let mut invalid_child = header(11, 110, 0, 999_000);
    invalid_child.difficulty = block::calc_difficulty(&parent, 110, &config);
    invalid_child.parent_hash = parent.hash();
    let errors = block::validate_header(&invalid_child, &parent, &config);
    assert!(errors.contains(&block::HeaderError::GasLimitOutOfBounds));

    // §4.4.2's threshold is `>=`, not `>`: a diff of exactly `bound` is
    // already out of bounds, not the first value past it.
    let bound = parent.gas_limit / config.gas_limit_bound_divisor;
    let mut at_bound_child = header(11, 110, 0, parent.gas_limit - bound);
    at_bound_child.difficulty = block::calc_difficulty(&parent, 110, &config);
    at_bound_child.parent_hash = parent.hash();
    let errors = block::validate_header(&at_bound_child, &parent, &config);
    assert!(errors.contains(&block::HeaderError::GasLimitOutOfBounds));
}

/// §8.5: a valid header against its parent, and the same header with all
/// four roots wrong at once, expecting the full mismatch set (not a single
/// short-circuited error).
#[test]
fn header_validity_seed_scenario() {
    let config = ChainConfig::default();
    let parent = header(0, 55, 131_072, 200_000);

    let mut child = header(1, 65, 131_136, 200_000);
    child.parent_hash = parent.hash();
    assert!(block::validate_header(&child, &parent, &config).is_empty());

    let mut state = TrieState::new(MemoryKvStore::default());
    child.state_root = H256::repeat_byte(0x01);
    child.transactions_root = H256::repeat_byte(0x02);
    child.receipts_root = H256::repeat_byte(0x03);
    child.ommers_hash = H256::repeat_byte(0x04);

    let mismatches = block::is_holistic_valid(&child, &[], &[], &[], &mut state);
    assert_eq!(mismatches.len(), 4);
    assert!(mismatches.contains(&block::Mismatch::StateRoot));
    assert!(mismatches.contains(&block::Mismatch::OmmersHash));
    assert!(mismatches.contains(&block::Mismatch::TransactionsRoot));
    assert!(mismatches.contains(&block::Mismatch::ReceiptsRoot));
}

/// §8.6: `PUSH1 3; PUSH1 5; ADD; PUSH1 0; MSTORE; PUSH1 0; PUSH1 32; RETURN`
/// as init code computes 3+5 into memory and returns it; that returned
/// 32-byte buffer becomes the deployed contract's code (CREATE's defining
/// rule, §4.3 "Contract creation"), so the installed code must equal the
/// big-endian encoding of 8.
#[test]
fn add_contract_creation_installs_code_equal_to_eight() {
    let init_code = vec![
        0x60, 0x03, // PUSH1 3
        0x60, 0x05, // PUSH1 5
        0x01, //       ADD
        0x60, 0x00, // PUSH1 0
        0x52, //       MSTORE
        0x60, 0x00, // PUSH1 0
        0x60, 0x20, // PUSH1 32
        0xf3, //       RETURN
    ];

    let mut state = TrieState::new(MemoryKvStore::default());
    let sender = H160::repeat_byte(0x11);
    state.credit(&sender, U256::from(10_000_000u64)).unwrap();
    let new_address = state.new_contract_address(&sender, 0);

    let block_hashes: Rc<dyn evm::BlockHashLookup> = Rc::new(NoBlockHashes);
    let creator_env = ExecutionEnvironment {
        address: sender,
        origin: sender,
        caller: sender,
        call_value: U256::zero(),
        calldata: Vec::new(),
        code: Vec::new(),
        gas_price: U256::one(),
        block_coinbase: H160::zero(),
        block_number: U256::one(),
        block_timestamp: 0,
        block_difficulty: U256::from(131_072u64),
        block_gas_limit: 10_000_000,
        chain_id: U256::one(),
        depth: 0,
        is_static: false,
        block_hashes: block_hashes.clone(),
    };
    let mut substate = SubState::default();
    let create_result = evm::dispatch_create(&creator_env, U256::zero(), init_code, 200_000, new_address, &mut state, &mut substate);

    assert!(matches!(create_result.halt, Halt::Return(ref addr) if addr == new_address.as_bytes()));

    let deployed_code = state.code(&new_address);
    assert_eq!(deployed_code.len(), 32);
    assert_eq!(U256::from_big_endian(&deployed_code), U256::from(8u64));
}
