//! Core engines of an Ethereum-compatible protocol client: RLP codec,
//! Merkle-Patricia trie, EVM interpreter and block processor/validator.
//!
//! This crate covers the deterministic, synchronous core shared by every
//! full node implementation. Networking, peer discovery, JSON-RPC, mining
//! and persistent storage engines live outside its scope (see `chain` for
//! the consensus parameters that tie the engines together).

pub mod block;
pub mod chain;
pub mod crypto;
pub mod evm;
pub mod rlp;
pub mod state;
pub mod trie;
