//! World state: the mapping from address to account, and each account's own
//! (nonce, balance, storage_root, code_hash) tuple and storage trie (§3
//! "Account", "Account storage").

use primitive_types::{H160, H256, U256};
use thiserror::Error;

use crate::crypto::{empty_code_hash, empty_trie_root, keccak256};
use crate::rlp::{Decodable, Encodable, RlpError, RlpItem};
use crate::trie::{KvStore, MemoryKvStore, Trie, TrieError};

/// `[nonce, balance, storage_root, code_hash]`, the four-field RLP shape of
/// §3's "Account".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl Account {
    pub fn empty() -> Self {
        Account {
            nonce: 0,
            balance: U256::zero(),
            storage_root: empty_trie_root(),
            code_hash: empty_code_hash(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code_hash == empty_code_hash()
    }
}

impl Encodable for Account {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::List(vec![
            self.nonce.to_rlp(),
            self.balance.to_rlp(),
            self.storage_root.to_rlp(),
            self.code_hash.to_rlp(),
        ])
    }
}

impl Decodable for Account {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let list = item.as_list()?;
        if list.len() != 4 {
            return Err(RlpError::WrongArity {
                expected: 4,
                found: list.len(),
            });
        }
        Ok(Account {
            nonce: u64::from_rlp(&list[0])?,
            balance: U256::from_rlp(&list[1])?,
            storage_root: H256::from_rlp(&list[2])?,
            code_hash: H256::from_rlp(&list[3])?,
        })
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error("account {0:?} does not exist")]
    NoSuchAccount(H160),
    #[error("insufficient balance to transfer {amount} from {from:?}")]
    InsufficientBalance { from: H160, amount: U256 },
    #[error("nonce would overflow for account {0:?}")]
    NonceOverflow(H160),
}

/// The per-account operations named in §4.3 ("Execution environment" /
/// world state interactions): existence and balance checks, code and
/// storage access, transfers, nonce increments, deletion marking and
/// contract creation/address derivation.
pub trait AccountBackend {
    fn exists(&self, address: &H160) -> bool;
    fn balance(&self, address: &H160) -> U256;
    fn nonce(&self, address: &H160) -> u64;
    fn code(&self, address: &H160) -> Vec<u8>;
    fn code_hash(&self, address: &H160) -> H256;

    fn get_storage(&self, address: &H160, key: &U256) -> U256;
    fn put_storage(&mut self, address: &H160, key: &U256, value: U256) -> Result<(), StateError>;

    fn transfer(&mut self, from: &H160, to: &H160, amount: U256) -> Result<(), StateError>;

    /// Credit `amount` to `address` out of nowhere rather than moving it
    /// from another account (block and ommer rewards, §4.4 finalization,
    /// mint new ether rather than debit a sender).
    fn credit(&mut self, address: &H160, amount: U256) -> Result<(), StateError>;

    fn increment_nonce(&mut self, address: &H160) -> Result<(), StateError>;
    fn set_code(&mut self, address: &H160, code: Vec<u8>) -> Result<(), StateError>;

    /// Mark an account for removal at the end of the current transaction
    /// (SELFDESTRUCT, or an empty account touched under state-clearing
    /// rules). Actual removal happens at `commit_deletions`.
    fn mark_for_deletion(&mut self, address: H160);
    fn commit_deletions(&mut self) -> Result<(), StateError>;

    /// keccak256(rlp([sender, nonce]))[12..], the contract address derived
    /// for a CREATE (not CREATE2) at the given sender/nonce (§3, §4.3).
    fn new_contract_address(&self, sender: &H160, sender_nonce: u64) -> H160 {
        let rlp = RlpItem::List(vec![sender.to_rlp(), sender_nonce.to_rlp()]);
        let bytes = crate::rlp::encode(&rlp);
        let hash = keccak256(&bytes);
        H160::from_slice(&hash.as_bytes()[12..])
    }

    fn state_root(&mut self) -> H256;
}

/// A `Trie`-backed world state: one MPT keyed by `keccak256(address)` whose
/// leaves are RLP-encoded [`Account`]s, each with its own per-account
/// storage trie keyed by `keccak256(storage_key)`.
#[derive(Clone)]
pub struct TrieState<S: KvStore + Clone> {
    accounts: Trie<S>,
    storage_stores: std::collections::HashMap<H160, MemoryKvStore>,
    code: std::collections::HashMap<H256, Vec<u8>>,
    pending_deletions: Vec<H160>,
}

impl<S: KvStore + Clone> TrieState<S> {
    pub fn new(store: S) -> Self {
        TrieState {
            accounts: Trie::new(store),
            storage_stores: Default::default(),
            code: Default::default(),
            pending_deletions: Vec::new(),
        }
    }

    fn account_key(address: &H160) -> H256 {
        keccak256(address.as_bytes())
    }

    fn load_account(&self, address: &H160) -> Result<Option<Account>, StateError> {
        let key = Self::account_key(address);
        match self.accounts.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(Account::decode_bytes(&bytes).map_err(TrieError::from)?)),
            None => Ok(None),
        }
    }

    fn store_account(&mut self, address: &H160, account: &Account) -> Result<(), StateError> {
        let key = Self::account_key(address);
        self.accounts.put(key.as_bytes(), account.rlp_bytes())?;
        Ok(())
    }

    fn account_or_empty(&self, address: &H160) -> Result<Account, StateError> {
        Ok(self.load_account(address)?.unwrap_or_else(Account::empty))
    }

    fn storage_trie_for(&mut self, address: &H160) -> &mut MemoryKvStore {
        self.storage_stores.entry(*address).or_default()
    }
}

impl<S: KvStore + Clone> AccountBackend for TrieState<S> {
    fn exists(&self, address: &H160) -> bool {
        self.load_account(address).ok().flatten().is_some()
    }

    fn balance(&self, address: &H160) -> U256 {
        self.account_or_empty(address).map(|a| a.balance).unwrap_or_default()
    }

    fn nonce(&self, address: &H160) -> u64 {
        self.account_or_empty(address).map(|a| a.nonce).unwrap_or_default()
    }

    fn code(&self, address: &H160) -> Vec<u8> {
        let account = match self.account_or_empty(address) {
            Ok(a) => a,
            Err(_) => return Vec::new(),
        };
        self.code.get(&account.code_hash).cloned().unwrap_or_default()
    }

    fn code_hash(&self, address: &H160) -> H256 {
        self.account_or_empty(address)
            .map(|a| a.code_hash)
            .unwrap_or_else(|_| empty_code_hash())
    }

    fn get_storage(&self, address: &H160, key: &U256) -> U256 {
        let store = match self.storage_stores.get(address) {
            Some(s) => s,
            None => return U256::zero(),
        };
        let account = match self.account_or_empty(address) {
            Ok(a) => a,
            Err(_) => return U256::zero(),
        };
        let trie = match Trie::open(store.clone(), account.storage_root) {
            Ok(t) => t,
            Err(_) => return U256::zero(),
        };
        let mut key_bytes = [0u8; 32];
        key.to_big_endian(&mut key_bytes);
        let trie_key = keccak256(&key_bytes);
        match trie.get(trie_key.as_bytes()) {
            Ok(Some(bytes)) => U256::from_rlp(&RlpItem::String(bytes)).unwrap_or_default(),
            _ => U256::zero(),
        }
    }

    fn put_storage(&mut self, address: &H160, key: &U256, value: U256) -> Result<(), StateError> {
        let mut account = self.account_or_empty(address)?;
        let store = self.storage_trie_for(address).clone();
        let mut trie = Trie::open(store, account.storage_root)?;

        let mut key_bytes = [0u8; 32];
        key.to_big_endian(&mut key_bytes);
        let trie_key = keccak256(&key_bytes);

        if value.is_zero() {
            trie.delete(trie_key.as_bytes())?;
        } else {
            trie.put(trie_key.as_bytes(), value.rlp_bytes())?;
        }
        account.storage_root = trie.root_hash();
        *self.storage_trie_for(address) = extract_store(trie);
        self.store_account(address, &account)
    }

    fn transfer(&mut self, from: &H160, to: &H160, amount: U256) -> Result<(), StateError> {
        let mut from_account = self.account_or_empty(from)?;
        if from_account.balance < amount {
            return Err(StateError::InsufficientBalance {
                from: *from,
                amount,
            });
        }
        from_account.balance -= amount;
        self.store_account(from, &from_account)?;

        let mut to_account = self.account_or_empty(to)?;
        to_account.balance += amount;
        self.store_account(to, &to_account)
    }

    fn credit(&mut self, address: &H160, amount: U256) -> Result<(), StateError> {
        let mut account = self.account_or_empty(address)?;
        account.balance += amount;
        self.store_account(address, &account)
    }

    fn increment_nonce(&mut self, address: &H160) -> Result<(), StateError> {
        let mut account = self.account_or_empty(address)?;
        account.nonce = account
            .nonce
            .checked_add(1)
            .ok_or(StateError::NonceOverflow(*address))?;
        self.store_account(address, &account)
    }

    fn set_code(&mut self, address: &H160, code: Vec<u8>) -> Result<(), StateError> {
        let mut account = self.account_or_empty(address)?;
        let hash = keccak256(&code);
        self.code.insert(hash, code);
        account.code_hash = hash;
        self.store_account(address, &account)
    }

    fn mark_for_deletion(&mut self, address: H160) {
        self.pending_deletions.push(address);
    }

    fn commit_deletions(&mut self) -> Result<(), StateError> {
        let pending = std::mem::take(&mut self.pending_deletions);
        for address in pending {
            let key = Self::account_key(&address);
            self.accounts.delete(key.as_bytes())?;
            self.storage_stores.remove(&address);
        }
        Ok(())
    }

    fn state_root(&mut self) -> H256 {
        self.accounts.root_hash()
    }
}

/// `Trie::open` consumes its store but leaves us wanting the (possibly
/// mutated) store back for the next access; `root_hash` only mutates
/// through `&mut self`, so this just reaches in and takes it.
fn extract_store<S: KvStore + Clone>(trie: Trie<S>) -> S {
    trie.into_store()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::MemoryKvStore;

    #[test]
    fn account_rlp_roundtrip() {
        let account = Account {
            nonce: 7,
            balance: U256::from(1_000_000u64),
            storage_root: empty_trie_root(),
            code_hash: empty_code_hash(),
        };
        let bytes = account.rlp_bytes();
        assert_eq!(Account::decode_bytes(&bytes).unwrap(), account);
    }

    #[test]
    fn empty_account_has_canonical_roots() {
        let account = Account::empty();
        assert_eq!(account.storage_root, empty_trie_root());
        assert_eq!(account.code_hash, empty_code_hash());
        assert!(account.is_empty());
    }

    #[test]
    fn transfer_moves_balance_between_accounts() {
        let mut state = TrieState::new(MemoryKvStore::default());
        let alice = H160::repeat_byte(0xaa);
        let bob = H160::repeat_byte(0xbb);

        state.store_account(&alice, &Account { balance: U256::from(100u64), ..Account::empty() }).unwrap();
        state.transfer(&alice, &bob, U256::from(40u64)).unwrap();

        assert_eq!(state.balance(&alice), U256::from(60u64));
        assert_eq!(state.balance(&bob), U256::from(40u64));
    }

    #[test]
    fn transfer_rejects_insufficient_balance() {
        let mut state = TrieState::new(MemoryKvStore::default());
        let alice = H160::repeat_byte(0xaa);
        let bob = H160::repeat_byte(0xbb);
        let err = state.transfer(&alice, &bob, U256::from(1u64)).unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { .. }));
    }

    #[test]
    fn storage_put_get_roundtrip() {
        let mut state = TrieState::new(MemoryKvStore::default());
        let addr = H160::repeat_byte(0x01);
        let key = U256::from(1u64);
        state.put_storage(&addr, &key, U256::from(42u64)).unwrap();
        assert_eq!(state.get_storage(&addr, &key), U256::from(42u64));
    }

    #[test]
    fn new_contract_address_is_deterministic() {
        let state = TrieState::new(MemoryKvStore::default());
        let sender = H160::repeat_byte(0x11);
        let a = state.new_contract_address(&sender, 0);
        let b = state.new_contract_address(&sender, 0);
        let c = state.new_contract_address(&sender, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
