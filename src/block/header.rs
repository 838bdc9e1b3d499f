//! The 15-field block header (§3 "Block header") and its Keccak-256 hash.

use primitive_types::{H160, H256, U256};

use crate::rlp::{Decodable, Encodable, RlpError, RlpItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_hash: H256,
    pub ommers_hash: H256,
    pub beneficiary: H160,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Vec<u8>,
    pub difficulty: U256,
    pub number: U256,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: H256,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> H256 {
        crate::crypto::keccak256(&self.rlp_bytes())
    }
}

impl Encodable for BlockHeader {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::List(vec![
            self.parent_hash.to_rlp(),
            self.ommers_hash.to_rlp(),
            self.beneficiary.to_rlp(),
            self.state_root.to_rlp(),
            self.transactions_root.to_rlp(),
            self.receipts_root.to_rlp(),
            self.logs_bloom.to_rlp(),
            self.difficulty.to_rlp(),
            self.number.to_rlp(),
            self.gas_limit.to_rlp(),
            self.gas_used.to_rlp(),
            self.timestamp.to_rlp(),
            self.extra_data.to_rlp(),
            self.mix_hash.to_rlp(),
            self.nonce.to_rlp(),
        ])
    }
}

impl Decodable for BlockHeader {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let l = item.as_list()?;
        if l.len() != 15 {
            return Err(RlpError::WrongArity {
                expected: 15,
                found: l.len(),
            });
        }
        Ok(BlockHeader {
            parent_hash: H256::from_rlp(&l[0])?,
            ommers_hash: H256::from_rlp(&l[1])?,
            beneficiary: H160::from_rlp(&l[2])?,
            state_root: H256::from_rlp(&l[3])?,
            transactions_root: H256::from_rlp(&l[4])?,
            receipts_root: H256::from_rlp(&l[5])?,
            logs_bloom: Vec::from_rlp(&l[6])?,
            difficulty: U256::from_rlp(&l[7])?,
            number: U256::from_rlp(&l[8])?,
            gas_limit: u64::from_rlp(&l[9])?,
            gas_used: u64::from_rlp(&l[10])?,
            timestamp: u64::from_rlp(&l[11])?,
            extra_data: Vec::from_rlp(&l[12])?,
            mix_hash: H256::from_rlp(&l[13])?,
            nonce: u64::from_rlp(&l[14])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BlockHeader {
        BlockHeader {
            parent_hash: H256::zero(),
            ommers_hash: crate::crypto::keccak256(&crate::rlp::encode(&RlpItem::List(vec![]))),
            beneficiary: H160::repeat_byte(0x11),
            state_root: crate::crypto::empty_trie_root(),
            transactions_root: crate::crypto::empty_trie_root(),
            receipts_root: crate::crypto::empty_trie_root(),
            logs_bloom: vec![0u8; 256],
            difficulty: U256::from(131_072u64),
            number: U256::from(1u64),
            gas_limit: 5_000_000,
            gas_used: 0,
            timestamp: 1_000_000,
            extra_data: vec![],
            mix_hash: H256::zero(),
            nonce: 0,
        }
    }

    #[test]
    fn header_rlp_roundtrip() {
        let header = sample();
        let bytes = header.rlp_bytes();
        assert_eq!(BlockHeader::decode_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn hash_is_stable() {
        let header = sample();
        assert_eq!(header.hash(), header.hash());
    }
}
