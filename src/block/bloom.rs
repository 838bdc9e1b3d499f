//! The 2048-bit (256-byte) logs bloom filter, built from three bit
//! positions per [address, topics...] entry (the standard Yellow Paper
//! `M` function). Named but left unspecified by the distilled data model;
//! added as a supplement since receipts and headers both carry one.

use crate::crypto::keccak256;
use crate::evm::Log;

const BLOOM_BYTES: usize = 256;

pub fn empty() -> Vec<u8> {
    vec![0u8; BLOOM_BYTES]
}

/// OR the given `logs`' addresses and topics into a fresh 256-byte bloom.
pub fn from_logs(logs: &[Log]) -> Vec<u8> {
    let mut bloom = empty();
    for log in logs {
        add_item(&mut bloom, log.address.as_bytes());
        for topic in &log.topics {
            add_item(&mut bloom, topic.as_bytes());
        }
    }
    bloom
}

/// Combine several per-transaction blooms into a block-level bloom by
/// bitwise OR (§4.4 block finalization).
pub fn combine(blooms: &[Vec<u8>]) -> Vec<u8> {
    let mut out = empty();
    for bloom in blooms {
        for (o, b) in out.iter_mut().zip(bloom.iter()) {
            *o |= b;
        }
    }
    out
}

fn add_item(bloom: &mut [u8], data: &[u8]) {
    let hash = keccak256(data);
    let hash = hash.as_bytes();
    for i in 0..3 {
        let pair = ((hash[2 * i] as u16) << 8) | hash[2 * i + 1] as u16;
        let bit = pair & 0x07ff; // low 11 bits: 2048 possible positions
        let byte_index = BLOOM_BYTES - 1 - (bit / 8) as usize;
        let bit_index = bit % 8;
        bloom[byte_index] |= 1 << bit_index;
    }
}

pub fn contains(bloom: &[u8], data: &[u8]) -> bool {
    let mut probe = empty();
    add_item(&mut probe, data);
    probe.iter().zip(bloom.iter()).all(|(p, b)| p & b == *p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::{H160, H256};

    #[test]
    fn empty_logs_give_empty_bloom() {
        assert_eq!(from_logs(&[]), empty());
    }

    #[test]
    fn address_present_in_its_own_bloom() {
        let log = Log {
            address: H160::repeat_byte(0xaa),
            topics: vec![H256::repeat_byte(0xbb)],
            data: vec![],
        };
        let bloom = from_logs(&[log.clone()]);
        assert!(contains(&bloom, log.address.as_bytes()));
        assert!(contains(&bloom, log.topics[0].as_bytes()));
        assert!(!contains(&bloom, H160::repeat_byte(0xcc).as_bytes()));
    }

    #[test]
    fn combine_ors_bitwise() {
        let a = {
            let mut b = empty();
            b[0] = 0b0001;
            b
        };
        let b = {
            let mut b = empty();
            b[0] = 0b0010;
            b
        };
        let combined = combine(&[a, b]);
        assert_eq!(combined[0], 0b0011);
    }
}
