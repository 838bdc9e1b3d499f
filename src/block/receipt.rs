//! Transaction receipts (§3 "Receipt"): cumulative gas used, the logs
//! bloom, and the logs themselves.

use crate::evm::Log;
use crate::rlp::{Decodable, Encodable, RlpError, RlpItem};
use primitive_types::H256;

use super::bloom;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub post_state_or_status: PostStateOrStatus,
    pub cumulative_gas_used: u64,
    pub logs_bloom: Vec<u8>,
    pub logs: Vec<Log>,
}

/// Frontier receipts carry the intermediate state root; later forks switch
/// to a 0/1 status code (EIP-658). Both are representable so header
/// validation doesn't have to pick one statically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostStateOrStatus {
    StateRoot(H256),
    Status(bool),
}

impl Receipt {
    pub fn new(status: bool, cumulative_gas_used: u64, logs: Vec<Log>) -> Self {
        Receipt {
            post_state_or_status: PostStateOrStatus::Status(status),
            cumulative_gas_used,
            logs_bloom: bloom::from_logs(&logs),
            logs,
        }
    }
}

impl Encodable for Receipt {
    fn to_rlp(&self) -> RlpItem {
        let first = match &self.post_state_or_status {
            PostStateOrStatus::StateRoot(root) => root.to_rlp(),
            PostStateOrStatus::Status(ok) => (*ok as u64).to_rlp(),
        };
        let logs: Vec<RlpItem> = self
            .logs
            .iter()
            .map(|l| {
                RlpItem::List(vec![
                    l.address.to_rlp(),
                    RlpItem::List(l.topics.iter().map(|t| t.to_rlp()).collect()),
                    l.data.to_rlp(),
                ])
            })
            .collect();
        RlpItem::List(vec![
            first,
            self.cumulative_gas_used.to_rlp(),
            self.logs_bloom.to_rlp(),
            RlpItem::List(logs),
        ])
    }
}

impl Decodable for Receipt {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let l = item.as_list()?;
        if l.len() != 4 {
            return Err(RlpError::WrongArity {
                expected: 4,
                found: l.len(),
            });
        }
        let post_state_or_status = match &l[0] {
            RlpItem::String(s) if s.len() == 32 => {
                PostStateOrStatus::StateRoot(H256::from_rlp(&l[0])?)
            }
            RlpItem::String(_) => PostStateOrStatus::Status(u64::from_rlp(&l[0])? != 0),
            RlpItem::List(_) => return Err(RlpError::InvalidField("post_state_or_status")),
        };
        let cumulative_gas_used = u64::from_rlp(&l[1])?;
        let logs_bloom = Vec::from_rlp(&l[2])?;
        let logs_items = l[3].as_list()?;
        let mut logs = Vec::with_capacity(logs_items.len());
        for entry in logs_items {
            let fields = entry.as_list()?;
            if fields.len() != 3 {
                return Err(RlpError::WrongArity {
                    expected: 3,
                    found: fields.len(),
                });
            }
            let topics_items = fields[1].as_list()?;
            let mut topics = Vec::with_capacity(topics_items.len());
            for t in topics_items {
                topics.push(H256::from_rlp(t)?);
            }
            logs.push(Log {
                address: primitive_types::H160::from_rlp(&fields[0])?,
                topics,
                data: Vec::from_rlp(&fields[2])?,
            });
        }
        Ok(Receipt {
            post_state_or_status,
            cumulative_gas_used,
            logs_bloom,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_rlp_roundtrip_with_logs() {
        let log = Log {
            address: primitive_types::H160::repeat_byte(0x01),
            topics: vec![H256::repeat_byte(0x02)],
            data: vec![1, 2, 3],
        };
        let receipt = Receipt::new(true, 21_000, vec![log]);
        let bytes = receipt.rlp_bytes();
        assert_eq!(Receipt::decode_bytes(&bytes).unwrap(), receipt);
    }

    #[test]
    fn receipt_rlp_roundtrip_without_logs() {
        let receipt = Receipt::new(false, 0, vec![]);
        let bytes = receipt.rlp_bytes();
        assert_eq!(Receipt::decode_bytes(&bytes).unwrap(), receipt);
    }
}
