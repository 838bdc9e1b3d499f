//! Transactions (§3 "Transaction"): the six Frontier fields plus EIP-155
//! chain-id-aware signing, added as an additive supplement since sender
//! recovery is otherwise underspecified.

use primitive_types::{H160, U256};
use thiserror::Error;

use crate::crypto::{ecrecover, keccak256, SignatureError};
use crate::rlp::{Decodable, Encodable, RlpError, RlpItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<H160>,
    pub value: U256,
    pub data: Vec<u8>,
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl Transaction {
    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }

    /// The chain id embedded in an EIP-155 signature's `v` field, or `None`
    /// for a pre-EIP-155 (Frontier/Homestead) signature.
    pub fn chain_id(&self) -> Option<u64> {
        if self.v >= 35 {
            Some((self.v - 35) / 2)
        } else {
            None
        }
    }

    fn recovery_id(&self) -> Result<u8, SignatureError> {
        match self.chain_id() {
            Some(chain_id) => {
                let expected_even = self.v - 35 - 2 * chain_id;
                if expected_even > 1 {
                    return Err(SignatureError::InvalidRecoveryId);
                }
                Ok(expected_even as u8)
            }
            None => match self.v {
                27 => Ok(0),
                28 => Ok(1),
                _ => Err(SignatureError::InvalidRecoveryId),
            },
        }
    }

    /// The hash that was actually signed: the RLP of the nine fields with
    /// `(r, s, v)` replaced by `(chain_id, 0, 0)` under EIP-155, or the six
    /// unsigned fields alone for a pre-EIP-155 transaction.
    pub fn signing_hash(&self, chain_id: Option<u64>) -> primitive_types::H256 {
        let mut fields = vec![
            self.nonce.to_rlp(),
            self.gas_price.to_rlp(),
            self.gas_limit.to_rlp(),
            self.to.to_rlp(),
            self.value.to_rlp(),
            self.data.to_rlp(),
        ];
        if let Some(id) = chain_id {
            fields.push(id.to_rlp());
            fields.push(0u64.to_rlp());
            fields.push(0u64.to_rlp());
        }
        keccak256(&crate::rlp::encode(&RlpItem::List(fields)))
    }

    /// Recover the sending address from `(v, r, s)` over this transaction's
    /// signing hash.
    pub fn sender(&self) -> Result<H160, TransactionError> {
        let recovery_id = self.recovery_id()?;
        let hash = self.signing_hash(self.chain_id());
        Ok(ecrecover(&hash, &self.r, &self.s, recovery_id)?)
    }

    pub fn hash(&self) -> primitive_types::H256 {
        keccak256(&self.rlp_bytes())
    }
}

impl Encodable for Transaction {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::List(vec![
            self.nonce.to_rlp(),
            self.gas_price.to_rlp(),
            self.gas_limit.to_rlp(),
            self.to.to_rlp(),
            self.value.to_rlp(),
            self.data.to_rlp(),
            self.v.to_rlp(),
            self.r.to_rlp(),
            self.s.to_rlp(),
        ])
    }
}

impl Decodable for Transaction {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let l = item.as_list()?;
        if l.len() != 9 {
            return Err(RlpError::WrongArity {
                expected: 9,
                found: l.len(),
            });
        }
        Ok(Transaction {
            nonce: u64::from_rlp(&l[0])?,
            gas_price: U256::from_rlp(&l[1])?,
            gas_limit: u64::from_rlp(&l[2])?,
            to: Option::<H160>::from_rlp(&l[3])?,
            value: U256::from_rlp(&l[4])?,
            data: Vec::from_rlp(&l[5])?,
            v: u64::from_rlp(&l[6])?,
            r: U256::from_rlp(&l[7])?,
            s: U256::from_rlp(&l[8])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_rlp_roundtrip() {
        let tx = Transaction {
            nonce: 9,
            gas_price: U256::from(20_000_000_000u64),
            gas_limit: 21_000,
            to: Some(H160::repeat_byte(0x22)),
            value: U256::from(1_000_000_000_000_000_000u64),
            data: vec![],
            v: 27,
            r: U256::from(1u64),
            s: U256::from(2u64),
        };
        let bytes = tx.rlp_bytes();
        assert_eq!(Transaction::decode_bytes(&bytes).unwrap(), tx);
    }

    #[test]
    fn eip155_chain_id_roundtrips_through_v() {
        let tx = Transaction {
            nonce: 0,
            gas_price: U256::zero(),
            gas_limit: 21_000,
            to: None,
            value: U256::zero(),
            data: vec![],
            v: 37, // chain_id 1, recovery bit 0
            r: U256::one(),
            s: U256::one(),
        };
        assert_eq!(tx.chain_id(), Some(1));
        assert!(tx.is_contract_creation());
    }

    #[test]
    fn pre_eip155_transaction_has_no_chain_id() {
        let tx = Transaction {
            nonce: 0,
            gas_price: U256::zero(),
            gas_limit: 21_000,
            to: Some(H160::zero()),
            value: U256::zero(),
            data: vec![],
            v: 27,
            r: U256::one(),
            s: U256::one(),
        };
        assert_eq!(tx.chain_id(), None);
    }
}
