//! `Encodable`/`Decodable` implementations for the scalar and fixed-width
//! types used throughout the trie, EVM and block layers: unsigned integers,
//! `U256`, and the fixed-size hash/address types.

use primitive_types::{H160, H256, U256};

use super::{Decodable, Encodable, RlpError, RlpItem};

/// Strip leading zero bytes from a big-endian integer representation, per
/// §4.1: "Integers are encoded as the big-endian byte string with no
/// leading zero bytes; zero is the empty byte string."
fn trim_be(bytes: &[u8]) -> &[u8] {
    let first_nonzero = bytes.iter().position(|&b| b != 0);
    match first_nonzero {
        Some(i) => &bytes[i..],
        None => &[],
    }
}

macro_rules! impl_rlp_for_uint {
    ($t:ty) => {
        impl Encodable for $t {
            fn to_rlp(&self) -> RlpItem {
                let be = self.to_be_bytes();
                RlpItem::String(trim_be(&be).to_vec())
            }
        }

        impl Decodable for $t {
            fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
                let bytes = item.as_str()?;
                if bytes.len() > std::mem::size_of::<$t>() {
                    return Err(RlpError::IntegerOverflow);
                }
                if bytes.first() == Some(&0) {
                    return Err(RlpError::LeadingZero);
                }
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf[std::mem::size_of::<$t>() - bytes.len()..].copy_from_slice(bytes);
                Ok(<$t>::from_be_bytes(buf))
            }
        }
    };
}

impl_rlp_for_uint!(u8);
impl_rlp_for_uint!(u16);
impl_rlp_for_uint!(u32);
impl_rlp_for_uint!(u64);
impl_rlp_for_uint!(u128);

impl Encodable for bool {
    fn to_rlp(&self) -> RlpItem {
        if *self {
            RlpItem::String(vec![1])
        } else {
            RlpItem::String(vec![])
        }
    }
}

impl Decodable for bool {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let bytes = item.as_str()?;
        match bytes {
            [] => Ok(false),
            [1] => Ok(true),
            _ => Err(RlpError::InvalidField("bool")),
        }
    }
}

impl Encodable for U256 {
    fn to_rlp(&self) -> RlpItem {
        let mut be = [0u8; 32];
        self.to_big_endian(&mut be);
        RlpItem::String(trim_be(&be).to_vec())
    }
}

impl Decodable for U256 {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let bytes = item.as_str()?;
        if bytes.len() > 32 {
            return Err(RlpError::IntegerOverflow);
        }
        if bytes.first() == Some(&0) {
            return Err(RlpError::LeadingZero);
        }
        Ok(U256::from_big_endian(bytes))
    }
}

impl Encodable for Vec<u8> {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::String(self.clone())
    }
}

impl Decodable for Vec<u8> {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        Ok(item.as_str()?.to_vec())
    }
}

impl Encodable for [u8] {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::String(self.to_vec())
    }
}

impl Encodable for H256 {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::String(self.as_bytes().to_vec())
    }
}

impl Decodable for H256 {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let bytes = item.as_str()?;
        if bytes.len() != 32 {
            return Err(RlpError::InvalidField("H256"));
        }
        Ok(H256::from_slice(bytes))
    }
}

impl Encodable for H160 {
    fn to_rlp(&self) -> RlpItem {
        RlpItem::String(self.as_bytes().to_vec())
    }
}

impl Decodable for H160 {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let bytes = item.as_str()?;
        if bytes.len() != 20 {
            return Err(RlpError::InvalidField("H160"));
        }
        Ok(H160::from_slice(bytes))
    }
}

/// `to: Option<Address>` encodes as the 20-byte address, or the empty
/// string for contract-creation transactions (§3: "to (20 bytes or empty
/// for contract creation)").
impl Encodable for Option<H160> {
    fn to_rlp(&self) -> RlpItem {
        match self {
            Some(addr) => addr.to_rlp(),
            None => RlpItem::String(vec![]),
        }
    }
}

impl Decodable for Option<H160> {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError> {
        let bytes = item.as_str()?;
        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(H160::from_rlp(item)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_empty_string() {
        assert_eq!(0u64.to_rlp(), RlpItem::String(vec![]));
        assert_eq!(U256::zero().to_rlp(), RlpItem::String(vec![]));
    }

    #[test]
    fn uint_roundtrip() {
        for v in [0u64, 1, 127, 128, 255, 256, u64::MAX] {
            let item = v.to_rlp();
            assert_eq!(u64::from_rlp(&item).unwrap(), v);
        }
    }

    #[test]
    fn u256_roundtrip() {
        let v = U256::from(123456789u64) * U256::from(u64::MAX);
        let item = v.to_rlp();
        assert_eq!(U256::from_rlp(&item).unwrap(), v);
    }

    #[test]
    fn address_roundtrip() {
        let addr = H160::repeat_byte(0xab);
        let item = Some(addr).to_rlp();
        assert_eq!(Option::<H160>::from_rlp(&item).unwrap(), Some(addr));
        let empty = Option::<H160>::from_rlp(&RlpItem::String(vec![])).unwrap();
        assert_eq!(empty, None);
    }
}
