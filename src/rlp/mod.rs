//! Recursive Length Prefix encoding: the canonical byte-level serialization
//! used by every other layer (trie nodes, accounts, transactions, headers,
//! receipts).
//!
//! `RlpItem` is the recursive sum type from the Yellow Paper's appendix B:
//! either a byte string or an ordered sequence of items. `encode`/`decode`
//! are the two primitive operations; `Encodable`/`Decodable` let higher
//! layers describe their own RLP shape in terms of `RlpItem` without
//! re-deriving the length-prefix arithmetic each time.

use thiserror::Error;

mod primitives;

pub use primitives::*;

/// A decoded (or to-be-encoded) RLP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpItem {
    String(Vec<u8>),
    List(Vec<RlpItem>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RlpError {
    #[error("input truncated before expected end of item")]
    Truncated,
    #[error("length prefix encodes a length too large to represent")]
    OversizeLength,
    #[error("length-of-length field has a leading zero byte")]
    LeadingZero,
    #[error("length prefix is not the canonical (shortest) form")]
    NonCanonicalLength,
    #[error("trailing bytes after a top-level item")]
    TrailingBytes,
    #[error("expected a byte string, found a list")]
    ExpectedString,
    #[error("expected a list, found a byte string")]
    ExpectedList,
    #[error("list has the wrong number of elements: expected {expected}, found {found}")]
    WrongArity { expected: usize, found: usize },
    #[error("byte string does not fit the target integer width")]
    IntegerOverflow,
    #[error("invalid value for field `{0}`")]
    InvalidField(&'static str),
}

impl RlpItem {
    pub fn as_str(&self) -> Result<&[u8], RlpError> {
        match self {
            RlpItem::String(s) => Ok(s),
            RlpItem::List(_) => Err(RlpError::ExpectedString),
        }
    }

    pub fn as_list(&self) -> Result<&[RlpItem], RlpError> {
        match self {
            RlpItem::List(l) => Ok(l),
            RlpItem::String(_) => Err(RlpError::ExpectedList),
        }
    }

    pub fn into_list(self) -> Result<Vec<RlpItem>, RlpError> {
        match self {
            RlpItem::List(l) => Ok(l),
            RlpItem::String(_) => Err(RlpError::ExpectedList),
        }
    }
}

/// Encode a single byte string, following §4.1's three string rules.
fn encode_string(bytes: &[u8], out: &mut Vec<u8>) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else if bytes.len() <= 55 {
        out.push(0x80 + bytes.len() as u8);
        out.extend_from_slice(bytes);
    } else {
        let len_bytes = minimal_be_bytes(bytes.len() as u64);
        out.push(0xb7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(bytes);
    }
}

/// Encode a list whose children have already been encoded and concatenated.
fn encode_list_payload(payload: &[u8], out: &mut Vec<u8>) {
    if payload.len() <= 55 {
        out.push(0xc0 + payload.len() as u8);
        out.extend_from_slice(payload);
    } else {
        let len_bytes = minimal_be_bytes(payload.len() as u64);
        out.push(0xf7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(payload);
    }
}

fn minimal_be_bytes(mut n: u64) -> Vec<u8> {
    if n == 0 {
        return vec![0];
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push((n & 0xff) as u8);
        n >>= 8;
    }
    out.reverse();
    out
}

/// Encode an `RlpItem` to its canonical byte representation.
pub fn encode(item: &RlpItem) -> Vec<u8> {
    let mut out = Vec::new();
    match item {
        RlpItem::String(bytes) => encode_string(bytes, &mut out),
        RlpItem::List(items) => {
            let mut payload = Vec::new();
            for child in items {
                payload.extend_from_slice(&encode(child));
            }
            encode_list_payload(&payload, &mut out);
        }
    }
    out
}

/// Read a big-endian length field of `len_of_len` bytes, rejecting leading
/// zeros and lengths that don't fit a `usize`.
fn read_length(bytes: &[u8], len_of_len: usize) -> Result<usize, RlpError> {
    if bytes.len() < len_of_len {
        return Err(RlpError::Truncated);
    }
    let len_bytes = &bytes[..len_of_len];
    if len_bytes[0] == 0 {
        return Err(RlpError::LeadingZero);
    }
    if len_of_len > std::mem::size_of::<usize>() {
        return Err(RlpError::OversizeLength);
    }
    let mut n: u64 = 0;
    for &b in len_bytes {
        n = (n << 8) | b as u64;
    }
    if n > usize::MAX as u64 {
        return Err(RlpError::OversizeLength);
    }
    Ok(n as usize)
}

/// Decode exactly one top-level `RlpItem` from the front of `bytes`,
/// returning it along with whatever bytes remain unconsumed.
pub fn decode(bytes: &[u8]) -> Result<(RlpItem, &[u8]), RlpError> {
    let (item, rest) = decode_one(bytes)?;
    Ok((item, rest))
}

/// Decode exactly one top-level item and require that it consumes the
/// entire input (the "strict consumption" mode named in §4.1).
pub fn decode_exact(bytes: &[u8]) -> Result<RlpItem, RlpError> {
    let (item, rest) = decode_one(bytes)?;
    if !rest.is_empty() {
        return Err(RlpError::TrailingBytes);
    }
    Ok(item)
}

fn decode_one(bytes: &[u8]) -> Result<(RlpItem, &[u8]), RlpError> {
    let first = *bytes.first().ok_or(RlpError::Truncated)?;
    match first {
        0x00..=0x7f => Ok((RlpItem::String(vec![first]), &bytes[1..])),
        0x80..=0xb7 => {
            let len = (first - 0x80) as usize;
            if bytes.len() < 1 + len {
                return Err(RlpError::Truncated);
            }
            let payload = &bytes[1..1 + len];
            if len == 1 && payload[0] < 0x80 {
                return Err(RlpError::NonCanonicalLength);
            }
            Ok((RlpItem::String(payload.to_vec()), &bytes[1 + len..]))
        }
        0xb8..=0xbf => {
            let len_of_len = (first - 0xb7) as usize;
            let len = read_length(&bytes[1..], len_of_len)?;
            if len < 56 {
                return Err(RlpError::NonCanonicalLength);
            }
            let start = 1 + len_of_len;
            if bytes.len() < start + len {
                return Err(RlpError::Truncated);
            }
            let payload = &bytes[start..start + len];
            Ok((RlpItem::String(payload.to_vec()), &bytes[start + len..]))
        }
        0xc0..=0xf7 => {
            let len = (first - 0xc0) as usize;
            if bytes.len() < 1 + len {
                return Err(RlpError::Truncated);
            }
            let mut payload = &bytes[1..1 + len];
            let mut items = Vec::new();
            while !payload.is_empty() {
                let (item, rest) = decode_one(payload)?;
                items.push(item);
                payload = rest;
            }
            Ok((RlpItem::List(items), &bytes[1 + len..]))
        }
        0xf8..=0xff => {
            let len_of_len = (first - 0xf7) as usize;
            let len = read_length(&bytes[1..], len_of_len)?;
            if len < 56 {
                return Err(RlpError::NonCanonicalLength);
            }
            let start = 1 + len_of_len;
            if bytes.len() < start + len {
                return Err(RlpError::Truncated);
            }
            let mut payload = &bytes[start..start + len];
            let mut items = Vec::new();
            while !payload.is_empty() {
                let (item, rest) = decode_one(payload)?;
                items.push(item);
                payload = rest;
            }
            Ok((RlpItem::List(items), &bytes[start + len..]))
        }
    }
}

/// Types that know how to describe themselves as an `RlpItem`.
pub trait Encodable {
    fn to_rlp(&self) -> RlpItem;

    fn rlp_bytes(&self) -> Vec<u8> {
        encode(&self.to_rlp())
    }
}

/// Types that can be reconstructed from an `RlpItem`.
pub trait Decodable: Sized {
    fn from_rlp(item: &RlpItem) -> Result<Self, RlpError>;

    fn decode_bytes(bytes: &[u8]) -> Result<Self, RlpError> {
        let item = decode_exact(bytes)?;
        Self::from_rlp(&item)
    }
}
