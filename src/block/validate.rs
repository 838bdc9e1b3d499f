//! §4.4.2 header validation and the holistic block-validity checks: both
//! collect every violated rule rather than stopping at the first one, so
//! callers can report (or test against) the full set of mismatches.

use primitive_types::U256;
use thiserror::Error;

use super::difficulty::calc_difficulty;
use super::header::BlockHeader;
use crate::chain::ChainConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("parent_hash does not match the parent header's hash")]
    WrongParentHash,
    #[error("number is not parent.number + 1")]
    WrongNumber,
    #[error("difficulty does not match the value computed from the parent")]
    WrongDifficulty,
    #[error("gas_used exceeds gas_limit")]
    GasUsedExceedsLimit,
    #[error("gas_limit changed by more than the bound divisor allows")]
    GasLimitOutOfBounds,
    #[error("gas_limit is below the configured minimum")]
    GasLimitBelowMinimum,
    #[error("timestamp is not strictly greater than the parent's")]
    NonIncreasingTimestamp,
    #[error("extra_data exceeds 32 bytes")]
    ExtraDataTooLong,
}

/// Validate `header` against its `parent`, returning every violated rule
/// (§4.4.2: "validation SHALL collect every violated rule, not
/// short-circuit on the first"). An empty vec means the header is valid.
pub fn validate_header(header: &BlockHeader, parent: &BlockHeader, config: &ChainConfig) -> Vec<HeaderError> {
    let mut errors = Vec::new();

    if header.parent_hash != parent.hash() {
        errors.push(HeaderError::WrongParentHash);
    }

    if header.number != parent.number + U256::one() {
        errors.push(HeaderError::WrongNumber);
    }

    let expected_difficulty = calc_difficulty(parent, header.timestamp, config);
    if header.difficulty != expected_difficulty {
        errors.push(HeaderError::WrongDifficulty);
    }

    if header.gas_used > header.gas_limit {
        errors.push(HeaderError::GasUsedExceedsLimit);
    }

    // §4.4.2: invalid once the gap reaches the bound, not only past it —
    // a diff of exactly `bound` is already a violation.
    let bound = parent.gas_limit / config.gas_limit_bound_divisor;
    let (lo, hi) = (
        parent.gas_limit.saturating_sub(bound),
        parent.gas_limit.saturating_add(bound),
    );
    if header.gas_limit <= lo || header.gas_limit >= hi {
        errors.push(HeaderError::GasLimitOutOfBounds);
    }
    if header.gas_limit <= config.min_gas_limit {
        errors.push(HeaderError::GasLimitBelowMinimum);
    }

    if header.timestamp <= parent.timestamp {
        errors.push(HeaderError::NonIncreasingTimestamp);
    }

    if header.extra_data.len() > 32 {
        errors.push(HeaderError::ExtraDataTooLong);
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::{H160, H256};

    fn header(number: u64, timestamp: u64, difficulty: u64, gas_limit: u64, gas_used: u64) -> BlockHeader {
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
            gas_used,
            timestamp,
            extra_data: vec![],
            mix_hash: H256::zero(),
            nonce: 0,
        }
    }

    #[test]
    fn valid_child_header_has_no_errors() {
        let config = ChainConfig::default();
        let parent = header(1, 1_000, 1_000_000, 5_000_000, 0);
        let expected_difficulty = calc_difficulty(&parent, 1_020, &config);
        let mut child = header(2, 1_020, expected_difficulty.as_u64(), 5_000_000, 21_000);
        child.parent_hash = parent.hash();

        assert!(validate_header(&child, &parent, &config).is_empty());
    }

    #[test]
    fn header_with_every_field_wrong_collects_all_errors() {
        let config = ChainConfig::default();
        let parent = header(1, 1_000, 1_000_000, 5_000_000, 0);
        let mut child = header(9, 999, 1, 4_000, 5_000);
        child.parent_hash = H256::repeat_byte(0xff);
        child.extra_data = vec![0u8; 64];

        let errors = validate_header(&child, &parent, &config);
        assert!(errors.contains(&HeaderError::WrongParentHash));
        assert!(errors.contains(&HeaderError::WrongNumber));
        assert!(errors.contains(&HeaderError::WrongDifficulty));
        assert!(errors.contains(&HeaderError::GasUsedExceedsLimit));
        assert!(errors.contains(&HeaderError::GasLimitOutOfBounds));
        assert!(errors.contains(&HeaderError::GasLimitBelowMinimum));
        assert!(errors.contains(&HeaderError::NonIncreasingTimestamp));
        assert!(errors.contains(&HeaderError::ExtraDataTooLong));
    }

    /// §4.4.2 uses `>=`/`<=`, not `>`/`<`: a gas-limit gap of exactly
    /// `bound` (or a gas_limit of exactly `min_gas_limit`) is already
    /// invalid, not the first step past it.
    #[test]
    fn gas_limit_diff_exactly_at_bound_is_invalid() {
        let config = ChainConfig::default();
        let parent = header(1, 1_000, 1_000_000, 5_000_000, 0);
        let bound = parent.gas_limit / config.gas_limit_bound_divisor;

        let expected_difficulty = calc_difficulty(&parent, 1_020, &config);
        let mut at_bound = header(2, 1_020, expected_difficulty.as_u64(), parent.gas_limit + bound, 0);
        at_bound.parent_hash = parent.hash();
        assert!(validate_header(&at_bound, &parent, &config).contains(&HeaderError::GasLimitOutOfBounds));

        let mut just_inside = header(2, 1_020, expected_difficulty.as_u64(), parent.gas_limit + bound - 1, 0);
        just_inside.parent_hash = parent.hash();
        assert!(!validate_header(&just_inside, &parent, &config).contains(&HeaderError::GasLimitOutOfBounds));
    }

    #[test]
    fn gas_limit_exactly_at_minimum_is_invalid() {
        let config = ChainConfig::default();
        let parent = header(1, 1_000, 1_000_000, config.min_gas_limit, 0);
        let expected_difficulty = calc_difficulty(&parent, 1_020, &config);

        let mut at_minimum = header(2, 1_020, expected_difficulty.as_u64(), config.min_gas_limit, 0);
        at_minimum.parent_hash = parent.hash();
        assert!(validate_header(&at_minimum, &parent, &config).contains(&HeaderError::GasLimitBelowMinimum));

        let mut just_above = header(2, 1_020, expected_difficulty.as_u64(), config.min_gas_limit + 1, 0);
        just_above.parent_hash = parent.hash();
        assert!(!validate_header(&just_above, &parent, &config).contains(&HeaderError::GasLimitBelowMinimum));
    }
}
