//! §4.4.1's difficulty formula: the pre-Homestead and post-Homestead
//! adjustment rules plus the exponential difficulty bomb.

use primitive_types::U256;

use super::header::BlockHeader;
use crate::chain::ChainConfig;

/// `calc_difficulty(parent, timestamp, number, config)`: the child block's
/// difficulty given its parent header, its own timestamp, and its block
/// number. Branches on `config.homestead_block` for the child-timestamp-gap
/// adjustment term and always applies the difficulty bomb once the child's
/// number clears `config.bomb_delay_blocks` (0 before Byzantium-style
/// delays are configured).
pub fn calc_difficulty(parent: &BlockHeader, child_timestamp: u64, config: &ChainConfig) -> U256 {
    let child_number = parent.number + U256::one();
    let parent_difficulty = parent.difficulty;

    let adjustment = if child_number >= config.homestead_block {
        homestead_adjustment(parent_difficulty, child_timestamp, parent.timestamp, config)
    } else {
        frontier_adjustment(parent_difficulty, child_timestamp, parent.timestamp, config)
    };

    let mut difficulty = if adjustment.is_negative {
        parent_difficulty.saturating_sub(adjustment.magnitude)
    } else {
        parent_difficulty + adjustment.magnitude
    };

    if difficulty < config.minimum_difficulty {
        difficulty = config.minimum_difficulty;
    }

    difficulty + bomb(child_number, config)
}

struct Adjustment {
    magnitude: U256,
    is_negative: bool,
}

/// Frontier rule: difficulty moves by `parent_difficulty / 2048` per block,
/// up if the gap to the parent's timestamp is under 13 seconds, down
/// otherwise.
fn frontier_adjustment(
    parent_difficulty: U256,
    child_timestamp: u64,
    parent_timestamp: u64,
    config: &ChainConfig,
) -> Adjustment {
    let step = parent_difficulty / U256::from(config.difficulty_bound_divisor);
    let is_negative = child_timestamp >= parent_timestamp + 13;
    Adjustment {
        magnitude: step,
        is_negative,
    }
}

/// Homestead rule (EIP-2): the adjustment term scales with
/// `max(1 - (timestamp_gap / 10), -99)` instead of a flat +1/-1.
fn homestead_adjustment(
    parent_difficulty: U256,
    child_timestamp: u64,
    parent_timestamp: u64,
    config: &ChainConfig,
) -> Adjustment {
    let step = parent_difficulty / U256::from(config.difficulty_bound_divisor);
    let gap = child_timestamp.saturating_sub(parent_timestamp);
    let quotient = (gap / 10) as i64;
    let factor = std::cmp::max(1 - quotient, -99);
    Adjustment {
        magnitude: step * U256::from(factor.unsigned_abs()),
        is_negative: factor < 0,
    }
}

/// The exponential difficulty bomb: `2^((number / 100000) - 2)`, added on
/// top of the adjusted difficulty once the child's block number clears
/// 100,000 (and, on configured networks, after being pushed back by one or
/// more delays).
fn bomb(child_number: U256, config: &ChainConfig) -> U256 {
    let effective_number = child_number.saturating_sub(config.bomb_delay_blocks);
    let period = effective_number / U256::from(100_000u64);
    if period < U256::from(2u64) {
        return U256::zero();
    }
    let exponent = (period - U256::from(2u64)).as_u32();
    if exponent >= 256 {
        U256::MAX
    } else {
        U256::one() << exponent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::{H160, H256};

    fn header(number: u64, timestamp: u64, difficulty: u64) -> BlockHeader {
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
            gas_limit: 5_000_000,
            gas_used: 0,
            timestamp,
            extra_data: vec![],
            mix_hash: H256::zero(),
            nonce: 0,
        }
    }

    #[test]
    fn quick_child_increases_difficulty_pre_homestead() {
        let config = ChainConfig::default();
        let parent = header(1, 1000, 1_000_000);
        let difficulty = calc_difficulty(&parent, 1005, &config);
        assert!(difficulty > parent.difficulty);
    }

    #[test]
    fn slow_child_decreases_difficulty_pre_homestead() {
        let config = ChainConfig::default();
        let parent = header(1, 1000, 10_000_000);
        let difficulty = calc_difficulty(&parent, 1100, &config);
        assert!(difficulty < parent.difficulty);
    }

    #[test]
    fn difficulty_never_drops_below_minimum() {
        let config = ChainConfig::default();
        let parent = header(1, 1000, config.minimum_difficulty.as_u64());
        let difficulty = calc_difficulty(&parent, 100_000, &config);
        assert!(difficulty >= config.minimum_difficulty);
    }
}
