//! Gas cost rules named in §4.3: memory expansion, `SSTORE`'s set/clear/
//! refund schedule, the `CALL` stipend, and `CREATE`'s size-dependent cost.

use primitive_types::U256;

/// Words (32-byte units), rounding up, needed to cover `size` bytes of
/// memory.
fn words(size: u64) -> u64 {
    (size + 31) / 32
}

/// `C_mem(a) = G_memory * a + floor(a^2 / 512)`, the total cost of memory
/// sized at `a` words from genesis. Callers pay the *delta* between the
/// cost before and after an access, never the absolute cost twice.
fn memory_cost_words(a: u64) -> u64 {
    const G_MEMORY: u64 = 3;
    G_MEMORY * a + (a * a) / 512
}

/// Gas charged for growing active memory to cover up to `offset + size`
/// bytes, given the previously-highest byte offset touched (`prev_size`).
/// Returns 0 if the access doesn't grow memory past its current size.
pub fn memory_expansion_cost(prev_size: u64, offset: u64, size: u64) -> u64 {
    if size == 0 {
        return 0;
    }
    let new_highest = offset.saturating_add(size);
    if new_highest <= prev_size {
        return 0;
    }
    let prev_words = words(prev_size);
    let new_words = words(new_highest);
    memory_cost_words(new_words).saturating_sub(memory_cost_words(prev_words))
}

pub const G_SSTORE_SET: u64 = 20_000;
pub const G_SSTORE_RESET: u64 = 5_000;
pub const R_SSTORE_CLEAR: u64 = 15_000;

/// Cost of an `SSTORE` given the slot's current and new values, per the
/// three cases in §4.3: writing a zero slot to non-zero, writing a
/// non-zero slot to zero (refund-eligible), and any other change.
pub fn sstore_cost(current: U256, new: U256) -> u64 {
    if current.is_zero() && !new.is_zero() {
        G_SSTORE_SET
    } else if !current.is_zero() && new.is_zero() {
        G_SSTORE_RESET
    } else {
        G_SSTORE_RESET
    }
}

/// The gas refund (added to `R_SSTORE_CLEAR` bookkeeping, capped at
/// settlement time against half the gas used) earned by clearing a
/// previously non-zero slot to zero.
pub fn sstore_refund(current: U256, new: U256) -> u64 {
    if !current.is_zero() && new.is_zero() {
        R_SSTORE_CLEAR
    } else {
        0
    }
}

/// Stipend granted to the callee of a value-bearing `CALL`, on top of
/// whatever gas the caller explicitly forwarded (§4.3 "Call semantics").
pub const CALL_VALUE_STIPEND: u64 = 2_300;

pub const G_CALL: u64 = 700;
pub const G_CALL_VALUE: u64 = 9_000;
pub const G_NEW_ACCOUNT: u64 = 25_000;

pub const G_CREATE: u64 = 32_000;
pub const G_CODE_DEPOSIT_PER_BYTE: u64 = 200;

/// Cost of deploying `code_len` bytes of contract code at the end of a
/// `CREATE`/`CREATE2`, on top of the flat `G_CREATE` base cost.
pub fn create_cost(code_len: u64) -> u64 {
    G_CREATE + G_CODE_DEPOSIT_PER_BYTE * code_len
}

pub const G_JUMPDEST: u64 = 1;
pub const G_BASE: u64 = 2;
pub const G_VERYLOW: u64 = 3;
pub const G_LOW: u64 = 5;
pub const G_MID: u64 = 8;
pub const G_HIGH: u64 = 10;
pub const G_SLOAD: u64 = 800;
pub const G_SHA3: u64 = 30;
pub const G_SHA3WORD: u64 = 6;
pub const G_LOG: u64 = 375;
pub const G_LOGDATA: u64 = 8;
pub const G_LOGTOPIC: u64 = 375;
pub const G_EXP: u64 = 10;
pub const G_EXPBYTE: u64 = 50;
pub const G_COPY: u64 = 3;
pub const G_BALANCE: u64 = 700;
pub const G_EXTCODE: u64 = 700;
pub const G_SELFDESTRUCT: u64 = 5_000;
pub const R_SELFDESTRUCT: u64 = 24_000;
pub const G_BLOCKHASH: u64 = 20;

/// Number of 32-byte words needed to cover `len` bytes, rounding up. Shared
/// by the `*COPY` opcodes' dynamic cost and `EXP`'s per-exponent-byte cost.
pub fn words_for(len: u64) -> u64 {
    (len + 31) / 32
}

/// `G_EXP + G_EXPBYTE` per significant byte of the exponent (§4.3's
/// "dynamic cost" note applied to `EXP`; an exponent of zero still costs
/// the flat `G_EXP`).
pub fn exp_cost(exponent: U256) -> u64 {
    let bytes = 32 - exponent.leading_zeros() as u64 / 8;
    G_EXP + G_EXPBYTE * bytes
}

/// Cost of a `CALLDATACOPY`/`CODECOPY`/`EXTCODECOPY`/`RETURNDATACOPY`:
/// `G_VERYLOW` plus `G_COPY` per word copied.
pub fn copy_cost(size: u64) -> u64 {
    G_VERYLOW + G_COPY * words_for(size)
}

/// Base cost of a `CALL`/`CALLCODE`/`DELEGATECALL`/`STATICCALL`, before the
/// forwarded gas itself: `G_CALL` plus the value-transfer surcharge plus
/// the new-account surcharge, per §4.3's "Call semantics".
pub fn call_base_cost(transfers_value: bool, creates_account: bool) -> u64 {
    let mut cost = G_CALL;
    if transfers_value {
        cost += G_CALL_VALUE;
    }
    if creates_account {
        cost += G_NEW_ACCOUNT;
    }
    cost
}

/// Intrinsic gas: the fixed transaction cost plus a per-byte data cost that
/// is cheaper for zero bytes than non-zero ones, plus the flat
/// contract-creation surcharge when `to` is absent (§4.4, transaction
/// application step 1).
pub fn intrinsic_gas(data: &[u8], is_contract_creation: bool) -> u64 {
    const G_TRANSACTION: u64 = 21_000;
    const G_TXDATAZERO: u64 = 4;
    const G_TXDATANONZERO: u64 = 68;
    const G_TXCREATE: u64 = 32_000;

    let zero_bytes = data.iter().filter(|&&b| b == 0).count() as u64;
    let nonzero_bytes = data.len() as u64 - zero_bytes;

    let mut cost = G_TRANSACTION + zero_bytes * G_TXDATAZERO + nonzero_bytes * G_TXDATANONZERO;
    if is_contract_creation {
        cost += G_TXCREATE;
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_expansion_charges_only_the_delta() {
        let first = memory_expansion_cost(0, 0, 32);
        assert!(first > 0);
        let second = memory_expansion_cost(32, 0, 32);
        assert_eq!(second, 0);
        let third = memory_expansion_cost(32, 32, 32);
        assert!(third > 0);
    }

    #[test]
    fn exp_cost_scales_with_exponent_bytes() {
        assert_eq!(exp_cost(U256::zero()), G_EXP);
        assert_eq!(exp_cost(U256::from(255u64)), G_EXP + G_EXPBYTE);
        assert_eq!(exp_cost(U256::from(256u64)), G_EXP + G_EXPBYTE * 2);
    }

    #[test]
    fn copy_cost_charges_per_word() {
        assert_eq!(copy_cost(0), G_VERYLOW);
        assert_eq!(copy_cost(32), G_VERYLOW + G_COPY);
        assert_eq!(copy_cost(33), G_VERYLOW + G_COPY * 2);
    }

    #[test]
    fn sstore_set_clear_costs() {
        assert_eq!(sstore_cost(U256::zero(), U256::from(1u64)), G_SSTORE_SET);
        assert_eq!(sstore_cost(U256::from(1u64), U256::zero()), G_SSTORE_RESET);
        assert_eq!(sstore_refund(U256::from(1u64), U256::zero()), R_SSTORE_CLEAR);
        assert_eq!(sstore_refund(U256::zero(), U256::from(1u64)), 0);
    }

    #[test]
    fn intrinsic_gas_charges_creation_surcharge() {
        let plain = intrinsic_gas(&[], false);
        let creation = intrinsic_gas(&[], true);
        assert_eq!(creation - plain, 32_000);
    }

    #[test]
    fn call_base_cost_adds_surcharges() {
        assert_eq!(call_base_cost(false, false), G_CALL);
        assert_eq!(call_base_cost(true, false), G_CALL + G_CALL_VALUE);
        assert_eq!(call_base_cost(true, true), G_CALL + G_CALL_VALUE + G_NEW_ACCOUNT);
    }

    #[test]
    fn intrinsic_gas_charges_nonzero_bytes_more() {
        let zero = intrinsic_gas(&[0, 0, 0], false);
        let nonzero = intrinsic_gas(&[1, 1, 1], false);
        assert!(nonzero > zero);
    }
}
