//! Shared EVM vocabulary: the 256-bit word type (re-exported from
//! `primitive-types`), halt reasons, and the call-kind discriminant used by
//! `CALL`/`CALLCODE`/`DELEGATECALL`/`STATICCALL`.

pub use primitive_types::U256;
use primitive_types::H256;

/// Why execution of the current call frame stopped. `Halt::Normal` and
/// `Halt::Return(_)` are the two non-exceptional outcomes of §4.3's
/// execution function `X`; every other variant is an "exceptional halt"
/// that reverts all state changes made by the current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// `STOP`, or falling off the end of the code.
    Normal,
    /// `RETURN`, carrying the returned output bytes.
    Return(Vec<u8>),
    /// `REVERT`, carrying the returned output bytes. State changes made by
    /// this frame are discarded but the output is still visible to the
    /// caller and gas already consumed is not refunded.
    Revert(Vec<u8>),
    /// Out of gas.
    OutOfGas,
    /// Stack underflow (fewer items on the stack than the opcode requires).
    StackUnderflow,
    /// Stack would exceed the 1024-item limit.
    StackOverflow,
    /// `JUMP`/`JUMPI` target is not a `JUMPDEST`.
    InvalidJumpDestination,
    /// Opcode byte has no defined instruction.
    InvalidOpcode(u8),
    /// A state-modifying opcode (`SSTORE`, `LOG*`, `CREATE*`, value-bearing
    /// `CALL`, `SELFDESTRUCT`) was reached inside a `STATICCALL` frame.
    StaticViolation,
    /// Call depth would exceed 1024.
    CallDepthExceeded,
    /// Insufficient balance for a value-bearing `CALL` or `CREATE`.
    InsufficientBalance,
    /// `CREATE`/`CREATE2` target address already has code or a non-zero
    /// nonce.
    AddressCollision,
}

/// The four flavours of inter-contract call (§4.3 "Call semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
}

/// The "Block interface" of §6: a lookup from block number to header hash
/// for the 256 most recent ancestors, consumed by `BLOCKHASH`. Realized
/// once over the in-memory chain the block processor keeps and once as a
/// trivial always-`None` stub for standalone EVM tests.
pub trait BlockHashLookup: std::fmt::Debug {
    fn block_hash(&self, number: U256) -> Option<H256>;
}

/// The trivial realization: no ancestors known, `BLOCKHASH` always yields
/// zero. Used where a call frame is exercised without a surrounding chain.
#[derive(Debug)]
pub struct NoBlockHashes;

impl BlockHashLookup for NoBlockHashes {
    fn block_hash(&self, _number: U256) -> Option<H256> {
        None
    }
}
