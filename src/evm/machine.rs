//! The interpreter loop: machine state, execution environment, the
//! step function, call semantics and contract creation (§4.3).

use std::rc::Rc;

use primitive_types::{H160, H256, U256};

use crate::state::AccountBackend;

use super::gas;
use super::opcodes::{is_push, push_size, OPCODES};
use super::precompiles;
use super::types::{BlockHashLookup, CallKind, Halt, NoBlockHashes};

/// `I` in §4.3: the read-only context a call frame executes against.
#[derive(Debug, Clone)]
pub struct ExecutionEnvironment {
    pub address: H160,
    pub origin: H160,
    pub caller: H160,
    pub call_value: U256,
    pub calldata: Vec<u8>,
    pub code: Vec<u8>,
    pub gas_price: U256,
    pub block_coinbase: H160,
    pub block_number: U256,
    pub block_timestamp: u64,
    pub block_difficulty: U256,
    pub block_gas_limit: u64,
    pub chain_id: U256,
    pub depth: u32,
    pub is_static: bool,
    /// The "Block interface" of §6: a 256-ancestor block-hash lookup for
    /// `BLOCKHASH`, shared by reference across nested call frames (a call
    /// does not change which chain it executes against).
    pub block_hashes: Rc<dyn BlockHashLookup>,
}

/// `A` in §4.3: accumulated side effects of the current transaction, shared
/// across nested call frames (the self-destruct set, refund counter, and
/// logs).
#[derive(Debug, Default)]
pub struct SubState {
    pub selfdestructs: Vec<H160>,
    pub refund: u64,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// `M` in §4.3: the mutable machine state of one call frame (the
/// instruction pointer, stack, and byte-addressable memory). Storage lives
/// on the world state, not here, since it survives past the frame.
pub struct Machine {
    pub pc: usize,
    pub stack: Vec<U256>,
    pub memory: Vec<u8>,
    pub gas: u64,
    /// The output of the most recently completed nested call
    /// (`RETURNDATASIZE`/`RETURNDATACOPY`). Empty until the first
    /// `CALL`/`CALLCODE`/`DELEGATECALL`/`STATICCALL`/`CREATE*` returns.
    pub return_data: Vec<u8>,
}

const STACK_LIMIT: usize = 1024;

impl Machine {
    pub fn new(gas: u64) -> Self {
        Machine {
            pc: 0,
            stack: Vec::new(),
            memory: Vec::new(),
            gas,
            return_data: Vec::new(),
        }
    }

    fn pop(&mut self) -> Result<U256, Halt> {
        self.stack.pop().ok_or(Halt::StackUnderflow)
    }

    fn push(&mut self, value: U256) -> Result<(), Halt> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(Halt::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn charge(&mut self, amount: u64) -> Result<(), Halt> {
        if self.gas < amount {
            self.gas = 0;
            return Err(Halt::OutOfGas);
        }
        self.gas -= amount;
        Ok(())
    }

    /// Ensure memory covers `offset + size` bytes, charging for the
    /// expansion, and return the (possibly grown) memory's current length
    /// beforehand for cost accounting in `step`.
    fn expand_memory(&mut self, offset: u64, size: u64) -> Result<(), Halt> {
        let prev_len = self.memory.len() as u64;
        let cost = gas::memory_expansion_cost(prev_len, offset, size);
        self.charge(cost)?;
        let needed = offset.saturating_add(size) as usize;
        if needed > self.memory.len() {
            self.memory.resize(needed, 0);
        }
        Ok(())
    }

    fn mem_read(&mut self, offset: u64, size: u64) -> Result<Vec<u8>, Halt> {
        self.expand_memory(offset, size)?;
        let (offset, size) = (offset as usize, size as usize);
        Ok(self.memory[offset..offset + size].to_vec())
    }

    fn mem_write(&mut self, offset: u64, data: &[u8]) -> Result<(), Halt> {
        self.expand_memory(offset, data.len() as u64)?;
        let offset = offset as usize;
        self.memory[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Scan `code` for valid `JUMPDEST` targets, excluding any `0x5b` byte that
/// falls inside a `PUSH` immediate (§4.3 "JUMPDEST validity").
pub fn valid_jump_destinations(code: &[u8]) -> std::collections::HashSet<usize> {
    let mut valid = std::collections::HashSet::new();
    let mut i = 0;
    while i < code.len() {
        let op = code[i];
        if op == 0x5b {
            valid.insert(i);
        }
        i += 1 + push_size(op) as usize;
    }
    valid
}

/// Result of running a call frame to completion: the halt reason plus the
/// remaining gas in the frame (for the caller to refund/forward).
pub struct FrameResult {
    pub halt: Halt,
    pub gas_left: u64,
}

/// Execute `env.code` against `state` until it halts. This is `X` in §4.3:
/// it does not itself handle nested `CALL`/`CREATE` reentry into a fresh
/// environment, which `dispatch_call`/`dispatch_create` below build on top
/// of by recursively invoking `run`.
pub fn run<B: AccountBackend + Clone>(
    env: &ExecutionEnvironment,
    machine: &mut Machine,
    state: &mut B,
    substate: &mut SubState,
) -> FrameResult {
    let jumpdests = valid_jump_destinations(&env.code);

    loop {
        if machine.pc >= env.code.len() {
            return FrameResult {
                halt: Halt::Normal,
                gas_left: machine.gas,
            };
        }
        let opcode = env.code[machine.pc];

        match step(opcode, env, machine, state, substate, &jumpdests) {
            Ok(StepOutcome::Continue) => continue,
            Ok(StepOutcome::Halt(halt)) => {
                return FrameResult {
                    halt,
                    gas_left: machine.gas,
                }
            }
            Err(halt) => {
                return FrameResult {
                    halt,
                    gas_left: 0,
                }
            }
        }
    }
}

enum StepOutcome {
    Continue,
    Halt(Halt),
}

fn require_not_static(env: &ExecutionEnvironment) -> Result<(), Halt> {
    if env.is_static {
        Err(Halt::StaticViolation)
    } else {
        Ok(())
    }
}

fn step<B: AccountBackend + Clone>(
    opcode: u8,
    env: &ExecutionEnvironment,
    m: &mut Machine,
    state: &mut B,
    substate: &mut SubState,
    jumpdests: &std::collections::HashSet<usize>,
) -> Result<StepOutcome, Halt> {
    if is_push(opcode) {
        m.charge(gas::G_VERYLOW)?;
        let n = push_size(opcode) as usize;
        let start = m.pc + 1;
        let mut bytes = [0u8; 32];
        for i in 0..n {
            bytes[32 - n + i] = *env.code.get(start + i).unwrap_or(&0);
        }
        m.push(U256::from_big_endian(&bytes))?;
        m.pc += 1 + n;
        return Ok(StepOutcome::Continue);
    }

    if (0x80..=0x8f).contains(&opcode) {
        m.charge(gas::G_VERYLOW)?;
        let depth = (opcode - 0x80) as usize;
        let value = *m.stack.get(m.stack.len().wrapping_sub(depth + 1)).ok_or(Halt::StackUnderflow)?;
        m.push(value)?;
        m.pc += 1;
        return Ok(StepOutcome::Continue);
    }

    if (0x90..=0x9f).contains(&opcode) {
        m.charge(gas::G_VERYLOW)?;
        let depth = (opcode - 0x90) as usize + 1;
        let len = m.stack.len();
        if len <= depth {
            return Err(Halt::StackUnderflow);
        }
        m.stack.swap(len - 1, len - 1 - depth);
        m.pc += 1;
        return Ok(StepOutcome::Continue);
    }

    if (0xa0..=0xa4).contains(&opcode) {
        require_not_static(env)?;
        let n_topics = (opcode - 0xa0) as usize;
        let offset = m.pop()?.as_u64();
        let size = m.pop()?.as_u64();
        let mut topics = Vec::with_capacity(n_topics);
        for _ in 0..n_topics {
            let t = m.pop()?;
            let mut bytes = [0u8; 32];
            t.to_big_endian(&mut bytes);
            topics.push(H256::from_slice(&bytes));
        }
        m.charge(gas::G_LOG + gas::G_LOGTOPIC * n_topics as u64 + gas::G_LOGDATA * size)?;
        let data = m.mem_read(offset, size)?;
        substate.logs.push(Log {
            address: env.address,
            topics,
            data,
        });
        m.pc += 1;
        return Ok(StepOutcome::Continue);
    }

    match OPCODES.get(&opcode).map(|i| i.mnemonic) {
        Some("STOP") => Ok(StepOutcome::Halt(Halt::Normal)),
        Some("ADD") => binary_op(m, gas::G_VERYLOW, |a, b| a.overflowing_add(b).0),
        Some("MUL") => binary_op(m, gas::G_LOW, |a, b| a.overflowing_mul(b).0),
        Some("SUB") => binary_op(m, gas::G_VERYLOW, |a, b| a.overflowing_sub(b).0),
        Some("DIV") => binary_op(m, gas::G_LOW, |a, b| if b.is_zero() { U256::zero() } else { a / b }),
        Some("SDIV") => binary_op(m, gas::G_LOW, sdiv),
        Some("MOD") => binary_op(m, gas::G_LOW, |a, b| if b.is_zero() { U256::zero() } else { a % b }),
        Some("SMOD") => binary_op(m, gas::G_LOW, smod),
        Some("ADDMOD") => ternary_op(m, gas::G_MID, |a, b, c| {
            if c.is_zero() { U256::zero() } else { a.overflowing_add(b).0 % c }
        }),
        Some("MULMOD") => ternary_op(m, gas::G_MID, |a, b, c| {
            if c.is_zero() { U256::zero() } else { a.overflowing_mul(b).0 % c }
        }),
        Some("EXP") => {
            let base = m.pop()?;
            let exponent = m.pop()?;
            m.charge(gas::exp_cost(exponent))?;
            m.push(mod_pow(base, exponent))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("SIGNEXTEND") => binary_op(m, gas::G_LOW, signextend),
        Some("LT") => binary_op(m, gas::G_VERYLOW, |a, b| bool_to_u256(a < b)),
        Some("GT") => binary_op(m, gas::G_VERYLOW, |a, b| bool_to_u256(a > b)),
        Some("SLT") => binary_op(m, gas::G_VERYLOW, |a, b| bool_to_u256(slt(a, b))),
        Some("SGT") => binary_op(m, gas::G_VERYLOW, |a, b| bool_to_u256(slt(b, a))),
        Some("EQ") => binary_op(m, gas::G_VERYLOW, |a, b| bool_to_u256(a == b)),
        Some("ISZERO") => unary_op(m, gas::G_VERYLOW, |a| bool_to_u256(a.is_zero())),
        Some("AND") => binary_op(m, gas::G_VERYLOW, |a, b| a & b),
        Some("OR") => binary_op(m, gas::G_VERYLOW, |a, b| a | b),
        Some("XOR") => binary_op(m, gas::G_VERYLOW, |a, b| a ^ b),
        Some("NOT") => unary_op(m, gas::G_VERYLOW, |a| !a),
        Some("BYTE") => binary_op(m, gas::G_VERYLOW, |i, x| {
            if i >= U256::from(32u64) {
                U256::zero()
            } else {
                let mut bytes = [0u8; 32];
                x.to_big_endian(&mut bytes);
                U256::from(bytes[i.as_u64() as usize])
            }
        }),
        Some("SHL") => binary_op(m, gas::G_VERYLOW, |shift, value| {
            if shift >= U256::from(256u64) { U256::zero() } else { value << shift.as_u32() }
        }),
        Some("SHR") => binary_op(m, gas::G_VERYLOW, |shift, value| {
            if shift >= U256::from(256u64) { U256::zero() } else { value >> shift.as_u32() }
        }),
        Some("SAR") => binary_op(m, gas::G_VERYLOW, sar),
        Some("POP") => {
            m.charge(gas::G_BASE)?;
            m.pop()?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("MLOAD") => {
            m.charge(gas::G_VERYLOW)?;
            let offset = m.pop()?.as_u64();
            let bytes = m.mem_read(offset, 32)?;
            m.push(U256::from_big_endian(&bytes))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("MSTORE") => {
            m.charge(gas::G_VERYLOW)?;
            let offset = m.pop()?.as_u64();
            let value = m.pop()?;
            let mut bytes = [0u8; 32];
            value.to_big_endian(&mut bytes);
            m.mem_write(offset, &bytes)?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("MSTORE8") => {
            m.charge(gas::G_VERYLOW)?;
            let offset = m.pop()?.as_u64();
            let value = m.pop()?;
            m.mem_write(offset, &[value.byte(0)])?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("SLOAD") => {
            m.charge(gas::G_SLOAD)?;
            let key = m.pop()?;
            m.push(state.get_storage(&env.address, &key))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("SSTORE") => {
            require_not_static(env)?;
            let key = m.pop()?;
            let value = m.pop()?;
            let current = state.get_storage(&env.address, &key);
            m.charge(gas::sstore_cost(current, value))?;
            substate.refund += gas::sstore_refund(current, value);
            state
                .put_storage(&env.address, &key, value)
                .map_err(|_| Halt::OutOfGas)?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("JUMP") => {
            m.charge(gas::G_MID)?;
            let dest = m.pop()?.as_u64() as usize;
            if !jumpdests.contains(&dest) {
                return Err(Halt::InvalidJumpDestination);
            }
            m.pc = dest;
            Ok(StepOutcome::Continue)
        }
        Some("JUMPI") => {
            m.charge(gas::G_HIGH)?;
            let dest = m.pop()?.as_u64() as usize;
            let cond = m.pop()?;
            if cond.is_zero() {
                m.pc += 1;
            } else {
                if !jumpdests.contains(&dest) {
                    return Err(Halt::InvalidJumpDestination);
                }
                m.pc = dest;
            }
            Ok(StepOutcome::Continue)
        }
        Some("JUMPDEST") => {
            m.charge(gas::G_JUMPDEST)?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("PC") => {
            m.charge(gas::G_BASE)?;
            m.push(U256::from(m.pc as u64))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("MSIZE") => {
            m.charge(gas::G_BASE)?;
            m.push(U256::from(m.memory.len() as u64))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("GAS") => {
            m.charge(gas::G_BASE)?;
            m.push(U256::from(m.gas))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("ADDRESS") => push_address(m, env.address),
        Some("CALLER") => push_address(m, env.caller),
        Some("ORIGIN") => push_address(m, env.origin),
        Some("CALLVALUE") => {
            m.charge(gas::G_BASE)?;
            m.push(env.call_value)?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("CALLDATASIZE") => {
            m.charge(gas::G_BASE)?;
            m.push(U256::from(env.calldata.len() as u64))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("CALLDATALOAD") => {
            m.charge(gas::G_VERYLOW)?;
            let offset = m.pop()?.as_u64() as usize;
            let mut bytes = [0u8; 32];
            for i in 0..32 {
                if offset + i < env.calldata.len() {
                    bytes[i] = env.calldata[offset + i];
                }
            }
            m.push(U256::from_big_endian(&bytes))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("CALLDATACOPY") => copy_into_memory(m, &env.calldata),
        Some("CODESIZE") => {
            m.charge(gas::G_BASE)?;
            m.push(U256::from(env.code.len() as u64))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("CODECOPY") => copy_into_memory(m, &env.code),
        Some("GASPRICE") => {
            m.charge(gas::G_BASE)?;
            m.push(env.gas_price)?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("COINBASE") => push_address(m, env.block_coinbase),
        Some("TIMESTAMP") => {
            m.charge(gas::G_BASE)?;
            m.push(U256::from(env.block_timestamp))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("NUMBER") => {
            m.charge(gas::G_BASE)?;
            m.push(env.block_number)?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("DIFFICULTY") => {
            m.charge(gas::G_BASE)?;
            m.push(env.block_difficulty)?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("GASLIMIT") => {
            m.charge(gas::G_BASE)?;
            m.push(U256::from(env.block_gas_limit))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("CHAINID") => {
            m.charge(gas::G_BASE)?;
            m.push(env.chain_id)?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("BALANCE") => {
            m.charge(gas::G_BALANCE)?;
            let addr = pop_address(m)?;
            m.push(state.balance(&addr))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("EXTCODESIZE") => {
            m.charge(gas::G_EXTCODE)?;
            let addr = pop_address(m)?;
            m.push(U256::from(state.code(&addr).len() as u64))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("EXTCODECOPY") => {
            let addr = pop_address(m)?;
            let code = state.code(&addr);
            m.charge(gas::G_EXTCODE)?;
            copy_into_memory(m, &code)
        }
        Some("RETURNDATASIZE") => {
            m.charge(gas::G_BASE)?;
            m.push(U256::from(m.return_data.len() as u64))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("RETURNDATACOPY") => {
            let return_data = m.return_data.clone();
            copy_into_memory(m, &return_data)
        }
        Some("BLOCKHASH") => {
            m.charge(gas::G_BLOCKHASH)?;
            let number = m.pop()?;
            let hash = env.block_hashes.block_hash(number).unwrap_or_default();
            m.push(U256::from_big_endian(hash.as_bytes()))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("EXTCODEHASH") => {
            m.charge(gas::G_EXTCODE)?;
            let addr = pop_address(m)?;
            if state.exists(&addr) {
                let hash = state.code_hash(&addr);
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(hash.as_bytes());
                m.push(U256::from_big_endian(&bytes))?;
            } else {
                m.push(U256::zero())?;
            }
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("SHA3") => {
            m.charge(gas::G_SHA3)?;
            let offset = m.pop()?.as_u64();
            let size = m.pop()?.as_u64();
            let data = m.mem_read(offset, size)?;
            m.charge(gas::G_SHA3WORD * ((size + 31) / 32))?;
            let hash = crate::crypto::keccak256(&data);
            m.push(U256::from_big_endian(hash.as_bytes()))?;
            m.pc += 1;
            Ok(StepOutcome::Continue)
        }
        Some("RETURN") => {
            let offset = m.pop()?.as_u64();
            let size = m.pop()?.as_u64();
            let data = m.mem_read(offset, size)?;
            Ok(StepOutcome::Halt(Halt::Return(data)))
        }
        Some("REVERT") => {
            let offset = m.pop()?.as_u64();
            let size = m.pop()?.as_u64();
            let data = m.mem_read(offset, size)?;
            Ok(StepOutcome::Halt(Halt::Revert(data)))
        }
        Some("SELFDESTRUCT") => {
            require_not_static(env)?;
            m.charge(gas::G_SELFDESTRUCT)?;
            let beneficiary = pop_address(m)?;
            let balance = state.balance(&env.address);
            state
                .transfer(&env.address, &beneficiary, balance)
                .map_err(|_| Halt::InsufficientBalance)?;
            substate.selfdestructs.push(env.address);
            substate.refund += gas::R_SELFDESTRUCT;
            Ok(StepOutcome::Halt(Halt::Normal))
        }
        Some("CALL") => do_call(CallKind::Call, env, m, state, substate),
        Some("CALLCODE") => do_call(CallKind::CallCode, env, m, state, substate),
        Some("DELEGATECALL") => do_call(CallKind::DelegateCall, env, m, state, substate),
        Some("STATICCALL") => do_call(CallKind::StaticCall, env, m, state, substate),
        Some("CREATE") => do_create(false, env, m, state, substate),
        Some("CREATE2") => do_create(true, env, m, state, substate),
        Some("INVALID") => Err(Halt::InvalidOpcode(opcode)),
        Some(_unimplemented) => Err(Halt::InvalidOpcode(opcode)),
        None => Err(Halt::InvalidOpcode(opcode)),
    }
}

fn bool_to_u256(b: bool) -> U256 {
    if b {
        U256::one()
    } else {
        U256::zero()
    }
}

fn binary_op(m: &mut Machine, cost: u64, f: impl Fn(U256, U256) -> U256) -> Result<StepOutcome, Halt> {
    m.charge(cost)?;
    let a = m.pop()?;
    let b = m.pop()?;
    m.push(f(a, b))?;
    m.pc += 1;
    Ok(StepOutcome::Continue)
}

fn ternary_op(
    m: &mut Machine,
    cost: u64,
    f: impl Fn(U256, U256, U256) -> U256,
) -> Result<StepOutcome, Halt> {
    m.charge(cost)?;
    let a = m.pop()?;
    let b = m.pop()?;
    let c = m.pop()?;
    m.push(f(a, b, c))?;
    m.pc += 1;
    Ok(StepOutcome::Continue)
}

fn unary_op(m: &mut Machine, cost: u64, f: impl Fn(U256) -> U256) -> Result<StepOutcome, Halt> {
    m.charge(cost)?;
    let a = m.pop()?;
    m.push(f(a))?;
    m.pc += 1;
    Ok(StepOutcome::Continue)
}

fn push_address(m: &mut Machine, address: H160) -> Result<StepOutcome, Halt> {
    m.charge(gas::G_BASE)?;
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_bytes());
    m.push(U256::from_big_endian(&bytes))?;
    m.pc += 1;
    Ok(StepOutcome::Continue)
}

fn pop_address(m: &mut Machine) -> Result<H160, Halt> {
    let v = m.pop()?;
    let mut bytes = [0u8; 32];
    v.to_big_endian(&mut bytes);
    Ok(H160::from_slice(&bytes[12..]))
}

fn push_u160_as_word(m: &mut Machine, addr: H160) -> Result<(), Halt> {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(addr.as_bytes());
    m.push(U256::from_big_endian(&bytes))
}

fn is_negative(x: U256) -> bool {
    x.bit(255)
}

/// Two's-complement negation: `!x + 1`.
fn negate(x: U256) -> U256 {
    (!x).overflowing_add(U256::one()).0
}

/// Signed division (§4.3's two's-complement arithmetic opcodes). Division by
/// zero yields zero, and the one case that would overflow
/// (`MIN / -1`) saturates back to `MIN`, matching the Yellow Paper.
fn sdiv(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let min = U256::one() << 255;
    let neg_one = negate(U256::one());
    if a == min && b == neg_one {
        return min;
    }
    let a_neg = is_negative(a);
    let b_neg = is_negative(b);
    let a_abs = if a_neg { negate(a) } else { a };
    let b_abs = if b_neg { negate(b) } else { b };
    let result = a_abs / b_abs;
    if a_neg != b_neg {
        negate(result)
    } else {
        result
    }
}

/// Signed modulo; takes the sign of the dividend. Division by zero yields
/// zero.
fn smod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let a_neg = is_negative(a);
    let b_neg = is_negative(b);
    let a_abs = if a_neg { negate(a) } else { a };
    let b_abs = if b_neg { negate(b) } else { b };
    let result = a_abs % b_abs;
    if a_neg {
        negate(result)
    } else {
        result
    }
}

/// Signed less-than. Two's-complement values of differing sign compare by
/// sign alone; same-sign values compare the same as their unsigned bit
/// patterns.
fn slt(a: U256, b: U256) -> bool {
    let a_neg = is_negative(a);
    let b_neg = is_negative(b);
    if a_neg != b_neg {
        a_neg
    } else {
        a < b
    }
}

/// `SIGNEXTEND`: treat byte `b` (0-indexed from the least-significant byte)
/// of `x` as the sign byte and extend it leftward. `b >= 32` is a no-op.
fn signextend(b: U256, x: U256) -> U256 {
    if b >= U256::from(32u64) {
        return x;
    }
    let byte_index = b.low_u32() as usize;
    if byte_index == 31 {
        return x;
    }
    let bit_index = byte_index * 8 + 7;
    let mask = (U256::one() << (bit_index + 1)) - U256::one();
    if x.bit(bit_index) {
        x | !mask
    } else {
        x & mask
    }
}

/// Arithmetic (sign-preserving) right shift.
fn sar(shift: U256, value: U256) -> U256 {
    let negative = is_negative(value);
    if shift >= U256::from(256u64) {
        return if negative { negate(U256::one()) } else { U256::zero() };
    }
    let shift_amt = shift.as_u32();
    if !negative {
        return value >> shift_amt;
    }
    if shift_amt == 0 {
        return value;
    }
    let ones = !U256::zero() << (256 - shift_amt);
    (value >> shift_amt) | ones
}

/// Modular exponentiation by repeated squaring, reduced mod 2^256 (`U256`
/// arithmetic wraps on overflow the same way the EVM's word size does).
fn mod_pow(mut base: U256, mut exponent: U256) -> U256 {
    let mut result = U256::one();
    while !exponent.is_zero() {
        if exponent.bit(0) {
            result = result.overflowing_mul(base).0;
        }
        base = base.overflowing_mul(base).0;
        exponent >>= 1;
    }
    result
}

/// Shared body of `CALLDATACOPY`/`CODECOPY`/`EXTCODECOPY`/`RETURNDATACOPY`:
/// pop (destOffset, offset, size), charge the per-word copy cost, and copy
/// `size` bytes from `source` into memory, zero-padding past its end.
fn copy_into_memory(m: &mut Machine, source: &[u8]) -> Result<StepOutcome, Halt> {
    let dest_offset = m.pop()?.as_u64();
    let offset = m.pop()?.as_u64();
    let size = m.pop()?.as_u64();
    m.charge(gas::copy_cost(size))?;
    let mut data = vec![0u8; size as usize];
    for (i, slot) in data.iter_mut().enumerate() {
        let src_index = offset as usize + i;
        if src_index < source.len() {
            *slot = source[src_index];
        }
    }
    m.mem_write(dest_offset, &data)?;
    m.pc += 1;
    Ok(StepOutcome::Continue)
}

fn create2_address(sender: &H160, salt: U256, init_code: &[u8]) -> H160 {
    let init_hash = crate::crypto::keccak256(init_code);
    let mut salt_bytes = [0u8; 32];
    salt.to_big_endian(&mut salt_bytes);
    let mut buf = Vec::with_capacity(1 + 20 + 32 + 32);
    buf.push(0xff);
    buf.extend_from_slice(sender.as_bytes());
    buf.extend_from_slice(&salt_bytes);
    buf.extend_from_slice(init_hash.as_bytes());
    let hash = crate::crypto::keccak256(&buf);
    H160::from_slice(&hash.as_bytes()[12..])
}

/// Shared body of `CALL`/`CALLCODE`/`DELEGATECALL`/`STATICCALL`: pop the
/// call's arguments off the stack, charge the base/value/new-account
/// surcharges, forward gas (plus the value-transfer stipend), and splice the
/// callee's output into memory and `return_data`.
fn do_call<B: AccountBackend + Clone>(
    kind: CallKind,
    env: &ExecutionEnvironment,
    m: &mut Machine,
    state: &mut B,
    substate: &mut SubState,
) -> Result<StepOutcome, Halt> {
    let gas_requested = m.pop()?.as_u64();
    let target = pop_address(m)?;
    let value = if matches!(kind, CallKind::Call | CallKind::CallCode) {
        m.pop()?
    } else {
        U256::zero()
    };
    let args_offset = m.pop()?.as_u64();
    let args_size = m.pop()?.as_u64();
    let ret_offset = m.pop()?.as_u64();
    let ret_size = m.pop()?.as_u64();

    let transfers_value = matches!(kind, CallKind::Call | CallKind::CallCode) && !value.is_zero();
    if kind == CallKind::Call && transfers_value {
        require_not_static(env)?;
    }
    let creates_account = kind == CallKind::Call && transfers_value && !state.exists(&target);
    m.charge(gas::call_base_cost(transfers_value, creates_account))?;

    let calldata = m.mem_read(args_offset, args_size)?;
    m.expand_memory(ret_offset, ret_size)?;

    let available = m.gas;
    let forwarded = gas_requested.min(available);
    m.charge(forwarded)?;
    let mut call_gas = forwarded;
    if transfers_value {
        call_gas += gas::CALL_VALUE_STIPEND;
    }

    let result = dispatch_call(kind, env, target, value, calldata, call_gas, state, substate);
    m.gas += result.gas_left;

    let (success, output) = match result.halt {
        Halt::Normal => (true, Vec::new()),
        Halt::Return(data) => (true, data),
        Halt::Revert(data) => (false, data),
        _ => (false, Vec::new()),
    };
    m.return_data = output.clone();
    let copy_len = (ret_size as usize).min(output.len());
    if copy_len > 0 {
        let start = ret_offset as usize;
        m.memory[start..start + copy_len].copy_from_slice(&output[..copy_len]);
    }
    m.push(bool_to_u256(success))?;
    m.pc += 1;
    Ok(StepOutcome::Continue)
}

/// Shared body of `CREATE`/`CREATE2`: pop the creation arguments, derive the
/// new address, forward all remaining gas to the init code, and push the new
/// address (or zero on failure).
fn do_create<B: AccountBackend + Clone>(
    is_create2: bool,
    env: &ExecutionEnvironment,
    m: &mut Machine,
    state: &mut B,
    substate: &mut SubState,
) -> Result<StepOutcome, Halt> {
    require_not_static(env)?;
    let value = m.pop()?;
    let offset = m.pop()?.as_u64();
    let size = m.pop()?.as_u64();
    let salt = if is_create2 { Some(m.pop()?) } else { None };

    m.charge(gas::G_CREATE)?;
    let init_code = m.mem_read(offset, size)?;
    if is_create2 {
        m.charge(gas::G_SHA3WORD * gas::words_for(size))?;
    }

    let sender_nonce = state.nonce(&env.address);
    let new_address = match salt {
        Some(salt) => create2_address(&env.address, salt, &init_code),
        None => state.new_contract_address(&env.address, sender_nonce),
    };

    if state.exists(&new_address) && (state.nonce(&new_address) != 0 || !state.code(&new_address).is_empty()) {
        m.push(U256::zero())?;
        m.pc += 1;
        return Ok(StepOutcome::Continue);
    }

    state.increment_nonce(&env.address).map_err(|_| Halt::OutOfGas)?;

    let child_gas = m.gas;
    m.gas = 0;
    let result = dispatch_create(env, value, init_code, child_gas, new_address, state, substate);
    m.gas += result.gas_left;

    match result.halt {
        // `RETURN`ing deployable code and falling off the end via `STOP`
        // (no code deployed, but the endowment commits) both count as a
        // successful creation.
        Halt::Return(_) | Halt::Normal => {
            m.return_data = Vec::new();
            push_u160_as_word(m, new_address)?;
        }
        Halt::Revert(data) => {
            m.return_data = data;
            m.push(U256::zero())?;
        }
        _ => {
            m.return_data = Vec::new();
            m.push(U256::zero())?;
        }
    }
    m.pc += 1;
    Ok(StepOutcome::Continue)
}

/// Dispatch a `CALL`/`CALLCODE`/`DELEGATECALL`/`STATICCALL` to `target`,
/// recursively invoking `run` against a fresh execution environment built
/// per the semantics of §4.3 "Call semantics". Routes to the precompile
/// table first.
pub fn dispatch_call<B: AccountBackend + Clone>(
    kind: CallKind,
    caller_env: &ExecutionEnvironment,
    target: H160,
    value: U256,
    calldata: Vec<u8>,
    gas_limit: u64,
    state: &mut B,
    substate: &mut SubState,
) -> FrameResult {
    if caller_env.depth >= 1024 {
        return FrameResult {
            halt: Halt::CallDepthExceeded,
            gas_left: gas_limit,
        };
    }

    if kind == CallKind::Call && !value.is_zero() {
        if state.balance(&caller_env.address) < value {
            return FrameResult {
                halt: Halt::InsufficientBalance,
                gas_left: gas_limit,
            };
        }
    }

    if precompiles::is_precompile(&target) {
        let cost = precompiles::gas_cost(&target, &calldata);
        if cost > gas_limit {
            return FrameResult {
                halt: Halt::OutOfGas,
                gas_left: 0,
            };
        }
        return match precompiles::run(&target, &calldata) {
            Some(output) => FrameResult {
                halt: Halt::Return(output),
                gas_left: gas_limit - cost,
            },
            None => FrameResult {
                halt: Halt::Normal,
                gas_left: gas_limit - cost,
            },
        };
    }

    let code = state.code(&target);
    let (address, caller, call_value, is_static) = match kind {
        CallKind::Call => (target, caller_env.address, value, caller_env.is_static),
        CallKind::CallCode => (caller_env.address, caller_env.address, value, caller_env.is_static),
        CallKind::DelegateCall => (caller_env.address, caller_env.caller, caller_env.call_value, caller_env.is_static),
        CallKind::StaticCall => (target, caller_env.address, U256::zero(), true),
    };

    // Run the nested frame against a scratch clone of the world state and a
    // fresh sub-state; merge back into the caller only on a non-exceptional
    // halt, so a failed or reverted call leaves `state`/`substate` untouched
    // (§4.3's call-frame isolation).
    let mut scratch = state.clone();
    if kind == CallKind::Call && !value.is_zero() {
        if scratch.transfer(&caller_env.address, &target, value).is_err() {
            return FrameResult {
                halt: Halt::InsufficientBalance,
                gas_left: gas_limit,
            };
        }
    }

    let env = ExecutionEnvironment {
        address,
        origin: caller_env.origin,
        caller,
        call_value,
        calldata,
        code,
        gas_price: caller_env.gas_price,
        block_coinbase: caller_env.block_coinbase,
        block_number: caller_env.block_number,
        block_timestamp: caller_env.block_timestamp,
        block_difficulty: caller_env.block_difficulty,
        block_gas_limit: caller_env.block_gas_limit,
        chain_id: caller_env.chain_id,
        depth: caller_env.depth + 1,
        is_static,
        block_hashes: caller_env.block_hashes.clone(),
    };
    let mut machine = Machine::new(gas_limit);
    let mut scratch_substate = SubState::default();
    let result = run(&env, &mut machine, &mut scratch, &mut scratch_substate);

    if matches!(result.halt, Halt::Normal | Halt::Return(_)) {
        *state = scratch;
        substate.selfdestructs.extend(scratch_substate.selfdestructs);
        substate.refund += scratch_substate.refund;
        substate.logs.extend(scratch_substate.logs);
    }

    result
}

/// Dispatch a `CREATE`/`CREATE2`: derive the new contract's address, run
/// `init_code` as a call frame whose `RETURN` output becomes the deployed
/// code, and charge the size-dependent deposit cost (§4.3 "Contract
/// creation").
pub fn dispatch_create<B: AccountBackend + Clone>(
    caller_env: &ExecutionEnvironment,
    value: U256,
    init_code: Vec<u8>,
    gas_limit: u64,
    new_address: H160,
    state: &mut B,
    substate: &mut SubState,
) -> FrameResult {
    if caller_env.depth >= 1024 {
        return FrameResult {
            halt: Halt::CallDepthExceeded,
            gas_left: gas_limit,
        };
    }
    if !value.is_zero() && state.balance(&caller_env.address) < value {
        return FrameResult {
            halt: Halt::InsufficientBalance,
            gas_left: gas_limit,
        };
    }
    let mut scratch = state.clone();
    if !value.is_zero() && scratch.transfer(&caller_env.address, &new_address, value).is_err() {
        return FrameResult {
            halt: Halt::InsufficientBalance,
            gas_left: gas_limit,
        };
    }

    let env = ExecutionEnvironment {
        address: new_address,
        origin: caller_env.origin,
        caller: caller_env.address,
        call_value: value,
        calldata: Vec::new(),
        code: init_code,
        gas_price: caller_env.gas_price,
        block_coinbase: caller_env.block_coinbase,
        block_number: caller_env.block_number,
        block_timestamp: caller_env.block_timestamp,
        block_difficulty: caller_env.block_difficulty,
        block_gas_limit: caller_env.block_gas_limit,
        chain_id: caller_env.chain_id,
        depth: caller_env.depth + 1,
        is_static: false,
        block_hashes: caller_env.block_hashes.clone(),
    };
    let mut machine = Machine::new(gas_limit);
    let mut scratch_substate = SubState::default();
    let result = run(&env, &mut machine, &mut scratch, &mut scratch_substate);

    match result.halt {
        Halt::Return(code) => {
            let deposit_cost = gas::create_cost(code.len() as u64) - gas::G_CREATE;
            if deposit_cost > result.gas_left {
                return FrameResult {
                    halt: Halt::OutOfGas,
                    gas_left: 0,
                };
            }
            let gas_left = result.gas_left - deposit_cost;
            if scratch.set_code(&new_address, code).is_err() {
                return FrameResult {
                    halt: Halt::OutOfGas,
                    gas_left: 0,
                };
            }
            *state = scratch;
            substate.selfdestructs.extend(scratch_substate.selfdestructs);
            substate.refund += scratch_substate.refund;
            substate.logs.extend(scratch_substate.logs);
            FrameResult {
                halt: Halt::Return(new_address.as_bytes().to_vec()),
                gas_left,
            }
        }
        // STOP (or falling off the end of init code) deploys no code, but
        // the endowment and any storage/nonce side effects init code made
        // still commit, same as a non-exceptional CALL.
        Halt::Normal => {
            *state = scratch;
            substate.selfdestructs.extend(scratch_substate.selfdestructs);
            substate.refund += scratch_substate.refund;
            substate.logs.extend(scratch_substate.logs);
            FrameResult {
                halt: Halt::Normal,
                gas_left: result.gas_left,
            }
        }
        other => FrameResult {
            halt: other,
            gas_left: result.gas_left,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TrieState;
    use crate::trie::MemoryKvStore;

    fn env_for(code: Vec<u8>) -> ExecutionEnvironment {
        ExecutionEnvironment {
            address: H160::zero(),
            origin: H160::zero(),
            caller: H160::zero(),
            call_value: U256::zero(),
            calldata: Vec::new(),
            code,
            gas_price: U256::zero(),
            block_coinbase: H160::zero(),
            block_number: U256::zero(),
            block_timestamp: 0,
            block_difficulty: U256::zero(),
            block_gas_limit: 30_000_000,
            chain_id: U256::one(),
            depth: 0,
            is_static: false,
            block_hashes: Rc::new(NoBlockHashes),
        }
    }

    #[test]
    fn stop_halts_normally_with_gas_untouched() {
        let env = env_for(vec![0x00]);
        let mut m = Machine::new(10_000);
        let mut state = TrieState::new(MemoryKvStore::default());
        let mut substate = SubState::default();
        let result = run(&env, &mut m, &mut state, &mut substate);
        assert_eq!(result.halt, Halt::Normal);
        assert_eq!(result.gas_left, 10_000);
    }

    #[test]
    fn push_add_leaves_sum_on_stack() {
        // PUSH1 2, PUSH1 3, ADD, STOP
        let code = vec![0x60, 0x02, 0x60, 0x03, 0x01, 0x00];
        let env = env_for(code);
        let mut m = Machine::new(10_000);
        let mut state = TrieState::new(MemoryKvStore::default());
        let mut substate = SubState::default();
        let env2 = ExecutionEnvironment { depth: 0, ..env };
        let jumpdests = valid_jump_destinations(&env2.code);
        loop {
            if m.pc >= env2.code.len() {
                break;
            }
            let op = env2.code[m.pc];
            match step(op, &env2, &mut m, &mut state, &mut substate, &jumpdests).unwrap() {
                StepOutcome::Continue => continue,
                StepOutcome::Halt(h) => {
                    assert_eq!(h, Halt::Normal);
                    break;
                }
            }
        }
        assert_eq!(m.stack, vec![U256::from(5u64)]);
    }

    #[test]
    fn jump_to_non_jumpdest_halts() {
        // PUSH1 4, JUMP, (unreachable), STOP  -- 0x04 is not a JUMPDEST
        let code = vec![0x60, 0x04, 0x56, 0x00, 0x00];
        let env = env_for(code);
        let mut m = Machine::new(10_000);
        let mut state = TrieState::new(MemoryKvStore::default());
        let mut substate = SubState::default();
        let result = run(&env, &mut m, &mut state, &mut substate);
        assert_eq!(result.halt, Halt::InvalidJumpDestination);
    }

    #[test]
    fn out_of_gas_on_insufficient_gas() {
        let code = vec![0x60, 0x02, 0x60, 0x03, 0x01, 0x00];
        let env = env_for(code);
        let mut m = Machine::new(1); // not enough for even one PUSH
        let mut state = TrieState::new(MemoryKvStore::default());
        let mut substate = SubState::default();
        let result = run(&env, &mut m, &mut state, &mut substate);
        assert_eq!(result.halt, Halt::OutOfGas);
    }
}
