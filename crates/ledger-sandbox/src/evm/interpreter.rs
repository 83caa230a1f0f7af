//! # Interpreter
//!
//! Runs one frame of bytecode against an [`ExecutionState`]. Storage writes
//! go straight into the state, which journals them; the caller reverts to a
//! checkpoint when the frame does not succeed.
//!
//! `run` returns `Ok` for STOP/RETURN and REVERT. Exceptional halts come back
//! as non-fault [`VmError`]s.

use crate::domain::entities::Log;
use crate::domain::services::keccak256;
use crate::domain::value_objects::{
    u256_to_word, Address, Bytes, Hash, StorageKey, StorageValue, U256,
};
use crate::errors::VmError;
use crate::evm::gas::{self, costs, OPCODE_GAS};
use crate::evm::memory::{Memory, MAX_MEMORY_SIZE};
use crate::evm::opcodes::Opcode;
use crate::evm::stack::Stack;
use crate::ports::outbound::{CallFrame, ExecutionState, FrameOutcome, FrameStatus};
use primitive_types::U512;
use std::collections::{HashMap, HashSet};

/// Gas reserve SSTORE requires (EIP-2200 sentry).
const SSTORE_SENTRY: u64 = 2300;

/// Single-frame interpreter.
pub struct Interpreter<'a> {
    frame: &'a CallFrame,
    state: &'a mut dyn ExecutionState,
    code: &'a [u8],
    pc: usize,
    stack: Stack,
    memory: Memory,
    logs: Vec<Log>,
    gas_remaining: u64,
    gas_refund: i64,
    original_slots: HashMap<StorageKey, U256>,
    jump_dests: HashSet<usize>,
    warm_slots: HashSet<StorageKey>,
    warm_accounts: HashSet<Address>,
    max_steps: u64,
}

enum Control {
    Continue,
    Return(Bytes),
    Revert(Bytes),
}

impl<'a> Interpreter<'a> {
    /// Prepares `frame` for execution.
    pub fn new(frame: &'a CallFrame, state: &'a mut dyn ExecutionState, max_steps: u64) -> Self {
        let code = frame.code.as_slice();
        let warm_accounts = [frame.origin, frame.caller, frame.address]
            .into_iter()
            .collect();
        Self {
            frame,
            state,
            code,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            logs: Vec::new(),
            gas_remaining: frame.gas_limit,
            gas_refund: 0,
            original_slots: HashMap::new(),
            jump_dests: analyze_jump_dests(code),
            warm_slots: HashSet::new(),
            warm_accounts,
            max_steps,
        }
    }

    /// Runs to completion.
    ///
    /// # Errors
    ///
    /// Exceptional halts and engine faults; see [`VmError::is_fault`].
    pub fn run(mut self) -> Result<FrameOutcome, VmError> {
        let mut steps = 0u64;
        let (reverted, output) = loop {
            if self.pc >= self.code.len() {
                break (false, Bytes::new());
            }
            steps += 1;
            if steps > self.max_steps {
                return Err(VmError::StepLimitExceeded(self.max_steps));
            }
            match self.step()? {
                Control::Continue => {}
                Control::Return(output) => break (false, output),
                Control::Revert(output) => break (true, output),
            }
        };

        let gas_used = self.frame.gas_limit - self.gas_remaining;
        Ok(if reverted {
            FrameOutcome {
                status: FrameStatus::Revert,
                output,
                gas_used,
                gas_refund: 0,
                logs: Vec::new(),
            }
        } else {
            FrameOutcome {
                status: FrameStatus::Success,
                output,
                gas_used,
                gas_refund: u64::try_from(self.gas_refund).unwrap_or(0),
                logs: self.logs,
            }
        })
    }

    fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        if amount > self.gas_remaining {
            self.gas_remaining = 0;
            return Err(VmError::OutOfGas);
        }
        self.gas_remaining -= amount;
        Ok(())
    }

    fn push_bool(&mut self, value: bool) -> Result<(), VmError> {
        self.stack
            .push(if value { U256::one() } else { U256::zero() })
    }

    fn binary(&mut self, f: impl FnOnce(U256, U256) -> U256) -> Result<(), VmError> {
        let a = self.stack.pop()?;
        let b = self.stack.pop()?;
        self.stack.push(f(a, b))
    }

    /// Charges expansion and grows memory for `[offset, offset + size)`.
    fn memory_range(&mut self, offset: U256, size: U256) -> Result<(usize, usize), VmError> {
        if size.is_zero() {
            return Ok((0, 0));
        }
        let offset = memory_index(offset)?;
        let size = memory_index(size)?;
        let end = offset + size;
        let cost = self.memory.expansion_cost(end)?;
        self.charge(cost)?;
        self.memory.resize(end);
        Ok((offset, size))
    }

    fn touch_account(&mut self, address: Address) -> Result<(), VmError> {
        let cost = if self.warm_accounts.insert(address) {
            costs::COLD_ACCOUNT_ACCESS
        } else {
            costs::WARM_ACCOUNT_ACCESS
        };
        self.charge(cost)
    }

    #[allow(clippy::too_many_lines)]
    fn step(&mut self) -> Result<Control, VmError> {
        let byte = self.code[self.pc];
        let op = Opcode::from_byte(byte).ok_or(VmError::InvalidOpcode(byte))?;
        self.charge(OPCODE_GAS[usize::from(byte)])?;
        let pc = self.pc;
        self.pc += 1;

        match op {
            Opcode::Stop => return Ok(Control::Return(Bytes::new())),

            Opcode::Add => self.binary(|a, b| a.overflowing_add(b).0)?,
            Opcode::Mul => self.binary(|a, b| a.overflowing_mul(b).0)?,
            Opcode::Sub => self.binary(|a, b| a.overflowing_sub(b).0)?,
            Opcode::Div => self.binary(|a, b| if b.is_zero() { U256::zero() } else { a / b })?,
            Opcode::SDiv => {
                self.binary(|a, b| if b.is_zero() { U256::zero() } else { signed_div(a, b) })?;
            }
            Opcode::Mod => self.binary(|a, b| if b.is_zero() { U256::zero() } else { a % b })?,
            Opcode::SMod => {
                self.binary(|a, b| if b.is_zero() { U256::zero() } else { signed_mod(a, b) })?;
            }
            Opcode::AddMod | Opcode::MulMod => {
                let a = U512::from(self.stack.pop()?);
                let b = U512::from(self.stack.pop()?);
                let n = self.stack.pop()?;
                let result = if n.is_zero() {
                    U256::zero()
                } else if op == Opcode::AddMod {
                    u512_low((a + b) % U512::from(n))
                } else {
                    u512_low((a * b) % U512::from(n))
                };
                self.stack.push(result)?;
            }
            Opcode::Exp => {
                let base = self.stack.pop()?;
                let exponent = self.stack.pop()?;
                self.charge(gas::exp_gas_cost(exponent))?;
                self.stack.push(exp_by_squaring(base, exponent))?;
            }
            Opcode::SignExtend => {
                let k = self.stack.pop()?;
                let x = self.stack.pop()?;
                let result = if k < U256::from(31) {
                    let bit_index = 8 * k.as_usize() + 7;
                    let mask = (U256::one() << (bit_index + 1)) - U256::one();
                    if x.bit(bit_index) {
                        x | !mask
                    } else {
                        x & mask
                    }
                } else {
                    x
                };
                self.stack.push(result)?;
            }

            Opcode::Lt => {
                let (a, b) = (self.stack.pop()?, self.stack.pop()?);
                self.push_bool(a < b)?;
            }
            Opcode::Gt => {
                let (a, b) = (self.stack.pop()?, self.stack.pop()?);
                self.push_bool(a > b)?;
            }
            Opcode::SLt => {
                let (a, b) = (self.stack.pop()?, self.stack.pop()?);
                self.push_bool(signed_lt(a, b))?;
            }
            Opcode::SGt => {
                let (a, b) = (self.stack.pop()?, self.stack.pop()?);
                self.push_bool(signed_lt(b, a))?;
            }
            Opcode::Eq => {
                let (a, b) = (self.stack.pop()?, self.stack.pop()?);
                self.push_bool(a == b)?;
            }
            Opcode::IsZero => {
                let a = self.stack.pop()?;
                self.push_bool(a.is_zero())?;
            }
            Opcode::And => self.binary(|a, b| a & b)?,
            Opcode::Or => self.binary(|a, b| a | b)?,
            Opcode::Xor => self.binary(|a, b| a ^ b)?,
            Opcode::Not => {
                let a = self.stack.pop()?;
                self.stack.push(!a)?;
            }
            Opcode::Byte => self.binary(|i, x| {
                if i < U256::from(32) {
                    U256::from(u256_to_word(x)[i.as_usize()])
                } else {
                    U256::zero()
                }
            })?,
            Opcode::Shl => self.binary(|shift, value| {
                if shift >= U256::from(256) {
                    U256::zero()
                } else {
                    value << shift.as_usize()
                }
            })?,
            Opcode::Shr => self.binary(|shift, value| {
                if shift >= U256::from(256) {
                    U256::zero()
                } else {
                    value >> shift.as_usize()
                }
            })?,
            Opcode::Sar => self.binary(sar)?,

            Opcode::Keccak256 => {
                let offset = self.stack.pop()?;
                let size = self.stack.pop()?;
                let (offset, size) = self.memory_range(offset, size)?;
                self.charge(gas::keccak256_gas_cost(size))?;
                let digest = keccak256(&self.memory.read(offset, size));
                self.stack.push(U256::from_big_endian(digest.as_bytes()))?;
            }

            Opcode::Address => self.stack.push(self.frame.address.to_u256())?,
            Opcode::Balance => {
                let address = Address::from_u256(self.stack.pop()?);
                self.touch_account(address)?;
                let balance = self.state.balance(&address)?;
                self.stack.push(balance)?;
            }
            Opcode::Origin => self.stack.push(self.frame.origin.to_u256())?,
            Opcode::Caller => self.stack.push(self.frame.caller.to_u256())?,
            Opcode::CallValue => self.stack.push(self.frame.value)?,
            Opcode::CallDataLoad => {
                let offset = saturating_usize(self.stack.pop()?);
                let mut word = [0u8; 32];
                let input = self.frame.input.as_slice();
                if offset < input.len() {
                    let end = offset.saturating_add(32).min(input.len());
                    word[..end - offset].copy_from_slice(&input[offset..end]);
                }
                self.stack.push(U256::from_big_endian(&word))?;
            }
            Opcode::CallDataSize => self.stack.push(U256::from(self.frame.input.len()))?,
            Opcode::CallDataCopy | Opcode::CodeCopy => {
                let dest = self.stack.pop()?;
                let source_offset = saturating_usize(self.stack.pop()?);
                let size = self.stack.pop()?;
                let (dest, size) = self.memory_range(dest, size)?;
                self.charge(gas::copy_gas_cost(size))?;
                let source = if op == Opcode::CodeCopy {
                    self.code
                } else {
                    self.frame.input.as_slice()
                };
                self.memory.copy_from(dest, source, source_offset, size);
            }
            Opcode::CodeSize => self.stack.push(U256::from(self.code.len()))?,
            Opcode::GasPrice => self.stack.push(self.frame.gas_price)?,
            Opcode::ExtCodeSize => {
                let address = Address::from_u256(self.stack.pop()?);
                self.touch_account(address)?;
                let size = self.state.code(&address)?.len();
                self.stack.push(U256::from(size))?;
            }
            // Single-frame engine: the return buffer is always empty.
            Opcode::ReturnDataSize => self.stack.push(U256::zero())?,
            Opcode::ReturnDataCopy => {
                let dest = self.stack.pop()?;
                let offset = saturating_usize(self.stack.pop()?);
                let size = self.stack.pop()?;
                if offset > 0 || !size.is_zero() {
                    return Err(VmError::ReturnDataOutOfBounds {
                        offset,
                        size: saturating_usize(size),
                        available: 0,
                    });
                }
                self.memory_range(dest, size)?;
            }

            Opcode::BlockHash => {
                self.stack.pop()?;
                self.stack.push(U256::zero())?;
            }
            Opcode::Coinbase => self.stack.push(self.frame.block.coinbase.to_u256())?,
            Opcode::Timestamp => self.stack.push(U256::from(self.frame.block.timestamp))?,
            Opcode::Number => self.stack.push(U256::from(self.frame.block.number))?,
            Opcode::PrevRandao | Opcode::BaseFee => self.stack.push(U256::zero())?,
            Opcode::GasLimit => self.stack.push(U256::from(self.frame.block.gas_limit))?,
            Opcode::ChainId => self.stack.push(U256::from(self.frame.block.chain_id))?,
            Opcode::SelfBalance => {
                let balance = self.state.balance(&self.frame.address)?;
                self.stack.push(balance)?;
            }

            Opcode::Pop => {
                self.stack.pop()?;
            }
            Opcode::MLoad => {
                let offset = self.stack.pop()?;
                let (offset, _) = self.memory_range(offset, U256::from(32))?;
                let word = self.memory.read_word(offset);
                self.stack.push(U256::from_big_endian(&word))?;
            }
            Opcode::MStore => {
                let offset = self.stack.pop()?;
                let value = self.stack.pop()?;
                let (offset, _) = self.memory_range(offset, U256::from(32))?;
                self.memory.write(offset, &u256_to_word(value));
            }
            Opcode::MStore8 => {
                let offset = self.stack.pop()?;
                let value = self.stack.pop()?;
                let (offset, _) = self.memory_range(offset, U256::one())?;
                self.memory.write(offset, &[value.byte(0)]);
            }
            Opcode::SLoad => {
                let key = StorageKey::from_u256(self.stack.pop()?);
                let cost = if self.warm_slots.insert(key) {
                    costs::COLD_SLOAD
                } else {
                    costs::WARM_SLOAD
                };
                self.charge(cost)?;
                let value = self.state.storage(&self.frame.address, &key)?;
                self.stack.push(value.to_u256())?;
            }
            Opcode::SStore => {
                if self.frame.is_static {
                    return Err(VmError::WriteInStaticContext);
                }
                if self.gas_remaining <= SSTORE_SENTRY {
                    return Err(VmError::OutOfGas);
                }
                let key = StorageKey::from_u256(self.stack.pop()?);
                let value = self.stack.pop()?;
                let current = self.state.storage(&self.frame.address, &key)?.to_u256();
                // Nothing writes a slot before its first SSTORE in this frame.
                let original = *self.original_slots.entry(key).or_insert(current);
                let is_cold = self.warm_slots.insert(key);
                let (cost, refund) = gas::sstore_gas_cost(original, current, value, is_cold);
                self.charge(cost)?;
                self.gas_refund += refund;
                self.state
                    .set_storage(&self.frame.address, key, StorageValue::from_u256(value))?;
            }
            Opcode::Jump => {
                let dest = self.stack.pop()?;
                self.jump(dest)?;
            }
            Opcode::JumpI => {
                let dest = self.stack.pop()?;
                let condition = self.stack.pop()?;
                if !condition.is_zero() {
                    self.jump(dest)?;
                }
            }
            Opcode::Pc => self.stack.push(U256::from(pc))?,
            Opcode::MSize => self.stack.push(U256::from(self.memory.len()))?,
            Opcode::Gas => self.stack.push(U256::from(self.gas_remaining))?,
            Opcode::JumpDest => {}

            Opcode::Push(n) => {
                let n = usize::from(n);
                let mut word = [0u8; 32];
                let start = self.pc.min(self.code.len());
                let end = (self.pc + n).min(self.code.len());
                word[32 - n..32 - n + (end - start)].copy_from_slice(&self.code[start..end]);
                self.stack.push(U256::from_big_endian(&word))?;
                self.pc += n;
            }
            Opcode::Dup(n) => self.stack.dup(usize::from(n) - 1)?,
            Opcode::Swap(n) => self.stack.swap(usize::from(n))?,
            Opcode::Log(topic_count) => {
                if self.frame.is_static {
                    return Err(VmError::WriteInStaticContext);
                }
                let offset = self.stack.pop()?;
                let size = self.stack.pop()?;
                let mut topics = Vec::with_capacity(usize::from(topic_count));
                for _ in 0..topic_count {
                    topics.push(Hash::new(u256_to_word(self.stack.pop()?)));
                }
                let (offset, size) = self.memory_range(offset, size)?;
                self.charge(gas::log_gas_cost(size, topics.len()))?;
                self.logs.push(Log {
                    address: self.frame.address,
                    topics,
                    data: Bytes::from_vec(self.memory.read(offset, size)),
                });
            }

            Opcode::Return | Opcode::Revert => {
                let offset = self.stack.pop()?;
                let size = self.stack.pop()?;
                let (offset, size) = self.memory_range(offset, size)?;
                let output = Bytes::from_vec(self.memory.read(offset, size));
                return Ok(if op == Opcode::Return {
                    Control::Return(output)
                } else {
                    Control::Revert(output)
                });
            }
            Opcode::Invalid => return Err(VmError::InvalidOpcode(byte)),
            Opcode::Unsupported(byte) => return Err(VmError::Unsupported(byte)),
        }

        Ok(Control::Continue)
    }

    fn jump(&mut self, dest: U256) -> Result<(), VmError> {
        let dest = saturating_usize(dest);
        if !self.jump_dests.contains(&dest) {
            return Err(VmError::InvalidJump(dest));
        }
        self.pc = dest;
        Ok(())
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// JUMPDEST positions outside PUSH immediates.
fn analyze_jump_dests(code: &[u8]) -> HashSet<usize> {
    let mut dests = HashSet::new();
    let mut i = 0;
    while i < code.len() {
        let op = code[i];
        if op == 0x5B {
            dests.insert(i);
        }
        if (0x60..=0x7F).contains(&op) {
            i += usize::from(op - 0x5F);
        }
        i += 1;
    }
    dests
}

fn memory_index(value: U256) -> Result<usize, VmError> {
    if value > U256::from(MAX_MEMORY_SIZE) {
        return Err(VmError::MemoryLimitExceeded {
            requested: saturating_usize(value),
            max: MAX_MEMORY_SIZE,
        });
    }
    Ok(value.as_usize())
}

fn saturating_usize(value: U256) -> usize {
    if value > U256::from(usize::MAX) {
        usize::MAX
    } else {
        value.as_usize()
    }
}

fn negate(value: U256) -> U256 {
    (!value).overflowing_add(U256::one()).0
}

fn abs(value: U256) -> U256 {
    if value.bit(255) {
        negate(value)
    } else {
        value
    }
}

fn signed_lt(a: U256, b: U256) -> bool {
    match (a.bit(255), b.bit(255)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

fn signed_div(a: U256, b: U256) -> U256 {
    let quotient = abs(a) / abs(b);
    if a.bit(255) == b.bit(255) {
        quotient
    } else {
        negate(quotient)
    }
}

fn signed_mod(a: U256, b: U256) -> U256 {
    let remainder = abs(a) % abs(b);
    if a.bit(255) {
        negate(remainder)
    } else {
        remainder
    }
}

fn sar(shift: U256, value: U256) -> U256 {
    let negative = value.bit(255);
    if shift >= U256::from(256) {
        return if negative { U256::MAX } else { U256::zero() };
    }
    let shift = shift.as_usize();
    let shifted = value >> shift;
    if negative && shift > 0 {
        shifted | (U256::MAX << (256 - shift))
    } else {
        shifted
    }
}

fn exp_by_squaring(mut base: U256, mut exponent: U256) -> U256 {
    let mut result = U256::one();
    while !exponent.is_zero() {
        if exponent.bit(0) {
            result = result.overflowing_mul(base).0;
        }
        exponent >>= 1usize;
        base = base.overflowing_mul(base).0;
    }
    result
}

/// Low 256 bits of a 512-bit value.
fn u512_low(value: U512) -> U256 {
    let mut bytes = [0u8; 64];
    value.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}
