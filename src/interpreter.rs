//! The opcode dispatch loop.
//!
//! Script is a stack machine that evaluates a predicate while mutating the
//! transactional contract state. There are no loops; execution is bounded by
//! the script size, opcode count and stack depth caps.

use crate::bigint::BigInt;
use crate::hashing;
use crate::script::{
    check_minimal_push,
    opcodes::*,
    Script, MAX_OPS_PER_SCRIPT, MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPT_SIZE, MAX_STACK_SIZE,
};
use crate::script_num::{
    is_minimally_encoded, minimally_encode, ScriptNum, ScriptNumError, MAXIMUM_NUMBER_SIZE,
};
use crate::state::{compact_difficulty, decode_header, AtomicalRef, BlockInfo, StateContext};
use crate::tx::{
    check_lock_time, check_sequence, sequence_disabled, ExecutionContext, SignatureChecker,
};

/// Keyspace and key-name byte cap for the contract KV store.
const MAX_STATE_KEY_SIZE: usize = 1_024;

/// Numeric cap for lock-time operands: five bytes covers the full `u32`
/// range of the transaction fields.
const LOCKTIME_OPERAND_SIZE: usize = 5;

const BITS_PER_BYTE: usize = 8;

/// Detailed interpreter faults, reported together with the 0-based index of
/// the opcode that raised them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptError {
    Ok,
    Unknown,
    EvalFalse,
    OpReturn,

    // Max sizes
    ScriptSize,
    PushSize,
    OpCount,
    StackSize,

    // Operand checks
    InvalidOperandSize,
    InvalidNumberRange,
    ImpossibleEncoding,
    InvalidSplitRange,

    // Failed verify operations
    Verify,
    EqualVerify,
    CheckDataSigVerify,
    NumEqualVerify,

    // Logical/format errors
    BadOpcode,
    DisabledOpcode,
    InvalidStackOperation,
    InvalidAltstackOperation,
    UnbalancedConditional,

    // Divisor errors
    DivByZero,
    ModByZero,

    // Lock times
    NegativeLockTime,
    UnsatisfiedLockTime,

    // Malleability
    MinimalData,
    SigPushOnly,
    SigNullFail,
    CleanStack,
    MinimalIf,

    // Native introspection
    ContextNotPresent,
    InvalidTxInputIndex,
    InvalidTxOutputIndex,

    // AVM domain
    InvalidAtomicalRefSize,
    InvalidAvmStateKeyNotFound,
    InvalidAvmStateKeySize,
    InvalidAvmWithdrawFtAmount,
    InvalidAvmWithdrawFt,
    InvalidAvmWithdrawFtOutputIndex,
    InvalidAvmWithdrawNft,
    InvalidAvmWithdrawNftOutputIndex,
    InvalidAvmFtItemIndex,
    InvalidAvmNftItemIndex,
    InvalidAvmFtBalanceType,
    InvalidAvmNftExistsType,
    InvalidAvmFtItemType,
    InvalidAvmNftItemType,
    InvalidAvmFtCountType,
    InvalidAvmNftCountType,
    InvalidAvmBlockInfoItem,
    InvalidAvmBlockHeaderSize,
    InvalidAvmHashFunc,
    InvalidAvmFtBalanceAdd,
    InvalidAvmNftPut,
    InvalidAvmCheckAuthSig,
    InvalidAvmCheckAuthSigVerify,
    InvalidAvmCheckAuthSigNull,

    // Script enhancements
    BigInt,
}

fn num_error(err: ScriptNumError) -> ScriptError {
    match err {
        // Malformed stack numbers surface through the generic exception
        // path, arithmetic faults through the big-integer one.
        ScriptNumError::Overflow | ScriptNumError::MinimalEncoding => ScriptError::Unknown,
        ScriptNumError::BigInt => ScriptError::BigInt,
    }
}

/// The value stack. Elements are plain byte strings; pushes from scripts are
/// size-capped at the call sites that require it.
#[derive(Debug, Default, Clone)]
pub struct Stack {
    items: Vec<Vec<u8>>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: Vec<u8>) {
        self.items.push(item);
    }

    pub fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.items.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    /// Element `depth` positions below the top; `peek(0)` is the top.
    pub fn peek(&self, depth: usize) -> Result<&Vec<u8>, ScriptError> {
        let len = self.items.len();
        if depth >= len {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(&self.items[len - 1 - depth])
    }

    pub fn peek_mut(&mut self, depth: usize) -> Result<&mut Vec<u8>, ScriptError> {
        let len = self.items.len();
        if depth >= len {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(&mut self.items[len - 1 - depth])
    }

    pub fn swap(&mut self, a: usize, b: usize) -> Result<(), ScriptError> {
        let len = self.items.len();
        if a >= len || b >= len {
            return Err(ScriptError::InvalidStackOperation);
        }
        self.items.swap(len - 1 - a, len - 1 - b);
        Ok(())
    }

    pub fn remove(&mut self, depth: usize) -> Result<Vec<u8>, ScriptError> {
        let len = self.items.len();
        if depth >= len {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(self.items.remove(len - 1 - depth))
    }

    /// Inserts `item` so that it ends up `depth` positions below the top.
    pub fn insert(&mut self, depth: usize, item: Vec<u8>) -> Result<(), ScriptError> {
        let len = self.items.len();
        if depth > len {
            return Err(ScriptError::InvalidStackOperation);
        }
        self.items.insert(len - depth, item);
        Ok(())
    }

    pub fn last(&self) -> Option<&Vec<u8>> {
        self.items.last()
    }

    pub fn items(&self) -> &[Vec<u8>] {
        &self.items
    }
}

/// Condition bookkeeping for `IF`/`ELSE`/`ENDIF`.
///
/// Tracked as `(size, first_false_pos)` instead of a materialized vector:
/// execution only ever observes whether all values are true, so flipping
/// anything but the first false is unobservable.
#[derive(Debug)]
struct ConditionStack {
    size: u32,
    first_false_pos: u32,
}

impl ConditionStack {
    const NO_FALSE: u32 = u32::MAX;

    fn new() -> Self {
        Self {
            size: 0,
            first_false_pos: Self::NO_FALSE,
        }
    }

    fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn all_true(&self) -> bool {
        self.first_false_pos == Self::NO_FALSE
    }

    fn push_back(&mut self, value: bool) {
        if self.first_false_pos == Self::NO_FALSE && !value {
            self.first_false_pos = self.size;
        }
        self.size += 1;
    }

    fn pop_back(&mut self) {
        self.size -= 1;
        if self.first_false_pos == self.size {
            self.first_false_pos = Self::NO_FALSE;
        }
    }

    fn toggle_top(&mut self) {
        if self.first_false_pos == Self::NO_FALSE {
            self.first_false_pos = self.size - 1;
        } else if self.first_false_pos == self.size - 1 {
            self.first_false_pos = Self::NO_FALSE;
        }
        // A false below the top stays authoritative either way.
    }
}

pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            // Negative zero is false.
            if i == data.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

fn bool_element(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

// Byte-level shifts treat the element as a big-endian bit string and
// preserve its length, filling with zeros.

fn rshift_bytes(x: &[u8], n: usize) -> Vec<u8> {
    let bit_shift = n % BITS_PER_BYTE;
    let byte_shift = n / BITS_PER_BYTE;
    let mut result = vec![0u8; x.len()];
    for i in 0..x.len() {
        let k = i + byte_shift;
        if bit_shift == 0 {
            if k < x.len() {
                result[k] = x[i];
            }
            continue;
        }
        if k < x.len() {
            result[k] |= x[i] >> bit_shift;
        }
        if k + 1 < x.len() {
            result[k + 1] |= x[i] << (BITS_PER_BYTE - bit_shift);
        }
    }
    result
}

fn lshift_bytes(x: &[u8], n: usize) -> Vec<u8> {
    let bit_shift = n % BITS_PER_BYTE;
    let byte_shift = n / BITS_PER_BYTE;
    let mut result = vec![0u8; x.len()];
    for i in (0..x.len()).rev() {
        if i < byte_shift {
            continue;
        }
        let k = i - byte_shift;
        if bit_shift == 0 {
            result[k] = x[i];
            continue;
        }
        result[k] |= x[i] << bit_shift;
        if k > 0 {
            result[k - 1] |= x[i] >> (BITS_PER_BYTE - bit_shift);
        }
    }
    result
}

/// Executes unlock/lock script pairs against a state context.
pub struct Interpreter<'a> {
    checker: &'a SignatureChecker,
    context: Option<&'a ExecutionContext>,
    state: &'a mut StateContext,
    error_op_index: u32,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        checker: &'a SignatureChecker,
        context: Option<&'a ExecutionContext>,
        state: &'a mut StateContext,
    ) -> Self {
        Self {
            checker,
            context,
            state,
            error_op_index: 0,
        }
    }

    /// 0-based index of the opcode that raised the last error, relative to
    /// the script it occurred in.
    pub fn error_op_index(&self) -> u32 {
        self.error_op_index
    }

    /// Runs `unlock` then `lock` on one stack and applies the final stack
    /// verdict: non-empty, truthy top, depth exactly one.
    pub fn verify(
        &mut self,
        unlock: &Script,
        lock: &Script,
        stack: &mut Stack,
    ) -> Result<(), ScriptError> {
        self.error_op_index = 0;
        if !unlock.is_push_only() {
            return Err(ScriptError::SigPushOnly);
        }
        self.eval(stack, unlock)?;
        self.eval(stack, lock)?;
        match stack.last() {
            None => Err(ScriptError::EvalFalse),
            Some(top) if !cast_to_bool(top) => Err(ScriptError::EvalFalse),
            _ if stack.len() != 1 => Err(ScriptError::CleanStack),
            _ => Ok(()),
        }
    }

    /// Evaluates one script over the given stack.
    pub fn eval(&mut self, stack: &mut Stack, script: &Script) -> Result<(), ScriptError> {
        self.error_op_index = 0;
        if script.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptSize);
        }

        let mut alt_stack = Stack::new();
        let mut cond_stack = ConditionStack::new();
        let mut op_count = 0usize;
        let mut op_index = 0u32;

        for instruction in script.instructions() {
            self.error_op_index = op_index;
            op_index += 1;

            let executing = cond_stack.all_true();
            let instruction = instruction.map_err(|_| ScriptError::BadOpcode)?;
            let opcode = instruction.opcode;

            if let Some(push) = instruction.push {
                if push.len() > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushSize);
                }
            }

            // OP_RESERVED does not count towards the opcode limit.
            if opcode > OP_16 {
                op_count += 1;
                if op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ScriptError::OpCount);
                }
            }

            if matches!(opcode, OP_2MUL | OP_2DIV) {
                return Err(ScriptError::DisabledOpcode);
            }

            if executing && opcode <= OP_PUSHDATA4 {
                let push = instruction.push.unwrap_or(&[]);
                if !check_minimal_push(push, opcode) {
                    return Err(ScriptError::MinimalData);
                }
                stack.push(push.to_vec());
            } else if executing || (OP_IF..=OP_ENDIF).contains(&opcode) {
                match opcode {
                    OP_IF | OP_NOTIF => {
                        // <expression> if [statements] [else [statements]] endif
                        let mut value = false;
                        if executing {
                            if stack.is_empty() {
                                return Err(ScriptError::UnbalancedConditional);
                            }
                            let top = stack.peek(0)?;
                            if top.len() > 1 || (top.len() == 1 && top[0] != 1) {
                                return Err(ScriptError::MinimalIf);
                            }
                            value = cast_to_bool(top);
                            if opcode == OP_NOTIF {
                                value = !value;
                            }
                            stack.pop()?;
                        }
                        cond_stack.push_back(value);
                    }

                    OP_ELSE => {
                        if cond_stack.is_empty() {
                            return Err(ScriptError::UnbalancedConditional);
                        }
                        cond_stack.toggle_top();
                    }

                    OP_ENDIF => {
                        if cond_stack.is_empty() {
                            return Err(ScriptError::UnbalancedConditional);
                        }
                        cond_stack.pop_back();
                    }

                    OP_RETURN => {
                        if stack.is_empty() {
                            // Terminate successfully; the rest of the script
                            // cannot affect validity.
                            return Ok(());
                        }
                        return Err(ScriptError::OpReturn);
                    }

                    _ => self.execute_opcode(opcode, stack, &mut alt_stack)?,
                }
            }

            if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackSize);
            }
        }

        if !cond_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }

        Ok(())
    }

    fn parse_num(&self, bytes: &[u8]) -> Result<ScriptNum, ScriptError> {
        ScriptNum::from_bytes(bytes, MAXIMUM_NUMBER_SIZE).map_err(num_error)
    }

    fn context(&self) -> Result<&'a ExecutionContext, ScriptError> {
        self.context.ok_or(ScriptError::ContextNotPresent)
    }

    fn execute_opcode(
        &mut self,
        opcode: u8,
        stack: &mut Stack,
        alt_stack: &mut Stack,
    ) -> Result<(), ScriptError> {
        match opcode {
            //
            // Push value
            //
            OP_1NEGATE | OP_1..=OP_16 => {
                let n = opcode as i64 - (OP_1 as i64 - 1);
                stack.push(ScriptNum::from_i64(n).to_bytes());
            }

            //
            // Control
            //
            OP_NOP => {}

            OP_CHECKLOCKTIMEVERIFY => {
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let n = ScriptNum::from_bytes(stack.peek(0)?, LOCKTIME_OPERAND_SIZE)
                    .map_err(num_error)?;
                if n.is_negative() {
                    return Err(ScriptError::NegativeLockTime);
                }
                // Five-byte operands always fit an i64.
                let lock_time = n.to_i64().ok_or(ScriptError::Unknown)?;
                let context = self.context()?;
                if !check_lock_time(context.tx(), 0, lock_time) {
                    return Err(ScriptError::UnsatisfiedLockTime);
                }
            }

            OP_CHECKSEQUENCEVERIFY => {
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let n = ScriptNum::from_bytes(stack.peek(0)?, LOCKTIME_OPERAND_SIZE)
                    .map_err(num_error)?;
                if n.is_negative() {
                    return Err(ScriptError::NegativeLockTime);
                }
                let sequence = n.to_i64().ok_or(ScriptError::Unknown)?;
                if sequence_disabled(sequence) {
                    // Disabled-flag operands behave as a NOP.
                } else {
                    let context = self.context()?;
                    if !check_sequence(context.tx(), 0, sequence) {
                        return Err(ScriptError::UnsatisfiedLockTime);
                    }
                }
            }

            OP_NOP1 | OP_NOP4..=OP_NOP10 => {}

            OP_VERIFY => {
                // (true -- ) or (false -- false) and fail
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                if !cast_to_bool(stack.peek(0)?) {
                    return Err(ScriptError::Verify);
                }
                stack.pop()?;
            }

            //
            // Stack ops
            //
            OP_TOALTSTACK => {
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                alt_stack.push(stack.pop()?);
            }

            OP_FROMALTSTACK => {
                if alt_stack.is_empty() {
                    return Err(ScriptError::InvalidAltstackOperation);
                }
                stack.push(alt_stack.pop()?);
            }

            OP_2DROP => {
                // (x1 x2 -- )
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.pop()?;
                stack.pop()?;
            }

            OP_2DUP => {
                // (x1 x2 -- x1 x2 x1 x2)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let x1 = stack.peek(1)?.clone();
                let x2 = stack.peek(0)?.clone();
                stack.push(x1);
                stack.push(x2);
            }

            OP_3DUP => {
                // (x1 x2 x3 -- x1 x2 x3 x1 x2 x3)
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let x1 = stack.peek(2)?.clone();
                let x2 = stack.peek(1)?.clone();
                let x3 = stack.peek(0)?.clone();
                stack.push(x1);
                stack.push(x2);
                stack.push(x3);
            }

            OP_2OVER => {
                // (x1 x2 x3 x4 -- x1 x2 x3 x4 x1 x2)
                if stack.len() < 4 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let x1 = stack.peek(3)?.clone();
                let x2 = stack.peek(2)?.clone();
                stack.push(x1);
                stack.push(x2);
            }

            OP_2ROT => {
                // (x1 x2 x3 x4 x5 x6 -- x3 x4 x5 x6 x1 x2)
                if stack.len() < 6 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let x1 = stack.remove(5)?;
                let x2 = stack.remove(4)?;
                stack.push(x1);
                stack.push(x2);
            }

            OP_2SWAP => {
                // (x1 x2 x3 x4 -- x3 x4 x1 x2)
                if stack.len() < 4 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.swap(3, 1)?;
                stack.swap(2, 0)?;
            }

            OP_IFDUP => {
                // (x -- 0 | x x)
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let top = stack.peek(0)?.clone();
                if cast_to_bool(&top) {
                    stack.push(top);
                }
            }

            OP_DEPTH => {
                // ( -- stacksize), in the wide representation so depths near
                // the cap serialize identically everywhere.
                stack.push(BigInt::from(stack.len()).serialize());
            }

            OP_DROP => {
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.pop()?;
            }

            OP_DUP => {
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let top = stack.peek(0)?.clone();
                stack.push(top);
            }

            OP_NIP => {
                // (x1 x2 -- x2)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.remove(1)?;
            }

            OP_OVER => {
                // (x1 x2 -- x1 x2 x1)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let x1 = stack.peek(1)?.clone();
                stack.push(x1);
            }

            OP_PICK | OP_ROLL => {
                // (xn ... x2 x1 x0 n -- xn ... x2 x1 x0 xn)
                // (xn ... x2 x1 x0 n -- ... x2 x1 x0 xn)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let sn = self.parse_num(stack.peek(0)?)?;
                stack.pop()?;
                if sn.is_negative() || sn >= ScriptNum::from_u64(stack.len() as u64) {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let depth = sn.to_size().ok_or(ScriptError::Unknown)?;
                let value = stack.peek(depth)?.clone();
                if opcode == OP_ROLL {
                    stack.remove(depth)?;
                }
                stack.push(value);
            }

            OP_ROT => {
                // (x1 x2 x3 -- x2 x3 x1)
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.swap(2, 1)?;
                stack.swap(1, 0)?;
            }

            OP_SWAP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.swap(1, 0)?;
            }

            OP_TUCK => {
                // (x1 x2 -- x2 x1 x2)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let top = stack.peek(0)?.clone();
                stack.insert(2, top)?;
            }

            OP_SIZE => {
                // (in -- in size)
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let size = stack.peek(0)?.len();
                stack.push(BigInt::from(size).serialize());
            }

            //
            // Bitwise logic
            //
            OP_AND | OP_OR | OP_XOR => {
                // (x1 x2 -- out)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let x2 = stack.peek(0)?.clone();
                let x1 = stack.peek_mut(1)?;
                if x1.len() != x2.len() {
                    return Err(ScriptError::InvalidOperandSize);
                }
                match opcode {
                    OP_AND => {
                        for (a, b) in x1.iter_mut().zip(&x2) {
                            *a &= b;
                        }
                    }
                    OP_OR => {
                        for (a, b) in x1.iter_mut().zip(&x2) {
                            *a |= b;
                        }
                    }
                    _ => {
                        for (a, b) in x1.iter_mut().zip(&x2) {
                            *a ^= b;
                        }
                    }
                }
                stack.pop()?;
            }

            OP_INVERT => {
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                for byte in stack.peek_mut(0)?.iter_mut() {
                    *byte = !*byte;
                }
            }

            OP_LSHIFT | OP_RSHIFT => {
                // (x n -- out)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let n = self.parse_num(stack.peek(0)?)?;
                if n.is_negative() {
                    return Err(ScriptError::InvalidNumberRange);
                }
                let value = stack.peek(1)?.clone();
                stack.pop()?;
                stack.pop()?;
                let bit_len = ScriptNum::from_u64((value.len() * BITS_PER_BYTE) as u64);
                let result = if n >= bit_len {
                    vec![0u8; value.len()]
                } else {
                    let shift = n.to_size().ok_or(ScriptError::Unknown)?;
                    if opcode == OP_LSHIFT {
                        lshift_bytes(&value, shift)
                    } else {
                        rshift_bytes(&value, shift)
                    }
                };
                stack.push(result);
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                // (x1 x2 -- bool)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let equal = stack.peek(1)? == stack.peek(0)?;
                stack.pop()?;
                stack.pop()?;
                stack.push(bool_element(equal));
                if opcode == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::EqualVerify);
                    }
                    stack.pop()?;
                }
            }

            //
            // Numeric
            //
            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                // (in -- out)
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let bn = self.parse_num(stack.peek(0)?)?;
                let one = ScriptNum::from_bigint(BigInt::from(1i64));
                let result = match opcode {
                    OP_1ADD => bn.add(&one).map_err(num_error)?,
                    OP_1SUB => bn.sub(&one).map_err(num_error)?,
                    OP_NEGATE => bn.neg().map_err(num_error)?,
                    OP_ABS => {
                        if bn.is_negative() {
                            bn.neg().map_err(num_error)?
                        } else {
                            bn
                        }
                    }
                    OP_NOT => ScriptNum::from_i64(bn.is_zero() as i64),
                    _ => ScriptNum::from_i64(!bn.is_zero() as i64),
                };
                stack.pop()?;
                stack.push(result.to_bytes());
            }

            OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_MOD | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL
            | OP_NUMEQUALVERIFY | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN
            | OP_LESSTHANOREQUAL | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                // (x1 x2 -- out)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let bn1 = self.parse_num(stack.peek(1)?)?;
                let bn2 = self.parse_num(stack.peek(0)?)?;
                let result = match opcode {
                    OP_ADD => bn1.add(&bn2).map_err(num_error)?,
                    OP_SUB => bn1.sub(&bn2).map_err(num_error)?,
                    OP_MUL => bn1.mul(&bn2).map_err(num_error)?,
                    OP_DIV => {
                        if bn2.is_zero() {
                            return Err(ScriptError::DivByZero);
                        }
                        bn1.div(&bn2).map_err(num_error)?
                    }
                    OP_MOD => {
                        if bn2.is_zero() {
                            return Err(ScriptError::ModByZero);
                        }
                        bn1.rem(&bn2).map_err(num_error)?
                    }
                    OP_BOOLAND => {
                        ScriptNum::from_i64((!bn1.is_zero() && !bn2.is_zero()) as i64)
                    }
                    OP_BOOLOR => ScriptNum::from_i64((!bn1.is_zero() || !bn2.is_zero()) as i64),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => ScriptNum::from_i64((bn1 == bn2) as i64),
                    OP_NUMNOTEQUAL => ScriptNum::from_i64((bn1 != bn2) as i64),
                    OP_LESSTHAN => ScriptNum::from_i64((bn1 < bn2) as i64),
                    OP_GREATERTHAN => ScriptNum::from_i64((bn1 > bn2) as i64),
                    OP_LESSTHANOREQUAL => ScriptNum::from_i64((bn1 <= bn2) as i64),
                    OP_GREATERTHANOREQUAL => ScriptNum::from_i64((bn1 >= bn2) as i64),
                    OP_MIN => {
                        if bn1 < bn2 {
                            bn1
                        } else {
                            bn2
                        }
                    }
                    _ => {
                        if bn1 > bn2 {
                            bn1
                        } else {
                            bn2
                        }
                    }
                };
                stack.pop()?;
                stack.pop()?;
                stack.push(result.to_bytes());

                if opcode == OP_NUMEQUALVERIFY {
                    if !cast_to_bool(stack.peek(0)?) {
                        return Err(ScriptError::NumEqualVerify);
                    }
                    stack.pop()?;
                }
            }

            OP_WITHIN => {
                // (x min max -- out)
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let bn1 = self.parse_num(stack.peek(2)?)?;
                let bn2 = self.parse_num(stack.peek(1)?)?;
                let bn3 = self.parse_num(stack.peek(0)?)?;
                let value = bn2 <= bn1 && bn1 < bn3;
                stack.pop()?;
                stack.pop()?;
                stack.pop()?;
                stack.push(bool_element(value));
            }

            //
            // Crypto
            //
            OP_RIPEMD160 | OP_SHA1 | OP_SHA256 | OP_HASH160 | OP_HASH256 => {
                // (in -- hash)
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let data = stack.pop()?;
                let digest: Vec<u8> = match opcode {
                    OP_RIPEMD160 => hashing::ripemd160(&data).to_vec(),
                    OP_SHA1 => hashing::sha1(&data).to_vec(),
                    OP_SHA256 => hashing::sha256(&data).to_vec(),
                    OP_HASH160 => hashing::hash160(&data).to_vec(),
                    _ => hashing::hash256(&data).to_vec(),
                };
                stack.push(digest);
            }

            OP_CHECKDATASIG | OP_CHECKDATASIGVERIFY => {
                // (sig message pubkey -- bool)
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let sig = stack.peek(2)?.clone();
                let message = stack.peek(1)?.clone();
                let pub_key = stack.peek(0)?.clone();

                let mut success = false;
                if !sig.is_empty() {
                    let digest = hashing::sha256(&message);
                    success = self.checker.verify_signature(&sig, &pub_key, &digest);
                    if !success {
                        return Err(ScriptError::SigNullFail);
                    }
                }

                stack.pop()?;
                stack.pop()?;
                stack.pop()?;
                stack.push(bool_element(success));
                if opcode == OP_CHECKDATASIGVERIFY {
                    if !success {
                        return Err(ScriptError::CheckDataSigVerify);
                    }
                    stack.pop()?;
                }
            }

            OP_CHECKAUTHSIG | OP_CHECKAUTHSIGVERIFY => {
                let context = self.context()?;
                let sig = context.auth_sig();
                let pub_key = context.auth_pub_key();
                match (sig, pub_key) {
                    (Some(sig), Some(pub_key)) => {
                        let message = context
                            .auth_message()
                            .ok_or(ScriptError::InvalidAvmCheckAuthSig)?;
                        let digest = hashing::sha256(&message);
                        if !self.checker.verify_signature(&sig, pub_key, &digest) {
                            return Err(ScriptError::InvalidAvmCheckAuthSigNull);
                        }
                        // The authorized key becomes script-visible.
                        stack.push(pub_key.to_vec());
                        if opcode == OP_CHECKAUTHSIGVERIFY {
                            stack.pop()?;
                        }
                    }
                    (None, None) => {
                        if opcode == OP_CHECKAUTHSIGVERIFY {
                            return Err(ScriptError::InvalidAvmCheckAuthSigVerify);
                        }
                        stack.push(bool_element(false));
                    }
                    _ => return Err(ScriptError::InvalidAvmCheckAuthSig),
                }
            }

            //
            // Byte string operations
            //
            OP_CAT => {
                // (x1 x2 -- out)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                if stack.peek(1)?.len() + stack.peek(0)?.len() > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushSize);
                }
                let x2 = stack.pop()?;
                stack.peek_mut(0)?.extend_from_slice(&x2);
            }

            OP_SPLIT => {
                // (in position -- x1 x2)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let n = self.parse_num(stack.peek(0)?)?;
                let data_len = stack.peek(1)?.len();
                if n.is_negative() || n > ScriptNum::from_u64(data_len as u64) {
                    return Err(ScriptError::InvalidSplitRange);
                }
                let position = n.to_size().ok_or(ScriptError::Unknown)?;
                let data = stack.peek(1)?.clone();
                *stack.peek_mut(1)? = data[..position].to_vec();
                *stack.peek_mut(0)? = data[position..].to_vec();
            }

            OP_REVERSEBYTES => {
                // (in -- out)
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                stack.peek_mut(0)?.reverse();
            }

            //
            // Conversion operations
            //
            OP_NUM2BIN => {
                // (in size -- out)
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let n = self.parse_num(stack.peek(0)?)?;
                let size = match n.to_size() {
                    Some(size) if size <= MAX_SCRIPT_ELEMENT_SIZE => size,
                    _ => return Err(ScriptError::PushSize),
                };
                stack.pop()?;
                let raw = stack.peek_mut(0)?;
                minimally_encode(raw);
                if raw.len() > size {
                    return Err(ScriptError::ImpossibleEncoding);
                }
                if raw.len() < size {
                    let mut sign_bit = 0u8;
                    if let Some(last) = raw.last_mut() {
                        sign_bit = *last & 0x80;
                        *last &= 0x7f;
                    }
                    raw.resize(size, 0x00);
                    if let Some(last) = raw.last_mut() {
                        *last = sign_bit;
                    }
                }
            }

            OP_BIN2NUM => {
                // (in -- out)
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let raw = stack.peek_mut(0)?;
                minimally_encode(raw);
                if !is_minimally_encoded(raw, MAXIMUM_NUMBER_SIZE) {
                    return Err(ScriptError::InvalidNumberRange);
                }
            }

            //
            // Native introspection (nullary)
            //
            OP_TXVERSION | OP_TXINPUTCOUNT | OP_TXOUTPUTCOUNT | OP_TXLOCKTIME => {
                let context = self.context()?;
                let tx = context.tx();
                let value = match opcode {
                    OP_TXVERSION => ScriptNum::from_i64(tx.version.0 as i64),
                    OP_TXINPUTCOUNT => ScriptNum::from_u64(tx.input.len() as u64),
                    OP_TXOUTPUTCOUNT => ScriptNum::from_u64(tx.output.len() as u64),
                    _ => ScriptNum::from_u64(tx.lock_time.to_consensus_u32() as u64),
                };
                stack.push(value.to_bytes());
            }

            //
            // Native introspection (unary)
            //
            OP_OUTPOINTTXHASH | OP_OUTPOINTINDEX | OP_INPUTBYTECODE | OP_INPUTSEQUENCENUMBER
            | OP_OUTPUTVALUE | OP_OUTPUTBYTECODE => {
                let context = self.context()?;
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let index = self.parse_num(stack.peek(0)?)?.to_i32_saturating();
                stack.pop()?;
                let tx = context.tx();

                let input = |index: i32| -> Result<usize, ScriptError> {
                    if index < 0 || index as usize >= tx.input.len() {
                        Err(ScriptError::InvalidTxInputIndex)
                    } else {
                        Ok(index as usize)
                    }
                };
                let output = |index: i32| -> Result<usize, ScriptError> {
                    if index < 0 || index as usize >= tx.output.len() {
                        Err(ScriptError::InvalidTxOutputIndex)
                    } else {
                        Ok(index as usize)
                    }
                };

                match opcode {
                    OP_OUTPOINTTXHASH => {
                        let txin = &tx.input[input(index)?];
                        stack.push(txid_bytes(txin).to_vec());
                    }
                    OP_OUTPOINTINDEX => {
                        let txin = &tx.input[input(index)?];
                        stack.push(
                            ScriptNum::from_u64(txin.previous_output.vout as u64).to_bytes(),
                        );
                    }
                    OP_INPUTBYTECODE => {
                        let bytecode = context
                            .input_bytecode(input(index)?)
                            .ok_or(ScriptError::InvalidTxInputIndex)?;
                        if bytecode.len() > MAX_SCRIPT_ELEMENT_SIZE {
                            return Err(ScriptError::PushSize);
                        }
                        stack.push(bytecode.to_vec());
                    }
                    OP_INPUTSEQUENCENUMBER => {
                        let txin = &tx.input[input(index)?];
                        stack.push(ScriptNum::from_u64(txin.sequence.0 as u64).to_bytes());
                    }
                    OP_OUTPUTVALUE => {
                        let txout = &tx.output[output(index)?];
                        stack.push(ScriptNum::from_u64(txout.value.to_sat()).to_bytes());
                    }
                    _ => {
                        let txout = &tx.output[output(index)?];
                        let bytecode = txout.script_pubkey.as_bytes();
                        if bytecode.len() > MAX_SCRIPT_ELEMENT_SIZE {
                            return Err(ScriptError::PushSize);
                        }
                        stack.push(bytecode.to_vec());
                    }
                }
            }

            //
            // AVM state opcodes (unary)
            //
            OP_FT_COUNT | OP_NFT_COUNT | OP_NFT_PUT | OP_FT_BALANCE_ADD => {
                self.context()?;
                if stack.is_empty() {
                    return Err(ScriptError::InvalidStackOperation);
                }

                match opcode {
                    OP_FT_BALANCE_ADD => {
                        let id = atomical_ref(stack.peek(0)?)?;
                        if !self.state.contract_ft_balance_add(&id) {
                            return Err(ScriptError::InvalidAvmFtBalanceAdd);
                        }
                        stack.pop()?;
                    }
                    OP_NFT_PUT => {
                        let id = atomical_ref(stack.peek(0)?)?;
                        if !self.state.contract_nft_put(&id) {
                            return Err(ScriptError::InvalidAvmNftPut);
                        }
                        stack.pop()?;
                    }
                    OP_FT_COUNT => {
                        let kind = self.parse_num(stack.peek(0)?)?.to_i32_saturating();
                        if !(0..=1).contains(&kind) {
                            return Err(ScriptError::InvalidAvmFtCountType);
                        }
                        stack.pop()?;
                        let count = if kind == 0 {
                            self.state.ft_count()
                        } else {
                            self.state.ft_count_incoming()
                        };
                        stack.push(ScriptNum::from_u64(count as u64).to_bytes());
                    }
                    _ => {
                        let kind = self.parse_num(stack.peek(0)?)?.to_i32_saturating();
                        if !(0..=1).contains(&kind) {
                            return Err(ScriptError::InvalidAvmNftCountType);
                        }
                        stack.pop()?;
                        let count = if kind == 0 {
                            self.state.nft_count()
                        } else {
                            self.state.nft_count_incoming()
                        };
                        stack.push(ScriptNum::from_u64(count as u64).to_bytes());
                    }
                }
            }

            //
            // AVM state opcodes (binary)
            //
            OP_KV_EXISTS | OP_KV_GET | OP_KV_DELETE | OP_NFT_WITHDRAW | OP_HASH_FN
            | OP_GETBLOCKINFO | OP_DECODEBLOCKINFO | OP_FT_BALANCE | OP_FT_ITEM | OP_NFT_ITEM
            | OP_NFT_EXISTS => {
                let context = self.context()?;
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let first = stack.peek(1)?.clone();
                let second = stack.peek(0)?.clone();

                match opcode {
                    OP_GETBLOCKINFO => {
                        let height = self.parse_num(&first)?.to_i32_saturating();
                        let field = self.parse_num(&second)?.to_i32_saturating();
                        if !(0..=8).contains(&field) {
                            return Err(ScriptError::InvalidAvmBlockInfoItem);
                        }
                        if height < 0 {
                            return Err(ScriptError::Unknown);
                        }
                        stack.pop()?;
                        stack.pop()?;
                        let external = self.state.external();
                        let info = external
                            .block_info(height as u32)
                            .ok_or(ScriptError::Unknown)?;
                        if field == 7 {
                            stack.push(info.raw.clone());
                        } else if field == 8 {
                            let resolved = external.resolve_height(height as u32);
                            stack.push(ScriptNum::from_u64(resolved as u64).to_bytes());
                        } else {
                            stack.push(header_field(info, field));
                        }
                    }
                    OP_FT_BALANCE => {
                        let id = atomical_ref(&first)?;
                        let kind = self.parse_num(&second)?.to_i32_saturating();
                        if !(0..=1).contains(&kind) {
                            return Err(ScriptError::InvalidAvmFtBalanceType);
                        }
                        let balance = if kind == 0 {
                            self.state.contract_ft_balance(&id)
                        } else {
                            self.state.contract_ft_balance_incoming(&id)
                        };
                        stack.pop()?;
                        stack.pop()?;
                        stack.push(ScriptNum::from_u64(balance).to_bytes());
                    }
                    OP_NFT_EXISTS => {
                        let id = atomical_ref(&first)?;
                        let kind = self.parse_num(&second)?.to_i32_saturating();
                        if !(0..=1).contains(&kind) {
                            return Err(ScriptError::InvalidAvmNftExistsType);
                        }
                        let exists = if kind == 0 {
                            self.state.contract_nft_exists(&id)
                        } else {
                            self.state.contract_nft_exists_incoming(&id)
                        };
                        stack.pop()?;
                        stack.pop()?;
                        stack.push(bool_element(exists));
                    }
                    OP_FT_ITEM => {
                        let index = self.parse_num(&first)?.to_i32_saturating();
                        if index < 0 {
                            return Err(ScriptError::InvalidAvmFtItemIndex);
                        }
                        let kind = self.parse_num(&second)?.to_i32_saturating();
                        if !(0..=1).contains(&kind) {
                            return Err(ScriptError::InvalidAvmFtItemType);
                        }
                        stack.pop()?;
                        stack.pop()?;
                        let item = if kind == 0 {
                            self.state.ft_item(index as usize)
                        } else {
                            self.state.ft_item_incoming(index as usize)
                        };
                        stack.push(item.ok_or(ScriptError::InvalidAvmFtItemIndex)?);
                    }
                    OP_NFT_ITEM => {
                        let index = self.parse_num(&first)?.to_i32_saturating();
                        if index < 0 {
                            return Err(ScriptError::InvalidAvmNftItemIndex);
                        }
                        let kind = self.parse_num(&second)?.to_i32_saturating();
                        if !(0..=1).contains(&kind) {
                            return Err(ScriptError::InvalidAvmNftItemType);
                        }
                        stack.pop()?;
                        stack.pop()?;
                        let item = if kind == 0 {
                            self.state.nft_item(index as usize)
                        } else {
                            self.state.nft_item_incoming(index as usize)
                        };
                        stack.push(item.ok_or(ScriptError::InvalidAvmNftItemIndex)?);
                    }
                    OP_KV_EXISTS => {
                        let exists = self.state.contract_state_exists(&first, &second);
                        stack.pop()?;
                        stack.pop()?;
                        stack.push(bool_element(exists));
                    }
                    OP_KV_GET => {
                        let value = self
                            .state
                            .contract_state_get(&first, &second)
                            .ok_or(ScriptError::InvalidAvmStateKeyNotFound)?;
                        stack.pop()?;
                        stack.pop()?;
                        stack.push(value);
                    }
                    OP_KV_DELETE => {
                        self.state.contract_state_delete(&first, &second);
                        stack.pop()?;
                        stack.pop()?;
                    }
                    OP_NFT_WITHDRAW => {
                        let id = atomical_ref(&second)?;
                        let index = self.parse_num(&first)?.to_i32_saturating();
                        if index < 0 || index as usize >= context.tx().output.len() {
                            return Err(ScriptError::InvalidAvmWithdrawNftOutputIndex);
                        }
                        if !self.state.contract_withdraw_nft(&id, index as u32) {
                            return Err(ScriptError::InvalidAvmWithdrawNft);
                        }
                        stack.pop()?;
                        stack.pop()?;
                    }
                    OP_DECODEBLOCKINFO => {
                        if first.len() != 80 {
                            return Err(ScriptError::InvalidAvmBlockHeaderSize);
                        }
                        let field = self.parse_num(&second)?.to_i32_saturating();
                        if !(0..=6).contains(&field) {
                            return Err(ScriptError::InvalidAvmBlockInfoItem);
                        }
                        let header = decode_header(&first).ok_or(ScriptError::Unknown)?;
                        stack.pop()?;
                        stack.pop()?;
                        stack.push(header_field(
                            &BlockInfo {
                                header,
                                raw: first.clone(),
                            },
                            field,
                        ));
                    }
                    _ => {
                        let which = self.parse_num(&second)?.to_i32_saturating();
                        if !(0..=3).contains(&which) {
                            return Err(ScriptError::InvalidAvmHashFunc);
                        }
                        let digest: Vec<u8> = match which {
                            0 => hashing::sha3_256(&first).to_vec(),
                            1 => hashing::sha512(&first).to_vec(),
                            2 => hashing::sha512_256(&first).to_vec(),
                            _ => hashing::eaglesong(&first).to_vec(),
                        };
                        stack.pop()?;
                        stack.pop()?;
                        stack.push(digest);
                    }
                }
            }

            //
            // AVM state opcodes (ternary)
            //
            OP_KV_PUT | OP_FT_WITHDRAW => {
                let context = self.context()?;
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let first = stack.peek(2)?.clone();
                let second = stack.peek(1)?.clone();
                let third = stack.peek(0)?.clone();

                match opcode {
                    OP_KV_PUT => {
                        if first.len() > MAX_STATE_KEY_SIZE || second.len() > MAX_STATE_KEY_SIZE {
                            return Err(ScriptError::InvalidAvmStateKeySize);
                        }
                        self.state.contract_state_put(&first, &second, &third);
                        stack.pop()?;
                        stack.pop()?;
                        stack.pop()?;
                    }
                    _ => {
                        let id = atomical_ref(&third)?;
                        let index = self.parse_num(&second)?.to_i32_saturating();
                        let outputs = &context.tx().output;
                        if index < 0 || index as usize >= outputs.len() {
                            return Err(ScriptError::InvalidAvmWithdrawFtOutputIndex);
                        }
                        let amount = self.parse_num(&first)?.to_i32_saturating() as i64;
                        let output_value = outputs[index as usize].value.to_sat() as i64;
                        if amount <= 0 || amount > output_value {
                            return Err(ScriptError::InvalidAvmWithdrawFtAmount);
                        }
                        if !self
                            .state
                            .contract_withdraw_ft(&id, index as u32, amount as u64)
                        {
                            return Err(ScriptError::InvalidAvmWithdrawFt);
                        }
                        stack.pop()?;
                        stack.pop()?;
                        stack.pop()?;
                    }
                }
            }

            _ => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }
}

fn atomical_ref(bytes: &[u8]) -> Result<AtomicalRef, ScriptError> {
    AtomicalRef::from_bytes(bytes).ok_or(ScriptError::InvalidAtomicalRefSize)
}

fn txid_bytes(txin: &bitcoin::TxIn) -> [u8; 32] {
    use bitcoin::hashes::Hash;
    txin.previous_output.txid.to_byte_array()
}

/// Pushed representation of a decoded header field 0..=6.
fn header_field(info: &BlockInfo, field: i32) -> Vec<u8> {
    use bitcoin::hashes::Hash;
    match field {
        0 => ScriptNum::from_i64(info.header.version.to_consensus() as i64).to_bytes(),
        1 => info.header.prev_blockhash.to_byte_array().to_vec(),
        2 => info.header.merkle_root.to_byte_array().to_vec(),
        3 => ScriptNum::from_u64(info.header.time as u64).to_bytes(),
        4 => ScriptNum::from_u64(info.header.bits.to_consensus() as u64).to_bytes(),
        5 => ScriptNum::from_u64(info.header.nonce as u64).to_bytes(),
        _ => compact_difficulty(info.header.bits.to_consensus()).serialize(),
    }
}
