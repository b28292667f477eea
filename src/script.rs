//! Script buffers and the AVM opcode table.
//!
//! A script is a flat byte string of opcodes and inline pushes. This module
//! owns the byte-level decoding rules; execution semantics live in
//! [`crate::interpreter`].

/// Maximum number of bytes pushable to the stack.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 4_000;

/// Maximum number of non-push operations per script.
pub const MAX_OPS_PER_SCRIPT: usize = 1_000_000;

/// Maximum script length in bytes.
pub const MAX_SCRIPT_SIZE: usize = 1_000_000;

/// Maximum combined depth of the value and alt stacks.
pub const MAX_STACK_SIZE: usize = 1_000;

/// Threshold for `nLockTime`: below this value it is interpreted as a block
/// number, otherwise as a UNIX timestamp.
pub const LOCKTIME_THRESHOLD: i64 = 500_000_000;

/// AVM opcode values.
///
/// The table follows the historical Bitcoin layout for pushes, control flow,
/// stack, splice, bitwise, arithmetic and hashing, then adds the native
/// introspection and AVM state ranges. The signature-checking opcodes of the
/// historical set (`0xab..=0xaf`) are deliberately absent; executing them
/// reports `BAD_OPCODE`.
#[allow(dead_code)]
pub mod opcodes {
    // Push value
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_RESERVED: u8 = 0x50;
    pub const OP_1: u8 = 0x51;
    pub const OP_2: u8 = 0x52;
    pub const OP_3: u8 = 0x53;
    pub const OP_4: u8 = 0x54;
    pub const OP_5: u8 = 0x55;
    pub const OP_6: u8 = 0x56;
    pub const OP_7: u8 = 0x57;
    pub const OP_8: u8 = 0x58;
    pub const OP_9: u8 = 0x59;
    pub const OP_10: u8 = 0x5a;
    pub const OP_11: u8 = 0x5b;
    pub const OP_12: u8 = 0x5c;
    pub const OP_13: u8 = 0x5d;
    pub const OP_14: u8 = 0x5e;
    pub const OP_15: u8 = 0x5f;
    pub const OP_16: u8 = 0x60;

    // Control
    pub const OP_NOP: u8 = 0x61;
    pub const OP_VER: u8 = 0x62;
    pub const OP_IF: u8 = 0x63;
    pub const OP_NOTIF: u8 = 0x64;
    pub const OP_VERIF: u8 = 0x65;
    pub const OP_VERNOTIF: u8 = 0x66;
    pub const OP_ELSE: u8 = 0x67;
    pub const OP_ENDIF: u8 = 0x68;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;

    // Stack ops
    pub const OP_TOALTSTACK: u8 = 0x6b;
    pub const OP_FROMALTSTACK: u8 = 0x6c;
    pub const OP_2DROP: u8 = 0x6d;
    pub const OP_2DUP: u8 = 0x6e;
    pub const OP_3DUP: u8 = 0x6f;
    pub const OP_2OVER: u8 = 0x70;
    pub const OP_2ROT: u8 = 0x71;
    pub const OP_2SWAP: u8 = 0x72;
    pub const OP_IFDUP: u8 = 0x73;
    pub const OP_DEPTH: u8 = 0x74;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_NIP: u8 = 0x77;
    pub const OP_OVER: u8 = 0x78;
    pub const OP_PICK: u8 = 0x79;
    pub const OP_ROLL: u8 = 0x7a;
    pub const OP_ROT: u8 = 0x7b;
    pub const OP_SWAP: u8 = 0x7c;
    pub const OP_TUCK: u8 = 0x7d;

    // Splice ops
    pub const OP_CAT: u8 = 0x7e;
    pub const OP_SPLIT: u8 = 0x7f;
    pub const OP_NUM2BIN: u8 = 0x80;
    pub const OP_BIN2NUM: u8 = 0x81;
    pub const OP_SIZE: u8 = 0x82;

    // Bit logic
    pub const OP_INVERT: u8 = 0x83;
    pub const OP_AND: u8 = 0x84;
    pub const OP_OR: u8 = 0x85;
    pub const OP_XOR: u8 = 0x86;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_RESERVED1: u8 = 0x89;
    pub const OP_RESERVED2: u8 = 0x8a;

    // Numeric
    pub const OP_1ADD: u8 = 0x8b;
    pub const OP_1SUB: u8 = 0x8c;
    pub const OP_2MUL: u8 = 0x8d;
    pub const OP_2DIV: u8 = 0x8e;
    pub const OP_NEGATE: u8 = 0x8f;
    pub const OP_ABS: u8 = 0x90;
    pub const OP_NOT: u8 = 0x91;
    pub const OP_0NOTEQUAL: u8 = 0x92;
    pub const OP_ADD: u8 = 0x93;
    pub const OP_SUB: u8 = 0x94;
    pub const OP_MUL: u8 = 0x95;
    pub const OP_DIV: u8 = 0x96;
    pub const OP_MOD: u8 = 0x97;
    pub const OP_LSHIFT: u8 = 0x98;
    pub const OP_RSHIFT: u8 = 0x99;
    pub const OP_BOOLAND: u8 = 0x9a;
    pub const OP_BOOLOR: u8 = 0x9b;
    pub const OP_NUMEQUAL: u8 = 0x9c;
    pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
    pub const OP_NUMNOTEQUAL: u8 = 0x9e;
    pub const OP_LESSTHAN: u8 = 0x9f;
    pub const OP_GREATERTHAN: u8 = 0xa0;
    pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
    pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
    pub const OP_MIN: u8 = 0xa3;
    pub const OP_MAX: u8 = 0xa4;
    pub const OP_WITHIN: u8 = 0xa5;

    // Crypto
    pub const OP_RIPEMD160: u8 = 0xa6;
    pub const OP_SHA1: u8 = 0xa7;
    pub const OP_SHA256: u8 = 0xa8;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_HASH256: u8 = 0xaa;

    // Expansion
    pub const OP_NOP1: u8 = 0xb0;
    pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
    pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
    pub const OP_NOP4: u8 = 0xb3;
    pub const OP_NOP5: u8 = 0xb4;
    pub const OP_NOP6: u8 = 0xb5;
    pub const OP_NOP7: u8 = 0xb6;
    pub const OP_NOP8: u8 = 0xb7;
    pub const OP_NOP9: u8 = 0xb8;
    pub const OP_NOP10: u8 = 0xb9;

    // More crypto
    pub const OP_CHECKDATASIG: u8 = 0xba;
    pub const OP_CHECKDATASIGVERIFY: u8 = 0xbb;

    // Additional byte string operations
    pub const OP_REVERSEBYTES: u8 = 0xbc;

    // Authorization
    pub const OP_CHECKAUTHSIG: u8 = 0xc0;
    pub const OP_CHECKAUTHSIGVERIFY: u8 = 0xc1;

    // Native introspection
    pub const OP_TXVERSION: u8 = 0xc2;
    pub const OP_TXINPUTCOUNT: u8 = 0xc3;
    pub const OP_TXOUTPUTCOUNT: u8 = 0xc4;
    pub const OP_TXLOCKTIME: u8 = 0xc5;
    pub const OP_OUTPOINTTXHASH: u8 = 0xc8;
    pub const OP_OUTPOINTINDEX: u8 = 0xc9;
    pub const OP_INPUTBYTECODE: u8 = 0xca;
    pub const OP_INPUTSEQUENCENUMBER: u8 = 0xcb;
    pub const OP_OUTPUTVALUE: u8 = 0xcd;
    pub const OP_OUTPUTBYTECODE: u8 = 0xce;

    // Token table
    pub const OP_NFT_PUT: u8 = 0xd1;
    pub const OP_FT_BALANCE_ADD: u8 = 0xd3;

    // Contract key-value store
    pub const OP_KV_EXISTS: u8 = 0xed;
    pub const OP_KV_GET: u8 = 0xef;
    pub const OP_KV_PUT: u8 = 0xf0;
    pub const OP_KV_DELETE: u8 = 0xf1;

    // Withdrawals
    pub const OP_FT_WITHDRAW: u8 = 0xf2;
    pub const OP_NFT_WITHDRAW: u8 = 0xf3;

    // Token enumeration
    pub const OP_FT_BALANCE: u8 = 0xf4;
    pub const OP_FT_COUNT: u8 = 0xf6;
    pub const OP_FT_ITEM: u8 = 0xf7;
    pub const OP_NFT_EXISTS: u8 = 0xf8;
    pub const OP_NFT_COUNT: u8 = 0xf9;
    pub const OP_NFT_ITEM: u8 = 0xfa;

    // Block info
    pub const OP_GETBLOCKINFO: u8 = 0xfb;
    pub const OP_DECODEBLOCKINFO: u8 = 0xfc;

    // Hash function table
    pub const OP_HASH_FN: u8 = 0xfd;
}

use opcodes::*;

/// A single decoded instruction: the opcode byte and, for push opcodes, the
/// inline payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub opcode: u8,
    pub push: Option<&'a [u8]>,
}

/// Raised when a push opcode runs past the end of the script.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TruncatedScript;

/// Serialized script used inside transaction inputs and outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            bytes: &self.0,
            pc: 0,
        }
    }

    /// True iff every opcode is `OP_16` or lower. Malformed pushes fail the
    /// predicate.
    pub fn is_push_only(&self) -> bool {
        for instruction in self.instructions() {
            match instruction {
                Ok(ins) if ins.opcode <= OP_16 => {}
                _ => return false,
            }
        }
        true
    }

    /// Scripts starting with `OP_RETURN` are provably unspendable.
    pub fn is_unspendable(&self) -> bool {
        self.0.first() == Some(&OP_RETURN)
    }

    /// Detects the `[OP_RETURN PUSH("sig") PUSH(<signature>)]` marker and
    /// yields the signature payload.
    pub fn sig_op_return(&self) -> Option<Vec<u8>> {
        if !self.is_unspendable() || self.0.len() < 5 {
            return None;
        }
        if self.0[1..5] != [0x03, b's', b'i', b'g'] {
            return None;
        }
        let mut tail = Instructions {
            bytes: &self.0,
            pc: 5,
        };
        match tail.next() {
            Some(Ok(ins)) if ins.opcode <= OP_PUSHDATA4 => ins.push.map(|data| data.to_vec()),
            _ => None,
        }
    }
}

/// Streaming decoder yielding `(opcode, payload)` pairs.
pub struct Instructions<'a> {
    bytes: &'a [u8],
    pc: usize,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, TruncatedScript>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pc >= self.bytes.len() {
            return None;
        }
        let opcode = self.bytes[self.pc];
        self.pc += 1;

        if opcode > OP_PUSHDATA4 {
            return Some(Ok(Instruction { opcode, push: None }));
        }

        let size = if opcode < OP_PUSHDATA1 {
            opcode as usize
        } else {
            let width = match opcode {
                OP_PUSHDATA1 => 1,
                OP_PUSHDATA2 => 2,
                _ => 4,
            };
            if self.bytes.len() - self.pc < width {
                self.pc = self.bytes.len();
                return Some(Err(TruncatedScript));
            }
            let mut size = 0usize;
            for i in 0..width {
                size |= (self.bytes[self.pc + i] as usize) << (8 * i);
            }
            self.pc += width;
            size
        };

        if self.bytes.len() - self.pc < size {
            self.pc = self.bytes.len();
            return Some(Err(TruncatedScript));
        }
        let push = &self.bytes[self.pc..self.pc + size];
        self.pc += size;
        Some(Ok(Instruction {
            opcode,
            push: Some(push),
        }))
    }
}

/// Checks that `data` could not have been pushed with a shorter opcode.
pub fn check_minimal_push(data: &[u8], opcode: u8) -> bool {
    debug_assert!(opcode <= OP_PUSHDATA4);
    if data.is_empty() {
        // Should have used OP_0.
        return opcode == OP_0;
    }
    if data.len() == 1 && data[0] >= 1 && data[0] <= 16 {
        // Should have used OP_1 .. OP_16.
        return false;
    }
    if data.len() == 1 && data[0] == 0x81 {
        // Should have used OP_1NEGATE.
        return false;
    }
    if data.len() <= 75 {
        return opcode as usize == data.len();
    }
    if data.len() <= 255 {
        return opcode == OP_PUSHDATA1;
    }
    if data.len() <= 65535 {
        return opcode == OP_PUSHDATA2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_direct_and_pushdata_forms() {
        // PUSH2 "hi", OP_PUSHDATA1 3 "abc", OP_DUP
        let script = Script::new(vec![
            0x02, b'h', b'i', OP_PUSHDATA1, 0x03, b'a', b'b', b'c', OP_DUP,
        ]);
        let ops: Vec<_> = script.instructions().collect::<Result<_, _>>().unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].push, Some(&b"hi"[..]));
        assert_eq!(ops[1].push, Some(&b"abc"[..]));
        assert_eq!(ops[2].opcode, OP_DUP);
        assert_eq!(ops[2].push, None);
    }

    #[test]
    fn pushdata_lengths_are_little_endian() {
        let mut bytes = vec![OP_PUSHDATA2, 0x01, 0x01];
        bytes.extend(core::iter::repeat(0xaa).take(257));
        let script = Script::new(bytes);
        let ops: Vec<_> = script.instructions().collect::<Result<_, _>>().unwrap();
        assert_eq!(ops[0].push.map(|p| p.len()), Some(257));
    }

    #[test]
    fn truncated_push_is_an_error() {
        let script = Script::new(vec![0x05, 0x01, 0x02]);
        assert!(matches!(
            script.instructions().next(),
            Some(Err(TruncatedScript))
        ));

        let script = Script::new(vec![OP_PUSHDATA2, 0x01]);
        assert!(matches!(
            script.instructions().next(),
            Some(Err(TruncatedScript))
        ));
    }

    #[test]
    fn push_only_predicate() {
        assert!(Script::new(vec![0x01, 0xab, OP_16, OP_0]).is_push_only());
        assert!(!Script::new(vec![OP_DUP]).is_push_only());
        assert!(!Script::new(vec![0x05, 0x01]).is_push_only());
        assert!(Script::new(Vec::new()).is_push_only());
    }

    #[test]
    fn sig_op_return_extraction() {
        let mut bytes = vec![OP_RETURN, 0x03, b's', b'i', b'g', 0x04];
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let script = Script::new(bytes);
        assert_eq!(script.sig_op_return(), Some(vec![0xde, 0xad, 0xbe, 0xef]));

        // Marker must be the exact three-byte "sig" push.
        let script = Script::new(vec![OP_RETURN, 0x03, b's', b'i', b'G', 0x01, 0x00]);
        assert_eq!(script.sig_op_return(), None);

        // A non-push opcode after the marker is not a signature.
        let script = Script::new(vec![OP_RETURN, 0x03, b's', b'i', b'g', OP_DUP]);
        assert_eq!(script.sig_op_return(), None);

        // Too short to carry the marker.
        let script = Script::new(vec![OP_RETURN]);
        assert_eq!(script.sig_op_return(), None);
    }

    #[test]
    fn minimal_push_rules() {
        assert!(check_minimal_push(&[], OP_0));
        assert!(!check_minimal_push(&[], 0x01));
        assert!(!check_minimal_push(&[5], 0x01), "OP_5 exists");
        assert!(!check_minimal_push(&[0x81], 0x01), "OP_1NEGATE exists");
        assert!(check_minimal_push(&[0x17], 0x01));
        assert!(check_minimal_push(&[0u8; 75], 75));
        assert!(!check_minimal_push(&[0u8; 75], OP_PUSHDATA1));
        assert!(check_minimal_push(&[0u8; 76], OP_PUSHDATA1));
        assert!(!check_minimal_push(&[0u8; 76], OP_PUSHDATA2));
        assert!(check_minimal_push(&[0u8; 256], OP_PUSHDATA2));
    }
}
