//! Opcode-level vectors for the interpreter: stack discipline, conditionals,
//! numeric and splice semantics, and the failure codes they report.

mod util;

use atomicals_avm::{opcodes::*, ScriptError, ScriptNum};
use util::*;

#[test]
fn add_and_equal() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &script(&[&push_num(2), &push_num(3)]),
        &script(&[&[OP_ADD], &push_num(5), &[OP_EQUAL]]),
    );
    fixture.expect_err(
        &script(&[&push_num(2), &push_num(3)]),
        &script(&[&[OP_ADD], &push_num(6), &[OP_EQUAL]]),
        ScriptError::EvalFalse,
    );
}

#[test]
fn wide_arithmetic_stays_exact() {
    // (2^63) * 4 / 4 == 2^63, far outside i64.
    let fixture = Fixture::default();
    let two_63 = ScriptNum::from_u64(1u64 << 63).to_bytes();
    let lock = script(&[
        &push_num(4),
        &[OP_MUL],
        &push_num(4),
        &[OP_DIV],
        &push(&two_63),
        &[OP_EQUAL],
    ]);
    fixture.expect_ok(&push(&two_63), &lock);
}

#[test]
fn division_faults() {
    let fixture = Fixture::default();
    fixture.expect_err(
        &script(&[&push_num(5), &push_num(0)]),
        &[OP_DIV],
        ScriptError::DivByZero,
    );
    fixture.expect_err(
        &script(&[&push_num(5), &push_num(0)]),
        &[OP_MOD],
        ScriptError::ModByZero,
    );
}

#[test]
fn division_truncates_toward_zero() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &script(&[&push_num(-7), &push_num(2)]),
        &script(&[&[OP_DIV], &push_num(-3), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &script(&[&push_num(-7), &push_num(2)]),
        &script(&[&[OP_MOD], &push_num(-1), &[OP_EQUAL]]),
    );
}

#[test]
fn disabled_opcodes() {
    let fixture = Fixture::default();
    fixture.expect_err(&push_num(1), &[OP_2MUL], ScriptError::DisabledOpcode);
    fixture.expect_err(&push_num(1), &[OP_2DIV], ScriptError::DisabledOpcode);
    // Disabled even inside an unexecuted branch.
    let lock = script(&[&push_num(0), &[OP_IF, OP_2MUL, OP_ENDIF, OP_1]]);
    let outcome = fixture.expect_err(&[], &lock, ScriptError::DisabledOpcode);
    assert_eq!(outcome.script_error_op_num, 2);
}

#[test]
fn signature_opcodes_are_absent() {
    let fixture = Fixture::default();
    for opcode in [0xabu8, 0xac, 0xad, 0xae, 0xaf] {
        fixture.expect_err(&push_num(1), &[opcode], ScriptError::BadOpcode);
    }
}

#[test]
fn conditionals() {
    let fixture = Fixture::default();
    let lock = script(&[&[OP_IF], &push_num(7), &[OP_ELSE], &push_num(8), &[OP_ENDIF]]);
    let check7 = script(&[&lock, &push_num(7), &[OP_EQUAL]]);
    let check8 = script(&[&lock, &push_num(8), &[OP_EQUAL]]);
    fixture.expect_ok(&push_num(1), &check7);
    fixture.expect_ok(&push_num(0), &check8);

    // Nested: outer false suppresses the inner entirely.
    let nested = script(&[
        &[OP_IF, OP_IF],
        &push_num(1),
        &[OP_ELSE],
        &push_num(2),
        &[OP_ENDIF, OP_ELSE],
        &push_num(3),
        &[OP_ENDIF],
        &push_num(3),
        &[OP_EQUAL],
    ]);
    fixture.expect_ok(&push_num(0), &nested);
}

#[test]
fn unbalanced_conditionals() {
    let fixture = Fixture::default();
    // Missing ENDIF: reported at the final opcode index.
    let outcome = fixture.expect_err(
        &push_num(1),
        &[OP_IF, OP_1],
        ScriptError::UnbalancedConditional,
    );
    assert_eq!(outcome.script_error_op_num, 1);

    // IF with an empty stack.
    let outcome = fixture.expect_err(&[], &[OP_IF, OP_1, OP_ENDIF], ScriptError::UnbalancedConditional);
    assert_eq!(outcome.script_error_op_num, 0);

    // ELSE and ENDIF with no matching IF.
    fixture.expect_err(&push_num(1), &[OP_ELSE], ScriptError::UnbalancedConditional);
    fixture.expect_err(&push_num(1), &[OP_ENDIF], ScriptError::UnbalancedConditional);
}

#[test]
fn minimal_if() {
    let fixture = Fixture::default();
    // 0x02 is not a minimal boolean.
    fixture.expect_err(
        &push(&[0x02]),
        &[OP_IF, OP_1, OP_ENDIF, OP_1],
        ScriptError::MinimalIf,
    );
    // Two-byte operands are rejected outright.
    fixture.expect_err(
        &push(&[0x01, 0x00]),
        &[OP_IF, OP_1, OP_ENDIF, OP_1],
        ScriptError::MinimalIf,
    );
}

#[test]
fn op_return_semantics() {
    let fixture = Fixture::default();
    // Empty stack: evaluation halts successfully, so neither the invalid
    // opcodes nor the unbalanced IF after it are ever seen. The overall
    // verdict is still EvalFalse because nothing is on the stack.
    fixture.expect_err(
        &[],
        &[OP_RETURN, OP_IF, 0xfe, 0xff],
        ScriptError::EvalFalse,
    );
    // Non-empty stack: failure at the opcode itself.
    let outcome = fixture.expect_err(&push_num(1), &[OP_RETURN], ScriptError::OpReturn);
    assert_eq!(outcome.script_error_op_num, 0);
}

#[test]
fn verify_family() {
    let fixture = Fixture::default();
    fixture.expect_err(
        &script(&[&push_num(0)]),
        &[OP_VERIFY],
        ScriptError::Verify,
    );
    fixture.expect_err(
        &script(&[&push_num(1), &push_num(2)]),
        &script(&[&[OP_EQUALVERIFY], &[OP_1]]),
        ScriptError::EqualVerify,
    );
    fixture.expect_err(
        &script(&[&push_num(1), &push_num(2)]),
        &script(&[&[OP_NUMEQUALVERIFY], &[OP_1]]),
        ScriptError::NumEqualVerify,
    );
    fixture.expect_ok(
        &script(&[&push_num(3), &push_num(3)]),
        &script(&[&[OP_NUMEQUALVERIFY], &[OP_1]]),
    );
}

#[test]
fn minimal_data_is_always_enforced() {
    let fixture = Fixture::default();
    // PUSHDATA1 for two bytes should have been a direct push.
    let non_minimal = vec![OP_PUSHDATA1, 0x02, 0xab, 0xcd];
    let outcome = fixture.expect_err(&non_minimal, &[OP_1], ScriptError::MinimalData);
    assert_eq!(outcome.script_error_op_num, 0);
    // Direct one-byte push of 5 should have been OP_5.
    fixture.expect_err(&[0x01, 0x05], &[OP_1], ScriptError::MinimalData);
}

#[test]
fn stack_shuffles() {
    let fixture = Fixture::default();
    // DUP, SWAP, OVER, ROT leave a checkable arrangement.
    fixture.expect_ok(
        &script(&[&push_num(1), &push_num(2)]),
        &script(&[&[OP_SWAP, OP_DROP], &push_num(2), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &script(&[&push_num(1), &push_num(2), &push_num(3)]),
        &script(&[
            &[OP_ROT], // 2 3 1
            &push_num(1),
            &[OP_EQUALVERIFY],
            &[OP_DROP, OP_DROP, OP_1],
        ]),
    );
    fixture.expect_ok(
        &script(&[&push_num(9), &push_num(8)]),
        &script(&[&[OP_OVER], &push_num(9), &[OP_EQUALVERIFY, OP_2DROP, OP_1]]),
    );
    fixture.expect_err(&[], &[OP_DROP], ScriptError::InvalidStackOperation);
    fixture.expect_err(&[], &[OP_FROMALTSTACK], ScriptError::InvalidAltstackOperation);
}

#[test]
fn altstack_round_trip() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &push_num(5),
        &script(&[&[OP_TOALTSTACK, OP_FROMALTSTACK], &push_num(5), &[OP_EQUAL]]),
    );
}

#[test]
fn pick_and_roll() {
    let fixture = Fixture::default();
    // 10 20 30, PICK(2) copies the bottom.
    fixture.expect_ok(
        &script(&[&push_num(10), &push_num(20), &push_num(30)]),
        &script(&[
            &push_num(2),
            &[OP_PICK],
            &push_num(10),
            &[OP_EQUALVERIFY, OP_2DROP, OP_DROP, OP_1],
        ]),
    );
    // ROLL(2) moves it instead.
    fixture.expect_ok(
        &script(&[&push_num(10), &push_num(20), &push_num(30)]),
        &script(&[
            &push_num(2),
            &[OP_ROLL],
            &push_num(10),
            &[OP_EQUALVERIFY, OP_2DROP, OP_1],
        ]),
    );
    fixture.expect_err(
        &script(&[&push_num(1), &push_num(5)]),
        &[OP_PICK],
        ScriptError::InvalidStackOperation,
    );
}

#[test]
fn depth_and_size() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &script(&[&push_num(7), &push_num(7)]),
        &script(&[&[OP_DEPTH], &push_num(2), &[OP_EQUALVERIFY, OP_EQUAL]]),
    );
    fixture.expect_ok(
        &push(b"abcd"),
        &script(&[&[OP_SIZE], &push_num(4), &[OP_EQUALVERIFY, OP_DROP, OP_1]]),
    );
}

#[test]
fn splice_operations() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &script(&[&push(b"foo"), &push(b"bar")]),
        &script(&[&[OP_CAT], &push(b"foobar"), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &script(&[&push(b"foobar"), &push_num(3)]),
        &script(&[
            &[OP_SPLIT],
            &push(b"bar"),
            &[OP_EQUALVERIFY],
            &push(b"foo"),
            &[OP_EQUAL],
        ]),
    );
    fixture.expect_err(
        &script(&[&push(b"ab"), &push_num(3)]),
        &[OP_SPLIT],
        ScriptError::InvalidSplitRange,
    );
    fixture.expect_ok(
        &push(b"abc"),
        &script(&[&[OP_REVERSEBYTES], &push(b"cba"), &[OP_EQUAL]]),
    );
}

#[test]
fn cat_respects_element_cap() {
    let fixture = Fixture::default();
    let big = vec![0xaa; 3_000];
    fixture.expect_err(
        &script(&[&push(&big), &push(&big)]),
        &[OP_CAT],
        ScriptError::PushSize,
    );
}

#[test]
fn num2bin_and_bin2num() {
    let fixture = Fixture::default();
    // 1 padded to four bytes, then renormalized.
    fixture.expect_ok(
        &script(&[&push_num(1), &push_num(4)]),
        &script(&[
            &[OP_NUM2BIN],
            &push(&[0x01, 0x00, 0x00, 0x00]),
            &[OP_EQUALVERIFY],
            &push(&[0x01, 0x00, 0x00, 0x00]),
            &[OP_BIN2NUM],
            &push_num(1),
            &[OP_EQUAL],
        ]),
    );
    // Negative numbers keep the sign bit in the padded last byte.
    fixture.expect_ok(
        &script(&[&push_num(-1), &push_num(3)]),
        &script(&[&[OP_NUM2BIN], &push(&[0x01, 0x00, 0x80]), &[OP_EQUAL]]),
    );
    fixture.expect_err(
        &script(&[&push(&[0x12, 0x34]), &push_num(1)]),
        &[OP_NUM2BIN],
        ScriptError::ImpossibleEncoding,
    );
}

#[test]
fn bitwise_requires_equal_sizes() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &script(&[&push(&[0x0f, 0xf0]), &push(&[0xff, 0x10])]),
        &script(&[&[OP_AND], &push(&[0x0f, 0x10]), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &script(&[&push(&[0x0f]), &push(&[0xf0])]),
        &script(&[&[OP_OR], &push(&[0xff]), &[OP_BIN2NUM, OP_0NOTEQUAL]]),
    );
    fixture.expect_err(
        &script(&[&push(&[0x0f]), &push(&[0xff, 0x10])]),
        &[OP_AND],
        ScriptError::InvalidOperandSize,
    );
}

#[test]
fn shifts_are_byte_level() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &script(&[&push(&[0x00, 0x80]), &push_num(1)]),
        &script(&[&[OP_LSHIFT], &push(&[0x01, 0x00]), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &script(&[&push(&[0x01, 0x00]), &push_num(1)]),
        &script(&[&[OP_RSHIFT], &push(&[0x00, 0x80]), &[OP_EQUAL]]),
    );
    // Shifting past the width zero-fills but keeps the length.
    fixture.expect_ok(
        &script(&[&push(&[0xff, 0xff]), &push_num(16)]),
        &script(&[&[OP_RSHIFT], &push(&[0x00, 0x00]), &[OP_EQUAL]]),
    );
    fixture.expect_err(
        &script(&[&push(&[0xff]), &push_num(-1)]),
        &[OP_LSHIFT],
        ScriptError::InvalidNumberRange,
    );
}

#[test]
fn numeric_comparisons() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &script(&[&push_num(2), &push_num(3)]),
        &script(&[&[OP_LESSTHAN]]),
    );
    fixture.expect_ok(
        &script(&[&push_num(3), &push_num(2)]),
        &script(&[&[OP_GREATERTHAN]]),
    );
    fixture.expect_ok(
        &script(&[&push_num(2), &push_num(2), &push_num(3)]),
        &script(&[&[OP_WITHIN]]),
    );
    fixture.expect_ok(
        &script(&[&push_num(-5)]),
        &script(&[&[OP_ABS], &push_num(5), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &script(&[&push_num(2), &push_num(5)]),
        &script(&[&[OP_MIN], &push_num(2), &[OP_EQUAL]]),
    );
}

#[test]
fn hash_opcodes() {
    let fixture = Fixture::default();
    // SHA256 of the empty string, then HASH256 consistency.
    let sha_empty =
        hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855").unwrap();
    fixture.expect_ok(
        &push(&[]),
        &script(&[&[OP_SHA256], &push(&sha_empty), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &push(b"x"),
        &script(&[
            &[OP_HASH256],
            &push(b"x"),
            &[OP_SHA256, OP_SHA256, OP_EQUAL],
        ]),
    );
    fixture.expect_ok(
        &push(b"x"),
        &script(&[
            &[OP_HASH160],
            &push(b"x"),
            &[OP_SHA256, OP_RIPEMD160, OP_EQUAL],
        ]),
    );
}

#[test]
fn introspection_basics() {
    let fixture = Fixture::default();
    fixture.expect_ok(
        &[],
        &script(&[&[OP_TXVERSION], &push_num(2), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &[],
        &script(&[&[OP_TXINPUTCOUNT], &push_num(1), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &[],
        &script(&[&[OP_TXOUTPUTCOUNT], &push_num(1), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &[],
        &script(&[&[OP_TXLOCKTIME], &push_num(0), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &[],
        &script(&[&push_num(0), &[OP_OUTPUTVALUE], &push_num(1_000), &[OP_EQUAL]]),
    );
    fixture.expect_ok(
        &[],
        &script(&[
            &push_num(0),
            &[OP_INPUTSEQUENCENUMBER],
            &push(&ScriptNum::from_u64(0xffffffff).to_bytes()),
            &[OP_EQUAL],
        ]),
    );
    // The default outpoint is all zeroes.
    fixture.expect_ok(
        &[],
        &script(&[
            &push_num(0),
            &[OP_OUTPOINTTXHASH],
            &push(&[0u8; 32]),
            &[OP_EQUAL],
        ]),
    );
    fixture.expect_err(
        &[],
        &script(&[&push_num(1), &[OP_OUTPUTVALUE]]),
        ScriptError::InvalidTxOutputIndex,
    );
    fixture.expect_err(
        &[],
        &script(&[&push_num(5), &[OP_INPUTBYTECODE]]),
        ScriptError::InvalidTxInputIndex,
    );
}

#[test]
fn oversized_script_is_rejected() {
    let fixture = Fixture::default();
    let lock = vec![OP_NOP; 1_000_001];
    let outcome = fixture.expect_err(&push_num(1), &lock, ScriptError::ScriptSize);
    assert_eq!(outcome.script_error_op_num, 0);
}

#[test]
fn oversized_push_is_rejected() {
    let fixture = Fixture::default();
    let lock = push(&vec![0xaa; 4_001]);
    fixture.expect_err(&push_num(1), &lock, ScriptError::PushSize);
}

#[test]
fn stack_depth_cap() {
    let fixture = Fixture::default();
    let mut lock = vec![OP_1];
    lock.extend(std::iter::repeat(OP_DUP).take(1_000));
    fixture.expect_err(&[], &lock, ScriptError::StackSize);
}

#[test]
fn locktime_checks() {
    let fixture = Fixture::default();
    // LockTime zero, non-final sequence required for CLTV to pass.
    let mut tx_fixture = Fixture::default();
    tx_fixture.tx = {
        use bitcoin::{
            absolute::LockTime, consensus, transaction::Version, Amount, OutPoint, ScriptBuf,
            Sequence, Transaction, TxIn, TxOut, Witness,
        };
        let tx = Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::default(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence(0xfffffffe),
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        consensus::serialize(&tx)
    };
    tx_fixture.expect_ok(
        &push_num(0),
        &[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1],
    );
    tx_fixture.expect_err(
        &push_num(10),
        &[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1],
        ScriptError::UnsatisfiedLockTime,
    );
    fixture.expect_err(
        &push(&[0x81]),
        &[OP_CHECKLOCKTIMEVERIFY],
        ScriptError::NegativeLockTime,
    );
    // Final sequence in the default fixture disables the feature.
    fixture.expect_err(
        &push_num(0),
        &[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1],
        ScriptError::UnsatisfiedLockTime,
    );
}

#[test]
fn error_reports_zero_based_opcode_index() {
    let fixture = Fixture::default();
    // OP_1 OP_1 OP_ADD OP_0 OP_DIV -> divide at index 4 of the lock script.
    let lock = script(&[&[OP_1, OP_1, OP_ADD], &push_num(0), &[OP_DIV]]);
    let outcome = fixture.expect_err(&[], &lock, ScriptError::DivByZero);
    assert_eq!(outcome.script_error_op_num, 4);
}
