//! Transaction parsing and the per-input execution context.
//!
//! The verifier consumes a transaction in the Bitcoin extended wire layout
//! and exposes the read-only view used by the introspection opcodes together
//! with the data the authorization sub-protocol signs over.

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{
    ecdsa::Signature as EcdsaSignature, schnorr, Message, PublicKey, Secp256k1, VerifyOnly,
    XOnlyPublicKey,
};
use bitcoin::{consensus, Transaction};

use crate::script::{Script, LOCKTIME_THRESHOLD};
use crate::Error;

const SEQUENCE_FINAL: u32 = 0xffff_ffff;
const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

/// Holds the parsed transaction for one verification call.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    tx: Transaction,
}

impl TransactionContext {
    /// Parses a transaction from wire bytes. With `strict_size` the bytes
    /// must reserialize to exactly the input length, rejecting trailing
    /// garbage and non-canonical encodings.
    pub fn parse(tx_bytes: &[u8], strict_size: bool) -> Result<Self, Error> {
        let tx: Transaction =
            consensus::deserialize(tx_bytes).map_err(|_| Error::TxDeserialize)?;

        if strict_size {
            let canonical = consensus::serialize(&tx);
            if canonical.len() != tx_bytes.len() {
                return Err(Error::TxSizeMismatch);
            }
        }

        Ok(Self { tx })
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }
}

/// Per-input handle carried through script execution: the transaction view,
/// the concatenated unlock+lock bytecode the authorization protocol signs,
/// and the out-of-band authorization public key.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    tx: TransactionContext,
    full_script: Vec<u8>,
    auth_pub_key: Option<Vec<u8>>,
}

impl ExecutionContext {
    pub fn new(
        tx: TransactionContext,
        unlock_script: &[u8],
        lock_script: &[u8],
        auth_pub_key: Option<Vec<u8>>,
    ) -> Self {
        let mut full_script = Vec::with_capacity(unlock_script.len() + lock_script.len());
        full_script.extend_from_slice(unlock_script);
        full_script.extend_from_slice(lock_script);
        Self {
            tx,
            full_script,
            auth_pub_key,
        }
    }

    pub fn tx(&self) -> &Transaction {
        self.tx.tx()
    }

    /// The unlocking bytecode of the given input.
    pub fn input_bytecode(&self, input_index: usize) -> Option<&[u8]> {
        self.tx()
            .input
            .get(input_index)
            .map(|txin| txin.script_sig.as_bytes())
    }

    pub fn auth_pub_key(&self) -> Option<&[u8]> {
        self.auth_pub_key.as_deref()
    }

    /// Scans the outputs for the first `sig`-marked OP_RETURN and extracts
    /// the signature it carries.
    pub fn auth_sig(&self) -> Option<Vec<u8>> {
        for output in &self.tx().output {
            let script = Script::from_bytes(output.script_pubkey.as_bytes());
            if let Some(sig) = script.sig_op_return() {
                return Some(sig);
            }
        }
        None
    }

    /// The byte string signed to authorize the call:
    ///
    /// `prevTxId(input 0) ‖ prevIndex_le32(input 0) ‖ unlock ‖ lock ‖
    ///  for each non-sig output: value_le64 ‖ scriptPubKey`
    ///
    /// The `sig` OP_RETURN output itself is excluded so the signature does
    /// not cover its own carrier.
    pub fn auth_message(&self) -> Option<Vec<u8>> {
        let input = self.tx().input.first()?;
        let mut message = Vec::new();
        message.extend_from_slice(&input.previous_output.txid.to_byte_array());
        message.extend_from_slice(&input.previous_output.vout.to_le_bytes());
        message.extend_from_slice(&self.full_script);
        for output in &self.tx().output {
            let script = Script::from_bytes(output.script_pubkey.as_bytes());
            if script.sig_op_return().is_some() {
                continue;
            }
            message.extend_from_slice(&output.value.to_sat().to_le_bytes());
            message.extend_from_slice(output.script_pubkey.as_bytes());
        }
        Some(message)
    }
}

/// Verifies ECDSA and Schnorr signatures over precomputed digests. The
/// secp256k1 context is owned by the checker and threaded through the call,
/// never stored in a global.
pub struct SignatureChecker {
    secp: Secp256k1<VerifyOnly>,
}

impl Default for SignatureChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureChecker {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }

    /// Dispatches on signature length: 64 bytes selects Schnorr, anything
    /// else is treated as DER-encoded ECDSA.
    pub fn verify_signature(&self, sig: &[u8], pub_key: &[u8], sighash: &[u8; 32]) -> bool {
        if sig.len() == 64 {
            self.verify_schnorr(sig, pub_key, sighash)
        } else {
            self.verify_ecdsa(sig, pub_key, sighash)
        }
    }

    fn verify_ecdsa(&self, sig: &[u8], pub_key: &[u8], sighash: &[u8; 32]) -> bool {
        let pubkey = match PublicKey::from_slice(pub_key) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let mut signature = match EcdsaSignature::from_der(sig) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        signature.normalize_s();
        let message = Message::from_digest(*sighash);
        self.secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
    }

    fn verify_schnorr(&self, sig: &[u8], pub_key: &[u8], sighash: &[u8; 32]) -> bool {
        let xonly = match pub_key.len() {
            32 => match XOnlyPublicKey::from_slice(pub_key) {
                Ok(key) => key,
                Err(_) => return false,
            },
            _ => match PublicKey::from_slice(pub_key) {
                Ok(key) => key.x_only_public_key().0,
                Err(_) => return false,
            },
        };
        let signature = match schnorr::Signature::from_slice(sig) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        let message = Message::from_digest(*sighash);
        self.secp
            .verify_schnorr(&signature, &message, &xonly)
            .is_ok()
    }
}

/// BIP65 comparison of a script lock time against input 0 of the
/// transaction.
pub fn check_lock_time(tx: &Transaction, input_index: usize, lock_time: i64) -> bool {
    let tx_lock_time = tx.lock_time.to_consensus_u32() as i64;

    // Lock-by-height and lock-by-time operands are not comparable.
    if !((tx_lock_time < LOCKTIME_THRESHOLD && lock_time < LOCKTIME_THRESHOLD)
        || (tx_lock_time >= LOCKTIME_THRESHOLD && lock_time >= LOCKTIME_THRESHOLD))
    {
        return false;
    }

    if lock_time > tx_lock_time {
        return false;
    }

    // A final input disables the lock time feature entirely.
    match tx.input.get(input_index) {
        Some(input) if input.sequence.0 != SEQUENCE_FINAL => true,
        _ => false,
    }
}

/// BIP112 comparison of a script relative lock time against input 0.
pub fn check_sequence(tx: &Transaction, input_index: usize, sequence: i64) -> bool {
    let tx_sequence = match tx.input.get(input_index) {
        Some(input) => input.sequence.0 as i64,
        None => return false,
    };

    if tx.version.0 < 2 {
        return false;
    }

    if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 != 0 {
        return false;
    }

    let mask = (SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK) as i64;
    let tx_sequence_masked = tx_sequence & mask;
    let sequence_masked = sequence & mask;

    let type_flag = SEQUENCE_LOCKTIME_TYPE_FLAG as i64;
    if !((tx_sequence_masked < type_flag && sequence_masked < type_flag)
        || (tx_sequence_masked >= type_flag && sequence_masked >= type_flag))
    {
        return false;
    }

    sequence_masked <= tx_sequence_masked
}

/// Flag kept by CHECKSEQUENCEVERIFY: an operand with this bit set turns the
/// opcode into a no-op.
pub fn sequence_disabled(sequence: i64) -> bool {
    sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG as i64 != 0
}
