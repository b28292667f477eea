//! Pure-Rust implementation of the Atomicals Virtual Machine (AVM)
//! consensus verifier.
//!
//! The goal of this crate is to faithfully reproduce the behaviour of the
//! reference AVM implementation: a deterministic, stack-based interpreter
//! that validates unlock/lock script pairs in the context of a
//! Bitcoin-style transaction while maintaining a transactional contract
//! state (key-value store, fungible-token balances, NFT ownership and
//! withdrawal intents). A successful run yields the final state, the
//! deltas, the withdrawal intents and a 32-byte commitment chaining them to
//! the previous state hash.
//!
//! The crate performs no I/O and holds no global mutable state; every
//! verification call is self-contained and reentrant.

mod bigint;
mod hashing;
mod interpreter;
mod script;
mod script_num;
mod state;
mod tx;

use core::fmt;

pub use bigint::{BigInt, BigIntError};
pub use interpreter::{cast_to_bool, Interpreter, ScriptError, Stack};
pub use script::{opcodes, Script, MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPT_SIZE, MAX_STACK_SIZE};
pub use script_num::{ScriptNum, ScriptNumError, MAXIMUM_NUMBER_SIZE};
pub use state::{
    AtomicalRef, ExternalState, FtMap, KvDeleteMap, KvMap, NftMap, OrderedMap, StateContext,
    StateError, MAX_BALANCES_BYTES, MAX_BALANCES_UPDATE_BYTES, MAX_STATE_FINAL_BYTES,
    MAX_STATE_UPDATE_BYTES,
};
pub use tx::{ExecutionContext, SignatureChecker, TransactionContext};

/// Do not enable any verification behaviour changes.
pub const VERIFY_NONE: u32 = 0;

/// Every defined verification flag. No flags are defined yet; callers must
/// pass zero until one is formally specified.
pub const VERIFY_ALL: u32 = VERIFY_NONE;

/// Reported version of the AVM consensus interface.
pub const AVM_API_VERSION: u32 = 1;

/// Returns the consensus interface version this crate implements.
pub fn version() -> u32 {
    AVM_API_VERSION
}

/// Errors reported at the outer verification boundary.
///
/// Script-level faults are not `Error`s; they surface through
/// [`VerifyOutcome::script_error`] together with the faulting opcode index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// An invalid input index for the transaction.
    TxIndex,
    /// The transaction bytes do not reserialize to the same length.
    TxSizeMismatch,
    /// The transaction bytes do not deserialize.
    TxDeserialize,
    /// Verification flags outside the defined mask.
    InvalidFlags,
    /// A fungible-token withdrawal intent is inconsistent.
    InvalidFtWithdraw,
    /// A non-fungible-token withdrawal intent is inconsistent.
    InvalidNftWithdraw,
    /// A state map fails the key/value format rules.
    StateFormat,
    /// The external block-info table is malformed.
    ExternalStateFormat,
    StateSizeError,
    StateUpdatesSizeError,
    StateDeletesSizeError,
    StateFtBalancesSizeError,
    StateFtBalancesUpdatesSizeError,
    StateNftBalancesSizeError,
    StateNftBalancesUpdatesSizeError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Error::*;

        let description = match *self {
            TxIndex => "an invalid input index for the transaction",
            TxSizeMismatch => "transaction length did not match the serialized size",
            TxDeserialize => "an error deserializing the transaction",
            InvalidFlags => "verification flags are invalid",
            InvalidFtWithdraw => "invalid ft withdrawal intent",
            InvalidNftWithdraw => "invalid nft withdrawal intent",
            StateFormat => "state map format violation",
            ExternalStateFormat => "external block info malformed",
            StateSizeError => "state exceeds size cap",
            StateUpdatesSizeError => "state updates exceed size cap",
            StateDeletesSizeError => "state deletes exceed size cap",
            StateFtBalancesSizeError => "ft balances exceed size cap",
            StateFtBalancesUpdatesSizeError => "ft balance updates exceed size cap",
            StateNftBalancesSizeError => "nft balances exceed size cap",
            StateNftBalancesUpdatesSizeError => "nft balance updates exceed size cap",
        };

        f.write_str(description)
    }
}

impl std::error::Error for Error {}

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Format => Error::StateFormat,
            StateError::ExternalFormat => Error::ExternalStateFormat,
            StateError::StateSize => Error::StateSizeError,
            StateError::StateUpdatesSize => Error::StateUpdatesSizeError,
            StateError::StateDeletesSize => Error::StateDeletesSizeError,
            StateError::FtBalancesSize => Error::StateFtBalancesSizeError,
            StateError::FtBalancesUpdatesSize => Error::StateFtBalancesUpdatesSizeError,
            StateError::NftBalancesSize => Error::StateNftBalancesSizeError,
            StateError::NftBalancesUpdatesSize => Error::StateNftBalancesUpdatesSizeError,
        }
    }
}

/// Inputs for one verification call. State snapshots arrive in their CBOR
/// boundary forms.
#[derive(Debug, Clone, Copy)]
pub struct VerifyRequest<'a> {
    pub lock_script: &'a [u8],
    pub unlock_script: &'a [u8],
    /// Transaction in the Bitcoin extended wire layout.
    pub tx: &'a [u8],
    /// Authorization public key, when the call is authorized out-of-band.
    pub auth_pub_key: Option<&'a [u8]>,
    pub ft_state: &'a [u8],
    pub ft_state_incoming: &'a [u8],
    pub nft_state: &'a [u8],
    pub nft_state_incoming: &'a [u8],
    pub contract_state: &'a [u8],
    /// `{"height": u32, "headers": {heightDecStr: headerHex80}}`
    pub contract_external_state: &'a [u8],
    pub prev_state_hash: [u8; 32],
    pub flags: u32,
    /// Require the transaction bytes to reserialize to the same length.
    pub strict_tx_size: bool,
}

/// The result of a completed verification call.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    /// Detailed interpreter verdict; [`ScriptError::Ok`] on success.
    pub script_error: ScriptError,
    /// 0-based index of the opcode that faulted, relative to the script it
    /// occurred in.
    pub script_error_op_num: u32,
    /// Final state, deltas and commitment; present only when the scripts
    /// verified and the state passed finalization.
    pub state: Option<StateResult>,
}

impl VerifyOutcome {
    pub fn ok(&self) -> bool {
        self.state.is_some()
    }
}

/// Snapshot, deltas and the chained commitment emitted by a successful run.
/// Map fields hold the canonical CBOR forms.
#[derive(Debug, Clone)]
pub struct StateResult {
    pub state_hash: [u8; 32],
    pub state_final: Vec<u8>,
    pub state_updates: Vec<u8>,
    pub state_deletes: Vec<u8>,
    pub ft_balances: Vec<u8>,
    pub ft_balances_updates: Vec<u8>,
    pub nft_balances: Vec<u8>,
    pub nft_balances_updates: Vec<u8>,
    pub ft_withdraws: Vec<u8>,
    pub nft_withdraws: Vec<u8>,
    pub ft_balances_added: Vec<u8>,
    pub nft_puts: Vec<u8>,
}

/// Verifies an unlock/lock script pair against a transaction and contract
/// state, returning the stack verdict and, on success, the finalized state
/// with its commitment.
///
/// Outer faults (malformed inputs, finalization caps) return `Err`; script
/// execution faults return `Ok` with the script error and opcode index set
/// and no state.
pub fn verify_avm_script(request: &VerifyRequest<'_>) -> Result<VerifyOutcome, Error> {
    if request.flags & !VERIFY_ALL != 0 {
        return Err(Error::InvalidFlags);
    }

    let tx_ctx = TransactionContext::parse(request.tx, request.strict_tx_size)?;

    let mut state = StateContext::from_cbor(
        request.ft_state,
        request.ft_state_incoming,
        request.nft_state,
        request.nft_state_incoming,
        request.contract_state,
        request.contract_external_state,
    )?;

    let context = ExecutionContext::new(
        tx_ctx,
        request.unlock_script,
        request.lock_script,
        request.auth_pub_key.map(|key| key.to_vec()),
    );
    let checker = SignatureChecker::new();
    let unlock = Script::from_bytes(request.unlock_script);
    let lock = Script::from_bytes(request.lock_script);

    let mut stack = Stack::new();
    let (script_result, script_error_op_num) = {
        let mut interpreter = Interpreter::new(&checker, Some(&context), &mut state);
        let result = interpreter.verify(&unlock, &lock, &mut stack);
        (result, interpreter.error_op_index())
    };

    if let Err(script_error) = script_result {
        return Ok(VerifyOutcome {
            script_error,
            script_error_op_num,
            state: None,
        });
    }

    // Deletes may have hollowed out keyspaces; drop them before re-running
    // the invariant battery.
    state.cleanup_state_and_balances();
    state.validate_final_state()?;

    let state_hash = state.state_hash(&request.prev_state_hash);
    let result = StateResult {
        state_hash,
        state_final: encode_cbor(state.kv_final())?,
        state_updates: encode_cbor(state.kv_updates())?,
        state_deletes: encode_cbor(state.kv_deletes())?,
        ft_balances: encode_cbor(state.ft_final())?,
        ft_balances_updates: encode_cbor(state.ft_updates())?,
        nft_balances: encode_cbor(state.nft_final())?,
        nft_balances_updates: encode_cbor(state.nft_updates())?,
        ft_withdraws: encode_cbor(&state.ft_withdraws_map())?,
        nft_withdraws: encode_cbor(&state.nft_withdraws_map())?,
        ft_balances_added: encode_cbor(&state.ft_added_map())?,
        nft_puts: encode_cbor(&state.nft_puts_map())?,
    };

    Ok(VerifyOutcome {
        script_error: ScriptError::Ok,
        script_error_op_num,
        state: Some(result),
    })
}

fn encode_cbor<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    serde_cbor::to_vec(value).map_err(|_| Error::StateFormat)
}
