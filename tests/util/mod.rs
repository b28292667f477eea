//! Shared fixtures for the AVM integration tests.

#![allow(dead_code)]

use atomicals_avm::{
    opcodes, AtomicalRef, Error, OrderedMap, ScriptNum, VerifyOutcome, VerifyRequest, VERIFY_NONE,
};
use bitcoin::{
    absolute::LockTime, consensus, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Witness,
};
use serde::Serialize;

/// Owned inputs for one verification call; borrows are taken at
/// [`Fixture::verify`] time.
pub struct Fixture {
    pub tx: Vec<u8>,
    pub ft: Vec<u8>,
    pub ft_incoming: Vec<u8>,
    pub nft: Vec<u8>,
    pub nft_incoming: Vec<u8>,
    pub kv: Vec<u8>,
    pub external: Vec<u8>,
    pub auth_pub_key: Option<Vec<u8>>,
    pub prev_state_hash: [u8; 32],
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            tx: simple_tx_bytes(),
            ft: empty_map_cbor(),
            ft_incoming: empty_map_cbor(),
            nft: empty_map_cbor(),
            nft_incoming: empty_map_cbor(),
            kv: empty_map_cbor(),
            external: external_cbor(0, &[]),
            auth_pub_key: None,
            prev_state_hash: [0u8; 32],
        }
    }
}

impl Fixture {
    pub fn verify(&self, unlock: &[u8], lock: &[u8]) -> Result<VerifyOutcome, Error> {
        atomicals_avm::verify_avm_script(&VerifyRequest {
            lock_script: lock,
            unlock_script: unlock,
            tx: &self.tx,
            auth_pub_key: self.auth_pub_key.as_deref(),
            ft_state: &self.ft,
            ft_state_incoming: &self.ft_incoming,
            nft_state: &self.nft,
            nft_state_incoming: &self.nft_incoming,
            contract_state: &self.kv,
            contract_external_state: &self.external,
            prev_state_hash: self.prev_state_hash,
            flags: VERIFY_NONE,
            strict_tx_size: true,
        })
    }

    /// Runs and asserts the scripts verified.
    pub fn expect_ok(&self, unlock: &[u8], lock: &[u8]) -> VerifyOutcome {
        let outcome = self.verify(unlock, lock).expect("outer verification");
        assert!(
            outcome.ok(),
            "expected success, got {:?} at op {}",
            outcome.script_error,
            outcome.script_error_op_num
        );
        outcome
    }

    /// Runs and asserts the scripts failed with the given error.
    pub fn expect_err(
        &self,
        unlock: &[u8],
        lock: &[u8],
        expected: atomicals_avm::ScriptError,
    ) -> VerifyOutcome {
        let outcome = self.verify(unlock, lock).expect("outer verification");
        assert_eq!(outcome.script_error, expected);
        assert!(!outcome.ok());
        outcome
    }
}

pub fn empty_map_cbor() -> Vec<u8> {
    serde_cbor::to_vec(&OrderedMap::<u64>::new()).expect("cbor")
}

pub fn map_cbor<V: Serialize>(entries: &[(&str, V)]) -> Vec<u8>
where
    V: Clone,
{
    let mut map = OrderedMap::new();
    for (key, value) in entries {
        map.insert(key.to_string(), value.clone());
    }
    serde_cbor::to_vec(&map).expect("cbor")
}

pub fn kv_cbor(entries: &[(&str, &[(&str, &str)])]) -> Vec<u8> {
    let mut outer = OrderedMap::new();
    for (key_space, inner_entries) in entries {
        let mut inner = OrderedMap::new();
        for (key, value) in *inner_entries {
            inner.insert(key.to_string(), value.to_string());
        }
        outer.insert(key_space.to_string(), inner);
    }
    serde_cbor::to_vec(&outer).expect("cbor")
}

pub fn external_cbor(height: u32, headers: &[(u32, Vec<u8>)]) -> Vec<u8> {
    #[derive(Serialize)]
    struct Wire {
        height: u32,
        headers: OrderedMap<String>,
    }
    let mut map = OrderedMap::new();
    for (header_height, raw) in headers {
        map.insert(header_height.to_string(), hex::encode(raw));
    }
    serde_cbor::to_vec(&Wire {
        height,
        headers: map,
    })
    .expect("cbor")
}

/// One-input transaction with the given outputs.
pub fn tx_bytes_with_outputs(outputs: Vec<TxOut>) -> Vec<u8> {
    let tx = Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::default(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs,
    };
    consensus::serialize(&tx)
}

pub fn simple_tx_bytes() -> Vec<u8> {
    tx_bytes_with_outputs(vec![TxOut {
        value: Amount::from_sat(1_000),
        script_pubkey: ScriptBuf::new(),
    }])
}

pub fn output(value_sats: u64, script: Vec<u8>) -> TxOut {
    TxOut {
        value: Amount::from_sat(value_sats),
        script_pubkey: ScriptBuf::from_bytes(script),
    }
}

/// Minimal push of arbitrary data.
pub fn push(data: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(data.len() + 5);
    match data.len() {
        0 => script.push(opcodes::OP_0),
        1 if data[0] >= 1 && data[0] <= 16 => script.push(opcodes::OP_1 + data[0] - 1),
        1 if data[0] == 0x81 => script.push(opcodes::OP_1NEGATE),
        len if len <= 75 => {
            script.push(len as u8);
            script.extend_from_slice(data);
        }
        len if len <= 0xff => {
            script.push(opcodes::OP_PUSHDATA1);
            script.push(len as u8);
            script.extend_from_slice(data);
        }
        len if len <= 0xffff => {
            script.push(opcodes::OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
            script.extend_from_slice(data);
        }
        len => {
            script.push(opcodes::OP_PUSHDATA4);
            script.extend_from_slice(&(len as u32).to_le_bytes());
            script.extend_from_slice(data);
        }
    }
    script
}

/// Minimal push of a number in canonical encoding.
pub fn push_num(value: i64) -> Vec<u8> {
    push(&ScriptNum::from_i64(value).to_bytes())
}

/// Concatenates script fragments.
pub fn script(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// A token reference with a recognizable fill byte.
pub fn token_ref(fill: u8) -> Vec<u8> {
    vec![fill; AtomicalRef::SIZE]
}

pub fn token_hex(fill: u8) -> String {
    hex::encode(token_ref(fill))
}
