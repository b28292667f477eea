//! The transactional contract-state layer.
//!
//! A [`StateContext`] carries the fungible-token balances, NFT ownership
//! flags, the two-level key-value store and the external block-info table
//! for a single verification call. Opcode handlers mutate it; the verifier
//! finalizes it and derives the chained state commitment.
//!
//! All maps preserve insertion order: the order of the input CBOR parse for
//! pre-existing entries and the chronological order of mutations for new
//! ones. That order is consensus-critical because the commitment preimage
//! walks it.

use core::fmt;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use bitcoin::block::Header as BlockHeader;
use bitcoin::consensus;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::bigint::BigInt;
use crate::hashing::sha256;

/// Byte cap on the serialized final KV state.
pub const MAX_STATE_FINAL_BYTES: usize = 128 * 1024;
/// Byte cap on the serialized KV update and delete sets.
pub const MAX_STATE_UPDATE_BYTES: usize = 128 * 1024;
/// Byte cap on the serialized token balance tables.
pub const MAX_BALANCES_BYTES: usize = 128 * 1024;
/// Byte cap on the serialized token balance update tables.
pub const MAX_BALANCES_UPDATE_BYTES: usize = 128 * 1024;
/// Upper bound accepted for external block heights.
pub const MAX_BLOCK_INFO_HEIGHT: u32 = 10_000_000;

/// A 36-byte token identifier: 32-byte txid followed by a little-endian
/// 4-byte output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AtomicalRef([u8; 36]);

impl AtomicalRef {
    pub const SIZE: usize = 36;

    /// Accepts exactly [`AtomicalRef::SIZE`] bytes; the opcode layer turns
    /// `None` into `INVALID_ATOMICAL_REF_SIZE`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        let array: [u8; Self::SIZE] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }

    /// Lowercase hex of the identifier in natural byte order; the map key
    /// form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for AtomicalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Map preserving insertion order, keyed by the lowercase-hex string
/// convention of the wire format. Lookups are linear; the byte caps keep the
/// tables small enough for that to be irrelevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Overwrites in place (keeping the original position) or appends.
    pub fn insert(&mut self, key: String, value: V) {
        match self.get_mut(&key) {
            Some(slot) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn entry_or_default(&mut self, key: &str) -> &mut V
    where
        V: Default,
    {
        let index = match self.entries.iter().position(|(k, _)| k == key) {
            Some(index) => index,
            None => {
                self.entries.push((key.to_string(), V::default()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn key_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(k, _)| k.as_str())
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &V) -> bool) {
        self.entries.retain(|(k, v)| keep(k, v));
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map with string keys")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

pub type KvMap = OrderedMap<OrderedMap<String>>;
pub type KvDeleteMap = OrderedMap<OrderedMap<bool>>;
pub type FtMap = OrderedMap<u64>;
pub type NftMap = OrderedMap<bool>;

/// Faults raised while constructing or finalizing a state context.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A map violates the key/value format rules.
    Format,
    /// The external block-info table is malformed.
    ExternalFormat,
    StateSize,
    StateUpdatesSize,
    StateDeletesSize,
    FtBalancesSize,
    FtBalancesUpdatesSize,
    NftBalancesSize,
    NftBalancesUpdatesSize,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StateError::Format => "state map format violation",
            StateError::ExternalFormat => "external block info malformed",
            StateError::StateSize => "state exceeds size cap",
            StateError::StateUpdatesSize => "state updates exceed size cap",
            StateError::StateDeletesSize => "state deletes exceed size cap",
            StateError::FtBalancesSize => "ft balances exceed size cap",
            StateError::FtBalancesUpdatesSize => "ft balance updates exceed size cap",
            StateError::NftBalancesSize => "nft balances exceed size cap",
            StateError::NftBalancesUpdatesSize => "nft balance updates exceed size cap",
        };
        f.write_str(text)
    }
}

impl std::error::Error for StateError {}

/// One entry of the external block table: the decoded header plus its raw
/// 80-byte serialization.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub header: BlockHeader,
    pub raw: Vec<u8>,
}

/// External chain data supplied to the call: the current height and a
/// height-indexed set of raw headers.
#[derive(Debug, Clone, Default)]
pub struct ExternalState {
    current_height: u32,
    headers: BTreeMap<u32, BlockInfo>,
}

#[derive(Deserialize)]
struct ExternalStateWire {
    height: u32,
    headers: OrderedMap<String>,
}

impl ExternalState {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, StateError> {
        let wire: ExternalStateWire =
            serde_cbor::from_slice(bytes).map_err(|_| StateError::ExternalFormat)?;
        if wire.height > MAX_BLOCK_INFO_HEIGHT {
            return Err(StateError::ExternalFormat);
        }
        let mut headers = BTreeMap::new();
        for (key, header_hex) in wire.headers.iter() {
            let height: u32 = key.parse().map_err(|_| StateError::ExternalFormat)?;
            let raw = hex::decode(header_hex).map_err(|_| StateError::ExternalFormat)?;
            let header = decode_header(&raw).ok_or(StateError::ExternalFormat)?;
            headers.insert(height, BlockInfo { header, raw });
        }
        Ok(Self {
            current_height: wire.height,
            headers,
        })
    }

    /// Height 0 selects the current height.
    pub fn resolve_height(&self, height: u32) -> u32 {
        if height == 0 {
            self.current_height
        } else {
            height
        }
    }

    pub fn block_info(&self, height: u32) -> Option<&BlockInfo> {
        self.headers.get(&self.resolve_height(height))
    }
}

/// Decodes the fixed 80-byte Bitcoin header layout.
pub fn decode_header(bytes: &[u8]) -> Option<BlockHeader> {
    consensus::deserialize(bytes).ok()
}

/// Difficulty of a compact `nBits` target as an exact integer:
/// `trunc(0xffff * 2^(8*(29 - shift)) / mantissa)`.
pub fn compact_difficulty(bits: u32) -> BigInt {
    let shift = (bits >> 24) as i64;
    let mantissa = (bits & 0x00ff_ffff) as u64;
    if mantissa == 0 {
        return BigInt::zero();
    }
    let result = if shift <= 29 {
        BigInt::from(0xffffu64)
            .shifted_left(8 * (29 - shift))
            .div(&BigInt::from(mantissa))
    } else {
        BigInt::from(0xffffu64).div(&BigInt::from(mantissa).shifted_left(8 * (shift - 29)))
    };
    result.unwrap_or_else(|_| BigInt::zero())
}

/// Encodes arbitrary key bytes as a map key. The empty key takes the
/// two-character form `"00"`.
pub fn hex_key(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        "00".to_string()
    } else {
        hex::encode(bytes)
    }
}

fn is_hex_key(key: &str) -> bool {
    key.len() >= 2
        && key.len() % 2 == 0
        && key
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn decode_hex_key(key: &str) -> Vec<u8> {
    hex::decode(key).unwrap_or_default()
}

/// The transactional state for one verification call.
#[derive(Debug, Clone, Default)]
pub struct StateContext {
    ft: FtMap,
    ft_incoming: FtMap,
    nft: NftMap,
    nft_incoming: NftMap,
    kv: KvMap,
    kv_updates: KvMap,
    kv_deletes: KvDeleteMap,
    ft_updates: FtMap,
    nft_updates: NftMap,
    /// Incoming FT ids consumed so far, in consumption order.
    ft_adds: Vec<String>,
    /// Incoming NFT ids consumed so far, in consumption order.
    nft_puts: Vec<String>,
    ft_withdraws: OrderedMap<Vec<(u32, u64)>>,
    nft_withdraws: OrderedMap<u32>,
    external: ExternalState,
}

impl StateContext {
    /// Builds a context from already-parsed maps, validating the full
    /// invariant battery up front.
    pub fn new(
        ft: FtMap,
        ft_incoming: FtMap,
        nft: NftMap,
        nft_incoming: NftMap,
        kv: KvMap,
        external: ExternalState,
    ) -> Result<Self, StateError> {
        let state = Self {
            ft,
            ft_incoming,
            nft,
            nft_incoming,
            kv,
            external,
            ..Self::default()
        };
        state.validate_restrictions()?;
        Ok(state)
    }

    /// Builds a context straight from the CBOR boundary forms.
    pub fn from_cbor(
        ft: &[u8],
        ft_incoming: &[u8],
        nft: &[u8],
        nft_incoming: &[u8],
        kv: &[u8],
        external: &[u8],
    ) -> Result<Self, StateError> {
        let ft: FtMap = serde_cbor::from_slice(ft).map_err(|_| StateError::Format)?;
        let ft_incoming: FtMap =
            serde_cbor::from_slice(ft_incoming).map_err(|_| StateError::Format)?;
        let nft: NftMap = serde_cbor::from_slice(nft).map_err(|_| StateError::Format)?;
        let nft_incoming: NftMap =
            serde_cbor::from_slice(nft_incoming).map_err(|_| StateError::Format)?;
        let kv: KvMap = serde_cbor::from_slice(kv).map_err(|_| StateError::Format)?;
        let external = ExternalState::from_cbor(external)?;
        Self::new(ft, ft_incoming, nft, nft_incoming, kv, external)
    }

    pub fn external(&self) -> &ExternalState {
        &self.external
    }

    // ---- contract key-value store -------------------------------------

    /// Inserts or overwrites an entry, recording it as an update and
    /// clearing any delete marker.
    pub fn contract_state_put(&mut self, key_space: &[u8], key_name: &[u8], value: &[u8]) {
        let ks = hex_key(key_space);
        let kn = hex_key(key_name);
        let val = hex_key(value);
        self.kv.entry_or_default(&ks).insert(kn.clone(), val.clone());
        self.kv_updates.entry_or_default(&ks).insert(kn.clone(), val);
        self.kv_deletes.entry_or_default(&ks).remove(&kn);
    }

    /// Removes an entry from the state and the update set, recording the
    /// delete marker.
    pub fn contract_state_delete(&mut self, key_space: &[u8], key_name: &[u8]) {
        let ks = hex_key(key_space);
        let kn = hex_key(key_name);
        self.kv.entry_or_default(&ks).remove(&kn);
        self.kv_updates.entry_or_default(&ks).remove(&kn);
        self.kv_deletes.entry_or_default(&ks).insert(kn, true);
    }

    pub fn contract_state_get(&self, key_space: &[u8], key_name: &[u8]) -> Option<Vec<u8>> {
        let value = self
            .kv
            .get(&hex_key(key_space))?
            .get(&hex_key(key_name))?;
        Some(decode_hex_key(value))
    }

    pub fn contract_state_exists(&self, key_space: &[u8], key_name: &[u8]) -> bool {
        self.kv
            .get(&hex_key(key_space))
            .map_or(false, |node| node.contains_key(&hex_key(key_name)))
    }

    // ---- token balances ------------------------------------------------

    pub fn contract_ft_balance(&self, id: &AtomicalRef) -> u64 {
        self.ft.get(&id.to_hex()).copied().unwrap_or(0)
    }

    pub fn contract_ft_balance_incoming(&self, id: &AtomicalRef) -> u64 {
        self.ft_incoming.get(&id.to_hex()).copied().unwrap_or(0)
    }

    /// Consumes the incoming balance for `id`, adding the full incoming
    /// amount to the held balance. Each incoming id may be consumed at most
    /// once per execution; a missing or zero incoming amount fails.
    pub fn contract_ft_balance_add(&mut self, id: &AtomicalRef) -> bool {
        let key = id.to_hex();
        let incoming = match self.ft_incoming.get(&key) {
            Some(amount) => *amount,
            None => return false,
        };
        if self.ft_adds.iter().any(|k| k == &key) {
            return false;
        }
        if incoming == 0 {
            return false;
        }
        let current = self.ft.get(&key).copied().unwrap_or(0);
        let updated = match current.checked_add(incoming) {
            Some(updated) => updated,
            None => return false,
        };
        self.ft_adds.push(key.clone());
        self.ft.insert(key.clone(), updated);
        self.ft_updates.insert(key, updated);
        true
    }

    pub fn contract_nft_exists(&self, id: &AtomicalRef) -> bool {
        self.nft.get(&id.to_hex()).copied().unwrap_or(false)
    }

    pub fn contract_nft_exists_incoming(&self, id: &AtomicalRef) -> bool {
        self.nft_incoming.get(&id.to_hex()).copied().unwrap_or(false)
    }

    /// Consumes an incoming NFT, marking it owned. At most once per id per
    /// execution; ids absent from incoming or flagged `false` fail.
    pub fn contract_nft_put(&mut self, id: &AtomicalRef) -> bool {
        let key = id.to_hex();
        let incoming = match self.nft_incoming.get(&key) {
            Some(flag) => *flag,
            None => return false,
        };
        if self.nft_puts.iter().any(|k| k == &key) {
            return false;
        }
        if !incoming {
            return false;
        }
        self.nft_puts.push(key.clone());
        self.nft.insert(key.clone(), true);
        self.nft_updates.insert(key, true);
        true
    }

    // ---- enumeration ---------------------------------------------------

    pub fn ft_count(&self) -> usize {
        self.ft.len()
    }

    pub fn ft_count_incoming(&self) -> usize {
        self.ft_incoming.len()
    }

    pub fn nft_count(&self) -> usize {
        self.nft.len()
    }

    pub fn nft_count_incoming(&self) -> usize {
        self.nft_incoming.len()
    }

    pub fn ft_item(&self, index: usize) -> Option<Vec<u8>> {
        self.ft.key_at(index).map(decode_hex_key)
    }

    pub fn ft_item_incoming(&self, index: usize) -> Option<Vec<u8>> {
        self.ft_incoming.key_at(index).map(decode_hex_key)
    }

    pub fn nft_item(&self, index: usize) -> Option<Vec<u8>> {
        self.nft.key_at(index).map(decode_hex_key)
    }

    pub fn nft_item_incoming(&self, index: usize) -> Option<Vec<u8>> {
        self.nft_incoming.key_at(index).map(decode_hex_key)
    }

    // ---- withdrawals ---------------------------------------------------

    /// Decrements the held balance and records the withdraw intent. A
    /// second intent for the same `(id, output)` pair keeps the first
    /// amount but still debits the balance, mirroring the reference
    /// implementation.
    pub fn contract_withdraw_ft(&mut self, id: &AtomicalRef, output_index: u32, amount: u64) -> bool {
        if amount == 0 {
            return false;
        }
        let key = id.to_hex();
        let available = match self.ft.get(&key) {
            Some(balance) => *balance,
            None => return false,
        };
        if amount > available {
            return false;
        }
        let updated = available - amount;
        if updated == 0 {
            self.ft.remove(&key);
        } else {
            self.ft.insert(key.clone(), updated);
        }
        self.ft_updates.insert(key.clone(), updated);

        let outputs = self.ft_withdraws.entry_or_default(&key);
        if !outputs.iter().any(|(index, _)| *index == output_index) {
            outputs.push((output_index, amount));
        }
        true
    }

    /// Releases an owned NFT to the given output.
    pub fn contract_withdraw_nft(&mut self, id: &AtomicalRef, output_index: u32) -> bool {
        let key = id.to_hex();
        if !self.nft.contains_key(&key) {
            return false;
        }
        self.nft.remove(&key);
        self.nft_updates.insert(key.clone(), false);
        if !self.nft_withdraws.contains_key(&key) {
            self.nft_withdraws.insert(key, output_index);
        }
        true
    }

    // ---- finalization --------------------------------------------------

    /// Drops empty keyspaces, zero balances and false ownership flags ahead
    /// of final validation.
    pub fn cleanup_state_and_balances(&mut self) {
        self.kv.retain(|_, node| !node.is_empty());
        self.kv_updates.retain(|_, node| !node.is_empty());
        self.kv_deletes.retain(|_, node| !node.is_empty());
        self.ft.retain(|_, amount| *amount != 0);
        self.nft.retain(|_, flag| *flag);
    }

    /// Re-runs the full invariant battery over the current maps.
    pub fn validate_final_state(&self) -> Result<(), StateError> {
        self.validate_restrictions()
    }

    fn validate_restrictions(&self) -> Result<(), StateError> {
        let state_bytes = validate_kv(&self.kv)?;
        if state_bytes > MAX_STATE_FINAL_BYTES {
            return Err(StateError::StateSize);
        }
        let updates_bytes = validate_kv(&self.kv_updates)?;
        if updates_bytes > MAX_STATE_UPDATE_BYTES {
            return Err(StateError::StateUpdatesSize);
        }
        let deletes_bytes = validate_kv_deletes(&self.kv_deletes)?;
        if deletes_bytes > MAX_STATE_UPDATE_BYTES {
            return Err(StateError::StateDeletesSize);
        }
        let ft_bytes = validate_ft(&self.ft, false)?;
        if ft_bytes > MAX_BALANCES_BYTES {
            return Err(StateError::FtBalancesSize);
        }
        let ft_updates_bytes = validate_ft(&self.ft_updates, true)?;
        if ft_updates_bytes > MAX_BALANCES_UPDATE_BYTES {
            return Err(StateError::FtBalancesUpdatesSize);
        }
        // Incoming tables are format-checked but not size-capped. Zero
        // amounts and false flags are valid here: such entries exist but
        // cannot be consumed.
        validate_ft(&self.ft_incoming, true)?;
        let nft_bytes = validate_nft(&self.nft, false)?;
        if nft_bytes > MAX_BALANCES_BYTES {
            return Err(StateError::NftBalancesSize);
        }
        let nft_updates_bytes = validate_nft(&self.nft_updates, true)?;
        if nft_updates_bytes > MAX_BALANCES_UPDATE_BYTES {
            return Err(StateError::NftBalancesUpdatesSize);
        }
        validate_nft(&self.nft_incoming, true)?;
        Ok(())
    }

    // ---- result views --------------------------------------------------

    pub fn kv_final(&self) -> &KvMap {
        &self.kv
    }

    pub fn kv_updates(&self) -> &KvMap {
        &self.kv_updates
    }

    pub fn kv_deletes(&self) -> &KvDeleteMap {
        &self.kv_deletes
    }

    pub fn ft_final(&self) -> &FtMap {
        &self.ft
    }

    pub fn ft_incoming(&self) -> &FtMap {
        &self.ft_incoming
    }

    pub fn ft_updates(&self) -> &FtMap {
        &self.ft_updates
    }

    pub fn nft_final(&self) -> &NftMap {
        &self.nft
    }

    pub fn nft_incoming(&self) -> &NftMap {
        &self.nft_incoming
    }

    pub fn nft_updates(&self) -> &NftMap {
        &self.nft_updates
    }

    /// `{tokenIdHex: {outputIndexDecStr: amount}}`
    pub fn ft_withdraws_map(&self) -> OrderedMap<OrderedMap<u64>> {
        let mut result = OrderedMap::new();
        for (key, outputs) in self.ft_withdraws.iter() {
            let mut inner = OrderedMap::new();
            for (index, amount) in outputs {
                inner.insert(index.to_string(), *amount);
            }
            result.insert(key.to_string(), inner);
        }
        result
    }

    /// `{tokenIdHex: outputIndex}`
    pub fn nft_withdraws_map(&self) -> OrderedMap<u32> {
        self.nft_withdraws.clone()
    }

    /// Consumed incoming FT ids as `{tokenIdHex: true}`.
    pub fn ft_added_map(&self) -> OrderedMap<bool> {
        let mut result = OrderedMap::new();
        for key in &self.ft_adds {
            result.insert(key.clone(), true);
        }
        result
    }

    /// Consumed incoming NFT ids as `{tokenIdHex: true}`.
    pub fn nft_puts_map(&self) -> OrderedMap<bool> {
        let mut result = OrderedMap::new();
        for key in &self.nft_puts {
            result.insert(key.clone(), true);
        }
        result
    }

    // ---- commitment ----------------------------------------------------

    /// The 32-byte commitment binding every output of this run to the
    /// previous state hash.
    pub fn state_hash(&self, prev_state_hash: &[u8; 32]) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(32 * 12);
        preimage.extend_from_slice(prev_state_hash);
        preimage.extend_from_slice(&hash_token_keys_nft(&self.nft_incoming));
        preimage.extend_from_slice(&hash_token_keys_ft(&self.ft_incoming));
        preimage.extend_from_slice(&hash_kv(&self.kv));
        preimage.extend_from_slice(&hash_kv(&self.kv_updates));
        preimage.extend_from_slice(&hash_kv_deletes(&self.kv_deletes));
        preimage.extend_from_slice(&hash_token_keys_nft(&self.nft));
        preimage.extend_from_slice(&hash_token_keys_ft(&self.ft));
        preimage.extend_from_slice(&hash_token_keys_nft(&self.nft_updates));
        preimage.extend_from_slice(&hash_token_keys_ft(&self.ft_updates));
        preimage.extend_from_slice(&hash_nft_withdraws(&self.nft_withdraws));
        preimage.extend_from_slice(&hash_ft_withdraws(&self.ft_withdraws));
        sha256(&preimage)
    }
}

fn validate_kv(map: &KvMap) -> Result<usize, StateError> {
    let mut byte_count = 0usize;
    for (key, node) in map.iter() {
        if !is_hex_key(key) {
            return Err(StateError::Format);
        }
        byte_count += key.len() / 2;
        if node.is_empty() {
            return Err(StateError::Format);
        }
        for (inner_key, value) in node.iter() {
            if !is_hex_key(inner_key) || !is_hex_key(value) {
                return Err(StateError::Format);
            }
            byte_count += inner_key.len() / 2 + value.len() / 2;
        }
    }
    Ok(byte_count)
}

fn validate_kv_deletes(map: &KvDeleteMap) -> Result<usize, StateError> {
    let mut byte_count = 0usize;
    for (key, node) in map.iter() {
        if !is_hex_key(key) {
            return Err(StateError::Format);
        }
        byte_count += key.len() / 2;
        if node.is_empty() {
            return Err(StateError::Format);
        }
        for (inner_key, flag) in node.iter() {
            if !is_hex_key(inner_key) || !*flag {
                return Err(StateError::Format);
            }
            // Delete markers contribute only their key bytes.
            byte_count += inner_key.len() / 2;
        }
    }
    Ok(byte_count)
}

fn validate_ft(map: &FtMap, allow_zero: bool) -> Result<usize, StateError> {
    let mut byte_count = 0usize;
    for (key, amount) in map.iter() {
        if !is_hex_key(key) {
            return Err(StateError::Format);
        }
        if !allow_zero && *amount == 0 {
            return Err(StateError::Format);
        }
        byte_count += key.len() / 2 + 8;
    }
    Ok(byte_count)
}

fn validate_nft(map: &NftMap, allow_false: bool) -> Result<usize, StateError> {
    let mut byte_count = 0usize;
    for (key, flag) in map.iter() {
        if !is_hex_key(key) {
            return Err(StateError::Format);
        }
        if !allow_false && !*flag {
            return Err(StateError::Format);
        }
        byte_count += key.len() / 2;
    }
    Ok(byte_count)
}

fn hash_kv(map: &KvMap) -> [u8; 32] {
    let mut preimage = Vec::new();
    for (key, node) in map.iter() {
        preimage.extend_from_slice(&decode_hex_key(key));
        for (inner_key, value) in node.iter() {
            preimage.extend_from_slice(&decode_hex_key(inner_key));
            preimage.extend_from_slice(&decode_hex_key(value));
        }
    }
    sha256(&preimage)
}

fn hash_kv_deletes(map: &KvDeleteMap) -> [u8; 32] {
    let mut preimage = Vec::new();
    for (key, node) in map.iter() {
        preimage.extend_from_slice(&decode_hex_key(key));
        for (inner_key, _) in node.iter() {
            preimage.extend_from_slice(&decode_hex_key(inner_key));
        }
    }
    sha256(&preimage)
}

fn hash_token_keys_ft(map: &FtMap) -> [u8; 32] {
    let mut preimage = Vec::new();
    for (key, _) in map.iter() {
        preimage.extend_from_slice(&decode_hex_key(key));
    }
    sha256(&preimage)
}

fn hash_token_keys_nft(map: &NftMap) -> [u8; 32] {
    let mut preimage = Vec::new();
    for (key, _) in map.iter() {
        preimage.extend_from_slice(&decode_hex_key(key));
    }
    sha256(&preimage)
}

fn hash_nft_withdraws(map: &OrderedMap<u32>) -> [u8; 32] {
    let mut preimage = Vec::new();
    for (key, output_index) in map.iter() {
        preimage.extend_from_slice(&decode_hex_key(key));
        preimage.extend_from_slice(&output_index.to_le_bytes());
    }
    sha256(&preimage)
}

fn hash_ft_withdraws(map: &OrderedMap<Vec<(u32, u64)>>) -> [u8; 32] {
    let mut preimage = Vec::new();
    for (key, outputs) in map.iter() {
        preimage.extend_from_slice(&decode_hex_key(key));
        for (output_index, amount) in outputs {
            preimage.extend_from_slice(&(*output_index as u64).to_le_bytes());
            preimage.extend_from_slice(&amount.to_le_bytes());
        }
    }
    sha256(&preimage)
}
