//! Digest primitives used by the crypto opcodes and the state commitment.
//!
//! The Bitcoin family (RIPEMD-160, SHA-1, SHA-256 and the HASH160/HASH256
//! composites) comes from `bitcoin::hashes`; the wide-digest family of
//! `OP_HASH_FN` is provided by `sha2`, `sha3` and `eaglesong`.

use bitcoin::hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash};
use sha2::{Digest, Sha512, Sha512_256};
use sha3::Sha3_256;

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    ripemd160::Hash::hash(data).to_byte_array()
}

pub fn sha1(data: &[u8]) -> [u8; 20] {
    sha1::Hash::hash(data).to_byte_array()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(data).to_byte_array()
}

/// RIPEMD160(SHA256(data)).
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// SHA256(SHA256(data)).
pub fn hash256(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

pub fn sha512_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha512_256::digest(data));
    out
}

pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha3_256::digest(data));
    out
}

pub fn eaglesong(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    eaglesong::eaglesong(data, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_digests() {
        // FIPS 180-4 / FIPS 202 reference digests for the empty string.
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(sha512_256(b"")),
            "c672b8d1ef56ed28ab87c3622c5114069bdd3ad7b8f9737498d0c01ecef0967a"
        );
        assert_eq!(
            hex::encode(sha3_256(b"")),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
    }

    #[test]
    fn composites_agree_with_primitives() {
        let data = b"avm";
        assert_eq!(hash256(data), sha256(&sha256(data)));
        assert_eq!(hash160(data), ripemd160(&sha256(data)));
    }

    #[test]
    fn wide_digest_lengths() {
        assert_eq!(sha512(b"x").len(), 64);
        assert_eq!(eaglesong(b"x").len(), 32);
    }
}
