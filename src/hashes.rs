//! Hash primitives shared by claim identifiers, node hashing, and the trie

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// A 32-byte double-SHA256 digest.
pub type Hash256 = [u8; 32];

/// Merkle root of an empty trie: 0x01 followed by 31 zero bytes.
pub const EMPTY_TRIE_ROOT: Hash256 = [
    0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0,
];

/// SHA256 applied twice.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// RIPEMD160 of SHA256, the claim ID digest.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}
