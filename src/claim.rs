//! Claim and support records, identifiers, and claim list operations

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashes::hash160;
use crate::params::Params;

/// Amount in base units (satoshi-like).
pub type Amount = i64;

/// Block height; genesis is 0.
pub type Height = i32;

/// Reference to a transaction output.
///
/// Total-ordered first by transaction hash (lexicographic on the raw
/// bytes), then by output index; the derived `Ord` over the fields in
/// declaration order is exactly that order, and bidding tie-breaks
/// depend on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OutPoint {
    /// Raw transaction hash.
    pub txid: [u8; 32],
    /// Output index within the transaction.
    pub index: u32,
}

impl OutPoint {
    /// Create an outpoint from a raw transaction hash and output index.
    pub fn new(txid: [u8; 32], index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // txid displayed byte-reversed, as the chain tools print it
        let mut txid = self.txid;
        txid.reverse();
        write!(f, "{}:{}", hex::encode(txid), self.index)
    }
}

/// 20-byte claim identifier.
///
/// Derived for a new claim as `RIPEMD160(SHA256(txid || be_u32(index)))`
/// of the creating outpoint. The hex form is byte-reversed, 40 lowercase
/// characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ClaimId([u8; 20]);

impl ClaimId {
    /// Derive the identifier of a claim created at `outpoint`.
    pub fn from_outpoint(outpoint: &OutPoint) -> Self {
        let mut preimage = [0u8; 36];
        preimage[..32].copy_from_slice(&outpoint.txid);
        preimage[32..].copy_from_slice(&outpoint.index.to_be_bytes());
        ClaimId(hash160(&preimage))
    }

    /// Parse the 40-character lowercase hex form.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 40 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::InvalidClaimId);
        }
        let mut id = [0u8; 20];
        hex::decode_to_slice(s, &mut id).map_err(|_| Error::InvalidClaimId)?;
        id.reverse();
        Ok(ClaimId(id))
    }

    /// Build an identifier from its raw 20-byte form (as carried in a
    /// claim script push).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 20] = bytes.try_into().map_err(|_| Error::InvalidClaimId)?;
        Ok(ClaimId(raw))
    }

    /// Raw internal bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The 40-character lowercase hex form (byte-reversed).
    pub fn to_hex(&self) -> String {
        let mut id = self.0;
        id.reverse();
        hex::encode(id)
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClaimId({})", self.to_hex())
    }
}

/// A claim or support record anchored to a transaction output.
///
/// Supports share the shape: a support carries the id of the claim it
/// backs and an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Anchoring output; unique within a node across claims and supports.
    pub outpoint: OutPoint,
    /// Claim identifier (for a support, the id of the backed claim).
    pub id: ClaimId,
    /// Amount bound to the output.
    pub amount: Amount,
    /// Height at which the creating command was applied.
    pub accepted: Height,
    /// Earliest height at which this record can win the bid.
    pub active_at: Height,
    /// Own amount plus active matching supports; recomputed at each bid.
    pub effective_amount: Amount,
    /// Opaque payload; not inspected by the registry.
    pub value: Vec<u8>,
}

impl Claim {
    pub(crate) fn new(outpoint: OutPoint, amount: Amount) -> Self {
        Self {
            outpoint,
            id: ClaimId::default(),
            amount,
            accepted: 0,
            active_at: 0,
            effective_amount: 0,
            value: Vec::new(),
        }
    }

    /// Height at which this record expires.
    pub fn expire_at(&self, params: &Params) -> Height {
        if self.accepted + params.original_claim_expiration
            > params.extended_claim_expiration_fork_height
        {
            self.accepted + params.extended_claim_expiration
        } else {
            self.accepted + params.original_claim_expiration
        }
    }

    /// Whether this record is live (activated and not expired) at `height`.
    pub fn is_active_at(&self, height: Height, params: &Params) -> bool {
        self.active_at <= height && self.expire_at(params) > height
    }
}

/// Predicate matching a record by outpoint.
pub(crate) fn by_outpoint(outpoint: OutPoint) -> impl Fn(&Claim) -> bool {
    move |c| c.outpoint == outpoint
}

/// Predicate matching a record by claim id.
pub(crate) fn by_id(id: ClaimId) -> impl Fn(&Claim) -> bool {
    move |c| c.id == id
}

/// Remove the first record matching the predicate in O(1) by swapping the
/// last element into its slot. Order of the remainder is not preserved.
pub(crate) fn swap_remove_by(list: &mut Vec<Claim>, pred: impl Fn(&Claim) -> bool) -> Option<Claim> {
    let at = list.iter().position(pred)?;
    Some(list.swap_remove(at))
}
