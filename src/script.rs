//! Claim script encoding and decoding
//!
//! A claim operation rides in front of an ordinary payment script:
//!
//! ```text
//! OP_CLAIMNAME    <name> <value>            OP_2DROP OP_DROP <payment script>
//! OP_SUPPORTCLAIM <name> <claim_id>         OP_2DROP OP_DROP <payment script>
//! OP_UPDATECLAIM  <name> <claim_id> <value> OP_2DROP OP_DROP <payment script>
//! ```
//!
//! Only the prefix is decoded here; script execution belongs to the chain
//! layer.

use crate::claim::ClaimId;
use crate::error::{Error, Result};

/// Opcode introducing a claim creation.
pub const OP_CLAIMNAME: u8 = 0xb5;

/// Opcode introducing a support.
pub const OP_SUPPORTCLAIM: u8 = 0xb6;

/// Opcode introducing a claim update.
pub const OP_UPDATECLAIM: u8 = 0xb7;

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_TRUE: u8 = 0x51;
const OP_2DROP: u8 = 0x6d;
const OP_DROP: u8 = 0x75;

/// Max claim script size in bytes, not counting the payment script part.
pub const MAX_CLAIM_SCRIPT_SIZE: usize = 8192;

/// Max claim name size in bytes.
pub const MAX_CLAIM_NAME_SIZE: usize = 255;

/// Minimum fee per byte of name in a claim creation output; a mempool
/// rule, priced per trie node the name occupies.
pub const MIN_FEE_PER_NAMECLAIM_CHAR: i64 = 200_000;

/// A decoded claim script prefix, borrowing from the script bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimScript<'a> {
    opcode: u8,
    name: &'a [u8],
    claim_id: Option<&'a [u8]>,
    value: Option<&'a [u8]>,
    prefix_len: usize,
}

impl<'a> ClaimScript<'a> {
    /// The claim opcode (`OP_CLAIMNAME`, `OP_SUPPORTCLAIM`, or
    /// `OP_UPDATECLAIM`).
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// The claimed name bytes.
    pub fn name(&self) -> &'a [u8] {
        self.name
    }

    /// The 20 raw claim id bytes; absent for a claim creation, whose id
    /// is derived from the outpoint instead.
    pub fn claim_id(&self) -> Option<&'a [u8]> {
        self.claim_id
    }

    /// The raw claim id parsed into a [`ClaimId`].
    pub fn parsed_claim_id(&self) -> Option<ClaimId> {
        self.claim_id.and_then(|raw| ClaimId::from_bytes(raw).ok())
    }

    /// The claim payload; absent for a support.
    pub fn value(&self) -> Option<&'a [u8]> {
        self.value
    }

    /// Length of the claim prefix, through the trailing `OP_DROP`.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }
}

/// Decode the claim prefix of `script`.
///
/// A script that does not start with a claim opcode fails with
/// [`Error::NotClaimScript`]; one that starts with a claim opcode but
/// does not match any claim shape fails with
/// [`Error::InvalidClaimScript`].
pub fn decode_claim_script(script: &[u8]) -> Result<ClaimScript<'_>> {
    let &opcode = script.first().ok_or(Error::NotClaimScript)?;
    if opcode != OP_CLAIMNAME && opcode != OP_SUPPORTCLAIM && opcode != OP_UPDATECLAIM {
        return Err(Error::NotClaimScript);
    }
    let invalid = |what: &str| Error::InvalidClaimScript(what.to_string());

    let (name, at) = read_push(script, 1).ok_or_else(|| invalid("malformed name push"))?;
    if name.len() > MAX_CLAIM_NAME_SIZE {
        return Err(invalid("name too long"));
    }

    let (claim_id, value, at) = match opcode {
        OP_CLAIMNAME => {
            let (value, at) = read_push(script, at).ok_or_else(|| invalid("malformed value push"))?;
            (None, Some(value), at)
        }
        OP_SUPPORTCLAIM => {
            let (id, at) = read_push(script, at).ok_or_else(|| invalid("malformed claim id push"))?;
            if id.len() != 20 {
                return Err(invalid("claim id push must be 20 bytes"));
            }
            (Some(id), None, at)
        }
        _ => {
            let (id, at) = read_push(script, at).ok_or_else(|| invalid("malformed claim id push"))?;
            if id.len() != 20 {
                return Err(invalid("claim id push must be 20 bytes"));
            }
            let (value, at) = read_push(script, at).ok_or_else(|| invalid("malformed value push"))?;
            (Some(id), Some(value), at)
        }
    };

    if script.get(at) != Some(&OP_2DROP) || script.get(at + 1) != Some(&OP_DROP) {
        return Err(invalid("missing drop tail"));
    }
    let prefix_len = at + 2;
    if prefix_len > MAX_CLAIM_SCRIPT_SIZE {
        return Err(invalid("claim script too large"));
    }
    if prefix_len >= script.len() {
        return Err(invalid("missing payment script"));
    }

    Ok(ClaimScript {
        opcode,
        name,
        claim_id,
        value,
        prefix_len,
    })
}

/// Build `OP_CLAIMNAME <name> <value> OP_2DROP OP_DROP OP_TRUE`.
pub fn claim_name_script(name: &[u8], value: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_CLAIMNAME];
    push_data(&mut script, name);
    push_data(&mut script, value);
    script.extend_from_slice(&[OP_2DROP, OP_DROP, OP_TRUE]);
    script
}

/// Build `OP_SUPPORTCLAIM <name> <claim_id> OP_2DROP OP_DROP OP_TRUE`.
pub fn support_claim_script(name: &[u8], id: &ClaimId) -> Vec<u8> {
    let mut script = vec![OP_SUPPORTCLAIM];
    push_data(&mut script, name);
    push_data(&mut script, id.as_bytes());
    script.extend_from_slice(&[OP_2DROP, OP_DROP, OP_TRUE]);
    script
}

/// Build `OP_UPDATECLAIM <name> <claim_id> <value> OP_2DROP OP_DROP OP_TRUE`.
pub fn update_claim_script(name: &[u8], id: &ClaimId, value: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_UPDATECLAIM];
    push_data(&mut script, name);
    push_data(&mut script, id.as_bytes());
    push_data(&mut script, value);
    script.extend_from_slice(&[OP_2DROP, OP_DROP, OP_TRUE]);
    script
}

/// The payment script with any claim prefix removed; the script itself
/// when it carries none.
pub fn strip_claim_script_prefix(script: &[u8]) -> &[u8] {
    match decode_claim_script(script) {
        Ok(claim) => &script[claim.prefix_len()..],
        Err(_) => script,
    }
}

/// Size of the claim prefix, or the whole script when it carries none.
pub fn claim_script_size(script: &[u8]) -> usize {
    match decode_claim_script(script) {
        Ok(claim) => claim.prefix_len(),
        Err(_) => script.len(),
    }
}

/// Size of the name in a claim script, or 0 for a non-claim script.
pub fn claim_name_size(script: &[u8]) -> usize {
    match decode_claim_script(script) {
        Ok(claim) => claim.name().len(),
        Err(_) => 0,
    }
}

/// Minimum fee (mempool rule) for a transaction whose output scripts are
/// `outputs`: the summed name sizes times the per-byte fee.
pub fn min_claim_trie_fee<I, S>(outputs: I, fee_per_name_byte: i64) -> i64
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    outputs
        .into_iter()
        .map(|script| claim_name_size(script.as_ref()) as i64)
        .sum::<i64>()
        * fee_per_name_byte
}

/// Read one data push starting at `at`. Handles the empty push, direct
/// pushes, and the three PUSHDATA forms in their minimal encodings.
fn read_push(script: &[u8], at: usize) -> Option<(&[u8], usize)> {
    let &opcode = script.get(at)?;
    match opcode {
        OP_0 => Some((&script[at..at], at + 1)),
        0x01..=0x4b => {
            let end = at + 1 + opcode as usize;
            Some((script.get(at + 1..end)?, end))
        }
        OP_PUSHDATA1 => {
            let len = *script.get(at + 1)? as usize;
            if len <= 0x4b {
                return None;
            }
            let end = at + 2 + len;
            Some((script.get(at + 2..end)?, end))
        }
        OP_PUSHDATA2 => {
            let len = u16::from_le_bytes([*script.get(at + 1)?, *script.get(at + 2)?]) as usize;
            if len <= 0xff {
                return None;
            }
            let end = at + 3 + len;
            Some((script.get(at + 3..end)?, end))
        }
        OP_PUSHDATA4 => {
            let len = u32::from_le_bytes([
                *script.get(at + 1)?,
                *script.get(at + 2)?,
                *script.get(at + 3)?,
                *script.get(at + 4)?,
            ]) as usize;
            if len <= 0xffff {
                return None;
            }
            let end = at + 5 + len;
            Some((script.get(at + 5..end)?, end))
        }
        _ => None,
    }
}

/// Append `data` as a minimally encoded push.
fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => script.push(OP_0),
        1..=0x4b => {
            script.push(data.len() as u8);
            script.extend_from_slice(data);
        }
        0x4c..=0xff => {
            script.push(OP_PUSHDATA1);
            script.push(data.len() as u8);
            script.extend_from_slice(data);
        }
        0x100..=0xffff => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(data.len() as u16).to_le_bytes());
            script.extend_from_slice(data);
        }
        _ => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(data.len() as u32).to_le_bytes());
            script.extend_from_slice(data);
        }
    }
}
