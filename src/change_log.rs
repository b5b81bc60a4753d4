//! Typed change records and per-name persistent command logs
//!
//! Every mutation of a name is appended to that name's log; replaying the
//! log from scratch is the canonical recovery path after a crash or a
//! rewind.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::claim::{Amount, ClaimId, Height, OutPoint};
use crate::db::{Database, CF_CHANGES};
use crate::error::{Error, Result};

/// The command a change record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Create a claim at an outpoint.
    AddClaim,
    /// Spend a claim by outpoint.
    SpendClaim,
    /// Re-anchor a spent claim at a new outpoint, preserving its id.
    UpdateClaim,
    /// Create a support for a claim id.
    AddSupport,
    /// Spend a support by outpoint.
    SpendSupport,
}

/// A record of one change to the node of `name` at `height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Height the command applies at.
    pub height: Height,
    /// The command.
    pub cmd: Command,
    /// Raw name bytes.
    pub name: Vec<u8>,
    /// Anchoring outpoint.
    pub outpoint: OutPoint,
    /// Amount bound to the outpoint (zero for spends).
    pub amount: Amount,
    /// Claim id (zero for commands that derive or ignore it).
    pub id: ClaimId,
    /// Opaque claim payload.
    pub value: Vec<u8>,
}

impl Change {
    /// Start a change record for `cmd` at `outpoint`; height and name are
    /// stamped by the claim trie when the change is submitted.
    pub fn new(cmd: Command, outpoint: OutPoint) -> Self {
        Self {
            height: 0,
            cmd,
            name: Vec::new(),
            outpoint,
            amount: 0,
            id: ClaimId::default(),
            value: Vec::new(),
        }
    }

    /// Set the amount.
    pub fn amount(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self
    }

    /// Set the claim id.
    pub fn id(mut self, id: ClaimId) -> Self {
        self.id = id;
        self
    }

    /// Set the payload.
    pub fn value(mut self, value: Vec<u8>) -> Self {
        self.value = value;
        self
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} at {} ht {} amt {}",
            self.cmd,
            String::from_utf8_lossy(&self.name),
            self.outpoint,
            self.height,
            self.amount
        )
    }
}

/// Drop every change recorded above `height`. Heights in a log are
/// nondecreasing, so a single cut suffices.
pub(crate) fn truncate_above(changes: &mut Vec<Change>, height: Height) {
    if let Some(at) = changes.iter().position(|c| c.height > height) {
        changes.truncate(at);
    }
}

/// Per-name change logs over the `changes` column family.
pub struct ChangeLog {
    db: Arc<Database>,
}

impl ChangeLog {
    /// Create a change log store over `db`.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load the full log for `name`; a missing key is an empty log.
    pub fn load(&self, name: &[u8]) -> Result<Vec<Change>> {
        match self.db.get(CF_CHANGES, name)? {
            Some(raw) => bincode::deserialize(&raw).map_err(|e| {
                Error::Corruption(format!(
                    "change log for {}: {e}",
                    String::from_utf8_lossy(name)
                ))
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite the log for `name`.
    pub fn save(&self, name: &[u8], changes: &[Change]) -> Result<()> {
        let raw = bincode::serialize(changes)?;
        self.db.put(CF_CHANGES, name, &raw)
    }

    /// Append one change to the log for `name`.
    pub fn append(&self, name: &[u8], change: Change) -> Result<()> {
        debug!(change = %change, "appending change");
        let mut changes = self.load(name)?;
        changes.push(change);
        self.save(name, &changes)
    }
}
