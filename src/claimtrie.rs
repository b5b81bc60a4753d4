//! The claim trie: commit history, node manager, and Merkle trie combined
//!
//! One logical block-processing thread drives this type: the five command
//! methods within a block, then `commit` once per block. Readers must run
//! between commits on the driver thread or query the persistent stores
//! through a snapshot root.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::change_log::{Change, Command};
use crate::claim::{Amount, ClaimId, Height, OutPoint};
use crate::commit::CommitManager;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::hashes::Hash256;
use crate::merkle_trie::MerkleTrie;
use crate::node::Node;
use crate::node_manager::NodeManager;
use crate::params::Params;

/// A name-to-claim registry committing to a Merkle root at every height.
pub struct ClaimTrie {
    db: Arc<Database>,
    cm: CommitManager,
    nm: NodeManager,
    trie: MerkleTrie,
}

impl ClaimTrie {
    /// Open or create a claim trie at `path` with default consensus
    /// parameters.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_params(path, Params::default())
    }

    /// Open or create a claim trie at `path`, injecting the consensus
    /// parameters.
    pub fn open_with_params<P: AsRef<Path>>(path: P, params: Params) -> Result<Self> {
        let db = Arc::new(Database::open(path)?);

        let mut cm = CommitManager::new(db.clone());
        cm.load()?;
        info!(
            commits = cm.len(),
            height = cm.head().height,
            "commit history loaded"
        );

        let mut nm = NodeManager::new(db.clone(), params);
        nm.load(cm.head().height)?;

        let mut trie = MerkleTrie::new(db.clone());
        trie.set_root(&cm.head().merkle_root);

        Ok(Self { db, cm, nm, trie })
    }

    /// Highest height committed so far.
    pub fn height(&self) -> Height {
        self.cm.head().height
    }

    /// Add a claim to `name`. The claim id is derived from the outpoint.
    pub fn add_claim(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: Amount,
        value: Vec<u8>,
    ) -> Result<()> {
        let change = Change::new(Command::AddClaim, outpoint)
            .amount(amount)
            .value(value);
        self.modify(name, change)
    }

    /// Spend the claim at `outpoint`.
    pub fn spend_claim(&mut self, name: &[u8], outpoint: OutPoint) -> Result<()> {
        let change = Change::new(Command::SpendClaim, outpoint);
        self.modify(name, change)
    }

    /// Re-anchor the claim with `id`, spent earlier in the same block, at
    /// a new outpoint.
    pub fn update_claim(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: Amount,
        id: ClaimId,
        value: Vec<u8>,
    ) -> Result<()> {
        let change = Change::new(Command::UpdateClaim, outpoint)
            .amount(amount)
            .id(id)
            .value(value);
        self.modify(name, change)
    }

    /// Add a support for the claim with `id` at `name`.
    pub fn add_support(
        &mut self,
        name: &[u8],
        outpoint: OutPoint,
        amount: Amount,
        id: ClaimId,
    ) -> Result<()> {
        let change = Change::new(Command::AddSupport, outpoint)
            .amount(amount)
            .id(id);
        self.modify(name, change)
    }

    /// Spend the support at `outpoint`.
    pub fn spend_support(&mut self, name: &[u8], outpoint: OutPoint) -> Result<()> {
        let change = Change::new(Command::SpendSupport, outpoint);
        self.modify(name, change)
    }

    /// Commit every height through `height`: advance the scheduler,
    /// recompute the Merkle root over the dirty paths, and record it.
    /// A height at or below the current head is a no-op.
    pub fn commit(&mut self, height: Height) -> Result<()> {
        if height <= self.height() {
            return Ok(());
        }
        let start = self.height() + 1;
        for h in start..=height {
            let Self { nm, trie, .. } = self;
            nm.catch_up(h, &mut |name| trie.update(name))?;
        }
        let root = self.merkle_hash()?;
        debug!(height, root = %hex::encode(root), "committed");
        self.cm.commit(height, root);
        self.trie.set_root(&root);
        Ok(())
    }

    /// Rewind the registry to `height`. Fails with [`Error::InvalidHeight`]
    /// above the current head.
    pub fn reset(&mut self, height: Height) -> Result<()> {
        if height > self.height() {
            return Err(Error::InvalidHeight {
                requested: height,
                current: self.height(),
            });
        }
        info!(height, "rewinding claim trie");
        self.cm.reset(height);
        self.nm.reset(height)?;
        self.trie.set_root(&self.cm.head().merkle_root);
        Ok(())
    }

    /// The Merkle root of the registry, recomputing any dirty paths.
    pub fn merkle_hash(&mut self) -> Result<Hash256> {
        let Self { nm, trie, .. } = self;
        trie.merkle_hash(nm)
    }

    /// The node for `name` adjusted to the current height, as a detached
    /// copy. Read path for the RPC surface.
    pub fn node(&mut self, name: &[u8]) -> Result<Node> {
        let height = self.height();
        self.nm.node_at(name, height)
    }

    /// Number of nodes in the cache.
    pub fn size(&self) -> usize {
        self.nm.size()
    }

    /// Persist the scheduler table and the commit history, then flush all
    /// stores.
    pub fn close(&mut self) -> Result<()> {
        self.nm.save()?;
        self.cm.save()?;
        self.db.flush()?;
        info!("claim trie closed");
        Ok(())
    }

    fn modify(&mut self, name: &[u8], mut change: Change) -> Result<()> {
        change.height = self.height() + 1;
        change.name = name.to_vec();
        self.nm.modify(&change)?;
        self.trie.update(name)
    }
}
