//! Height-indexed Merkle-root history
//!
//! A strictly height-increasing list of commits, starting from the
//! genesis sentinel, persisted whole under a single key. Rewinding
//! records a plateau commit so that rewind-then-recommit is idempotent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::claim::Height;
use crate::db::{Database, CF_COMMITS};
use crate::error::{Error, Result};
use crate::hashes::{Hash256, EMPTY_TRIE_ROOT};

const COMMITS_KEY: &[u8] = b"commits";

/// One committed block: the registry's Merkle root at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Committed block height.
    pub height: Height,
    /// Merkle root of the registry at that height.
    pub merkle_root: Hash256,
}

const GENESIS_COMMIT: Commit = Commit {
    height: 0,
    merkle_root: EMPTY_TRIE_ROOT,
};

/// In-memory commit list with single-key persistence.
pub struct CommitManager {
    db: Arc<Database>,
    commits: Vec<Commit>,
    head: Commit,
}

#[derive(Serialize, Deserialize)]
struct PersistedCommits {
    commits: Vec<Commit>,
    head: Commit,
}

impl CommitManager {
    /// Create a manager seeded with the genesis sentinel.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            commits: vec![GENESIS_COMMIT],
            head: GENESIS_COMMIT,
        }
    }

    /// The most recent commit.
    pub fn head(&self) -> &Commit {
        &self.head
    }

    /// Number of recorded commits.
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Whether only the genesis sentinel is recorded.
    pub fn is_empty(&self) -> bool {
        self.commits.len() <= 1
    }

    /// Record the root at `height`; height 0 is the fixed sentinel and is
    /// ignored.
    pub fn commit(&mut self, height: Height, merkle_root: Hash256) {
        if height == 0 {
            return;
        }
        let commit = Commit {
            height,
            merkle_root,
        };
        debug!(height, root = %hex::encode(merkle_root), "recording commit");
        self.commits.push(commit);
        self.head = commit;
    }

    /// Rewind the history to `height`. When the surviving head is below
    /// `height`, a plateau commit carrying the same root is appended so
    /// the head lands exactly at `height`.
    pub fn reset(&mut self, height: Height) {
        for at in (0..self.commits.len()).rev() {
            if self.commits[at].height <= height {
                self.head = self.commits[at];
                self.commits.truncate(at + 1);
                break;
            }
        }
        if self.head.height != height {
            self.commit(height, self.head.merkle_root);
        }
    }

    /// Load the persisted history; a missing key leaves the genesis
    /// sentinel in place.
    pub fn load(&mut self) -> Result<()> {
        let Some(raw) = self.db.get(CF_COMMITS, COMMITS_KEY)? else {
            return Ok(());
        };
        let persisted: PersistedCommits = bincode::deserialize(&raw)
            .map_err(|e| Error::Corruption(format!("commit list: {e}")))?;
        self.commits = persisted.commits;
        self.head = persisted.head;
        Ok(())
    }

    /// Persist the whole history under a single key. Called on close.
    pub fn save(&self) -> Result<()> {
        let persisted = PersistedCommits {
            commits: self.commits.clone(),
            head: self.head,
        };
        let raw = bincode::serialize(&persisted)?;
        self.db.put(CF_COMMITS, COMMITS_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, CommitManager) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path()).unwrap());
        (dir, CommitManager::new(db))
    }

    #[test]
    fn test_starts_at_the_genesis_sentinel() {
        let (_dir, cm) = manager();
        assert_eq!(cm.head().height, 0);
        assert_eq!(cm.head().merkle_root, EMPTY_TRIE_ROOT);
        assert!(cm.is_empty());
    }

    #[test]
    fn test_commit_at_height_zero_is_ignored() {
        let (_dir, mut cm) = manager();
        cm.commit(0, [9; 32]);
        assert_eq!(cm.len(), 1);
        assert_eq!(cm.head().merkle_root, EMPTY_TRIE_ROOT);
    }

    #[test]
    fn test_reset_truncates_and_plateaus() {
        let (_dir, mut cm) = manager();
        cm.commit(5, [5; 32]);
        cm.commit(9, [9; 32]);
        cm.commit(12, [12; 32]);

        // rewind between commits: the root at 9 still stands at 10
        cm.reset(10);
        assert_eq!(cm.head().height, 10);
        assert_eq!(cm.head().merkle_root, [9; 32]);
        assert_eq!(cm.len(), 4);

        // rewind exactly onto a commit: no plateau needed
        cm.reset(5);
        assert_eq!(cm.head().height, 5);
        assert_eq!(cm.head().merkle_root, [5; 32]);
        assert_eq!(cm.len(), 2);
    }

    #[test]
    fn test_reset_to_genesis() {
        let (_dir, mut cm) = manager();
        cm.commit(3, [3; 32]);
        cm.reset(0);
        assert_eq!(cm.head().height, 0);
        assert_eq!(cm.head().merkle_root, EMPTY_TRIE_ROOT);
    }

    #[test]
    fn test_history_survives_save_and_load() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path()).unwrap());
        {
            let mut cm = CommitManager::new(db.clone());
            cm.commit(7, [7; 32]);
            cm.save().unwrap();
        }
        let mut cm = CommitManager::new(db);
        cm.load().unwrap();
        assert_eq!(cm.head().height, 7);
        assert_eq!(cm.head().merkle_root, [7; 32]);
        assert_eq!(cm.len(), 2);
    }
}
