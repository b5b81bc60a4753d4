//! Node cache, persistence, and the next-update scheduler
//!
//! The manager owns the per-name change logs and a cache of current node
//! states. Nodes are reconstructible at any height at or below the
//! manager's by replaying their log; the scheduler remembers at which
//! future heights a node's bidding outcome may change so `catch_up` only
//! touches the names that need it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::change_log::{truncate_above, Change, ChangeLog};
use crate::claim::Height;
use crate::db::{Database, CF_CHANGES, CF_META};
use crate::error::{Error, Result};
use crate::hashes::Hash256;
use crate::merkle_trie::ValueSource;
use crate::node::Node;
use crate::params::Params;

const NEXT_UPDATES_KEY: &[u8] = b"next_updates";

/// Height-indexed sets of names whose bidding outcome may change.
type Schedule = BTreeMap<Height, BTreeSet<Vec<u8>>>;

/// Persistent, height-indexed store of per-name command logs with a cache
/// of current node states.
pub struct NodeManager {
    db: Arc<Database>,
    log: ChangeLog,
    params: Params,
    height: Height,
    cache: HashMap<Vec<u8>, Node>,
    next_updates: Schedule,
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedSchedule {
    next_updates: Schedule,
}

impl NodeManager {
    /// Create a manager over `db` with the given consensus parameters.
    pub fn new(db: Arc<Database>, params: Params) -> Self {
        Self {
            log: ChangeLog::new(db.clone()),
            db,
            params,
            height: 0,
            cache: HashMap::new(),
            next_updates: Schedule::new(),
        }
    }

    /// Last committed height.
    pub fn height(&self) -> Height {
        self.height
    }

    /// Number of nodes in the cache.
    pub fn size(&self) -> usize {
        self.cache.len()
    }

    /// Rebuild the cache from the change logs at `height` and load the
    /// persisted scheduler table. Startup path.
    pub fn load(&mut self, height: Height) -> Result<()> {
        self.height = height;
        for name in self.db.iter_keys(CF_CHANGES)? {
            let node = self.load_node(&name, height)?;
            self.cache.insert(name, node);
        }
        if let Some(raw) = self.db.get(CF_META, NEXT_UPDATES_KEY)? {
            let persisted: PersistedSchedule = bincode::deserialize(&raw)
                .map_err(|e| Error::Corruption(format!("next_updates table: {e}")))?;
            self.next_updates = persisted.next_updates;
        }
        info!(nodes = self.cache.len(), height, "node cache rebuilt");
        Ok(())
    }

    /// Persist the scheduler table. Called on close.
    pub fn save(&self) -> Result<()> {
        let persisted = PersistedSchedule {
            next_updates: self.next_updates.clone(),
        };
        let raw = bincode::serialize(&persisted)?;
        self.db.put(CF_META, NEXT_UPDATES_KEY, &raw)
    }

    /// Apply a stamped change: mutate the node, schedule the name, append
    /// to the persistent log. Errors abort without persisting.
    pub fn modify(&mut self, change: &Change) -> Result<()> {
        let height = self.height;
        let node = self.node_at_mut(&change.name, height)?;
        node.apply(change)?;

        self.next_updates
            .entry(height + 1)
            .or_default()
            .insert(change.name.clone());
        self.log.append(&change.name, change.clone())
    }

    /// Advance the manager to `height`, re-bidding every name scheduled
    /// there. `notify` is invoked per name before the node advances; the
    /// commit path uses it to mark the trie dirty.
    pub fn catch_up(
        &mut self,
        height: Height,
        notify: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        self.height = height;
        let names = self.next_updates.remove(&height).unwrap_or_default();
        for name in names {
            notify(&name)?;
            let next = self.node_at_mut(&name, height)?.next_update();
            if next > height {
                self.next_updates.entry(next).or_default().insert(name);
            }
        }
        Ok(())
    }

    /// The node for `name` adjusted to `height`, as a detached copy.
    pub fn node_at(&mut self, name: &[u8], height: Height) -> Result<Node> {
        Ok(self.node_at_mut(name, height)?.clone())
    }

    /// Rewind to `height`: truncate the persisted logs, rebuild cached
    /// nodes that are ahead, and rebuild the scheduler so activations and
    /// expirations still pending at `height` stay scheduled.
    pub fn reset(&mut self, height: Height) -> Result<()> {
        debug!(height, "resetting node manager");
        self.height = height;

        let names: Vec<Vec<u8>> = self.cache.keys().cloned().collect();
        for name in &names {
            let mut changes = self.log.load(name)?;
            let full_len = changes.len();
            truncate_above(&mut changes, height);
            if changes.len() != full_len {
                self.log.save(name, &changes)?;
            }
            let ahead = self
                .cache
                .get(name)
                .map_or(false, |n| n.height() > height);
            if ahead {
                let rebuilt = self.load_node(name, height)?;
                self.cache.insert(name.clone(), rebuilt);
            }
        }

        let _ = self.next_updates.split_off(&(height + 1));
        for name in names {
            let next = self.node_at_mut(&name, height)?.next_update();
            if next > height {
                self.next_updates.entry(next).or_default().insert(name);
            }
        }
        Ok(())
    }

    /// The cached node for `name`, reloaded by replay when the cache is
    /// ahead of `height` or of the manager, then adjusted to `height`.
    fn node_at_mut(&mut self, name: &[u8], height: Height) -> Result<&mut Node> {
        let ahead = self
            .cache
            .get(name)
            .map_or(false, |n| n.height() > self.height || n.height() > height);
        if ahead {
            let rebuilt = self.load_node(name, height)?;
            self.cache.insert(name.to_vec(), rebuilt);
        }
        let params = self.params;
        let node = self
            .cache
            .entry(name.to_vec())
            .or_insert_with(|| Node::new(name.to_vec(), params));
        node.adjust_to(height);
        Ok(node)
    }

    /// Replay the persisted log for `name`, truncated to `height`.
    fn load_node(&self, name: &[u8], height: Height) -> Result<Node> {
        let mut changes = self.log.load(name)?;
        truncate_above(&mut changes, height);
        let mut node = self.replay(name, &changes)?;
        node.adjust_to(height);
        Ok(node)
    }

    /// Fold a change sequence through a fresh node, advancing between
    /// non-adjacent heights. Deterministic; the canonical recovery path.
    fn replay(&self, name: &[u8], changes: &[Change]) -> Result<Node> {
        let mut node = Node::new(name.to_vec(), self.params);
        for change in changes {
            if node.height() < change.height - 1 {
                node.adjust_to(change.height - 1);
            }
            if node.height() == change.height - 1 {
                node.apply(change).map_err(|e| {
                    Error::Corruption(format!(
                        "replay of {} failed at height {}: {e}",
                        String::from_utf8_lossy(name),
                        change.height
                    ))
                })?;
            }
        }
        Ok(node)
    }
}

impl ValueSource for NodeManager {
    fn value_hash(&mut self, name: &[u8]) -> Result<Option<Hash256>> {
        let height = self.height;
        Ok(self.node_at_mut(name, height)?.hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_log::Command;
    use crate::claim::OutPoint;
    use tempfile::TempDir;

    fn outpoint(fill: u8, index: u32) -> OutPoint {
        OutPoint::new([fill; 32], index)
    }

    fn manager() -> (TempDir, NodeManager) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path()).unwrap());
        (dir, NodeManager::new(db, Params::default()))
    }

    fn add_claim(nm: &mut NodeManager, name: &[u8], op: OutPoint, amount: i64) {
        let mut change = Change::new(Command::AddClaim, op).amount(amount);
        change.height = nm.height() + 1;
        change.name = name.to_vec();
        nm.modify(&change).unwrap();
    }

    fn advance(nm: &mut NodeManager, height: Height) {
        for h in nm.height() + 1..=height {
            nm.catch_up(h, &mut |_| Ok(())).unwrap();
        }
    }

    #[test]
    fn test_modify_schedules_and_persists() {
        let (_dir, mut nm) = manager();
        add_claim(&mut nm, b"a", outpoint(1, 0), 10);
        advance(&mut nm, 1);

        let node = nm.node_at(b"a", 1).unwrap();
        assert_eq!(node.best_claim().unwrap().outpoint, outpoint(1, 0));
        assert_eq!(node.tookover(), 1);
    }

    #[test]
    fn test_replay_matches_cached_state() {
        let (_dir, mut nm) = manager();
        add_claim(&mut nm, b"a", outpoint(1, 0), 10);
        advance(&mut nm, 99);
        add_claim(&mut nm, b"a", outpoint(2, 0), 20);
        advance(&mut nm, 103);

        let cached = nm.node_at(b"a", 103).unwrap();
        // force a rebuild by asking below the cached height
        let replayed = nm.node_at(b"a", 100).unwrap();
        assert_eq!(replayed.best_claim().unwrap().outpoint, outpoint(1, 0));
        let replayed = nm.node_at(b"a", 103).unwrap();
        assert_eq!(
            replayed.best_claim().unwrap().outpoint,
            cached.best_claim().unwrap().outpoint
        );
        assert_eq!(replayed.tookover(), cached.tookover());
    }

    #[test]
    fn test_reset_truncates_logs_and_reschedules() {
        let (_dir, mut nm) = manager();
        add_claim(&mut nm, b"a", outpoint(1, 0), 10);
        advance(&mut nm, 99);
        add_claim(&mut nm, b"a", outpoint(2, 0), 20);
        advance(&mut nm, 103);
        assert_eq!(nm.node_at(b"a", 103).unwrap().tookover(), 103);

        nm.reset(1).unwrap();
        let node = nm.node_at(b"a", 1).unwrap();
        assert_eq!(node.best_claim().unwrap().outpoint, outpoint(1, 0));
        assert_eq!(node.height(), 1);

        // the dropped change is gone from the persisted log as well
        advance(&mut nm, 99);
        add_claim(&mut nm, b"a", outpoint(2, 0), 20);
        advance(&mut nm, 103);
        assert_eq!(nm.node_at(b"a", 103).unwrap().tookover(), 103);

        // replay below the cached height folds the rewritten log; a stale
        // duplicate would surface as a corruption error here
        let replayed = nm.node_at(b"a", 101).unwrap();
        assert_eq!(replayed.best_claim().unwrap().outpoint, outpoint(1, 0));
    }

    #[test]
    fn test_reset_keeps_pending_expirations_scheduled() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path()).unwrap());
        let params = Params {
            original_claim_expiration: 10,
            extended_claim_expiration: 10,
            ..Params::default()
        };
        let mut nm = NodeManager::new(db, params);
        add_claim(&mut nm, b"a", outpoint(1, 0), 10);
        advance(&mut nm, 5);
        nm.reset(3).unwrap();

        // expiration at 11 must still fire through the scheduler
        let mut notified = Vec::new();
        for h in 4..=11 {
            nm.catch_up(h, &mut |name: &[u8]| {
                notified.push((h, name.to_vec()));
                Ok(())
            })
            .unwrap();
        }
        assert!(notified.contains(&(11, b"a".to_vec())));
        assert!(nm.node_at(b"a", 11).unwrap().best_claim().is_none());
    }

    #[test]
    fn test_schedule_survives_save_and_load() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path()).unwrap());
        {
            let mut nm = NodeManager::new(db.clone(), Params::default());
            add_claim(&mut nm, b"a", outpoint(1, 0), 10);
            advance(&mut nm, 1);
            nm.save().unwrap();
        }
        let mut nm = NodeManager::new(db, Params::default());
        nm.load(1).unwrap();
        assert_eq!(nm.size(), 1);
        assert_eq!(
            nm.node_at(b"a", 1).unwrap().best_claim().unwrap().outpoint,
            outpoint(1, 0)
        );
    }
}
