//! 256-ary Merkle radix trie with lazy resolution and batched persistence
//!
//! Keys are raw name bytes; a leaf's value hash commits to the controlling
//! claim's outpoint and takeover height. Nodes are content-addressed: the
//! store maps a node's hash to its serialized child table, so setting the
//! root hash is enough to reload any part of the trie on demand.
//!
//! Traversal order is consensus-critical: children are visited in
//! ascending byte order and the value hash is appended last. Any deviation
//! changes the root.

use std::sync::Arc;

use rocksdb::WriteBatch;

use crate::db::{Database, CF_TRIE_NODES};
use crate::error::{Error, Result};
use crate::hashes::{double_sha256, Hash256, EMPTY_TRIE_ROOT};

/// Source of per-name value hashes, queried during root computation.
///
/// The node manager implements this; the trie stays independent of how
/// leaf values are produced.
pub trait ValueSource {
    /// The value hash for the name spelled by `name`, or `None` when the
    /// name currently has no controlling claim.
    fn value_hash(&mut self, name: &[u8]) -> Result<Option<Hash256>>;
}

struct TrieNode {
    hash: Option<Hash256>,
    links: [Option<Box<TrieNode>>; 256],
    has_value: bool,
}

impl TrieNode {
    fn new() -> Self {
        Self {
            hash: None,
            links: std::array::from_fn(|_| None),
            has_value: false,
        }
    }

    fn with_hash(hash: Hash256) -> Self {
        let mut node = Self::new();
        node.hash = Some(hash);
        node
    }
}

/// The on-disk form of a trie node: a run of 33-byte
/// `(child_byte, child_hash)` entries in ascending child order, optionally
/// followed by a bare 32-byte value hash.
pub(crate) struct NodeBuf<'a>(&'a [u8]);

impl<'a> NodeBuf<'a> {
    pub(crate) fn parse(raw: &'a [u8]) -> Result<Self> {
        match raw.len() % 33 {
            0 | 32 => Ok(Self(raw)),
            _ => Err(Error::Corruption(format!(
                "trie node has invalid length {}",
                raw.len()
            ))),
        }
    }

    pub(crate) fn has_value(&self) -> bool {
        self.0.len() % 33 == 32
    }

    pub(crate) fn value_hash(&self) -> Option<Hash256> {
        if !self.has_value() {
            return None;
        }
        let start = self.0.len() - 32;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.0[start..]);
        Some(hash)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (u8, Hash256)> + '_ {
        self.0.chunks_exact(33).map(|entry| {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&entry[1..]);
            (entry[0], hash)
        })
    }
}

/// 256-way Merkle prefix trie over the `trie_nodes` column family.
pub struct MerkleTrie {
    db: Arc<Database>,
    root: Box<TrieNode>,
}

impl MerkleTrie {
    /// Create an empty trie over `db`.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            root: Box::new(TrieNode::new()),
        }
    }

    /// Drop all resolved nodes and re-anchor the trie at `hash`.
    /// Subsequent updates re-resolve the affected paths from disk.
    pub fn set_root(&mut self, hash: &Hash256) {
        self.root = Box::new(TrieNode::with_hash(*hash));
    }

    /// Mark `key` dirty: resolve the nodes along its path, clear their
    /// cached hashes, and flag the terminal node as holding a value.
    pub fn update(&mut self, key: &[u8]) -> Result<()> {
        let mut node = self.root.as_mut();
        for &byte in key {
            resolve(&self.db, node)?;
            node.hash = None;
            node = node.links[byte as usize]
                .get_or_insert_with(|| Box::new(TrieNode::new()))
                .as_mut();
        }
        resolve(&self.db, node)?;
        node.has_value = true;
        node.hash = None;
        Ok(())
    }

    /// Recompute the Merkle root, persisting every recomputed node in one
    /// atomic batch. Returns the empty-trie sentinel when nothing hashes.
    pub fn merkle_hash(&mut self, values: &mut dyn ValueSource) -> Result<Hash256> {
        let mut batch = self.db.batch();
        let mut prefix = Vec::with_capacity(64);
        let root = merkle(&self.db, &mut batch, values, &mut prefix, &mut self.root)?;
        if !batch.is_empty() {
            self.db.write_batch(batch)?;
        }
        Ok(root.unwrap_or(EMPTY_TRIE_ROOT))
    }
}

/// Populate a node from its persisted form. A missing key means the hash
/// was computed but the node was never persisted; treated as empty.
fn resolve(db: &Database, node: &mut TrieNode) -> Result<()> {
    let Some(hash) = node.hash else {
        return Ok(());
    };
    let Some(raw) = db.get(CF_TRIE_NODES, &hash)? else {
        return Ok(());
    };
    let buf = NodeBuf::parse(&raw)?;
    node.has_value = buf.has_value();
    for (byte, child_hash) in buf.entries() {
        node.links[byte as usize] = Some(Box::new(TrieNode::with_hash(child_hash)));
    }
    Ok(())
}

/// Recursively fill in missing hashes, children first in ascending byte
/// order, then the value hash.
fn merkle(
    db: &Database,
    batch: &mut WriteBatch,
    values: &mut dyn ValueSource,
    prefix: &mut Vec<u8>,
    node: &mut TrieNode,
) -> Result<Option<Hash256>> {
    if let Some(hash) = node.hash {
        return Ok(Some(hash));
    }

    let mut buf = Vec::new();
    for byte in 0..=255u8 {
        let Some(child) = node.links[byte as usize].as_deref_mut() else {
            continue;
        };
        prefix.push(byte);
        let child_hash = merkle(db, batch, values, prefix, child)?;
        prefix.pop();
        if let Some(hash) = child_hash {
            buf.push(byte);
            buf.extend_from_slice(&hash);
        }
    }

    if node.has_value {
        if let Some(hash) = values.value_hash(prefix)? {
            buf.extend_from_slice(&hash);
        }
    }

    if buf.is_empty() {
        return Ok(None);
    }
    let hash = double_sha256(&buf);
    node.hash = Some(hash);
    db.batch_put(batch, CF_TRIE_NODES, &hash, &buf);
    Ok(Some(hash))
}
