//! # claimtrie
//!
//! Consensus-critical name-to-claim registry maintained on top of a
//! blockchain, with a deterministic Merkle root over the whole registry at
//! every block height.
//!
//! This crate provides:
//! - Per-name bidding state machines with delayed activation and expiration
//! - Persistent, height-indexed change logs with replay-based recovery
//! - A 256-ary Merkle radix trie with lazy resolution and batched writes
//! - Height-indexed commit history with rewind support
//! - Claim script encoding and decoding for the block driver

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod change_log;
pub mod claim;
pub mod claimtrie;
pub mod commit;
pub mod db;
pub mod error;
pub mod hashes;
pub mod merkle_trie;
pub mod node;
pub mod node_manager;
pub mod params;
pub mod script;

pub use change_log::{Change, ChangeLog, Command};
pub use claim::{Amount, Claim, ClaimId, Height, OutPoint};
pub use claimtrie::ClaimTrie;
pub use commit::{Commit, CommitManager};
pub use db::{Database, CF_CHANGES, CF_COMMITS, CF_META, CF_TRIE_NODES};
pub use error::{Error, Result};
pub use hashes::{double_sha256, hash160, Hash256, EMPTY_TRIE_ROOT};
pub use merkle_trie::{MerkleTrie, ValueSource};
pub use node::Node;
pub use node_manager::NodeManager;
pub use params::Params;
pub use script::{
    claim_name_script, claim_name_size, claim_script_size, decode_claim_script,
    min_claim_trie_fee, strip_claim_script_prefix, support_claim_script, update_claim_script,
    ClaimScript, MAX_CLAIM_NAME_SIZE, MAX_CLAIM_SCRIPT_SIZE, MIN_FEE_PER_NAMECLAIM_CHAR,
    OP_CLAIMNAME, OP_SUPPORTCLAIM, OP_UPDATECLAIM,
};
