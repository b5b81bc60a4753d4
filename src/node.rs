//! Per-name bidding state machine
//!
//! A node accepts the command stream for one name, keeps the live claims
//! and supports, and selects the controlling claim under the
//! delayed-activation bidding rule. Heights only move forward through
//! [`Node::adjust_to`]; that is the sole mechanism by which deferred
//! activations and expirations become visible.

use tracing::warn;

use crate::change_log::{Change, Command};
use crate::claim::{by_id, by_outpoint, swap_remove_by, Amount, Claim, ClaimId, Height, OutPoint};
use crate::error::{Error, Result};
use crate::hashes::{double_sha256, Hash256};
use crate::params::Params;

/// The state of one name at one height.
///
/// The controlling claim is tracked by its outpoint and resolved by
/// lookup; while a block is being processed the lookup also covers the
/// claims spent in that block, which an update may still consume.
#[derive(Debug, Clone)]
pub struct Node {
    name: Vec<u8>,
    params: Params,
    height: Height,
    best: Option<OutPoint>,
    tookover: Height,
    claims: Vec<Claim>,
    supports: Vec<Claim>,
    removed: Vec<Claim>,
}

impl Node {
    /// Create an empty node for `name` at the genesis height.
    pub fn new(name: Vec<u8>, params: Params) -> Self {
        Self {
            name,
            params,
            height: 0,
            best: None,
            tookover: 0,
            claims: Vec::new(),
            supports: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Raw name bytes this node belongs to.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Height the node has been advanced to.
    pub fn height(&self) -> Height {
        self.height
    }

    /// Height at which the current controlling claim took over.
    pub fn tookover(&self) -> Height {
        self.tookover
    }

    /// Claims at the current height.
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Supports at the current height.
    pub fn supports(&self) -> &[Claim] {
        &self.supports
    }

    /// The controlling claim, if any.
    pub fn best_claim(&self) -> Option<&Claim> {
        let outpoint = self.best?;
        self.claims
            .iter()
            .chain(self.removed.iter())
            .find(|c| c.outpoint == outpoint)
    }

    /// Hash committed into the trie leaf: the controlling claim's
    /// outpoint and the takeover height, each double-SHA256'd, then
    /// hashed together. `None` when no claim controls the name.
    pub fn hash(&self) -> Option<Hash256> {
        let best = self.best_claim()?;
        Some(claim_hash(&best.outpoint, self.tookover))
    }

    /// Apply one change record. The caller must have adjusted the node to
    /// `change.height - 1`.
    pub(crate) fn apply(&mut self, change: &Change) -> Result<()> {
        match change.cmd {
            Command::AddClaim => self.add_claim(change.outpoint, change.amount, change.value.clone()),
            Command::SpendClaim => self.spend_claim(change.outpoint),
            Command::UpdateClaim => {
                self.update_claim(change.outpoint, change.amount, change.id, change.value.clone())
            }
            Command::AddSupport => self.add_support(change.outpoint, change.amount, change.id),
            Command::SpendSupport => self.spend_support(change.outpoint),
        }
    }

    pub(crate) fn add_claim(&mut self, outpoint: OutPoint, amount: Amount, value: Vec<u8>) -> Result<()> {
        if self.has_outpoint(outpoint) {
            return Err(Error::Duplicate);
        }
        let accepted = self.height + 1;
        let mut claim = Claim::new(outpoint, amount);
        claim.id = ClaimId::from_outpoint(&outpoint);
        claim.accepted = accepted;
        claim.value = value;
        claim.active_at = accepted + self.params.activation_delay(accepted, self.tookover);

        // A vacant or dead controller is displaced immediately.
        let controller_live = self
            .best_claim()
            .map_or(false, |b| b.is_active_at(accepted, &self.params));
        if !controller_live {
            claim.active_at = accepted;
            self.best = Some(outpoint);
            self.tookover = accepted;
        }
        self.claims.push(claim);
        Ok(())
    }

    pub(crate) fn spend_claim(&mut self, outpoint: OutPoint) -> Result<()> {
        // Kept in `removed` until the block completes, so a following
        // update command can consume it.
        match swap_remove_by(&mut self.claims, by_outpoint(outpoint)) {
            Some(claim) => {
                self.removed.push(claim);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// An update is the second half of a (spend, update) pair issued in
    /// the same block:
    ///
    ///   blk  500: add claim (opA, amtA, id = new_id(opA))
    ///   ...
    ///   blk 1000: spend claim (opA)
    ///   blk 1000: update claim (opB, amtB, idA)
    ///
    /// The spent claim waits in `removed`; consuming it by id is the only
    /// path that drains `removed` for reuse. An update whose id matches
    /// the controller keeps control: it activates retroactively at the
    /// takeover height.
    pub(crate) fn update_claim(
        &mut self,
        outpoint: OutPoint,
        amount: Amount,
        id: ClaimId,
        value: Vec<u8>,
    ) -> Result<()> {
        if self.has_outpoint(outpoint) {
            return Err(Error::Duplicate);
        }
        let mut claim = swap_remove_by(&mut self.removed, by_id(id)).ok_or(Error::NotFound)?;

        let accepted = self.height + 1;
        let was_controller = self.best == Some(claim.outpoint);
        claim.outpoint = outpoint;
        claim.amount = amount;
        claim.value = value;
        claim.accepted = accepted;
        claim.active_at = accepted + self.params.activation_delay(accepted, self.tookover);

        let controller_id = if was_controller {
            Some(id)
        } else {
            self.best_claim().map(|b| b.id)
        };
        if controller_id == Some(id) {
            claim.active_at = self.tookover;
        }
        if was_controller {
            self.best = Some(outpoint);
        }
        self.claims.push(claim);
        Ok(())
    }

    pub(crate) fn add_support(&mut self, outpoint: OutPoint, amount: Amount, id: ClaimId) -> Result<()> {
        if self.has_outpoint(outpoint) {
            return Err(Error::Duplicate);
        }
        // Accepted by rules even when no such claim exists here; it can
        // never affect bidding but still occupies the outpoint.
        if !self
            .claims
            .iter()
            .chain(self.removed.iter())
            .any(|c| c.id == id)
        {
            warn!(
                name = %String::from_utf8_lossy(&self.name),
                id = %id,
                "support for unknown claim id"
            );
        }

        let accepted = self.height + 1;
        let mut support = Claim::new(outpoint, amount);
        support.id = id;
        support.accepted = accepted;
        support.active_at = accepted + self.params.activation_delay(accepted, self.tookover);
        if self.best_claim().map(|b| b.id) == Some(id) {
            support.active_at = accepted;
        }
        self.supports.push(support);
        Ok(())
    }

    pub(crate) fn spend_support(&mut self, outpoint: OutPoint) -> Result<()> {
        match swap_remove_by(&mut self.supports, by_outpoint(outpoint)) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound),
        }
    }

    /// Advance the node to `height`, stepping through every intermediate
    /// height at which the bidding outcome may change.
    pub(crate) fn adjust_to(&mut self, height: Height) {
        if height <= self.height {
            return;
        }
        while self.height < height {
            self.height += 1;
            self.bid();
            let next = self.next_update();
            if next > height || next == self.height {
                self.height = height;
                break;
            }
            self.height = next;
            self.bid();
        }
        self.bid();
    }

    /// The earliest height strictly above the current one at which a
    /// pending activation or an expiration lands; the current height when
    /// there is none.
    pub(crate) fn next_update(&self) -> Height {
        let mut next = Height::MAX;
        for record in self.claims.iter().chain(self.supports.iter()) {
            let expiry = record.expire_at(&self.params);
            if self.height >= expiry {
                continue;
            }
            if record.active_at > self.height && record.active_at < next {
                next = record.active_at;
            }
            if expiry > self.height && expiry < next {
                next = expiry;
            }
        }
        if next == Height::MAX {
            self.height
        } else {
            next
        }
    }

    /// Run the bidding fixpoint at the current height.
    fn bid(&mut self) {
        loop {
            let controller_gone = match self.best_claim() {
                None => true,
                Some(best) => self.height >= best.expire_at(&self.params),
            };
            if controller_gone {
                self.best = None;
                self.tookover = self.height;
                self.update_active_heights();
            }
            self.update_effective_amounts();
            let candidate = self.find_candidate();
            if self.best == candidate {
                break;
            }
            self.best = candidate;
            self.tookover = self.height;
            self.update_active_heights();
        }
        self.removed.clear();
    }

    /// The live claim maximizing (effective amount, earlier accepted,
    /// smaller outpoint).
    fn find_candidate(&self) -> Option<OutPoint> {
        let mut candidate: Option<&Claim> = None;
        for claim in &self.claims {
            if !claim.is_active_at(self.height, &self.params) {
                continue;
            }
            let wins = match candidate {
                None => true,
                Some(current) => {
                    claim.effective_amount > current.effective_amount
                        || (claim.effective_amount == current.effective_amount
                            && claim.accepted < current.accepted)
                        || (claim.effective_amount == current.effective_amount
                            && claim.accepted == current.accepted
                            && claim.outpoint < current.outpoint)
                }
            };
            if wins {
                candidate = Some(claim);
            }
        }
        candidate.map(|c| c.outpoint)
    }

    fn update_effective_amounts(&mut self) {
        let params = self.params;
        let height = self.height;
        let supports = &self.supports;
        for claim in self.claims.iter_mut() {
            claim.effective_amount = 0;
            if !claim.is_active_at(height, &params) {
                continue;
            }
            claim.effective_amount = claim.amount;
            for support in supports {
                if support.id == claim.id && support.is_active_at(height, &params) {
                    claim.effective_amount += support.amount;
                }
            }
        }
    }

    /// Re-anchor pending activations to the new takeover.
    fn update_active_heights(&mut self) {
        let params = self.params;
        let height = self.height;
        let tookover = self.tookover;
        for record in self.claims.iter_mut().chain(self.supports.iter_mut()) {
            if record.active_at < height {
                continue;
            }
            record.active_at = record.accepted + params.activation_delay(height, tookover);
            if record.active_at < height {
                record.active_at = height;
            }
        }
    }

    fn has_outpoint(&self, outpoint: OutPoint) -> bool {
        self.claims
            .iter()
            .chain(self.supports.iter())
            .any(|c| c.outpoint == outpoint)
    }
}

/// Hash of a controlling claim's outpoint and takeover height.
///
/// The output index goes in as its ASCII decimal representation and the
/// takeover height as 8 big-endian bytes; both encodings are
/// consensus-exact.
pub(crate) fn claim_hash(outpoint: &OutPoint, tookover: Height) -> Hash256 {
    let txid_hash = double_sha256(&outpoint.txid);
    let index_hash = double_sha256(outpoint.index.to_string().as_bytes());
    let tookover_hash = double_sha256(&(tookover as u64).to_be_bytes());

    let mut preimage = Vec::with_capacity(96);
    preimage.extend_from_slice(&txid_hash);
    preimage.extend_from_slice(&index_hash);
    preimage.extend_from_slice(&tookover_hash);
    double_sha256(&preimage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(fill: u8, index: u32) -> OutPoint {
        OutPoint::new([fill; 32], index)
    }

    fn node() -> Node {
        Node::new(b"test".to_vec(), Params::default())
    }

    #[test]
    fn test_first_claim_takes_over_immediately() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 10, b"v".to_vec()).unwrap();
        n.adjust_to(1);
        let best = n.best_claim().unwrap();
        assert_eq!(best.outpoint, outpoint(1, 0));
        assert_eq!(best.active_at, 1);
        assert_eq!(n.tookover(), 1);
    }

    #[test]
    fn test_duplicate_outpoint_rejected_across_lists() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 10, Vec::new()).unwrap();
        assert!(matches!(
            n.add_claim(outpoint(1, 0), 5, Vec::new()),
            Err(Error::Duplicate)
        ));
        assert!(matches!(
            n.add_support(outpoint(1, 0), 5, ClaimId::default()),
            Err(Error::Duplicate)
        ));
    }

    #[test]
    fn test_challenger_waits_out_the_delay() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 10, Vec::new()).unwrap();
        n.adjust_to(99);
        // challenger with a larger amount accepted at 100
        n.add_claim(outpoint(2, 0), 20, Vec::new()).unwrap();
        n.adjust_to(100);
        assert_eq!(n.best_claim().unwrap().outpoint, outpoint(1, 0));
        // delay = (100 - 1) / 32 = 3
        assert_eq!(
            n.claims().iter().find(|c| c.outpoint == outpoint(2, 0)).unwrap().active_at,
            103
        );
        n.adjust_to(103);
        assert_eq!(n.best_claim().unwrap().outpoint, outpoint(2, 0));
        assert_eq!(n.tookover(), 103);
    }

    #[test]
    fn test_support_flips_the_winner() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 5, Vec::new()).unwrap();
        n.add_claim(outpoint(2, 0), 10, Vec::new()).unwrap();
        n.adjust_to(1);
        assert_eq!(n.best_claim().unwrap().outpoint, outpoint(2, 0));

        let id_a = ClaimId::from_outpoint(&outpoint(1, 0));
        n.add_support(outpoint(3, 0), 20, id_a).unwrap();
        n.adjust_to(2);
        let best = n.best_claim().unwrap();
        assert_eq!(best.outpoint, outpoint(1, 0));
        assert_eq!(best.effective_amount, 25);
    }

    #[test]
    fn test_support_for_controller_activates_immediately() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 5, Vec::new()).unwrap();
        n.adjust_to(200);
        let id = ClaimId::from_outpoint(&outpoint(1, 0));
        n.add_support(outpoint(2, 0), 7, id).unwrap();
        let support = &n.supports()[0];
        assert_eq!(support.active_at, support.accepted);
    }

    #[test]
    fn test_update_preserves_controlling_status() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 10, b"v1".to_vec()).unwrap();
        n.adjust_to(19);
        let id = ClaimId::from_outpoint(&outpoint(1, 0));

        n.spend_claim(outpoint(1, 0)).unwrap();
        n.update_claim(outpoint(2, 0), 10, id, b"v2".to_vec()).unwrap();
        n.adjust_to(20);

        let best = n.best_claim().unwrap();
        assert_eq!(best.outpoint, outpoint(2, 0));
        assert_eq!(best.active_at, 1);
        assert_eq!(best.value, b"v2");
        assert_eq!(n.tookover(), 1);
    }

    #[test]
    fn test_update_without_prior_spend_fails() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 10, Vec::new()).unwrap();
        n.adjust_to(1);
        let id = ClaimId::from_outpoint(&outpoint(1, 0));
        assert!(matches!(
            n.update_claim(outpoint(2, 0), 10, id, Vec::new()),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_spent_controller_is_displaced_at_the_next_bid() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 10, Vec::new()).unwrap();
        n.add_claim(outpoint(2, 0), 5, Vec::new()).unwrap();
        n.adjust_to(10);
        assert_eq!(n.best_claim().unwrap().outpoint, outpoint(1, 0));

        n.spend_claim(outpoint(1, 0)).unwrap();
        n.adjust_to(11);
        assert_eq!(n.best_claim().unwrap().outpoint, outpoint(2, 0));
        assert_eq!(n.tookover(), 11);
    }

    #[test]
    fn test_expiration_clears_the_controller() {
        let params = Params {
            original_claim_expiration: 10,
            extended_claim_expiration: 10,
            ..Params::default()
        };
        let mut n = Node::new(b"e".to_vec(), params);
        n.add_claim(outpoint(1, 0), 1, Vec::new()).unwrap();
        n.adjust_to(10);
        assert_eq!(n.best_claim().unwrap().outpoint, outpoint(1, 0));
        // expires at accepted + 10 = 11
        n.adjust_to(11);
        assert!(n.best_claim().is_none());
        assert_eq!(n.tookover(), 11);
        assert!(n.hash().is_none());
    }

    #[test]
    fn test_bid_ties_break_by_accepted_then_outpoint() {
        let mut n = node();
        n.add_claim(outpoint(9, 0), 10, Vec::new()).unwrap();
        n.adjust_to(1);
        n.spend_claim(outpoint(9, 0)).unwrap();
        n.adjust_to(2);
        assert!(n.best_claim().is_none());

        // both accepted at 3 with equal amounts; smaller outpoint wins
        n.add_claim(outpoint(5, 1), 10, Vec::new()).unwrap();
        n.add_claim(outpoint(5, 0), 10, Vec::new()).unwrap();
        n.adjust_to(3);
        assert_eq!(n.best_claim().unwrap().outpoint, outpoint(5, 0));
    }

    #[test]
    fn test_next_update_reports_earliest_event() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 10, Vec::new()).unwrap();
        n.adjust_to(99);
        n.add_claim(outpoint(2, 0), 20, Vec::new()).unwrap();
        n.adjust_to(100);
        // pending activation at 103 comes before any expiration
        assert_eq!(n.next_update(), 103);
    }

    #[test]
    fn test_next_update_with_nothing_pending() {
        let n = node();
        assert_eq!(n.next_update(), 0);
    }

    #[test]
    fn test_claim_hash_known_vector() {
        let hash = claim_hash(&outpoint(0x11, 0), 1);
        assert_eq!(
            hex::encode(hash),
            "42f53b8374054aea956a072ff7a8b4f14bc8e41d59183fb438a230b600d653ed"
        );
    }

    #[test]
    fn test_effective_amount_sums_live_supports() {
        let mut n = node();
        n.add_claim(outpoint(1, 0), 5, Vec::new()).unwrap();
        n.adjust_to(1);
        let id = ClaimId::from_outpoint(&outpoint(1, 0));
        n.add_support(outpoint(2, 0), 3, id).unwrap();
        n.add_support(outpoint(3, 0), 4, id).unwrap();
        n.adjust_to(2);
        assert_eq!(n.best_claim().unwrap().effective_amount, 12);
    }
}
