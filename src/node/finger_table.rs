use std::fmt;
use std::fmt::Debug;

use serde::Serialize;

use crate::node::peer::Peer;
use crate::utils::crypto::{in_range, ring_mask};
use crate::utils::types::Id;

/// One routing shortcut: the successor of `start = (owner + 2^i) mod 2^m`.
#[derive(Clone, Serialize)]
pub struct FingerEntry {
    pub start: Id,
    pub node: Peer,
}

impl Debug for FingerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("")
            .field("start", &self.start)
            .field("node", &self.node)
            .finish()
    }
}

/// Per-node array of m successor shortcuts at exponentially spaced offsets.
#[derive(Debug, Clone)]
pub struct FingerTable {
    pub fingers: Vec<FingerEntry>,
}

impl FingerTable {
    /// A fresh table has every finger pointing at the owner, the routing
    /// identity of a single-node ring.
    pub fn new(owner: &Peer, ring_bits: u32) -> FingerTable {
        let mask = ring_mask(ring_bits);
        let fingers = (0..ring_bits)
            .map(|i| FingerEntry {
                start: owner.id.wrapping_add(1u64 << i) & mask,
                node: owner.clone(),
            })
            .collect();
        FingerTable { fingers }
    }

    pub fn len(&self) -> usize {
        self.fingers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingers.is_empty()
    }

    pub fn node_at(&self, index: usize) -> &Peer {
        &self.fingers[index].node
    }

    pub fn set(&mut self, index: usize, node: Peer) {
        self.fingers[index].node = node;
    }

    pub fn set_all(&mut self, node: &Peer) {
        for finger in &mut self.fingers {
            finger.node = node.clone();
        }
    }

    /// Scans from the highest finger downward and returns the first entry
    /// strictly between `owner_id` and `target` on the ring. Falls back to
    /// the owner when no finger qualifies.
    pub fn closest_preceding(&self, owner: &Peer, target: Id) -> Peer {
        for finger in self.fingers.iter().rev() {
            if in_range(finger.node.id, owner.id, target, false) {
                return finger.node.clone();
            }
        }
        owner.clone()
    }

    /// Whether any entry points at the given ring position.
    pub fn references(&self, id: Id) -> bool {
        self.fingers.iter().any(|finger| finger.node.id == id)
    }
}
