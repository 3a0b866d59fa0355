use crate::node::finger_table::FingerTable;
use crate::node::peer::Peer;
use crate::node::successor_list::SuccessorList;
use crate::utils::types::Id;

/// Routing state of one node under a single coarse lock.
///
/// Successor, predecessor, finger table and successor list are repaired by
/// concurrent handlers and maintenance loops; keeping them behind one mutex
/// rules out torn writes between a NOTIFY and a SUCCESSOR reply.
#[derive(Debug)]
pub struct Routing {
    pub me: Peer,
    pub successor: Peer,
    pub predecessor: Option<Peer>,
    pub fingers: FingerTable,
    pub successors: SuccessorList,
}

impl Routing {
    /// A fresh node is a one-element ring: self-looped successor, no
    /// predecessor, every finger pointing home.
    pub fn new(me: Peer, ring_bits: u32, successor_count: usize) -> Routing {
        Routing {
            successor: me.clone(),
            predecessor: None,
            fingers: FingerTable::new(&me, ring_bits),
            successors: SuccessorList::new(&me, successor_count),
            me,
        }
    }

    pub fn is_alone(&self) -> bool {
        self.successor.id == self.me.id
    }

    /// Repoints the successor, mirroring it into the successor-list head
    /// and the first finger.
    pub fn set_successor(&mut self, peer: Peer) {
        self.successors.set_head(peer.clone());
        if !self.fingers.is_empty() {
            self.fingers.set(0, peer.clone());
        }
        self.successor = peer;
    }

    pub fn closest_preceding(&self, target: Id) -> Peer {
        self.fingers.closest_preceding(&self.me, target)
    }

    /// Whether any routing structure still points at the given id.
    pub fn references(&self, id: Id) -> bool {
        self.successor.id == id
            || self.predecessor.as_ref().is_some_and(|p| p.id == id)
            || self.fingers.references(id)
            || self.successors.references(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn peer(id: Id) -> Peer {
        Peer::new(IpAddr::from([127, 0, 0, 1]), 7000 + id as u16, id)
    }

    #[test]
    fn test_fresh_node_is_alone() {
        let routing = Routing::new(peer(12), 8, 3);
        assert!(routing.is_alone());
        assert!(routing.predecessor.is_none());
        assert_eq!(routing.successors.peers().len(), 1);
    }

    #[test]
    fn test_set_successor_mirrors_head_and_first_finger() {
        let mut routing = Routing::new(peer(12), 8, 3);
        routing.set_successor(peer(40));
        assert_eq!(routing.successor.id, 40);
        assert_eq!(routing.successors.head().id, 40);
        assert_eq!(routing.fingers.node_at(0).id, 40);
        assert!(!routing.is_alone());
    }

    #[test]
    fn test_references_sees_all_structures() {
        let mut routing = Routing::new(peer(12), 8, 3);
        routing.set_successor(peer(40));
        routing.predecessor = Some(peer(3));
        assert!(routing.references(40));
        assert!(routing.references(3));
        assert!(!routing.references(99));
    }
}
