use crate::node::peer::Peer;
use crate::utils::types::Id;

/// The next r live successors along the ring; entry 0 mirrors the node's
/// successor pointer and the tail provides replication anchors and
/// failover candidates.
#[derive(Debug, Clone)]
pub struct SuccessorList {
    capacity: usize,
    entries: Vec<Peer>,
}

impl SuccessorList {
    pub fn new(owner: &Peer, capacity: usize) -> SuccessorList {
        SuccessorList {
            capacity,
            entries: vec![owner.clone()],
        }
    }

    pub fn head(&self) -> &Peer {
        &self.entries[0]
    }

    pub fn set_head(&mut self, peer: Peer) {
        self.entries[0] = peer;
    }

    pub fn peers(&self) -> &[Peer] {
        &self.entries
    }

    /// Entries past the head, the replication fan-out targets.
    pub fn tail(&self) -> &[Peer] {
        &self.entries[1..]
    }

    pub fn references(&self, id: Id) -> bool {
        self.entries.iter().any(|peer| peer.id == id)
    }

    /// Rebuilds the list from a successor's reply: the head stays the local
    /// successor pointer, then up to r-1 reported entries are appended,
    /// skipping the owner itself.
    pub fn rebuild(&mut self, successor: Peer, reported: Vec<Peer>, owner_id: Id) {
        self.entries.clear();
        self.entries.push(successor);
        for peer in reported {
            if peer.id != owner_id && self.entries.len() < self.capacity {
                self.entries.push(peer);
            }
        }
    }

    /// Replaces the entries wholesale after a liveness sweep. An empty
    /// survivor set collapses the list back to the owner.
    pub fn replace(&mut self, survivors: Vec<Peer>, owner: &Peer) {
        if survivors.is_empty() {
            self.entries = vec![owner.clone()];
        } else {
            self.entries = survivors;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn peer(id: Id) -> Peer {
        Peer::new(IpAddr::from([127, 0, 0, 1]), 6000 + id as u16, id)
    }

    #[test]
    fn test_rebuild_skips_owner_and_caps_length() {
        let owner = peer(1);
        let mut list = SuccessorList::new(&owner, 3);
        list.rebuild(
            peer(5),
            vec![peer(9), peer(1), peer(13), peer(17)],
            owner.id,
        );
        let ids: Vec<_> = list.peers().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![5, 9, 13]);
    }

    #[test]
    fn test_head_mirrors_successor() {
        let owner = peer(1);
        let mut list = SuccessorList::new(&owner, 3);
        assert_eq!(list.head().id, 1);
        list.set_head(peer(7));
        assert_eq!(list.head().id, 7);
    }

    #[test]
    fn test_replace_with_no_survivors_resets_to_owner() {
        let owner = peer(1);
        let mut list = SuccessorList::new(&owner, 3);
        list.rebuild(peer(5), vec![peer(9)], owner.id);
        list.replace(Vec::new(), &owner);
        let ids: Vec<_> = list.peers().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1]);
    }
}
