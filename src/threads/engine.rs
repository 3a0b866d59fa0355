use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::node::peer::Peer;
use crate::node::state::{Lifecycle, NodeState};
use crate::transport::{self, Endpoint};
use crate::utils::constants::NOT_FOUND;
use crate::utils::crypto::{hash, in_range, ring_mask};
use crate::utils::types::Id;
use crate::wire::Message;
use crate::{Error, Result};

/// The protocol engine of one node.
///
/// Decodes every datagram arriving on the shared endpoint, dispatches it to
/// a handler, and hosts the routing operations the maintenance loops drive.
/// Handlers run on their own tasks, so a forwarding hop that waits on a
/// remote reply never stalls the listener.
pub struct Engine {
    state: Arc<NodeState>,
    endpoint: Arc<Endpoint>,
}

impl Engine {
    pub fn new(state: Arc<NodeState>, endpoint: Arc<Endpoint>) -> Engine {
        Engine { state, endpoint }
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Listener loop: receives datagrams until shutdown and spawns one
    /// dispatch task per message.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "node {} listening on {}",
            self.state.me.id,
            self.endpoint.local_addr()
        );
        loop {
            tokio::select! {
                received = self.endpoint.recv() => match received {
                    Ok((line, from)) => {
                        let engine = Arc::clone(&self);
                        tokio::spawn(async move { engine.dispatch(&line, from).await });
                    }
                    Err(e) => {
                        if *shutdown.borrow() {
                            break;
                        }
                        warn!("node {}: receive error: {e}", self.state.me.id);
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("node {} listener stopped", self.state.me.id);
    }

    /// Decodes and routes one datagram. Malformed input is logged and
    /// dropped, never fatal.
    pub async fn dispatch(&self, line: &str, from: SocketAddr) {
        let message = match Message::decode(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "node {}: dropping malformed datagram from {from}: {e}",
                    self.state.me.id
                );
                return;
            }
        };

        match message {
            Message::FindSuccessor { id } => self.on_find_successor(id, from).await,
            Message::Successor { peer } => self.on_successor(peer).await,
            Message::Notify { id } => self.on_notify(id, from),
            Message::GetPredecessor => self.on_get_predecessor(from).await,
            Message::Predecessor { peer } => self.on_predecessor_reply(peer),
            Message::GetSuccessorList => self.on_get_successor_list(from).await,
            Message::SuccessorList { peers } => self.on_successor_list(peers),
            Message::UpdatePredecessorTo { peer } => self.on_update_predecessor(peer),
            Message::UpdateSuccessorTo { peer } => self.on_update_successor(peer),
            Message::UpdateFinger { peer, index } => self.on_update_finger(peer, index).await,
            Message::Store { key, value } => self.on_store(key, value).await,
            Message::Replicate { key, value } => self.on_replicate(key, value),
            Message::Lookup { key } => self.on_lookup(key, from).await,
            Message::LookupResult { key, value } => self.on_result(key, value),
            Message::Ping => self.on_ping(from).await,
            Message::Pong => self.on_pong(from),
        }
    }

    /// Resolves the node responsible for `target`.
    ///
    /// Alone: self. Within (self, successor]: the successor. Otherwise the
    /// query is forwarded to the closest preceding finger; if that peer is
    /// unreachable the finger itself is returned as a degraded answer and
    /// the next stabilize cycle refines the tables.
    pub async fn find_successor(&self, target: Id) -> Peer {
        let (me, successor) = {
            let routing = self.state.routing.lock().unwrap();
            (routing.me.clone(), routing.successor.clone())
        };
        if successor.id == me.id {
            return me;
        }
        if in_range(target, me.id, successor.id, true) {
            return successor;
        }

        let mut candidate = {
            let routing = self.state.routing.lock().unwrap();
            routing.closest_preceding(target)
        };
        if candidate.id == me.id {
            // No finger strictly precedes the target; ask the successor
            // rather than forwarding to ourselves.
            candidate = successor;
        }
        match self.rpc_find_successor(&candidate, target).await {
            Ok(peer) => peer,
            Err(e) => {
                debug!(
                    "node {}: find_successor({target}) degraded to {candidate}: {e}",
                    me.id
                );
                candidate
            }
        }
    }

    /// Synchronous FIND_SUCCESSOR against a specific peer over a transient
    /// endpoint.
    async fn rpc_find_successor(&self, candidate: &Peer, target: Id) -> Result<Peer> {
        let reply = transport::request(
            candidate.sock_addr(),
            &Message::FindSuccessor { id: target },
            self.state.config.rpc_timeout,
            self.state.config.max_datagram,
        )
        .await?;
        match reply {
            Message::Successor { peer } => Ok(peer),
            other => Err(Error::UnexpectedReply {
                expected: "SUCCESSOR",
                got: other.command(),
            }),
        }
    }

    /// Refreshes every finger: entry i becomes the successor of
    /// (self + 2^i) mod 2^m. Consecutive starts covered by the previous
    /// finger reuse it instead of issuing another lookup.
    pub async fn update_finger_table(&self) {
        let me = self.state.me.clone();
        let ring_bits = self.state.config.ring_bits;
        let mask = ring_mask(ring_bits);

        let mut previous: Option<Peer> = None;
        for i in 0..ring_bits {
            let start = me.id.wrapping_add(1u64 << i) & mask;
            let node = match previous {
                Some(ref peer) if in_range(start, me.id, peer.id, true) => peer.clone(),
                _ => self.find_successor(start).await,
            };
            self.state
                .routing
                .lock()
                .unwrap()
                .fingers
                .set(i as usize, node.clone());
            previous = Some(node);
        }
    }

    /// Tells every node whose finger table might now cover this node to
    /// refresh the corresponding entry: for each i the successor of
    /// (self - 2^i) mod 2^m receives an UPDATE_FINGER.
    pub async fn update_others(&self) {
        let me = self.state.me.clone();
        let ring_bits = self.state.config.ring_bits;
        let mask = ring_mask(ring_bits);

        for i in 0..ring_bits {
            let position = me.id.wrapping_sub(1u64 << i) & mask;
            let peer = self.find_successor(position).await;
            if peer.id == me.id {
                continue;
            }
            let update = Message::UpdateFinger {
                peer: me.clone(),
                index: i as usize,
            };
            self.send_best_effort(&update, peer.sock_addr()).await;
        }
    }

    /// One stabilization round: prune the successor list, repair the
    /// successor pointer from its reported predecessor, notify the
    /// successor, refresh fingers, reconcile the successor list.
    pub async fn stabilize(&self) {
        // A departing node must not advertise itself to its neighbors.
        if self.is_winding_down() {
            return;
        }
        self.prune_successor_list().await;

        let (me, successor, predecessor) = {
            let routing = self.state.routing.lock().unwrap();
            (
                routing.me.clone(),
                routing.successor.clone(),
                routing.predecessor.clone(),
            )
        };

        if successor.id == me.id {
            // Ring collapsed to this node during a departure; the
            // predecessor, if any, is the only way back out.
            if let Some(peer) = predecessor {
                if peer.id != me.id {
                    info!(
                        "node {} adopted its predecessor {} as successor",
                        me.id, peer
                    );
                    self.state.routing.lock().unwrap().set_successor(peer);
                }
            }
        } else {
            let slot = self.state.arm_predecessor_slot();
            if self
                .endpoint
                .send(&Message::GetPredecessor, successor.sock_addr())
                .await
                .is_ok()
            {
                match timeout(self.state.config.reply_wait, slot).await {
                    Ok(Ok(Some(reported))) => {
                        if in_range(reported.id, me.id, successor.id, false) {
                            info!(
                                "node {} updated successor to {} via stabilization",
                                me.id, reported
                            );
                            self.state.routing.lock().unwrap().set_successor(reported);
                        }
                    }
                    Ok(_) => {}
                    Err(_) => debug!(
                        "node {}: successor {} did not report its predecessor this cycle",
                        me.id, successor.id
                    ),
                }
            }
            self.state.disarm_predecessor_slot();
        }

        let successor = self.state.routing.lock().unwrap().successor.clone();
        self.send_best_effort(&Message::Notify { id: me.id }, successor.sock_addr())
            .await;

        self.update_finger_table().await;
        self.update_successor_list().await;
    }

    /// Pings every non-self successor-list entry and keeps the responders.
    /// When the head changes, the successor pointer fails over with it.
    pub async fn prune_successor_list(&self) {
        let (me, entries) = {
            let routing = self.state.routing.lock().unwrap();
            (routing.me.clone(), routing.successors.peers().to_vec())
        };

        let mut survivors = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.id == me.id
                || transport::probe(
                    entry.sock_addr(),
                    self.state.config.ping_timeout,
                    self.state.config.max_datagram,
                )
                .await
            {
                survivors.push(entry);
            } else {
                warn!("node {} pruned unresponsive successor {}", me.id, entry);
            }
        }

        let mut routing = self.state.routing.lock().unwrap();
        routing.successors.replace(survivors, &me);
        let head = routing.successors.head().clone();
        if routing.successor.id != head.id {
            info!("node {} failed over successor to {}", me.id, head);
            routing.set_successor(head);
        }
    }

    /// Asks the successor for its list and rebuilds the local one behind
    /// the unchanged head.
    pub async fn update_successor_list(&self) {
        let (me, successor) = {
            let routing = self.state.routing.lock().unwrap();
            (routing.me.clone(), routing.successor.clone())
        };
        if successor.id == me.id {
            return;
        }
        match transport::request(
            successor.sock_addr(),
            &Message::GetSuccessorList,
            self.state.config.rpc_timeout,
            self.state.config.max_datagram,
        )
        .await
        {
            Ok(Message::SuccessorList { peers }) => {
                let mut routing = self.state.routing.lock().unwrap();
                let head = routing.successor.clone();
                let me_id = routing.me.id;
                routing.successors.rebuild(head, peers, me_id);
            }
            Ok(other) => debug!(
                "node {}: unexpected {} reply to GET_SUCCESSOR_LIST",
                me.id,
                other.command()
            ),
            Err(e) => debug!("node {}: successor list refresh failed: {e}", me.id),
        }
    }

    /// Pings the predecessor and clears it after sustained silence. A ring
    /// that collapsed to this node restores the pointer to self instead.
    pub async fn check_predecessor(&self) {
        if self.is_winding_down() {
            return;
        }
        let me = self.state.me.clone();
        let Some(predecessor) = self.state.routing.lock().unwrap().predecessor.clone() else {
            return;
        };
        if predecessor.id == me.id {
            self.state.touch_predecessor_heartbeat();
            return;
        }

        self.send_best_effort(&Message::Ping, predecessor.sock_addr())
            .await;

        if self.state.predecessor_silence() > self.state.config.liveness_timeout {
            warn!(
                "node {} detected failed predecessor {}",
                me.id, predecessor
            );
            let mut routing = self.state.routing.lock().unwrap();
            if routing
                .predecessor
                .as_ref()
                .is_some_and(|current| current.id == predecessor.id)
            {
                routing.predecessor = if routing.is_alone() {
                    Some(me.clone())
                } else {
                    None
                };
            }
        }
    }

    async fn on_find_successor(&self, id: Id, from: SocketAddr) {
        let peer = self.find_successor(id).await;
        debug!(
            "node {}: successor of {id} is {peer}, answering {from}",
            self.state.me.id
        );
        self.send_best_effort(&Message::Successor { peer }, from).await;
    }

    /// A SUCCESSOR datagram on the shared socket is the asynchronous
    /// completion of a join (transient lookups get their replies on their
    /// own sockets): adopt the peer, notify it, refresh the fingers, and
    /// on a first join let the rest of the ring know about this node.
    async fn on_successor(&self, peer: Peer) {
        info!("node {} adopted successor {}", self.state.me.id, peer);
        self.state.routing.lock().unwrap().set_successor(peer.clone());

        let completed_join = self.state.complete_join();
        self.send_best_effort(
            &Message::Notify {
                id: self.state.me.id,
            },
            peer.sock_addr(),
        )
        .await;
        self.update_finger_table().await;
        if completed_join {
            info!("node {} joined the ring", self.state.me.id);
            self.update_others().await;
        }
    }

    fn on_notify(&self, candidate_id: Id, from: SocketAddr) {
        let mut routing = self.state.routing.lock().unwrap();
        let accept = match routing.predecessor {
            None => true,
            Some(ref current) => in_range(candidate_id, current.id, routing.me.id, false),
        };
        if accept {
            let candidate = Peer::new(from.ip(), from.port(), candidate_id);
            debug!("node {} set predecessor to {}", routing.me.id, candidate);
            routing.predecessor = Some(candidate);
            drop(routing);
            self.state.touch_predecessor_heartbeat();
        }
    }

    async fn on_get_predecessor(&self, from: SocketAddr) {
        let peer = self.state.routing.lock().unwrap().predecessor.clone();
        self.send_best_effort(&Message::Predecessor { peer }, from)
            .await;
    }

    fn on_predecessor_reply(&self, peer: Option<Peer>) {
        if !self.state.fulfil_predecessor_slot(peer) {
            debug!(
                "node {}: dropping PREDECESSOR reply with no stabilize cycle waiting",
                self.state.me.id
            );
        }
    }

    async fn on_get_successor_list(&self, from: SocketAddr) {
        self.prune_successor_list().await;
        let peers = self.state.routing.lock().unwrap().successors.peers().to_vec();
        self.send_best_effort(&Message::SuccessorList { peers }, from)
            .await;
    }

    fn on_successor_list(&self, peers: Vec<Peer>) {
        let mut routing = self.state.routing.lock().unwrap();
        let head = routing.successor.clone();
        let me_id = routing.me.id;
        routing.successors.rebuild(head, peers, me_id);
    }

    fn on_update_predecessor(&self, peer: Peer) {
        info!("node {} repointed predecessor to {}", self.state.me.id, peer);
        self.state.routing.lock().unwrap().predecessor = Some(peer);
        self.state.touch_predecessor_heartbeat();
    }

    fn on_update_successor(&self, peer: Peer) {
        info!("node {} repointed successor to {}", self.state.me.id, peer);
        self.state.routing.lock().unwrap().set_successor(peer);
    }

    async fn on_update_finger(&self, peer: Peer, index: usize) {
        let forward = {
            let mut routing = self.state.routing.lock().unwrap();
            let me_id = routing.me.id;
            if index >= routing.fingers.len() {
                debug!("node {me_id}: ignoring finger update for index {index}");
                None
            } else if peer.id != me_id
                && in_range(peer.id, me_id, routing.fingers.node_at(index).id, false)
            {
                routing.fingers.set(index, peer.clone());
                // The entry tightened; the predecessor may cover it too.
                routing
                    .predecessor
                    .clone()
                    .filter(|p| p.id != me_id && p.id != peer.id)
            } else {
                None
            }
        };
        if let Some(predecessor) = forward {
            self.send_best_effort(
                &Message::UpdateFinger { peer, index },
                predecessor.sock_addr(),
            )
            .await;
        }
    }

    async fn on_store(&self, key: String, value: String) {
        let position = hash(key.as_bytes(), self.state.config.ring_bits);
        let owner = self.find_successor(position).await;
        let me_id = self.state.me.id;

        if owner.id == me_id {
            info!("node {me_id} stored key {key} (position {position})");
            self.state.shards.put_primary(key.clone(), value.clone());

            let anchors: Vec<Peer> = {
                let routing = self.state.routing.lock().unwrap();
                routing
                    .successors
                    .tail()
                    .iter()
                    .filter(|peer| peer.id != me_id)
                    .cloned()
                    .collect()
            };
            for anchor in anchors {
                self.send_best_effort(
                    &Message::Replicate {
                        key: key.clone(),
                        value: value.clone(),
                    },
                    anchor.sock_addr(),
                )
                .await;
            }
        } else {
            debug!("node {me_id} forwarded STORE {key} to owner {owner}");
            self.send_best_effort(&Message::Store { key, value }, owner.sock_addr())
                .await;
        }
    }

    fn on_replicate(&self, key: String, value: String) {
        debug!("node {} accepted replica of {key}", self.state.me.id);
        self.state.shards.put_replica(key, value);
    }

    async fn on_lookup(&self, key: String, from: SocketAddr) {
        let position = hash(key.as_bytes(), self.state.config.ring_bits);
        let owner = self.find_successor(position).await;
        let me_id = self.state.me.id;

        if owner.id == me_id {
            let value = self
                .state
                .shards
                .get(&key)
                .unwrap_or_else(|| NOT_FOUND.to_string());
            self.send_best_effort(&Message::LookupResult { key, value }, from)
                .await;
        } else {
            debug!("node {me_id} forwarded LOOKUP {key} to owner {owner}");
            self.send_best_effort(&Message::Lookup { key }, owner.sock_addr())
                .await;
        }
    }

    fn on_result(&self, key: String, value: String) {
        info!("lookup result for {key}: {value}");
        self.state.record_lookup_result(key, value);
    }

    async fn on_ping(&self, from: SocketAddr) {
        self.send_best_effort(&Message::Pong, from).await;
        self.touch_heartbeat_if_predecessor(&from);
    }

    fn on_pong(&self, from: SocketAddr) {
        self.touch_heartbeat_if_predecessor(&from);
    }

    fn touch_heartbeat_if_predecessor(&self, from: &SocketAddr) {
        let matches = self
            .state
            .routing
            .lock()
            .unwrap()
            .predecessor
            .as_ref()
            .is_some_and(|p| p.is_endpoint(from));
        if matches {
            self.state.touch_predecessor_heartbeat();
        }
    }

    fn is_winding_down(&self) -> bool {
        matches!(
            self.state.lifecycle(),
            Lifecycle::Leaving | Lifecycle::Stopped
        )
    }

    async fn send_best_effort(&self, message: &Message, to: SocketAddr) {
        if let Err(e) = self.endpoint.send(message, to).await {
            debug!(
                "node {}: failed to send {} to {to}: {e}",
                self.state.me.id,
                message.command()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::Config;
    use std::net::IpAddr;

    async fn engine() -> Engine {
        let endpoint = Endpoint::bind("127.0.0.1:0".parse().unwrap(), 1024)
            .await
            .unwrap();
        let local = endpoint.local_addr();
        let me = Peer::from_endpoint(local.ip(), local.port(), 8);
        let state = Arc::new(NodeState::new(me, Config::default()));
        Engine::new(state, Arc::new(endpoint))
    }

    fn peer(id: Id) -> Peer {
        Peer::new(IpAddr::from([127, 0, 0, 1]), 40000 + id as u16, id)
    }

    fn sock(peer: &Peer) -> SocketAddr {
        peer.sock_addr()
    }

    #[tokio::test]
    async fn test_notify_fills_empty_predecessor() {
        let engine = engine().await;
        let candidate = peer(7);
        engine.on_notify(candidate.id, sock(&candidate));
        let routing = engine.state().routing.lock().unwrap();
        assert_eq!(routing.predecessor.as_ref().unwrap().id, 7);
    }

    #[tokio::test]
    async fn test_notify_keeps_closer_predecessor() {
        let engine = engine().await;
        let me_id = engine.state().me.id;
        let close = peer(me_id.wrapping_sub(1) & 0xff);
        let far = peer(me_id.wrapping_sub(20) & 0xff);

        engine.on_notify(close.id, sock(&close));
        engine.on_notify(far.id, sock(&far));

        let routing = engine.state().routing.lock().unwrap();
        assert_eq!(
            routing.predecessor.as_ref().unwrap().id,
            close.id,
            "a farther candidate must not displace a closer predecessor"
        );
    }

    #[tokio::test]
    async fn test_alone_node_answers_lookups_with_itself() {
        let engine = engine().await;
        let me_id = engine.state().me.id;
        assert_eq!(engine.find_successor(0).await.id, me_id);
        assert_eq!(engine.find_successor(255).await.id, me_id);
    }

    #[tokio::test]
    async fn test_successor_owns_its_arc_without_forwarding() {
        let engine = engine().await;
        let me_id = engine.state().me.id;
        let succ = peer(me_id.wrapping_add(10) & 0xff);
        engine.state().routing.lock().unwrap().set_successor(succ.clone());

        let target = me_id.wrapping_add(5) & 0xff;
        assert_eq!(engine.find_successor(target).await.id, succ.id);
    }

    #[tokio::test]
    async fn test_successor_list_reply_rebuilds_behind_head() {
        let engine = engine().await;
        let me_id = engine.state().me.id;
        let succ = peer(me_id.wrapping_add(10) & 0xff);
        engine.state().routing.lock().unwrap().set_successor(succ.clone());

        engine.on_successor_list(vec![
            peer(me_id.wrapping_add(20) & 0xff),
            engine.state().me.clone(),
            peer(me_id.wrapping_add(30) & 0xff),
        ]);

        let routing = engine.state().routing.lock().unwrap();
        let ids: Vec<_> = routing.successors.peers().iter().map(|p| p.id).collect();
        assert_eq!(ids[0], succ.id);
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&me_id), "own id must be skipped in the rebuild");
    }

    #[tokio::test]
    async fn test_update_finger_tightens_entry() {
        let engine = engine().await;
        let me_id = engine.state().me.id;
        // Entry 4 covers start me+16; a peer between the start's owner and
        // the current entry (self) tightens it.
        let closer = peer(me_id.wrapping_add(40) & 0xff);
        engine.on_update_finger(closer.clone(), 4).await;

        let routing = engine.state().routing.lock().unwrap();
        assert_eq!(routing.fingers.node_at(4).id, closer.id);
    }

    #[tokio::test]
    async fn test_replicate_lands_in_replica_shard() {
        let engine = engine().await;
        engine.on_replicate("key".into(), "value".into());
        assert_eq!(engine.state().shards.replica_len(), 1);
        assert_eq!(engine.state().shards.primary_len(), 0);
    }
}
