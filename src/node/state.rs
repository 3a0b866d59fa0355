use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::kv::KvShards;
use crate::node::peer::Peer;
use crate::node::routing::Routing;
use crate::utils::config::Config;

/// Node lifecycle. A node either declares itself the ring origin or joins
/// through a seed; the first applied SUCCESSOR reply completes a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unjoined,
    Joining,
    Stable,
    Leaving,
    Stopped,
}

/// Shared per-node state, fanned out to the listener and the maintenance
/// loops behind an `Arc`.
///
/// Lock discipline: guards are taken for short, synchronous sections only
/// and are never held across an await point.
pub struct NodeState {
    pub me: Peer,
    pub config: Config,
    pub routing: Mutex<Routing>,
    pub shards: KvShards,
    pub lifecycle: Mutex<Lifecycle>,
    /// Last time the predecessor answered (or sent) a liveness ping.
    pub last_predecessor_heartbeat: Mutex<Instant>,
    /// Single-slot correlation for stabilize's GET_PREDECESSOR exchange.
    pending_predecessor: Mutex<Option<oneshot::Sender<Option<Peer>>>>,
    /// Asynchronously surfaced RESULT values, keyed by looked-up key.
    lookup_results: Mutex<HashMap<String, String>>,
}

impl NodeState {
    pub fn new(me: Peer, config: Config) -> NodeState {
        let routing = Routing::new(me.clone(), config.ring_bits, config.successor_count);
        NodeState {
            me,
            routing: Mutex::new(routing),
            shards: KvShards::default(),
            lifecycle: Mutex::new(Lifecycle::Unjoined),
            last_predecessor_heartbeat: Mutex::new(Instant::now()),
            pending_predecessor: Mutex::new(None),
            lookup_results: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    pub fn set_lifecycle(&self, next: Lifecycle) {
        *self.lifecycle.lock().unwrap() = next;
    }

    /// Marks the node stable if it was joining; true when this call made
    /// the transition.
    pub fn complete_join(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if *lifecycle == Lifecycle::Joining {
            *lifecycle = Lifecycle::Stable;
            true
        } else {
            false
        }
    }

    pub fn touch_predecessor_heartbeat(&self) {
        *self.last_predecessor_heartbeat.lock().unwrap() = Instant::now();
    }

    pub fn predecessor_silence(&self) -> std::time::Duration {
        self.last_predecessor_heartbeat.lock().unwrap().elapsed()
    }

    /// Arms the stabilize reply slot. A previously armed sender is dropped,
    /// so a stale PREDECESSOR reply from the prior cycle finds nothing to
    /// fulfil.
    pub fn arm_predecessor_slot(&self) -> oneshot::Receiver<Option<Peer>> {
        let (tx, rx) = oneshot::channel();
        *self.pending_predecessor.lock().unwrap() = Some(tx);
        rx
    }

    /// Delivers a PREDECESSOR reply into the armed slot; false when no
    /// stabilize cycle is waiting (the reply is stale and dropped).
    pub fn fulfil_predecessor_slot(&self, reply: Option<Peer>) -> bool {
        match self.pending_predecessor.lock().unwrap().take() {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn disarm_predecessor_slot(&self) {
        self.pending_predecessor.lock().unwrap().take();
    }

    pub fn record_lookup_result(&self, key: String, value: String) {
        self.lookup_results.lock().unwrap().insert(key, value);
    }

    pub fn take_lookup_result(&self, key: &str) -> Option<String> {
        self.lookup_results.lock().unwrap().remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn state() -> NodeState {
        let me = Peer::from_endpoint(IpAddr::from([127, 0, 0, 1]), 5000, 8);
        NodeState::new(me, Config::default())
    }

    #[test]
    fn test_join_completion_transitions_once() {
        let state = state();
        assert_eq!(state.lifecycle(), Lifecycle::Unjoined);
        state.set_lifecycle(Lifecycle::Joining);
        assert!(state.complete_join());
        assert!(!state.complete_join());
        assert_eq!(state.lifecycle(), Lifecycle::Stable);
    }

    #[test]
    fn test_stale_predecessor_reply_is_dropped() {
        let state = state();
        assert!(!state.fulfil_predecessor_slot(None));

        let mut rx = state.arm_predecessor_slot();
        assert!(state.fulfil_predecessor_slot(Some(state.me.clone())));
        assert_eq!(rx.try_recv().unwrap().unwrap().id, state.me.id);

        // The slot is single-shot: the next reply has nowhere to go.
        assert!(!state.fulfil_predecessor_slot(None));
    }

    #[test]
    fn test_rearming_drops_previous_cycle() {
        let state = state();
        let mut first = state.arm_predecessor_slot();
        let _second = state.arm_predecessor_slot();
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn test_lookup_results_are_taken_once() {
        let state = state();
        state.record_lookup_result("k".into(), "v".into());
        assert_eq!(state.take_lookup_result("k").as_deref(), Some("v"));
        assert_eq!(state.take_lookup_result("k"), None);
    }
}
