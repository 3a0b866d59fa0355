use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::node::finger_table::FingerEntry;
use crate::node::peer::Peer;
use crate::node::state::{Lifecycle, NodeState};
use crate::threads::engine::Engine;
use crate::threads::{join, maintenance};
use crate::transport::Endpoint;
use crate::utils::config::Config;
use crate::wire::Message;
use crate::{Error, Result};

/// Owning handle for one running ring node.
///
/// Binding the endpoint is the only fatal step; everything after runs on
/// background tasks (the datagram listener plus the three maintenance
/// loops) until [`leave`](NodeHandle::leave) or
/// [`shutdown`](NodeHandle::shutdown).
pub struct NodeHandle {
    state: Arc<NodeState>,
    endpoint: Arc<Endpoint>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Binds the configured endpoint and spawns the node's tasks. The node
    /// is UNJOINED until [`join`](NodeHandle::join) is called.
    pub async fn start(config: Config) -> Result<NodeHandle> {
        config.validate()?;
        let bind = SocketAddr::new(config.bind_address, config.port);
        let endpoint = Arc::new(Endpoint::bind(bind, config.max_datagram).await?);
        let local = endpoint.local_addr();
        let me = Peer::from_endpoint(local.ip(), local.port(), config.ring_bits);

        let state = Arc::new(NodeState::new(me, config));
        let engine = Arc::new(Engine::new(Arc::clone(&state), Arc::clone(&endpoint)));
        let (shutdown, signal) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(Arc::clone(&engine).run(signal.clone())),
            tokio::spawn(maintenance::run_stabilize(
                Arc::clone(&engine),
                signal.clone(),
            )),
            tokio::spawn(maintenance::run_fix_fingers(
                Arc::clone(&engine),
                signal.clone(),
            )),
            tokio::spawn(maintenance::run_check_predecessor(
                Arc::clone(&engine),
                signal,
            )),
        ];

        Ok(NodeHandle {
            state,
            endpoint,
            shutdown,
            tasks,
        })
    }

    pub fn peer(&self) -> Peer {
        self.state.me.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Joins the ring through `seed`; seeding with the own address starts
    /// a new ring.
    pub async fn join(&self, seed: SocketAddr) -> Result<()> {
        self.ensure_running()?;
        join::join(&self.state, &self.endpoint, seed).await
    }

    /// Declares this node the origin of a fresh ring.
    pub async fn join_self(&self) -> Result<()> {
        self.join(self.local_addr()).await
    }

    /// Routes a key/value pair to its owner. Open-loop: no acknowledgment
    /// comes back, the write lands once forwarding reaches the owner.
    pub async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_running()?;
        check_key(key)?;
        if value.is_empty() {
            return Err(Error::InvalidValue);
        }
        self.endpoint
            .send(
                &Message::Store {
                    key: key.to_string(),
                    value: value.to_string(),
                },
                self.local_addr(),
            )
            .await
    }

    /// Starts a lookup; the RESULT surfaces asynchronously and can be
    /// collected with [`take_result`](NodeHandle::take_result) or
    /// [`await_result`](NodeHandle::await_result).
    pub async fn lookup(&self, key: &str) -> Result<()> {
        self.ensure_running()?;
        check_key(key)?;
        self.endpoint
            .send(
                &Message::Lookup {
                    key: key.to_string(),
                },
                self.local_addr(),
            )
            .await
    }

    /// Removes and returns the surfaced RESULT for `key`, if one arrived.
    pub fn take_result(&self, key: &str) -> Option<String> {
        self.state.take_lookup_result(key)
    }

    /// Issues a lookup and polls for its RESULT until `deadline` runs out.
    pub async fn await_result(&self, key: &str, deadline: Duration) -> Result<Option<String>> {
        self.lookup(key).await?;
        let until = Instant::now() + deadline;
        loop {
            if let Some(value) = self.take_result(key) {
                return Ok(Some(value));
            }
            if Instant::now() >= until {
                return Ok(None);
            }
            sleep(Duration::from_millis(25)).await;
        }
    }

    /// Snapshot of the node's routing and storage state.
    pub fn summary(&self) -> NodeSummary {
        let routing = self.state.routing.lock().unwrap();
        NodeSummary {
            me: routing.me.clone(),
            lifecycle: format!("{:?}", self.state.lifecycle()),
            predecessor: routing.predecessor.clone(),
            successor: routing.successor.clone(),
            successor_list: routing.successors.peers().to_vec(),
            fingers: routing.fingers.fingers.clone(),
            primary_keys: self.state.shards.primary_keys(),
            replica_keys: self.state.shards.replica_keys(),
        }
    }

    /// Graceful departure: hands the shards to the successor, re-points
    /// both neighbors, then stops every task and closes the endpoint.
    pub async fn leave(mut self) {
        if self.state.lifecycle() != Lifecycle::Stopped {
            join::leave(&self.state, &self.endpoint).await;
        }
        self.stop_tasks().await;
    }

    /// Forced teardown without notifying anyone, as a crash would leave
    /// things. Peers detect the absence through missed PONGs.
    pub async fn shutdown(mut self) {
        self.state.set_lifecycle(Lifecycle::Stopped);
        self.stop_tasks().await;
    }

    async fn stop_tasks(&mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state.lifecycle() {
            Lifecycle::Leaving | Lifecycle::Stopped => Err(Error::Stopped),
            _ => Ok(()),
        }
    }
}

/// Informational snapshot of one node, serializable for external tooling.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub me: Peer,
    pub lifecycle: String,
    pub predecessor: Option<Peer>,
    pub successor: Peer,
    pub successor_list: Vec<Peer>,
    pub fingers: Vec<FingerEntry>,
    pub primary_keys: Vec<String>,
    pub replica_keys: Vec<String>,
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}
