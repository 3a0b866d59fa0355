//! Ring entry and graceful exit.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info};
use tokio::time::sleep;

use crate::node::state::{Lifecycle, NodeState};
use crate::transport::Endpoint;
use crate::wire::Message;
use crate::Result;

/// Joins the ring through `seed`.
///
/// A node seeding itself declares a new ring: no predecessor, self-looped
/// successor, immediately stable. Any other seed receives a
/// FIND_SUCCESSOR for this node's id; the asynchronous SUCCESSOR reply
/// completes the join and the following stabilize rounds converge the
/// predecessor pointers.
pub async fn join(state: &Arc<NodeState>, endpoint: &Arc<Endpoint>, seed: SocketAddr) -> Result<()> {
    if state.me.is_endpoint(&seed) {
        let mut routing = state.routing.lock().unwrap();
        routing.predecessor = None;
        let me = routing.me.clone();
        routing.set_successor(me.clone());
        routing.successors.replace(Vec::new(), &me);
        drop(routing);
        state.set_lifecycle(Lifecycle::Stable);
        info!("node {} initialized as the first node in the ring", state.me.id);
    } else {
        info!("node {} joining the ring via {seed}", state.me.id);
        state.set_lifecycle(Lifecycle::Joining);
        endpoint
            .send(&Message::FindSuccessor { id: state.me.id }, seed)
            .await?;
    }
    Ok(())
}

/// Graceful departure, in order: hand the primary shard to the successor
/// via STORE, hand the replica shard over via REPLICATE, re-point the
/// successor's predecessor and the predecessor's successor, then give the
/// datagrams a moment to drain before teardown.
pub async fn leave(state: &Arc<NodeState>, endpoint: &Arc<Endpoint>) {
    state.set_lifecycle(Lifecycle::Leaving);

    let (me, successor, predecessor) = {
        let routing = state.routing.lock().unwrap();
        (
            routing.me.clone(),
            routing.successor.clone(),
            routing.predecessor.clone(),
        )
    };

    if successor.id != me.id {
        for (key, value) in state.shards.drain_primary() {
            send_quiet(endpoint, &Message::Store { key, value }, successor.sock_addr()).await;
        }
        for (key, value) in state.shards.drain_replica() {
            send_quiet(
                endpoint,
                &Message::Replicate { key, value },
                successor.sock_addr(),
            )
            .await;
        }
        info!("node {} transferred its shards to successor {}", me.id, successor);

        if let Some(ref peer) = predecessor {
            if peer.id != me.id {
                send_quiet(
                    endpoint,
                    &Message::UpdatePredecessorTo { peer: peer.clone() },
                    successor.sock_addr(),
                )
                .await;
            }
        }
    }

    if let Some(ref peer) = predecessor {
        if peer.id != me.id {
            send_quiet(
                endpoint,
                &Message::UpdateSuccessorTo {
                    peer: successor.clone(),
                },
                peer.sock_addr(),
            )
            .await;
        }
    }

    sleep(state.config.reply_wait).await;
    state.set_lifecycle(Lifecycle::Stopped);
    info!("node {} left the ring", me.id);
}

async fn send_quiet(endpoint: &Endpoint, message: &Message, to: SocketAddr) {
    if let Err(e) = endpoint.send(message, to).await {
        debug!("leave/join message {} to {to} failed: {e}", message.command());
    }
}
