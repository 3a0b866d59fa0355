//! The periodic loops that drive the ring toward a consistent topology.
//!
//! Each loop sleeps first and acts after, so a freshly started node gets a
//! full interval to finish joining before the first repair round. All of
//! them stop at the next tick boundary once shutdown is signaled; errors
//! inside a round are logged by the engine and never propagate.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::threads::engine::Engine;

/// Stabilize every `stabilize_interval`: prune the successor list, repair
/// the successor pointer, notify, refresh fingers, reconcile the list.
pub async fn run_stabilize(engine: Arc<Engine>, shutdown: watch::Receiver<bool>) {
    let interval = engine.state().config.stabilize_interval;
    run_periodic("stabilize", interval, shutdown, move || {
        let engine = Arc::clone(&engine);
        async move { engine.stabilize().await }
    })
    .await;
}

/// Refresh the finger table every `fix_fingers_interval`.
pub async fn run_fix_fingers(engine: Arc<Engine>, shutdown: watch::Receiver<bool>) {
    let interval = engine.state().config.fix_fingers_interval;
    run_periodic("fix_fingers", interval, shutdown, move || {
        let engine = Arc::clone(&engine);
        async move { engine.update_finger_table().await }
    })
    .await;
}

/// Ping the predecessor every `check_predecessor_interval` and clear it
/// once it has been silent past the liveness threshold.
pub async fn run_check_predecessor(engine: Arc<Engine>, shutdown: watch::Receiver<bool>) {
    let interval = engine.state().config.check_predecessor_interval;
    run_periodic("check_predecessor", interval, shutdown, move || {
        let engine = Arc::clone(&engine);
        async move { engine.check_predecessor().await }
    })
    .await;
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut round: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = sleep(interval) => round().await,
            _ = shutdown.changed() => {
                debug!("{name} loop stopped");
                return;
            }
        }
    }
}
