use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::{LIVENESS_TIMEOUT, PROBE_WRITE_WAIT};
use crate::utils::PeriodicTask;
use super::hub::Hub;

/// Start probing every live connection each `every`.
pub fn start_heartbeat(hub: Arc<Hub>, every: Duration) -> PeriodicTask {
    PeriodicTask::spawn("heartbeat", every, move || {
        let hub = Arc::clone(&hub);
        async move {
            sweep(&hub, PROBE_WRITE_WAIT, LIVENESS_TIMEOUT).await;
        }
    })
}

/// One heartbeat round. Probes run concurrently against a snapshot taken
/// outside the registry lock; a connection is evicted when its probe write
/// fails or times out, or when nothing has been read from it within
/// `liveness`. Returns the number of evicted connections.
pub async fn sweep(hub: &Hub, write_wait: Duration, liveness: Duration) -> usize {
    let connections = hub.snapshot().await;
    if connections.is_empty() {
        return 0;
    }

    let verdicts = join_all(connections.iter().map(|conn| async move {
        if conn.idle_for() > liveness {
            return (conn, Some("no inbound activity"));
        }
        if !conn.probe(write_wait).await {
            return (conn, Some("probe write failed"));
        }
        (conn, None)
    }))
    .await;

    let mut evicted = 0;
    for (conn, reason) in verdicts {
        let Some(reason) = reason else { continue };
        warn!(user_id = conn.user_id(), conn_id = %conn.conn_id(), reason, "Evicting dead connection");
        if hub.evict(conn).await {
            evicted += 1;
        }
    }

    debug!(probed = connections.len(), evicted, "Heartbeat round complete");
    evicted
}
