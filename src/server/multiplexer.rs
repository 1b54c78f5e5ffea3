use crate::server::{
    connection::{self, ConnContext},
    server_impl::StopHandle,
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinSet, time::sleep};
use tracing::{debug, warn};

/// Pause after a failed `accept`, so a persistent error (e.g. out of file
/// descriptors) does not turn the loop into a busy spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Accepts connections and drives their read cycles until `stop` fires.
///
/// Runs on a single-threaded runtime: all readiness waiting and every
/// socket read happens on the calling thread. On return, every connection
/// task has been cancelled and its socket closed.
pub(crate) async fn run(listener: TcpListener, ctx: Arc<ConnContext>, stop: &StopHandle) {
    let mut connections = JoinSet::new();

    while !stop.is_stopped() {
        tokio::select! {
            _ = stop.notified() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if ctx.limits.nodelay {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                        }
                    }

                    debug!(%peer, "connection accepted");
                    connections.spawn(connection::serve(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    sleep(ACCEPT_BACKOFF).await;
                }
            },

            // Reap finished connections
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    debug!(open = connections.len(), "closing remaining connections");
    connections.shutdown().await;
}
