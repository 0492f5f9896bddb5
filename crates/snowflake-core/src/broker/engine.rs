//! The rendezvous engine: a single long-lived matcher task.
//!
//! The engine is the sole writer that establishes slots. Matching itself
//! stays concurrent: each poll gets its own spawned waiter that settles the
//! poll with either a client offer or a timeout removal.

use std::sync::Arc;

use tracing::debug;

use super::{BrokerContext, ProxyPoll};

impl BrokerContext {
    /// Run the engine until the poll stream closes. Spawn exactly once;
    /// a second call finds the receiver already taken and returns.
    pub async fn run(self: Arc<Self>) {
        let Some(mut poll_rx) = self.poll_rx.lock().take() else {
            debug!("engine already running, ignoring duplicate start");
            return;
        };
        while let Some(request) = poll_rx.recv().await {
            let ProxyPoll {
                id,
                proxy_type,
                nat_type,
                reply,
            } = request;
            let (snowflake, offer_rx) = self.add_snowflake(&id, &proxy_type, nat_type);
            let ctx = Arc::clone(&self);
            let proxy_timeout = self.config.proxy_timeout;
            tokio::spawn(async move {
                tokio::select! {
                    // The offer branch must win when both are ready: once an
                    // offer is delivered the timeout may not reap the slot.
                    biased;
                    offer = offer_rx => {
                        if let Ok(offer) = offer {
                            // Forwarding fails only if the poll handler's
                            // request died; the offer is lost and the client
                            // side times out on its own timer.
                            let _ = reply.send(offer);
                        }
                    }
                    _ = tokio::time::sleep(proxy_timeout) => {
                        // Reap only while heap-resident; a popped slot is
                        // owned by its matcher. Dropping `reply` here turns
                        // the poll into an idle response either way.
                        if ctx.remove_if_idle(&snowflake) {
                            debug!(id = %snowflake.id(), "proxy poll timed out unmatched");
                        }
                    }
                }
            });
        }
    }
}
