//! Broker rendezvous core.
//!
//! Matches clients and snowflake proxies by passing WebRTC session
//! descriptions between them. Proxies poll `/proxy` and wait for a client,
//! clients POST offers to `/client`, and proxies return answers on
//! `/answer`; the broker is the only rendezvous point and never touches
//! session traffic afterwards.
//!
//! Three arrival streams meet at a single three-way rendezvous per match:
//!
//! 1. A proxy poll registers a [`Snowflake`] slot and blocks on its offer
//!    channel (via the engine's per-poll waiter).
//! 2. A client offer pops the least-served compatible slot, delivers the
//!    offer, and blocks on the slot's answer channel.
//! 3. The proxy's answer is routed by snowflake id to the waiting client.
//!
//! Any party failing to act within its timeout causes a clean, idempotent
//! teardown of the slot.

pub mod engine;
pub mod geoip;
pub mod handlers;
pub mod heap;
pub mod messages;
pub mod metrics;
pub mod prometheus;
pub mod registry;
pub mod server;

#[cfg(test)]
mod registry_tests;

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::broker::metrics::Metrics;
use crate::broker::registry::Registry;

// Re-export the pieces most callers need
pub use handlers::BrokerState;
pub use server::{build_broker_router, BrokerServer, TlsMode};

/// How long a client handler waits for a proxy answer.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a proxy poll stays registered waiting for a client offer.
pub const PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of bytes read from any HTTP request body.
pub const READ_LIMIT: usize = 100_000;

/// Heap index sentinel: the slot is not resident in any heap.
pub(crate) const HEAP_NONE: i64 = -1;

/// NAT topology class reported by clients and proxies.
///
/// `Restricted` peers cannot reach each other, so restricted proxies are
/// reserved for unrestricted clients. `Unknown` is treated conservatively
/// as restricted on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NatType {
    #[default]
    Unknown,
    Restricted,
    Unrestricted,
}

impl NatType {
    /// Parse a NAT header or payload value. Anything unrecognized,
    /// including the empty string, is treated as `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "restricted" => NatType::Restricted,
            "unrestricted" => NatType::Unrestricted,
            _ => NatType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NatType::Unknown => "unknown",
            NatType::Restricted => "restricted",
            NatType::Unrestricted => "unrestricted",
        }
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client's SDP offer together with its NAT class.
#[derive(Debug, Clone)]
pub struct ClientOffer {
    pub sdp: Bytes,
    pub nat_type: NatType,
}

/// One registered proxy awaiting a client.
///
/// Exclusively owned by the registry while heap-resident; owned by the
/// matching client handler between pop and teardown. The single-shot
/// channel cells enforce the at-most-once traversal of each rendezvous.
pub struct Snowflake {
    id: String,
    proxy_type: String,
    nat_type: NatType,
    /// Clients served so far; ascending priority key.
    pub(crate) clients: u32,
    /// Registry-assigned insertion sequence; deterministic tie-break.
    pub(crate) seq: u64,
    /// Position in the owning heap, or [`HEAP_NONE`]. Only mutated under
    /// the registry lock; atomic for interior mutability through `Arc`.
    pub(crate) index: AtomicI64,
    pub(crate) offer_tx: Mutex<Option<oneshot::Sender<ClientOffer>>>,
    pub(crate) answer_tx: Mutex<Option<oneshot::Sender<Bytes>>>,
    pub(crate) answer_rx: Mutex<Option<oneshot::Receiver<Bytes>>>,
}

impl Snowflake {
    pub(crate) fn new(
        id: &str,
        proxy_type: &str,
        nat_type: NatType,
        seq: u64,
    ) -> (Arc<Self>, oneshot::Receiver<ClientOffer>) {
        let (offer_tx, offer_rx) = oneshot::channel();
        let (answer_tx, answer_rx) = oneshot::channel();
        let snowflake = Arc::new(Snowflake {
            id: id.to_owned(),
            proxy_type: proxy_type.to_owned(),
            nat_type,
            clients: 0,
            seq,
            index: AtomicI64::new(HEAP_NONE),
            offer_tx: Mutex::new(Some(offer_tx)),
            answer_tx: Mutex::new(Some(answer_tx)),
            answer_rx: Mutex::new(Some(answer_rx)),
        });
        (snowflake, offer_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn proxy_type(&self) -> &str {
        &self.proxy_type
    }

    pub fn nat_type(&self) -> NatType {
        self.nat_type
    }

    pub(crate) fn heap_index(&self) -> i64 {
        self.index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_heap_index(&self, index: i64) {
        self.index.store(index, Ordering::Relaxed);
    }
}

/// Broker timeouts. Defaults mirror the production constants; tests inject
/// shorter ones so timer-driven scenarios finish quickly.
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    pub proxy_timeout: Duration,
    pub client_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            proxy_timeout: PROXY_TIMEOUT,
            client_timeout: CLIENT_TIMEOUT,
        }
    }
}

/// A proxy poll in flight: the engine binds it to a slot, and the waiter
/// forwards at most one client offer on `reply`. Dropping `reply` without
/// sending signals "no offer" back to the poll handler.
pub struct ProxyPoll {
    pub id: String,
    pub proxy_type: String,
    pub nat_type: NatType,
    pub reply: oneshot::Sender<ClientOffer>,
}

/// Shared broker state: the registry, the poll stream and the metrics sink.
pub struct BrokerContext {
    pub(crate) registry: Mutex<Registry>,
    metrics: Metrics,
    config: BrokerConfig,
    poll_tx: mpsc::Sender<ProxyPoll>,
    poll_rx: Mutex<Option<mpsc::Receiver<ProxyPoll>>>,
}

impl BrokerContext {
    pub fn new(metrics: Metrics, config: BrokerConfig) -> Arc<Self> {
        let (poll_tx, poll_rx) = mpsc::channel(64);
        Arc::new(BrokerContext {
            registry: Mutex::new(Registry::new()),
            metrics,
            config,
            poll_tx,
            poll_rx: Mutex::new(Some(poll_rx)),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> BrokerConfig {
        self.config
    }

    /// Registers a snowflake and waits for a client to send an offer, as
    /// part of the polling logic of the proxy handler. `None` means the
    /// poll timed out unmatched.
    pub async fn request_offer(
        &self,
        id: &str,
        proxy_type: &str,
        nat_type: NatType,
    ) -> Option<ClientOffer> {
        let (reply, reply_rx) = oneshot::channel();
        let request = ProxyPoll {
            id: id.to_owned(),
            proxy_type: proxy_type.to_owned(),
            nat_type,
            reply,
        };
        self.poll_tx.send(request).await.ok()?;
        reply_rx.await.ok()
    }

    /// Create a snowflake slot and register it. A stale heap-resident slot
    /// with the same id is displaced first so the id index stays exact.
    pub(crate) fn add_snowflake(
        &self,
        id: &str,
        proxy_type: &str,
        nat_type: NatType,
    ) -> (Arc<Snowflake>, oneshot::Receiver<ClientOffer>) {
        let (snowflake, offer_rx, displaced) = {
            let mut registry = self.registry.lock();
            registry.insert(id, proxy_type, nat_type)
        };
        if let Some(stale) = displaced {
            self.metrics
                .available_proxies_dec(stale.nat_type(), stale.proxy_type());
        }
        self.metrics.available_proxies_inc(nat_type, proxy_type);
        (snowflake, offer_rx)
    }

    /// Pop the least-served proxy compatible with `client_nat`, or `None`
    /// when the selected heap is empty. The popped slot stays in the id
    /// index until [`finalize_snowflake`](Self::finalize_snowflake).
    pub(crate) fn match_snowflake(&self, client_nat: NatType) -> Option<Arc<Snowflake>> {
        self.registry.lock().pop_best(client_nat)
    }

    /// Engine timeout path: remove the slot iff it is still heap-resident.
    /// A popped slot belongs to its matcher and is left untouched.
    pub(crate) fn remove_if_idle(&self, snowflake: &Arc<Snowflake>) -> bool {
        let mut registry = self.registry.lock();
        if snowflake.heap_index() == HEAP_NONE {
            return false;
        }
        registry.remove_slot(snowflake);
        self.metrics
            .available_proxies_dec(snowflake.nat_type(), snowflake.proxy_type());
        true
    }

    /// Tear down a slot after its client exchange completed or timed out.
    pub(crate) fn finalize_snowflake(&self, snowflake: &Arc<Snowflake>) {
        let mut registry = self.registry.lock();
        registry.remove_entry_if_same(snowflake);
        self.metrics
            .available_proxies_dec(snowflake.nat_type(), snowflake.proxy_type());
    }

    /// Consume the answer sender for `id`, if the slot is known and its
    /// answer channel has not been used yet.
    pub(crate) fn take_answer_sender(&self, id: &str) -> Option<oneshot::Sender<Bytes>> {
        let registry = self.registry.lock();
        let snowflake = registry.lookup(id)?;
        let sender = snowflake.answer_tx.lock().take();
        sender
    }

    /// Number of proxies a client of the given NAT class could be handed.
    pub fn available_len(&self, client_nat: NatType) -> usize {
        self.registry.lock().available(client_nat)
    }

    /// Total live slots, heap-resident or in-flight.
    pub fn total_snowflakes(&self) -> usize {
        self.registry.lock().total()
    }

    /// (unrestricted, restricted) heap sizes.
    pub fn heap_sizes(&self) -> (usize, usize) {
        self.registry.lock().heap_sizes()
    }

    /// Plain-text state dump for the `/debug` endpoint.
    pub fn snapshot(&self) -> String {
        let registry = self.registry.lock();
        let mut standalones = 0;
        let mut browsers = 0;
        let mut webexts = 0;
        let mut unknowns = 0;
        let mut nat_restricted = 0;
        let mut nat_unrestricted = 0;
        let mut nat_unknown = 0;
        for snowflake in registry.snowflakes() {
            match snowflake.proxy_type() {
                "standalone" => standalones += 1,
                "badge" => browsers += 1,
                "webext" => webexts += 1,
                _ => unknowns += 1,
            }
            match snowflake.nat_type() {
                NatType::Restricted => nat_restricted += 1,
                NatType::Unrestricted => nat_unrestricted += 1,
                NatType::Unknown => nat_unknown += 1,
            }
        }
        let mut s = format!("current snowflakes available: {}\n", registry.total());
        s.push_str(&format!("\tstandalone proxies: {standalones}"));
        s.push_str(&format!("\n\tbrowser proxies: {browsers}"));
        s.push_str(&format!("\n\twebext proxies: {webexts}"));
        s.push_str(&format!("\n\tunknown proxies: {unknowns}"));
        s.push_str("\nNAT Types available:");
        s.push_str(&format!("\n\trestricted: {nat_restricted}"));
        s.push_str(&format!("\n\tunrestricted: {nat_unrestricted}"));
        s.push_str(&format!("\n\tunknown: {nat_unknown}"));
        s
    }
}
