//! # Snowflake Core
//!
//! Broker-side rendezvous logic for a WebRTC circumvention transport.
//!
//! The broker is the HTTP signaling channel: it matches clients with
//! volunteer snowflake proxies by relaying SDP offers and answers between
//! them, and carries no session data once a match completes.
//!
//! ```text
//! crates/snowflake-core/src/broker/
//! ├── registry.rs   ← two priority heaps + id index behind one lock
//! ├── engine.rs     ← long-lived matcher task, one waiter per proxy poll
//! ├── handlers.rs   ← axum handlers for /proxy /client /answer /debug ...
//! ├── messages.rs   ← JSON wire codec for poll and answer payloads
//! ├── metrics.rs    ← counters, country stats, periodic metrics log
//! └── server.rs     ← router assembly and the TLS serving modes
//! ```

pub mod broker;
pub mod error;
pub mod utils;

// Re-export commonly used types
pub use broker::{BrokerConfig, BrokerContext, ClientOffer, NatType};
pub use error::{BrokerError, BrokerResult};
