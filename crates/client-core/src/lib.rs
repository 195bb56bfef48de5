//! # zvonok-client-core
//!
//! One-to-one voice call signaling over a real-time shared key/value
//! store. This crate owns the whole client-side protocol: placing,
//! answering, declining, cancelling and hanging up calls; the
//! offer/answer/candidate exchange that drives the media engine; the
//! mutual contact directory; and incoming-call detection by push with
//! an optional poll fallback.
//!
//! What it deliberately does not own: the media engine itself. Audio
//! capture, SDP generation and transport live behind the
//! [`PeerLink`] trait, so real WebRTC bindings and test doubles slot in
//! equally.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use zvonok_client_core::{ClientConfig, ClientManager};
//! use zvonok_store_core::MemoryStore;
//! # use zvonok_client_core::PeerLinkFactory;
//! # async fn run(link_factory: Arc<dyn PeerLinkFactory>) -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let config = ClientConfig::new("u-alice", "Alice", "alice@example.com");
//! let client = ClientManager::new(config, store, link_factory);
//!
//! client.start().await?;
//! let callee = client.add_contact("bob@example.com").await?;
//! let call_id = client.make_call(&callee).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Correctness under weak delivery
//!
//! The store delivers change notifications at-least-once and possibly
//! reordered. Every consumer here is built for that: call status flows
//! through a monotonic reducer (duplicates and regressions are no-ops,
//! terminal states absorb), incoming-call intake is gated by an
//! idempotent claim per record id, and candidates arriving before the
//! remote description queue on the session and flush exactly once.

pub mod call;
pub mod client;
pub mod config;
pub mod contacts;
pub mod error;
pub mod events;
pub mod peer_link;
pub mod recovery;
pub mod session;

pub use call::{CallInfo, CallState, TerminationReason};
pub use client::ClientManager;
pub use config::ClientConfig;
pub use contacts::{ContactDirectory, ContactEntry};
pub use error::{ClientError, ClientResult};
pub use events::{
    CallAction, CallStateInfo, ClientEvent, ClientEventHandler, IncomingCallInfo,
};
pub use peer_link::{
    default_ice_endpoints, IceConfigProvider, IceEndpoint, IceEndpointKind, LinkConnectionState,
    PeerLink, PeerLinkEvent, PeerLinkFactory, RouteKind, StaticIceConfig,
};
pub use session::{Session, SessionManager};

// Re-exported so embedders rarely need the store crate directly.
pub use zvonok_store_core::{CallId, CallRole, CallStatus, UserId};
