//! The PeerLink seam
//!
//! The media engine (offer/answer generation, candidate discovery,
//! transport) lives outside this crate, behind the [`PeerLink`] trait.
//! The signaling layer drives it through this interface and never sees
//! transport internals; test doubles and real WebRTC bindings slot in
//! equally.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ClientResult;
use zvonok_store_core::{IceCandidate, SessionDescription};

/// Connection state reported by the media transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Event surfaced by a [`PeerLink`] while negotiation runs
#[derive(Debug, Clone)]
pub enum PeerLinkEvent {
    /// A locally discovered connectivity candidate to publish
    LocalCandidate(IceCandidate),
    /// The transport's connection state changed
    ConnectionState(LinkConnectionState),
}

/// Diagnostic classification of the established media path.
///
/// Purely observational: logged when the transport connects, never fed
/// back into call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Host-to-host, no traversal assistance used
    Direct,
    /// Direct path discovered through a reflexive (STUN) candidate
    AssistedDirect,
    /// Media flows through a relay
    Relayed,
}

/// Kind of a traversal-assistance endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceEndpointKind {
    /// Direct-reachability discovery (STUN)
    Stun,
    /// Relay (TURN)
    Turn,
}

/// One traversal-assistance endpoint handed to the media engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceEndpoint {
    pub url: String,
    pub kind: IceEndpointKind,
}

impl IceEndpoint {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: IceEndpointKind::Stun,
        }
    }

    pub fn turn(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: IceEndpointKind::Turn,
        }
    }
}

/// Built-in direct-reachability-only endpoint set.
///
/// The degraded fallback when no configured provider can be reached:
/// calls proceed without relay assistance rather than failing outright.
pub fn default_ice_endpoints() -> Vec<IceEndpoint> {
    vec![
        IceEndpoint::stun("stun:stun.l.google.com:19302"),
        IceEndpoint::stun("stun:stun1.l.google.com:19302"),
    ]
}

/// Source of traversal-assistance endpoints
#[async_trait]
pub trait IceConfigProvider: Send + Sync {
    async fn resolve(&self) -> ClientResult<Vec<IceEndpoint>>;
}

/// Provider returning a fixed endpoint set
pub struct StaticIceConfig {
    endpoints: Vec<IceEndpoint>,
}

impl StaticIceConfig {
    pub fn new(endpoints: Vec<IceEndpoint>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl IceConfigProvider for StaticIceConfig {
    async fn resolve(&self) -> ClientResult<Vec<IceEndpoint>> {
        Ok(self.endpoints.clone())
    }
}

/// Resolve the endpoint set, degrading to the built-in defaults on
/// failure. Acquisition failure is never fatal to a call.
pub async fn resolve_ice_endpoints(provider: &dyn IceConfigProvider) -> Vec<IceEndpoint> {
    match provider.resolve().await {
        Ok(endpoints) if !endpoints.is_empty() => endpoints,
        Ok(_) => {
            warn!("ICE config provider returned no endpoints, using built-in STUN set");
            default_ice_endpoints()
        }
        Err(e) => {
            warn!(error = %e, "ICE config acquisition failed, using built-in STUN set");
            default_ice_endpoints()
        }
    }
}

/// One peer-to-peer media link, scoped to a single call.
///
/// Lifecycle: `acquire_local_audio` first (it can be refused), then the
/// offer/answer exchange, candidates in any order, `close` exactly once
/// at teardown. Events are consumed through the receiver returned by
/// [`PeerLink::take_events`]; it can be taken once.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Request microphone access; fails with `PermissionDenied`
    async fn acquire_local_audio(&self) -> ClientResult<()>;

    /// Produce the local offer (caller side)
    async fn create_local_offer(&self) -> ClientResult<SessionDescription>;

    /// Produce the local answer; the remote offer must already be set
    async fn create_local_answer(&self) -> ClientResult<SessionDescription>;

    /// Apply the remote session description
    async fn set_remote_description(&self, sd: SessionDescription) -> ClientResult<()>;

    /// Apply a remote connectivity candidate
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> ClientResult<()>;

    /// Take the event stream; `None` after the first call
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerLinkEvent>>;

    /// Classification of the selected path, once connected
    fn selected_route(&self) -> Option<RouteKind>;

    /// Release transport and media resources
    async fn close(&self);
}

/// Creates one [`PeerLink`] per call attempt
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(&self, ice_endpoints: &[IceEndpoint]) -> ClientResult<Arc<dyn PeerLink>>;
}
