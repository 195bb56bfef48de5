//! Shared harness for the integration tests: a scriptable media link
//! and a two-client setup over one in-memory store.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use zvonok_client_core::{
    ClientConfig, ClientError, ClientEvent, ClientManager, ClientResult, IceEndpoint,
    LinkConnectionState, PeerLink, PeerLinkEvent, PeerLinkFactory, RouteKind,
};
use zvonok_store_core::{IceCandidate, MemoryStore, SdpKind, SessionDescription};

/// Scriptable stand-in for a media engine. Records everything the
/// signaling layer feeds it and lets tests inject link events.
pub struct FakePeerLink {
    deny_audio: bool,
    events_tx: mpsc::UnboundedSender<PeerLinkEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerLinkEvent>>>,
    pub remote_descriptions: Mutex<Vec<SessionDescription>>,
    pub remote_candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicBool,
    route: Mutex<Option<RouteKind>>,
}

impl FakePeerLink {
    pub fn new(deny_audio: bool) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            deny_audio,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            remote_descriptions: Mutex::new(Vec::new()),
            remote_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            route: Mutex::new(None),
        })
    }

    pub fn emit_local_candidate(&self, candidate: &str) {
        let _ = self
            .events_tx
            .send(PeerLinkEvent::LocalCandidate(IceCandidate {
                candidate: candidate.to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            }));
    }

    pub fn emit_connected(&self, route: RouteKind) {
        *self.route.lock() = Some(route);
        let _ = self
            .events_tx
            .send(PeerLinkEvent::ConnectionState(LinkConnectionState::Connected));
    }

    pub fn emit_failed(&self) {
        let _ = self
            .events_tx
            .send(PeerLinkEvent::ConnectionState(LinkConnectionState::Failed));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_candidate_count(&self) -> usize {
        self.remote_candidates.lock().len()
    }
}

#[async_trait]
impl PeerLink for FakePeerLink {
    async fn acquire_local_audio(&self) -> ClientResult<()> {
        if self.deny_audio {
            return Err(ClientError::PermissionDenied);
        }
        Ok(())
    }

    async fn create_local_offer(&self) -> ClientResult<SessionDescription> {
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: "v=0 fake-offer".to_string(),
        })
    }

    async fn create_local_answer(&self) -> ClientResult<SessionDescription> {
        if self.remote_descriptions.lock().is_empty() {
            return Err(ClientError::setup("no remote offer set"));
        }
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: "v=0 fake-answer".to_string(),
        })
    }

    async fn set_remote_description(&self, sd: SessionDescription) -> ClientResult<()> {
        self.remote_descriptions.lock().push(sd);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> ClientResult<()> {
        self.remote_candidates.lock().push(candidate);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerLinkEvent>> {
        self.events_rx.lock().take()
    }

    fn selected_route(&self) -> Option<RouteKind> {
        *self.route.lock()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out [`FakePeerLink`]s and keeps every created link reachable
/// for assertions
pub struct FakePeerLinkFactory {
    pub deny_audio: AtomicBool,
    pub links: Mutex<Vec<Arc<FakePeerLink>>>,
}

impl FakePeerLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deny_audio: AtomicBool::new(false),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn set_deny_audio(&self, deny: bool) {
        self.deny_audio.store(deny, Ordering::SeqCst);
    }

    pub fn last_link(&self) -> Arc<FakePeerLink> {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("no link created yet")
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }
}

#[async_trait]
impl PeerLinkFactory for FakePeerLinkFactory {
    async fn create(&self, _ice_endpoints: &[IceEndpoint]) -> ClientResult<Arc<dyn PeerLink>> {
        let link = FakePeerLink::new(self.deny_audio.load(Ordering::SeqCst));
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

/// One started client plus the handles tests assert through
pub struct TestClient {
    pub manager: Arc<ClientManager>,
    pub factory: Arc<FakePeerLinkFactory>,
    pub events: broadcast::Receiver<ClientEvent>,
}

pub async fn start_client(
    store: &Arc<MemoryStore>,
    user_id: &str,
    name: &str,
    email: &str,
) -> TestClient {
    start_client_with_config(store, ClientConfig::new(user_id, name, email)).await
}

pub async fn start_client_with_config(
    store: &Arc<MemoryStore>,
    config: ClientConfig,
) -> TestClient {
    let factory = FakePeerLinkFactory::new();
    let store: Arc<dyn zvonok_store_core::SharedStore> = store.clone();
    let link_factory: Arc<dyn PeerLinkFactory> = factory.clone();
    let manager = ClientManager::new(config, store, link_factory);
    let events = manager.subscribe_events();
    manager.start().await.expect("client start failed");
    TestClient {
        manager,
        factory,
        events,
    }
}

/// Wait for the first event matching `pred`, skipping others
pub async fn expect_event<F>(
    rx: &mut broadcast::Receiver<ClientEvent>,
    what: &str,
    mut pred: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed waiting for {}: {}", what, e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

/// Assert that no event matching `pred` arrives within `window`
pub async fn expect_no_event<F>(
    rx: &mut broadcast::Receiver<ClientEvent>,
    window: Duration,
    mut pred: F,
) where
    F: FnMut(&ClientEvent) -> bool,
{
    let result = tokio::time::timeout(window, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(_) => futures::future::pending::<()>().await,
            }
        }
    })
    .await;
    if let Ok(event) = result {
        panic!("unexpected event arrived: {:?}", event);
    }
}

/// Two clients on one store with the mutual contact already in place
pub async fn connected_pair(store: &Arc<MemoryStore>) -> (TestClient, TestClient) {
    let mut alice = start_client(store, "u-alice", "Alice", "alice@example.com").await;
    let mut bob = start_client(store, "u-bob", "Bob", "bob@example.com").await;

    alice
        .manager
        .add_contact("bob@example.com")
        .await
        .expect("contact add failed");

    // Both directories converge before any call is placed.
    expect_event(&mut alice.events, "alice contact snapshot", |e| {
        matches!(e, ClientEvent::ContactListChanged { contacts } if !contacts.is_empty())
    })
    .await;
    expect_event(&mut bob.events, "bob contact snapshot", |e| {
        matches!(e, ClientEvent::ContactListChanged { contacts } if !contacts.is_empty())
    })
    .await;

    (alice, bob)
}
