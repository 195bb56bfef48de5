//! Manager construction, lifecycle, presence, and event plumbing

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::call::{CallId, CallInfo, CallState};
use crate::config::ClientConfig;
use crate::contacts::{ContactDirectory, ContactEntry};
use crate::error::{ClientError, ClientResult};
use crate::events::{CallStateInfo, ClientEvent, ClientEventHandler};
use crate::peer_link::{
    default_ice_endpoints, IceConfigProvider, PeerLinkFactory, StaticIceConfig,
};
use crate::session::SessionManager;
use zvonok_store_core::{
    paths, records::now_millis, PresenceStatus, SharedStore, SharedStoreExt, StoreError,
    SubscriptionHandle, UserId, UserRecord,
};

/// Coordinator of one user's signaling client.
///
/// Owns the store connection, the contact directory, the single live
/// call session and the background watchers. Construct it, `start` it,
/// and drive calls through the operations in
/// [`calls`](crate::client::calls).
pub struct ClientManager {
    pub(crate) config: ClientConfig,
    pub(crate) store: Arc<dyn SharedStore>,
    pub(crate) link_factory: Arc<dyn PeerLinkFactory>,
    pub(crate) ice_provider: Arc<dyn IceConfigProvider>,
    pub(crate) directory: Arc<ContactDirectory>,
    pub(crate) sessions: SessionManager,
    pub(crate) event_tx: broadcast::Sender<ClientEvent>,
    pub(crate) handler: RwLock<Option<Arc<dyn ClientEventHandler>>>,
    pub(crate) is_running: RwLock<bool>,
    /// Client-scoped subscriptions (incoming-call watch); record-scoped
    /// ones live on the session
    pub(crate) client_subs: Mutex<Vec<SubscriptionHandle>>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientManager {
    /// Create a manager with endpoints taken from the config (or the
    /// built-in STUN set when none are configured)
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn SharedStore>,
        link_factory: Arc<dyn PeerLinkFactory>,
    ) -> Arc<Self> {
        let endpoints = config
            .ice_endpoints
            .clone()
            .unwrap_or_else(default_ice_endpoints);
        Self::with_ice_provider(config, store, link_factory, Arc::new(StaticIceConfig::new(endpoints)))
    }

    /// Create a manager with a custom traversal-endpoint provider
    pub fn with_ice_provider(
        config: ClientConfig,
        store: Arc<dyn SharedStore>,
        link_factory: Arc<dyn PeerLinkFactory>,
        ice_provider: Arc<dyn IceConfigProvider>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let directory = Arc::new(ContactDirectory::new(
            store.clone(),
            config.user_id.clone(),
            config.display_name.clone(),
            config.email.clone(),
            event_tx.clone(),
        ));

        Arc::new(Self {
            config,
            store,
            link_factory,
            ice_provider,
            directory,
            sessions: SessionManager::new(),
            event_tx,
            handler: RwLock::new(None),
            is_running: RwLock::new(false),
            client_subs: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Publish the profile, go online, and begin watching for contacts
    /// and incoming calls
    pub async fn start(self: &Arc<Self>) -> ClientResult<()> {
        {
            let mut running = self.is_running.write().await;
            if *running {
                return Err(ClientError::internal("client already started"));
            }
            *running = true;
        }

        self.ensure_profile().await?;
        self.set_presence(PresenceStatus::Online).await?;
        self.directory.start_watch().await?;
        self.spawn_incoming_watcher().await?;
        if self.config.poll_fallback {
            info!(
                interval_ms = self.config.poll_interval.as_millis() as u64,
                "poll fallback engaged for incoming calls"
            );
            self.spawn_poll_fallback();
        }
        self.spawn_handler_bridge();

        info!(user_id = %self.config.user_id, "client started");
        Ok(())
    }

    /// Tear everything down: end a live call, drop subscriptions, go
    /// offline. Idempotent.
    pub async fn stop(self: &Arc<Self>) -> ClientResult<()> {
        {
            let mut running = self.is_running.write().await;
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        if let Some(session) = self.sessions.current() {
            let reason = Self::stop_reason_for(session.state());
            self.end_session(&session, reason, true).await;
        }

        self.directory.stop().await;
        let subs: Vec<SubscriptionHandle> = self.client_subs.lock().drain(..).collect();
        for handle in subs {
            self.store.unsubscribe(handle).await;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        self.set_presence(PresenceStatus::Offline).await?;
        info!(user_id = %self.config.user_id, "client stopped");
        Ok(())
    }

    fn stop_reason_for(state: CallState) -> crate::call::TerminationReason {
        use crate::call::{CallRole, TerminationReason};
        match state {
            CallState::Ringing(CallRole::Caller) => TerminationReason::Cancelled,
            CallState::Ringing(CallRole::Callee) => TerminationReason::Declined,
            _ => TerminationReason::Ended,
        }
    }

    /// Create the user record on first sight; later starts leave the
    /// stored profile alone
    pub(crate) async fn ensure_profile(&self) -> ClientResult<()> {
        let path = paths::user(&self.config.user_id);
        let existing: Option<UserRecord> = self.store.read_record(&path).await?;
        if existing.is_none() {
            let record = UserRecord::new(
                self.config.display_name.clone(),
                self.config.email.clone(),
            );
            self.store.write_record(&path, &record).await?;
            info!(user_id = %self.config.user_id, "user profile created");
        }
        Ok(())
    }

    pub(crate) async fn set_presence(&self, status: PresenceStatus) -> ClientResult<()> {
        let status_value = serde_json::to_value(status).map_err(StoreError::from)?;
        self.store
            .update_fields(
                &paths::user(&self.config.user_id),
                vec![
                    ("status", status_value),
                    ("lastSeen", Value::from(now_millis())),
                ],
            )
            .await?;
        Ok(())
    }

    /// Subscribe to the stream of [`ClientEvent`]s
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Install the callback-style event handler
    pub async fn set_event_handler(&self, handler: Arc<dyn ClientEventHandler>) {
        *self.handler.write().await = Some(handler);
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // Send fails only when nobody subscribed, which is fine.
        let _ = self.event_tx.send(event);
    }

    pub(crate) async fn notify_state(
        &self,
        call_id: &CallId,
        new_state: CallState,
        previous_state: Option<CallState>,
        reason: Option<&str>,
    ) {
        let handler = self.handler.read().await.clone();
        if let Some(handler) = handler {
            handler
                .on_call_state_changed(CallStateInfo {
                    call_id: call_id.clone(),
                    new_state,
                    previous_state,
                    reason: reason.map(str::to_string),
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }
    }

    /// Broadcast a non-fatal error and inform the handler
    pub(crate) async fn report_error(&self, error: &ClientError) {
        warn!(kind = error.kind(), error = %error, "client error");
        self.emit(ClientEvent::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        let handler = self.handler.read().await.clone();
        if let Some(handler) = handler {
            handler.on_client_error(error).await;
        }
    }

    /// Forward contact snapshots from the broadcast channel to the
    /// callback handler
    fn spawn_handler_bridge(self: &Arc<Self>) {
        let mut rx = self.event_tx.subscribe();
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ClientEvent::ContactListChanged { contacts }) => {
                        let handler = manager.handler.read().await.clone();
                        if let Some(handler) = handler {
                            handler.on_contact_list_changed(&contacts).await;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "handler bridge lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().push(task);
    }

    /// Snapshot of the live call, if any
    pub fn current_call(&self) -> Option<CallInfo> {
        self.sessions.current().map(|s| s.info())
    }

    /// Local call state; `Idle` when no session is live
    pub fn call_state(&self) -> CallState {
        self.sessions
            .current()
            .map(|s| s.state())
            .unwrap_or(CallState::Idle)
    }

    /// Current contact list, sorted by display name
    pub fn contacts(&self) -> Vec<ContactEntry> {
        self.directory.snapshot()
    }

    /// Look up a user by handle and add the mutual contact
    pub async fn add_contact(&self, handle: &str) -> ClientResult<UserId> {
        self.directory.add_by_handle(handle).await
    }

    /// Add a mutual contact by identity, the share-link flow
    pub async fn add_contact_by_id(&self, other: &UserId) -> ClientResult<()> {
        self.directory.add_by_id(other).await
    }

    pub fn directory(&self) -> &Arc<ContactDirectory> {
        &self.directory
    }

    pub(crate) async fn ensure_running(&self) -> ClientResult<()> {
        if *self.is_running.read().await {
            Ok(())
        } else {
            Err(ClientError::internal("client not started"))
        }
    }
}
