//! Offer/answer/candidate exchange
//!
//! Drives a [`PeerLink`](crate::peer_link::PeerLink) against the shared
//! call record. Candidates flow both ways while negotiation runs: local
//! ones are appended under this side's candidate collection, remote
//! ones are applied to the link - or queued on the session until the
//! remote description lands, then flushed exactly once.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::manager::ClientManager;
use crate::call::{CallStatus, TerminationReason};
use crate::error::{ClientError, ClientResult};
use crate::peer_link::{resolve_ice_endpoints, LinkConnectionState, PeerLink, PeerLinkEvent};
use crate::session::Session;
use zvonok_store_core::{
    paths, IceCandidate, SessionDescription, SharedStore, SharedStoreExt, StoreError,
};

impl ClientManager {
    /// Bring up a media link for one call attempt: resolve traversal
    /// endpoints (degrading, never failing), create the link, acquire
    /// the microphone. A refused microphone closes the link and
    /// propagates `PermissionDenied`.
    pub(crate) async fn prepare_link(&self) -> ClientResult<Arc<dyn PeerLink>> {
        let endpoints = resolve_ice_endpoints(self.ice_provider.as_ref()).await;
        let link = self.link_factory.create(&endpoints).await?;
        if let Err(e) = link.acquire_local_audio().await {
            link.close().await;
            return Err(e);
        }
        Ok(link)
    }

    /// Caller side: publish the offer, then watch for the answer and
    /// the callee's candidates while pumping link events
    pub(crate) async fn start_caller_signaling(
        self: &Arc<Self>,
        session: &Arc<Session>,
        offer: SessionDescription,
    ) -> ClientResult<()> {
        let offer_value = serde_json::to_value(&offer).map_err(StoreError::from)?;
        self.store
            .update_fields(&paths::call(&session.call_id), vec![("offer", offer_value)])
            .await?;

        self.spawn_answer_watch(session).await?;
        self.spawn_remote_candidate_watch(session).await?;
        self.spawn_link_event_pump(session);
        Ok(())
    }

    /// Callee side: apply the offer, publish the answer together with
    /// the `active` status, and flush candidates queued while the offer
    /// was in flight
    pub(crate) async fn start_callee_signaling(
        self: &Arc<Self>,
        session: &Arc<Session>,
        offer: SessionDescription,
    ) -> ClientResult<()> {
        let link = session
            .link()
            .ok_or_else(|| ClientError::internal("no media link attached to session"))?;

        // Subscribing first replays candidates the caller already
        // published; they land in the session queue.
        self.spawn_remote_candidate_watch(session).await?;

        link.set_remote_description(offer).await?;
        let answer = link.create_local_answer().await?;

        if session.state().is_terminated() {
            // The caller withdrew while we negotiated; leave the record
            // at its terminal status.
            return Err(ClientError::stale_call(&session.call_id));
        }

        let answer_value = serde_json::to_value(&answer).map_err(StoreError::from)?;
        self.store
            .update_fields(
                &paths::call(&session.call_id),
                vec![
                    ("answer", answer_value),
                    ("status", Value::String(CallStatus::Active.to_string())),
                ],
            )
            .await?;

        for candidate in session.remote_description_ready() {
            if let Err(e) = link.add_remote_candidate(candidate).await {
                warn!(call_id = %session.call_id, error = %e, "queued candidate rejected by transport");
            }
        }

        self.spawn_link_event_pump(session);
        Ok(())
    }

    /// Watch the record's answer leaf (caller side). The first parsed
    /// answer is applied; anything after is ignored.
    async fn spawn_answer_watch(self: &Arc<Self>, session: &Arc<Session>) -> ClientResult<()> {
        let (handle, mut rx) = self
            .store
            .subscribe_value(&paths::call_answer(&session.call_id))
            .await?;
        session.register_subscription(handle);

        let manager = Arc::clone(self);
        let session = Arc::clone(session);
        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
            let mut applied = false;
            while let Some(value) = rx.recv().await {
                if applied || value.is_null() {
                    continue;
                }
                let answer: SessionDescription = match serde_json::from_value(value) {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!(call_id = %session.call_id, error = %e, "malformed answer on record");
                        continue;
                    }
                };
                let Some(link) = session.link() else { break };
                match link.set_remote_description(answer).await {
                    Ok(()) => {
                        applied = true;
                        for candidate in session.remote_description_ready() {
                            if let Err(e) = link.add_remote_candidate(candidate).await {
                                warn!(call_id = %session.call_id, error = %e, "queued candidate rejected by transport");
                            }
                        }
                        // The caller confirms activation on the record
                        // once the answer applied cleanly. Usually a
                        // repeat of the callee's write, but a peer that
                        // publishes only the answer leaf still gets the
                        // call connected. Local state advances through
                        // the status watcher either way.
                        let status = Value::String(CallStatus::Active.to_string());
                        if let Err(e) = manager
                            .store
                            .update_fields(
                                &paths::call(&session.call_id),
                                vec![("status", status)],
                            )
                            .await
                        {
                            warn!(call_id = %session.call_id, error = %e, "activation status write failed");
                        }
                        debug!(call_id = %session.call_id, "remote answer applied");
                    }
                    Err(e) => {
                        warn!(call_id = %session.call_id, error = %e, "failed to apply remote answer");
                    }
                }
            }
            }
        });
        session.add_task(task);
        Ok(())
    }

    /// Watch the far role's candidate collection. Existing children are
    /// replayed on subscribe, so candidates published before this side
    /// joined are not lost.
    async fn spawn_remote_candidate_watch(
        self: &Arc<Self>,
        session: &Arc<Session>,
    ) -> ClientResult<()> {
        let path = paths::call_candidates(&session.call_id, session.role.remote());
        let (handle, mut rx) = self.store.subscribe_child_added(&path, None).await?;
        session.register_subscription(handle);

        let session = Arc::clone(session);
        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
            while let Some((_key, value)) = rx.recv().await {
                let candidate: IceCandidate = match serde_json::from_value(value) {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        warn!(call_id = %session.call_id, error = %e, "malformed candidate on record");
                        continue;
                    }
                };
                if session.enqueue_remote_candidate(candidate.clone()) {
                    debug!(call_id = %session.call_id, "candidate queued ahead of remote description");
                    continue;
                }
                let Some(link) = session.link() else { break };
                // A transport that dislikes one candidate can still
                // connect through another; log and move on.
                if let Err(e) = link.add_remote_candidate(candidate).await {
                    warn!(call_id = %session.call_id, error = %e, "candidate rejected by transport");
                }
            }
            }
        });
        session.add_task(task);
        Ok(())
    }

    /// Pump events out of the link: publish local candidates, watch the
    /// transport state. A failed or disconnected transport folds into
    /// the normal teardown path.
    pub(crate) fn spawn_link_event_pump(self: &Arc<Self>, session: &Arc<Session>) {
        let Some(link) = session.link() else { return };
        let Some(mut events) = link.take_events() else {
            debug!(call_id = %session.call_id, "link events already taken");
            return;
        };

        let manager = Arc::clone(self);
        let session = Arc::clone(session);
        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerLinkEvent::LocalCandidate(candidate) => {
                        manager.publish_local_candidate(&session, candidate).await;
                    }
                    PeerLinkEvent::ConnectionState(state) => match state {
                        LinkConnectionState::Connected => match link.selected_route() {
                            Some(route) => {
                                info!(call_id = %session.call_id, ?route, "media path established");
                            }
                            None => {
                                debug!(call_id = %session.call_id, "media path established, route unclassified");
                            }
                        },
                        LinkConnectionState::Failed | LinkConnectionState::Disconnected => {
                            warn!(call_id = %session.call_id, ?state, "media transport lost");
                            manager
                                .end_session(&session, TerminationReason::TransportFailure, true)
                                .await;
                            break;
                        }
                        LinkConnectionState::Closed => break,
                        LinkConnectionState::New | LinkConnectionState::Connecting => {}
                    },
                }
            }
            }
        });
        session.add_task(task);
    }

    /// Append one locally discovered candidate under this side's
    /// collection on the record
    async fn publish_local_candidate(&self, session: &Session, candidate: IceCandidate) {
        let base = paths::call_candidates(&session.call_id, session.role);
        let key = self.store.new_id(&base);
        let path = format!("{}/{}", base, key);
        let value = match serde_json::to_value(&candidate) {
            Ok(value) => value,
            Err(e) => {
                warn!(call_id = %session.call_id, error = %e, "candidate failed to serialize");
                return;
            }
        };
        if let Err(e) = self.store.write(&path, value).await {
            warn!(call_id = %session.call_id, error = %e, "candidate publish failed");
        }
    }
}
