//! Call operations and teardown
//!
//! Every path out of a call funnels through [`ClientManager::end_session`]
//! or, for remotely observed terminals, `finish_remote_terminated`; both
//! share one teardown routine so the ordering (unsubscribe before the
//! terminal write, resource release before the event) holds everywhere.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::manager::ClientManager;
use crate::call::{CallId, CallRole, CallState, CallStatus, TerminationReason, UserId};
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::recovery::{retry_with_backoff, RetryConfig};
use crate::session::Session;
use zvonok_store_core::{paths, CallRecord, PresenceStatus, SharedStore, SharedStoreExt};

impl ClientManager {
    /// Place a call to a contact.
    ///
    /// Media and transport come up before anything is written, so a
    /// refused microphone aborts with no record created and nothing to
    /// clean up. Fails with `UnknownContact` for a callee not in the
    /// contact list and `AlreadyInCall` while any session is live.
    pub async fn make_call(self: &Arc<Self>, callee: &UserId) -> ClientResult<CallId> {
        self.ensure_running().await?;
        let entry = self
            .directory
            .get(callee)
            .ok_or_else(|| ClientError::UnknownContact {
                user_id: callee.to_string(),
            })?;
        if !self.sessions.is_idle() {
            return Err(ClientError::AlreadyInCall);
        }

        let link = self.prepare_link().await?;
        let offer = link.create_local_offer().await?;

        let call_id = CallId::new(self.store.new_id(paths::CALLS));
        if !self.sessions.try_claim(&call_id) {
            link.close().await;
            return Err(ClientError::AlreadyInCall);
        }

        let record = CallRecord::new(self.config.user_id.clone(), callee.clone());
        let write = retry_with_backoff("create_call_record", RetryConfig::quick(), || {
            let path = paths::call(&call_id);
            let record = record.clone();
            async move {
                self.store
                    .write_record(&path, &record)
                    .await
                    .map_err(ClientError::from)
            }
        })
        .await;
        if let Err(e) = write {
            link.close().await;
            self.sessions.clear(&call_id);
            return Err(e);
        }

        let session = Session::new(
            call_id.clone(),
            CallRole::Caller,
            callee.clone(),
            entry.display_name.clone(),
        );
        session.attach_link(link.clone());
        if let Err(e) = self.sessions.install(session.clone()) {
            link.close().await;
            return Err(e);
        }

        if let Err(e) = self.set_presence(PresenceStatus::InCall).await {
            warn!(error = %e, "presence update failed while placing a call");
        }
        if let Err(e) = self.watch_status(&session).await {
            self.end_session(&session, TerminationReason::Cancelled, true)
                .await;
            return Err(e);
        }
        if let Err(e) = self.start_caller_signaling(&session, offer).await {
            self.end_session(&session, TerminationReason::Cancelled, true)
                .await;
            return Err(e);
        }
        self.spawn_ring_timeout(&session);

        info!(%call_id, callee = %callee, "call placed");
        self.emit(ClientEvent::OutgoingRinging {
            call_id: call_id.clone(),
            callee: callee.clone(),
            callee_name: entry.display_name,
        });
        self.notify_state(
            &call_id,
            CallState::Ringing(CallRole::Caller),
            Some(CallState::Idle),
            Some("call placed"),
        )
        .await;
        Ok(call_id)
    }

    /// Answer the ringing incoming call.
    ///
    /// Re-checks the shared record first: an accept that races a cancel
    /// fails with `StaleCall` instead of connecting to a withdrawn call.
    /// A refused microphone leaves the call ringing so the user can
    /// retry or decline.
    pub async fn answer_call(self: &Arc<Self>, call_id: &CallId) -> ClientResult<()> {
        self.ensure_running().await?;
        let session = self
            .sessions
            .current_matching(call_id)
            .ok_or_else(|| ClientError::stale_call(call_id))?;
        if session.state() != CallState::Ringing(CallRole::Callee) {
            return Err(ClientError::stale_call(call_id));
        }

        let record: CallRecord = self
            .store
            .read_record(&paths::call(call_id))
            .await?
            .ok_or_else(|| ClientError::stale_call(call_id))?;
        if record.status != CallStatus::Ringing {
            debug!(%call_id, status = %record.status, "accept raced a terminal status");
            return Err(ClientError::stale_call(call_id));
        }

        // The record can land before the caller attaches the offer;
        // wait it out briefly instead of failing the accept.
        let offer = match record.offer {
            Some(offer) => offer,
            None => {
                retry_with_backoff("await_call_offer", RetryConfig::quick(), || {
                    let path = paths::call(call_id);
                    async move {
                        let record: CallRecord = self
                            .store
                            .read_record(&path)
                            .await?
                            .ok_or_else(|| ClientError::stale_call(call_id))?;
                        record.offer.ok_or_else(|| {
                            ClientError::setup("offer not yet published")
                        })
                    }
                })
                .await?
            }
        };

        let link = self.prepare_link().await?;
        session.attach_link(link);
        if let Err(e) = self.set_presence(PresenceStatus::InCall).await {
            warn!(error = %e, "presence update failed while answering");
        }
        if let Err(e) = self.start_callee_signaling(&session, offer).await {
            // Leave the call ringing for a retry or an explicit decline,
            // but release the half-built link.
            if let Some(link) = session.take_link() {
                link.close().await;
            }
            return Err(e);
        }

        if let Some(new_state) = session.apply_status(CallStatus::Active) {
            self.emit(ClientEvent::CallActive {
                call_id: call_id.clone(),
                peer_name: session.peer_name.clone(),
            });
            self.notify_state(
                call_id,
                new_state,
                Some(CallState::Ringing(CallRole::Callee)),
                Some("call answered"),
            )
            .await;
        }
        info!(%call_id, "call answered");
        Ok(())
    }

    /// Refuse the ringing incoming call
    pub async fn decline_call(self: &Arc<Self>, call_id: &CallId) -> ClientResult<()> {
        self.ensure_running().await?;
        let session = self
            .sessions
            .current_matching(call_id)
            .ok_or_else(|| ClientError::stale_call(call_id))?;
        if session.state() != CallState::Ringing(CallRole::Callee) {
            return Err(ClientError::stale_call(call_id));
        }
        self.end_session(&session, TerminationReason::Declined, true)
            .await;
        Ok(())
    }

    /// Withdraw a locally initiated call that is still ringing
    pub async fn cancel_call(self: &Arc<Self>, call_id: &CallId) -> ClientResult<()> {
        self.ensure_running().await?;
        let session = self
            .sessions
            .current_matching(call_id)
            .ok_or_else(|| ClientError::stale_call(call_id))?;
        if session.state() != CallState::Ringing(CallRole::Caller) {
            return Err(ClientError::stale_call(call_id));
        }
        self.end_session(&session, TerminationReason::Cancelled, true)
            .await;
        Ok(())
    }

    /// Hang up the active call
    pub async fn hangup_call(self: &Arc<Self>, call_id: &CallId) -> ClientResult<()> {
        self.ensure_running().await?;
        let session = self
            .sessions
            .current_matching(call_id)
            .ok_or_else(|| ClientError::stale_call(call_id))?;
        if session.state() != CallState::Active {
            return Err(ClientError::stale_call(call_id));
        }
        self.end_session(&session, TerminationReason::Ended, true)
            .await;
        Ok(())
    }

    /// Watch the record's status leaf and fold every observation into
    /// the session. Duplicates and regressions die in the reducer; a
    /// terminal observation triggers teardown without a wire write.
    pub(crate) async fn watch_status(
        self: &Arc<Self>,
        session: &Arc<Session>,
    ) -> ClientResult<()> {
        let (handle, mut rx) = self
            .store
            .subscribe_value(&paths::call_status(&session.call_id))
            .await?;
        session.register_subscription(handle);

        let manager = Arc::clone(self);
        let session = Arc::clone(session);
        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move {
            while let Some(value) = rx.recv().await {
                let status: CallStatus = match serde_json::from_value(value) {
                    Ok(status) => status,
                    Err(_) => continue,
                };
                match status {
                    CallStatus::Ringing => {}
                    CallStatus::Active => {
                        if let Some(new_state) = session.apply_status(CallStatus::Active) {
                            manager.emit(ClientEvent::CallActive {
                                call_id: session.call_id.clone(),
                                peer_name: session.peer_name.clone(),
                            });
                            manager
                                .notify_state(
                                    &session.call_id,
                                    new_state,
                                    Some(CallState::Ringing(session.role)),
                                    Some("negotiation complete"),
                                )
                                .await;
                        }
                    }
                    terminal => {
                        let Some(reason) = TerminationReason::from_status(terminal) else {
                            continue;
                        };
                        if session.apply_status(terminal).is_some() {
                            info!(call_id = %session.call_id, %reason, "call ended by the far side");
                            manager.finish_remote_terminated(&session, reason).await;
                        }
                        break;
                    }
                }
            }
            }
        });
        session.add_task(task);
        Ok(())
    }

    /// Cancel a locally placed call still ringing after the configured
    /// timeout
    pub(crate) fn spawn_ring_timeout(self: &Arc<Self>, session: &Arc<Session>) {
        let Some(timeout) = self.config.ring_timeout else {
            return;
        };
        let manager = Arc::clone(self);
        let session_for_task = Arc::clone(session);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if session_for_task.state() == CallState::Ringing(CallRole::Caller) {
                info!(call_id = %session_for_task.call_id, "ring timeout, cancelling");
                manager
                    .end_session(&session_for_task, TerminationReason::Cancelled, true)
                    .await;
            }
        });
        session.add_task(task);
    }

    /// Terminate for a local reason and tear down. No-op if the session
    /// already terminated.
    pub(crate) async fn end_session(
        self: &Arc<Self>,
        session: &Arc<Session>,
        reason: TerminationReason,
        write_wire: bool,
    ) {
        if !session.terminate(reason) {
            return;
        }
        self.teardown_resources(session, reason, write_wire).await;
    }

    /// Teardown after the reducer already absorbed a remote terminal
    /// status; never writes the wire (the far side owns that status)
    pub(crate) async fn finish_remote_terminated(
        self: &Arc<Self>,
        session: &Arc<Session>,
        reason: TerminationReason,
    ) {
        self.teardown_resources(session, reason, false).await;
    }

    /// The one teardown routine.
    ///
    /// Order matters: record-scoped subscriptions are dropped before the
    /// terminal status is written so this client never reacts to its own
    /// write, and the task abort comes last because the current task may
    /// be among the aborted.
    async fn teardown_resources(
        self: &Arc<Self>,
        session: &Arc<Session>,
        reason: TerminationReason,
        write_wire: bool,
    ) {
        for handle in session.take_subscriptions() {
            self.store.unsubscribe(handle).await;
        }

        if write_wire {
            let status = Value::String(reason.wire_status().to_string());
            if let Err(e) = self
                .store
                .update_fields(&paths::call(&session.call_id), vec![("status", status)])
                .await
            {
                warn!(call_id = %session.call_id, error = %e, "terminal status write failed");
            }
        }

        if let Some(link) = session.take_link() {
            link.close().await;
        }
        if let Err(e) = self.set_presence(PresenceStatus::Online).await {
            warn!(error = %e, "presence update failed during teardown");
        }
        self.sessions.clear(&session.call_id);

        info!(call_id = %session.call_id, %reason, "call torn down");
        self.emit(ClientEvent::CallEnded {
            call_id: session.call_id.clone(),
            reason,
        });
        self.notify_state(
            &session.call_id,
            CallState::Terminated(reason),
            None,
            Some("call ended"),
        )
        .await;

        session.abort_tasks();
    }
}
