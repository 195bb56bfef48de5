//! Incoming-call detection
//!
//! Two feeds, one intake. The push watcher subscribes to call records
//! addressed to this user; the poll fallback re-reads the same query on
//! an interval for platforms whose push delivery cannot be trusted.
//! Both hand every record to `intake_call_record`, and the session
//! manager's claim gate guarantees one record becomes at most one
//! ringing session no matter how many times, or through which feed, it
//! arrives.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::manager::ClientManager;
use crate::call::{CallId, CallRole, CallState, CallStatus};
use crate::events::{CallAction, ClientEvent, IncomingCallInfo};
use crate::session::Session;
use zvonok_store_core::{
    paths, records::now_millis, CallRecord, ChildFilter, SharedStore, SharedStoreExt, UserRecord,
};

impl ClientManager {
    /// Subscribe to call records addressed to this user
    pub(crate) async fn spawn_incoming_watcher(self: &Arc<Self>) -> crate::error::ClientResult<()> {
        let filter = ChildFilter::equals("callee", self.config.user_id.as_str());
        let (handle, mut rx) = self
            .store
            .subscribe_child_added(paths::CALLS, Some(filter))
            .await?;
        self.client_subs.lock().push(handle);

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some((key, value)) = rx.recv().await {
                manager.intake_call_record(CallId::new(key), value).await;
            }
            debug!("incoming call watch channel closed");
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Periodically re-read records addressed to this user and feed
    /// fresh ones through the same intake as the push watcher
    pub(crate) fn spawn_poll_fallback(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_checked = now_millis();
            loop {
                interval.tick().await;
                let filter = ChildFilter::equals("callee", manager.config.user_id.as_str());
                let rows = match manager
                    .store
                    .query_children(paths::CALLS, Some(&filter))
                    .await
                {
                    Ok(rows) => rows,
                    Err(e) => {
                        debug!(error = %e, "poll query failed, will retry next tick");
                        continue;
                    }
                };
                let cutoff = last_checked;
                last_checked = now_millis();
                for (key, value) in rows {
                    let created = value.get("createdAt").and_then(Value::as_i64).unwrap_or(0);
                    if created <= cutoff {
                        continue;
                    }
                    manager.intake_call_record(CallId::new(key), value).await;
                }
            }
        });
        self.tasks.lock().push(task);
    }

    /// The single intake for call records from any feed.
    ///
    /// Idempotent: the claim gate returns `true` once per record id, so
    /// a record seen by push and poll produces one session. Records not
    /// ringing, not addressed here, or arriving mid-call are dropped.
    pub(crate) async fn intake_call_record(self: &Arc<Self>, call_id: CallId, value: Value) {
        let record: CallRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                debug!(%call_id, error = %e, "skipping malformed call record");
                return;
            }
        };
        if record.callee != self.config.user_id {
            return;
        }
        if record.status != CallStatus::Ringing {
            debug!(%call_id, status = %record.status, "skipping late notification for a settled call");
            return;
        }
        if !self.sessions.try_claim(&call_id) {
            return;
        }

        let caller_name = self.resolve_caller_name(&record).await;
        let session = Session::new(
            call_id.clone(),
            CallRole::Callee,
            record.caller.clone(),
            caller_name.clone(),
        );
        if let Err(e) = self.sessions.install(session.clone()) {
            warn!(%call_id, error = %e, "session slot taken between claim and install");
            return;
        }
        if let Err(e) = self.watch_status(&session).await {
            self.sessions.clear(&call_id);
            self.report_error(&e).await;
            return;
        }

        info!(%call_id, caller = %record.caller, "incoming call");
        self.emit(ClientEvent::IncomingCall {
            call_id: call_id.clone(),
            caller: record.caller.clone(),
            caller_name: caller_name.clone(),
        });
        self.notify_state(
            &call_id,
            CallState::Ringing(CallRole::Callee),
            Some(CallState::Idle),
            Some("incoming call"),
        )
        .await;

        let handler = self.handler.read().await.clone();
        if let Some(handler) = handler {
            let created_at = Utc
                .timestamp_millis_opt(record.created_at)
                .single()
                .unwrap_or_else(Utc::now);
            let action = handler
                .on_incoming_call(IncomingCallInfo {
                    call_id: call_id.clone(),
                    caller: record.caller.clone(),
                    caller_name,
                    created_at,
                })
                .await;
            match action {
                CallAction::Accept => {
                    if let Err(e) = self.answer_call(&call_id).await {
                        self.report_error(&e).await;
                    }
                }
                CallAction::Decline => {
                    if let Err(e) = self.decline_call(&call_id).await {
                        self.report_error(&e).await;
                    }
                }
                CallAction::Ignore => {}
            }
        }
    }

    /// Best display name for the caller: the contact-edge override,
    /// then the caller's published profile, then the raw id
    async fn resolve_caller_name(&self, record: &CallRecord) -> String {
        if let Some(entry) = self.directory.get(&record.caller) {
            return entry.display_name;
        }
        let profile: Option<UserRecord> = self
            .store
            .read_record(&paths::user(&record.caller))
            .await
            .ok()
            .flatten();
        match profile {
            Some(user) => user.name,
            None => record.caller.to_string(),
        }
    }
}
