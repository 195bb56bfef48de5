//! Call session and the single-session manager
//!
//! A [`Session`] is the client-local, ephemeral binding of one call
//! record to the local media link and the far party. It owns the
//! record-scoped subscriptions and the pending-candidate queue, and its
//! state moves only through [`Session::apply_status`] /
//! [`Session::terminate`] - both funnel through the monotonic status
//! reducer, which is what makes concurrent, duplicated and reordered
//! event delivery safe without locks around the protocol.
//!
//! [`SessionManager`] enforces the process-wide invariant of at most
//! one live session, and is the idempotent intake gate that the push
//! watcher, the poll fallback, and local call initiation all pass
//! through: whoever claims a record id first wins, later claims of the
//! same id are no-ops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::call::{CallId, CallInfo, CallRole, CallState, CallStatus, TerminationReason, UserId};
use crate::peer_link::PeerLink;
use zvonok_store_core::{IceCandidate, SubscriptionHandle};

/// Client-local view of one call attempt
pub struct Session {
    pub call_id: CallId,
    pub role: CallRole,
    /// The other party
    pub peer: UserId,
    pub peer_name: String,
    state: Mutex<CallState>,
    link: Mutex<Option<Arc<dyn PeerLink>>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    /// `Some(queue)` until the remote description is applied, `None`
    /// after; candidates arriving early wait here
    pending_remote: Mutex<Option<Vec<IceCandidate>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    created_at: DateTime<Utc>,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
}

impl Session {
    pub fn new(call_id: CallId, role: CallRole, peer: UserId, peer_name: String) -> Arc<Self> {
        Arc::new(Self {
            call_id,
            role,
            peer,
            peer_name,
            state: Mutex::new(CallState::Ringing(role)),
            link: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            pending_remote: Mutex::new(Some(Vec::new())),
            tasks: Mutex::new(Vec::new()),
            created_at: Utc::now(),
            connected_at: Mutex::new(None),
            ended_at: Mutex::new(None),
        })
    }

    pub fn state(&self) -> CallState {
        *self.state.lock()
    }

    /// Fold an observed record status into the local state.
    ///
    /// Returns the new state when the observation advanced the
    /// lifecycle, `None` when it was a duplicate, behind the current
    /// state, or arrived after termination. This is the sole arbiter of
    /// which status observations are acted on.
    pub fn apply_status(&self, observed: CallStatus) -> Option<CallState> {
        let mut state = self.state.lock();
        let current = state.effective_status()?;
        let next = CallStatus::advance(current, observed)?;

        let new_state = match next {
            CallStatus::Active => CallState::Active,
            terminal => CallState::Terminated(TerminationReason::from_status(terminal)?),
        };
        *state = new_state;
        drop(state);

        match new_state {
            CallState::Active => *self.connected_at.lock() = Some(Utc::now()),
            CallState::Terminated(_) => *self.ended_at.lock() = Some(Utc::now()),
            _ => {}
        }
        debug!(call_id = %self.call_id, status = %observed, state = %new_state, "session state advanced");
        Some(new_state)
    }

    /// Terminate for a local reason (hangup, decline, cancel, transport
    /// failure). Returns `false` if the session was already terminated,
    /// which is the guard against double teardown.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        let mut state = self.state.lock();
        if state.is_terminated() {
            return false;
        }
        *state = CallState::Terminated(reason);
        drop(state);
        *self.ended_at.lock() = Some(Utc::now());
        debug!(call_id = %self.call_id, %reason, "session terminated locally");
        true
    }

    pub fn attach_link(&self, link: Arc<dyn PeerLink>) {
        *self.link.lock() = Some(link);
    }

    pub fn link(&self) -> Option<Arc<dyn PeerLink>> {
        self.link.lock().clone()
    }

    pub fn take_link(&self) -> Option<Arc<dyn PeerLink>> {
        self.link.lock().take()
    }

    /// Track a record-scoped subscription for teardown
    pub fn register_subscription(&self, handle: SubscriptionHandle) {
        self.subscriptions.lock().push(handle);
    }

    pub fn take_subscriptions(&self) -> Vec<SubscriptionHandle> {
        std::mem::take(&mut *self.subscriptions.lock())
    }

    /// Queue a remote candidate if the remote description is not yet
    /// applied. Returns `true` when queued, `false` when the caller
    /// should apply it directly. The queue and the
    /// description-applied flag share one lock, so a candidate is
    /// either queued or applied - never lost between the two.
    pub fn enqueue_remote_candidate(&self, candidate: IceCandidate) -> bool {
        let mut pending = self.pending_remote.lock();
        match pending.as_mut() {
            Some(queue) => {
                queue.push(candidate);
                true
            }
            None => false,
        }
    }

    /// Mark the remote description applied and drain whatever queued up
    /// before it. Each queued candidate comes back exactly once.
    pub fn remote_description_ready(&self) -> Vec<IceCandidate> {
        self.pending_remote.lock().take().unwrap_or_default()
    }

    /// Track a background task for teardown
    pub fn add_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    pub fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub fn info(&self) -> CallInfo {
        CallInfo {
            call_id: self.call_id.clone(),
            role: self.role,
            peer: self.peer.clone(),
            peer_name: self.peer_name.clone(),
            state: self.state(),
            created_at: self.created_at,
            connected_at: *self.connected_at.lock(),
            ended_at: *self.ended_at.lock(),
        }
    }
}

/// Owner of the at-most-one live session per client process
pub struct SessionManager {
    live: RwLock<Option<Arc<Session>>>,
    /// Record ids that already produced (or are producing) a session;
    /// the dedup set behind push/poll idempotency
    handled: DashMap<CallId, ()>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            live: RwLock::new(None),
            handled: DashMap::new(),
        }
    }

    /// Idempotent intake gate. Returns `true` exactly once per record
    /// id, and never while another session is live. Push and poll both
    /// call this; whichever fires first wins.
    pub fn try_claim(&self, call_id: &CallId) -> bool {
        if self.live.read().is_some() {
            debug!(%call_id, "ignoring call record, a session is already live");
            return false;
        }
        if self.handled.insert(call_id.clone(), ()).is_some() {
            debug!(%call_id, "ignoring call record, already handled");
            return false;
        }
        true
    }

    /// Install the live session; fails if one is already installed
    pub fn install(&self, session: Arc<Session>) -> Result<(), crate::error::ClientError> {
        let mut live = self.live.write();
        if live.is_some() {
            return Err(crate::error::ClientError::AlreadyInCall);
        }
        *live = Some(session);
        Ok(())
    }

    /// Drop the live session if it is the given call
    pub fn clear(&self, call_id: &CallId) {
        let mut live = self.live.write();
        if live.as_ref().map(|s| &s.call_id) == Some(call_id) {
            *live = None;
        }
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.live.read().clone()
    }

    /// The live session, if it matches the given call id
    pub fn current_matching(&self, call_id: &CallId) -> Option<Arc<Session>> {
        self.live
            .read()
            .clone()
            .filter(|s| &s.call_id == call_id)
    }

    pub fn is_idle(&self) -> bool {
        self.live.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ringing_session(role: CallRole) -> Arc<Session> {
        Session::new(
            CallId::new("c1"),
            role,
            UserId::new("peer"),
            "Peer".to_string(),
        )
    }

    #[test]
    fn callee_accept_path_advances_through_active_to_ended() {
        let session = ringing_session(CallRole::Callee);
        assert_eq!(session.state(), CallState::Ringing(CallRole::Callee));

        assert_eq!(session.apply_status(CallStatus::Active), Some(CallState::Active));
        assert_eq!(
            session.apply_status(CallStatus::Ended),
            Some(CallState::Terminated(TerminationReason::Ended))
        );
    }

    #[test]
    fn duplicate_and_backward_observations_are_no_ops() {
        let session = ringing_session(CallRole::Caller);
        assert_eq!(session.apply_status(CallStatus::Ringing), None);

        session.apply_status(CallStatus::Active).unwrap();
        assert_eq!(session.apply_status(CallStatus::Active), None);
        assert_eq!(session.apply_status(CallStatus::Ringing), None);
    }

    #[test]
    fn terminated_is_absorbing() {
        let session = ringing_session(CallRole::Callee);
        session.apply_status(CallStatus::Declined).unwrap();

        assert_eq!(session.apply_status(CallStatus::Active), None);
        assert_eq!(session.apply_status(CallStatus::Ended), None);
        assert!(!session.terminate(TerminationReason::Ended));
        assert_eq!(
            session.state(),
            CallState::Terminated(TerminationReason::Declined)
        );
    }

    #[test]
    fn local_terminate_wins_only_once() {
        let session = ringing_session(CallRole::Caller);
        assert!(session.terminate(TerminationReason::Cancelled));
        assert!(!session.terminate(TerminationReason::Ended));
    }

    #[test]
    fn candidates_queue_until_remote_description_then_apply_directly() {
        let session = ringing_session(CallRole::Caller);
        let candidate = IceCandidate {
            candidate: "candidate:0".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };

        assert!(session.enqueue_remote_candidate(candidate.clone()));
        assert!(session.enqueue_remote_candidate(candidate.clone()));

        let queued = session.remote_description_ready();
        assert_eq!(queued.len(), 2);

        // After the description is in, nothing queues any more.
        assert!(!session.enqueue_remote_candidate(candidate));
        assert!(session.remote_description_ready().is_empty());
    }

    #[test]
    fn manager_claims_each_record_exactly_once() {
        let manager = SessionManager::new();
        let id = CallId::new("c1");

        assert!(manager.try_claim(&id));
        assert!(!manager.try_claim(&id));
    }

    #[test]
    fn manager_rejects_claims_while_a_session_is_live() {
        let manager = SessionManager::new();
        let session = ringing_session(CallRole::Callee);
        manager.install(session).unwrap();

        assert!(!manager.try_claim(&CallId::new("c2")));

        manager.clear(&CallId::new("c1"));
        assert!(manager.try_claim(&CallId::new("c2")));
    }

    #[test]
    fn manager_holds_at_most_one_session() {
        let manager = SessionManager::new();
        manager.install(ringing_session(CallRole::Caller)).unwrap();
        assert!(manager.install(ringing_session(CallRole::Callee)).is_err());
    }
}
