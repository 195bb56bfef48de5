//! End-to-end call lifecycle over the in-memory store: two real
//! clients, scripted media links, every status transition observed
//! through the public event surface.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use zvonok_client_core::{
    CallState, ClientError, ClientEvent, RouteKind, TerminationReason, UserId,
};
use zvonok_store_core::{CallStatus, MemoryStore, SessionDescription, SharedStore, SharedStoreExt};

#[tokio::test]
async fn full_call_answer_talk_hangup() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut bob) = connected_pair(&store).await;
    let bob_id = UserId::new("u-bob");

    let call_id = alice.manager.make_call(&bob_id).await.unwrap();
    assert!(alice.manager.call_state().is_ringing());

    let incoming = expect_event(&mut bob.events, "incoming call at bob", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;
    let ClientEvent::IncomingCall {
        call_id: ringing_id,
        caller,
        caller_name,
    } = incoming
    else {
        unreachable!()
    };
    assert_eq!(ringing_id, call_id);
    assert_eq!(caller, UserId::new("u-alice"));
    assert_eq!(caller_name, "Alice");

    bob.manager.answer_call(&call_id).await.unwrap();

    expect_event(&mut alice.events, "call active at alice", |e| {
        matches!(e, ClientEvent::CallActive { .. })
    })
    .await;
    expect_event(&mut bob.events, "call active at bob", |e| {
        matches!(e, ClientEvent::CallActive { .. })
    })
    .await;
    assert_eq!(alice.manager.call_state(), CallState::Active);
    assert_eq!(bob.manager.call_state(), CallState::Active);

    // The answer reaches alice's media link (its watcher runs apart
    // from the status watcher, so give it a moment).
    let alice_link = alice.factory.last_link();
    tokio::time::timeout(Duration::from_secs(5), async {
        while alice_link.remote_descriptions.lock().len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("answer never applied");

    alice.manager.hangup_call(&call_id).await.unwrap();

    let ended = expect_event(&mut bob.events, "call ended at bob", |e| {
        matches!(e, ClientEvent::CallEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        ClientEvent::CallEnded {
            reason: TerminationReason::Ended,
            ..
        }
    ));

    assert_eq!(alice.manager.call_state(), CallState::Idle);
    assert_eq!(bob.manager.call_state(), CallState::Idle);
    assert!(alice.factory.last_link().is_closed());
    assert!(bob.factory.last_link().is_closed());

    let status: Option<CallStatus> = store
        .read_record(&format!("calls/{}/status", call_id))
        .await
        .unwrap();
    assert_eq!(status, Some(CallStatus::Ended));
}

#[tokio::test]
async fn candidates_flow_both_ways_while_active() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut bob) = connected_pair(&store).await;

    let call_id = alice.manager.make_call(&UserId::new("u-bob")).await.unwrap();
    expect_event(&mut bob.events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;

    // Caller candidates published before the callee even answers.
    let alice_link = alice.factory.last_link();
    alice_link.emit_local_candidate("candidate:1 early");
    alice_link.emit_local_candidate("candidate:2 early");

    bob.manager.answer_call(&call_id).await.unwrap();
    expect_event(&mut alice.events, "active", |e| {
        matches!(e, ClientEvent::CallActive { .. })
    })
    .await;

    let bob_link = bob.factory.last_link();
    bob_link.emit_local_candidate("candidate:3 reply");
    alice_link.emit_connected(RouteKind::AssistedDirect);
    bob_link.emit_connected(RouteKind::AssistedDirect);

    // Replayed caller candidates land on bob exactly once each, and
    // bob's reply candidate reaches alice.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if bob_link.remote_candidate_count() == 2 && alice_link.remote_candidate_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("candidates did not converge");

    let seen: Vec<String> = bob_link
        .remote_candidates
        .lock()
        .iter()
        .map(|c| c.candidate.clone())
        .collect();
    assert_eq!(seen, vec!["candidate:1 early", "candidate:2 early"]);

    alice.manager.hangup_call(&call_id).await.unwrap();
}

#[tokio::test]
async fn caller_activates_on_a_bare_answer_write() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut bob) = connected_pair(&store).await;

    let call_id = alice.manager.make_call(&UserId::new("u-bob")).await.unwrap();
    expect_event(&mut bob.events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;

    // A peer implementation that publishes only the answer leaf and
    // never touches the status field: the caller must still confirm
    // activation on the record itself.
    store
        .write(
            &format!("calls/{}/answer", call_id),
            serde_json::to_value(SessionDescription::answer("v=0 remote-answer")).unwrap(),
        )
        .await
        .unwrap();

    expect_event(&mut alice.events, "active from bare answer", |e| {
        matches!(e, ClientEvent::CallActive { .. })
    })
    .await;
    assert_eq!(alice.manager.call_state(), CallState::Active);

    let status: Option<CallStatus> = store
        .read_record(&format!("calls/{}/status", call_id))
        .await
        .unwrap();
    assert_eq!(status, Some(CallStatus::Active));

    alice.manager.hangup_call(&call_id).await.unwrap();
}

#[tokio::test]
async fn callee_decline_reaches_the_caller() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut bob) = connected_pair(&store).await;

    let call_id = alice.manager.make_call(&UserId::new("u-bob")).await.unwrap();
    expect_event(&mut bob.events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;

    bob.manager.decline_call(&call_id).await.unwrap();

    let ended = expect_event(&mut alice.events, "decline at alice", |e| {
        matches!(e, ClientEvent::CallEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        ClientEvent::CallEnded {
            reason: TerminationReason::Declined,
            ..
        }
    ));
    assert_eq!(alice.manager.call_state(), CallState::Idle);
    assert_eq!(bob.manager.call_state(), CallState::Idle);

    let status: Option<CallStatus> = store
        .read_record(&format!("calls/{}/status", call_id))
        .await
        .unwrap();
    assert_eq!(status, Some(CallStatus::Declined));
}

#[tokio::test]
async fn caller_cancel_reaches_the_callee() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut bob) = connected_pair(&store).await;

    let call_id = alice.manager.make_call(&UserId::new("u-bob")).await.unwrap();
    expect_event(&mut bob.events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;

    alice.manager.cancel_call(&call_id).await.unwrap();

    let ended = expect_event(&mut bob.events, "cancel at bob", |e| {
        matches!(e, ClientEvent::CallEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        ClientEvent::CallEnded {
            reason: TerminationReason::Cancelled,
            ..
        }
    ));
    assert_eq!(bob.manager.call_state(), CallState::Idle);
}

#[tokio::test]
async fn refused_microphone_creates_no_record() {
    let store = Arc::new(MemoryStore::new());
    let (alice, _bob) = connected_pair(&store).await;

    alice.factory.set_deny_audio(true);
    let result = alice.manager.make_call(&UserId::new("u-bob")).await;
    assert!(matches!(result, Err(ClientError::PermissionDenied)));
    assert_eq!(alice.manager.call_state(), CallState::Idle);

    // Nothing was written under calls/.
    let calls = store.query_children("calls", None).await.unwrap();
    assert!(calls.is_empty());
    assert!(alice.factory.last_link().is_closed());
}

#[tokio::test]
async fn refused_microphone_on_answer_leaves_the_call_ringing() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut bob) = connected_pair(&store).await;

    let call_id = alice.manager.make_call(&UserId::new("u-bob")).await.unwrap();
    expect_event(&mut bob.events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;

    bob.factory.set_deny_audio(true);
    let result = bob.manager.answer_call(&call_id).await;
    assert!(matches!(result, Err(ClientError::PermissionDenied)));
    assert!(bob.manager.call_state().is_ringing());

    // The user relents; the same call can still be answered.
    bob.factory.set_deny_audio(false);
    bob.manager.answer_call(&call_id).await.unwrap();
    expect_event(&mut alice.events, "active after retry", |e| {
        matches!(e, ClientEvent::CallActive { .. })
    })
    .await;
}

#[tokio::test]
async fn ring_timeout_cancels_an_unanswered_call() {
    let store = Arc::new(MemoryStore::new());
    let mut alice = start_client_with_config(
        &store,
        zvonok_client_core::ClientConfig::new("u-alice", "Alice", "alice@example.com")
            .with_ring_timeout(Duration::from_millis(100)),
    )
    .await;
    let mut bob = start_client(&store, "u-bob", "Bob", "bob@example.com").await;

    alice.manager.add_contact("bob@example.com").await.unwrap();
    expect_event(&mut alice.events, "contacts", |e| {
        matches!(e, ClientEvent::ContactListChanged { contacts } if !contacts.is_empty())
    })
    .await;

    let call_id = alice.manager.make_call(&UserId::new("u-bob")).await.unwrap();
    expect_event(&mut bob.events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;

    // Bob never reacts; the timer withdraws the call.
    let ended = expect_event(&mut alice.events, "timeout cancel", |e| {
        matches!(e, ClientEvent::CallEnded { .. })
    })
    .await;
    assert!(matches!(
        ended,
        ClientEvent::CallEnded {
            reason: TerminationReason::Cancelled,
            ..
        }
    ));

    let status: Option<CallStatus> = store
        .read_record(&format!("calls/{}/status", call_id))
        .await
        .unwrap();
    assert_eq!(status, Some(CallStatus::Cancelled));
}

#[tokio::test]
async fn transport_failure_tears_down_and_reads_as_ended_remotely() {
    let store = Arc::new(MemoryStore::new());
    let (mut alice, mut bob) = connected_pair(&store).await;

    let call_id = alice.manager.make_call(&UserId::new("u-bob")).await.unwrap();
    expect_event(&mut bob.events, "incoming call", |e| {
        matches!(e, ClientEvent::IncomingCall { .. })
    })
    .await;
    bob.manager.answer_call(&call_id).await.unwrap();
    expect_event(&mut alice.events, "active", |e| {
        matches!(e, ClientEvent::CallActive { .. })
    })
    .await;

    alice.factory.last_link().emit_failed();

    let local = expect_event(&mut alice.events, "transport failure locally", |e| {
        matches!(e, ClientEvent::CallEnded { .. })
    })
    .await;
    assert!(matches!(
        local,
        ClientEvent::CallEnded {
            reason: TerminationReason::TransportFailure,
            ..
        }
    ));

    // The far side sees a plain hangup.
    let remote = expect_event(&mut bob.events, "hangup at bob", |e| {
        matches!(e, ClientEvent::CallEnded { .. })
    })
    .await;
    assert!(matches!(
        remote,
        ClientEvent::CallEnded {
            reason: TerminationReason::Ended,
            ..
        }
    ));
    let status: Option<CallStatus> = store
        .read_record(&format!("calls/{}/status", call_id))
        .await
        .unwrap();
    assert_eq!(status, Some(CallStatus::Ended));
}
