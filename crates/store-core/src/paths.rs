//! Canonical store paths for the persisted record shapes
//!
//! Every client must address records at exactly these paths for the
//! wire contract to hold.

use crate::records::{CallId, CallRole, UserId};

/// Root of the user registry
pub const USERS: &str = "users";
/// Root of the per-owner contact edges
pub const CONTACTS: &str = "contacts";
/// Root of the call records
pub const CALLS: &str = "calls";

pub fn user(id: &UserId) -> String {
    format!("{}/{}", USERS, id)
}

pub fn contacts(owner: &UserId) -> String {
    format!("{}/{}", CONTACTS, owner)
}

pub fn contact(owner: &UserId, other: &UserId) -> String {
    format!("{}/{}/{}", CONTACTS, owner, other)
}

pub fn call(id: &CallId) -> String {
    format!("{}/{}", CALLS, id)
}

pub fn call_status(id: &CallId) -> String {
    format!("{}/{}/status", CALLS, id)
}

pub fn call_answer(id: &CallId) -> String {
    format!("{}/{}/answer", CALLS, id)
}

/// Candidate sequence published by `role` on the given call
pub fn call_candidates(id: &CallId, role: CallRole) -> String {
    format!("{}/{}/{}", CALLS, id, role.candidate_field())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_the_wire_contract() {
        let user_id = UserId::new("u1");
        let other = UserId::new("u2");
        let call_id = CallId::new("c1");

        assert_eq!(user(&user_id), "users/u1");
        assert_eq!(contact(&user_id, &other), "contacts/u1/u2");
        assert_eq!(call(&call_id), "calls/c1");
        assert_eq!(call_status(&call_id), "calls/c1/status");
        assert_eq!(call_answer(&call_id), "calls/c1/answer");
        assert_eq!(
            call_candidates(&call_id, CallRole::Caller),
            "calls/c1/iceCandidatesCaller"
        );
        assert_eq!(
            call_candidates(&call_id, CallRole::Callee),
            "calls/c1/iceCandidatesCallee"
        );
    }
}
