//! Call entity
//!
//! A call is created when the protocol layer originates or receives a
//! session-initiating signal and is driven through its states by the
//! protocol layer translating signalling into [`Call::set_state`] calls.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::errors::Result;
use crate::events::EventBroadcaster;
use crate::repository::TrackedEntity;
use crate::state::{EntityState, Lifecycle, TransitionPolicy};

/// Unique identifier for a call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Generate a random call id
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Current state of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Call is being set up
    Initialization,
    /// Call is connected
    InProgress,
    /// Call was referred elsewhere before connecting
    Referred,
    /// Call has ended
    Ended,
}

impl CallState {
    /// Check if the call is connected
    pub fn is_active(&self) -> bool {
        matches!(self, CallState::InProgress)
    }

    /// Check if the call has ended
    pub fn is_terminated(&self) -> bool {
        matches!(self, CallState::Ended)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Initialization => "INITIALIZATION",
            CallState::InProgress => "IN_PROGRESS",
            CallState::Referred => "REFERRED",
            CallState::Ended => "ENDED",
        };
        f.write_str(name)
    }
}

impl EntityState for CallState {
    fn initial() -> Self {
        CallState::Initialization
    }

    fn is_terminal(&self) -> bool {
        self.is_terminated()
    }

    fn can_transition_to(&self, next: &Self) -> bool {
        use CallState::*;

        match (self, next) {
            (Initialization, InProgress) => true,
            (Initialization, Referred) => true,
            (Initialization, Ended) => true,

            (Referred, InProgress) => true,
            (Referred, Ended) => true,

            (InProgress, Ended) => true,

            // No transitions from Ended
            (Ended, _) => false,

            _ => false,
        }
    }
}

/// Direction of a call (from the local account's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    /// We initiated the call
    Outgoing,
    /// The call was received from the network
    Incoming,
}

/// A remote participant of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPeer {
    /// Protocol address of the peer (SIP URI or full JID)
    pub address: String,
    /// Display name, if the protocol supplied one
    pub display_name: Option<String>,
}

impl CallPeer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Peer membership change on a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPeerEvent {
    PeerAdded { call_id: CallId, peer: CallPeer },
    PeerRemoved { call_id: CallId, peer: CallPeer },
}

impl CallPeerEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            CallPeerEvent::PeerAdded { call_id, .. } | CallPeerEvent::PeerRemoved { call_id, .. } => call_id,
        }
    }

    pub fn peer(&self) -> &CallPeer {
        match self {
            CallPeerEvent::PeerAdded { peer, .. } | CallPeerEvent::PeerRemoved { peer, .. } => peer,
        }
    }
}

/// A live call
///
/// Calls compare equal when their ids are equal.
#[derive(Debug)]
pub struct Call {
    id: CallId,
    direction: CallDirection,
    created_at: DateTime<Utc>,
    lifecycle: Lifecycle<CallState>,
    peers: Mutex<Vec<CallPeer>>,
    peer_events: EventBroadcaster<CallPeerEvent>,
}

impl Call {
    /// Create a call in `INITIALIZATION` with the lenient transition policy
    pub fn new(id: CallId, direction: CallDirection) -> Self {
        Self::with_policy(id, direction, TransitionPolicy::default())
    }

    /// Create a call using an explicit transition policy
    pub fn with_policy(id: CallId, direction: CallDirection, policy: TransitionPolicy) -> Self {
        let lifecycle = Lifecycle::new(format!("call {}", id), policy);
        Self {
            id,
            direction,
            created_at: Utc::now(),
            lifecycle,
            peers: Mutex::new(Vec::new()),
            peer_events: EventBroadcaster::new("call-peers"),
        }
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current call state
    pub fn state(&self) -> CallState {
        self.lifecycle.state()
    }

    /// Whether the call has ended
    pub fn is_ended(&self) -> bool {
        self.state().is_terminated()
    }

    /// Drive the call to `state`
    ///
    /// Returns `Ok(false)` if the call is already in `state`.
    pub fn set_state(&self, state: CallState) -> Result<bool> {
        self.lifecycle.transition(state)
    }

    /// Drive the call to `state`, recording why
    pub fn set_state_with_reason(&self, state: CallState, reason: impl Into<String>) -> Result<bool> {
        self.lifecycle.transition_with_reason(state, Some(reason.into()))
    }

    /// State change plumbing for this call
    pub fn lifecycle(&self) -> &Lifecycle<CallState> {
        &self.lifecycle
    }

    /// Broadcaster for peer membership changes
    pub fn peer_events(&self) -> &EventBroadcaster<CallPeerEvent> {
        &self.peer_events
    }

    /// Add a peer; returns `false` if a peer with the same address is present
    pub fn add_peer(&self, peer: CallPeer) -> bool {
        {
            let mut peers = self.peers.lock();
            if peers.iter().any(|p| p.address == peer.address) {
                return false;
            }
            peers.push(peer.clone());
        }

        debug!(call_id = %self.id, peer = %peer.address, "Peer added");
        self.peer_events.broadcast(&CallPeerEvent::PeerAdded {
            call_id: self.id.clone(),
            peer,
        });
        true
    }

    /// Remove the peer with `address`
    pub fn remove_peer(&self, address: &str) -> Option<CallPeer> {
        let removed = {
            let mut peers = self.peers.lock();
            let index = peers.iter().position(|p| p.address == address)?;
            peers.remove(index)
        };

        debug!(call_id = %self.id, peer = %removed.address, "Peer removed");
        self.peer_events.broadcast(&CallPeerEvent::PeerRemoved {
            call_id: self.id.clone(),
            peer: removed.clone(),
        });
        Some(removed)
    }

    /// Copy of the current peer list
    pub fn peers(&self) -> Vec<CallPeer> {
        self.peers.lock().clone()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Call {}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Call: id={} peers={}", self.id, self.peer_count())
    }
}

impl TrackedEntity for Call {
    type State = CallState;

    fn lifecycle(&self) -> &Lifecycle<CallState> {
        &self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_call_state_table() {
        use CallState::*;

        assert!(Initialization.can_transition_to(&InProgress));
        assert!(Initialization.can_transition_to(&Referred));
        assert!(Referred.can_transition_to(&Ended));
        assert!(InProgress.can_transition_to(&Ended));
        assert!(!InProgress.can_transition_to(&Initialization));
        assert!(!Ended.can_transition_to(&InProgress));
        assert!(Ended.is_terminal());
        assert!(!Referred.is_terminal());
    }

    #[test]
    fn test_new_call_starts_initializing() {
        let call = Call::new(CallId::from("call-1"), CallDirection::Outgoing);
        assert_eq!(call.state(), CallState::Initialization);
        assert!(!call.is_ended());
        assert_eq!(call.to_string(), "Call: id=call-1 peers=0");
    }

    #[test]
    fn test_repeated_state_is_ignored() {
        let call = Call::new(CallId::new(), CallDirection::Incoming);
        assert!(call.set_state(CallState::InProgress).unwrap());
        assert!(!call.set_state(CallState::InProgress).unwrap());
    }

    #[test]
    fn test_strict_call_rejects_restart() {
        let call = Call::with_policy(CallId::new(), CallDirection::Incoming, TransitionPolicy::Strict);
        call.set_state(CallState::Ended).unwrap();

        assert!(call.set_state(CallState::InProgress).is_err());
        assert_eq!(call.state(), CallState::Ended);
    }

    #[test]
    fn test_peer_membership_events() {
        let call = Call::new(CallId::from("call-7"), CallDirection::Outgoing);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        call.peer_events()
            .subscribe_fn(move |event: &CallPeerEvent| sink.lock().push(event.clone()));

        assert!(call.add_peer(CallPeer::new("sip:bob@example.com").with_display_name("Bob")));
        assert!(!call.add_peer(CallPeer::new("sip:bob@example.com")));
        assert_eq!(call.peer_count(), 1);

        let removed = call.remove_peer("sip:bob@example.com").unwrap();
        assert_eq!(removed.display_name.as_deref(), Some("Bob"));
        assert!(call.remove_peer("sip:bob@example.com").is_none());

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CallPeerEvent::PeerAdded { .. }));
        assert!(matches!(events[1], CallPeerEvent::PeerRemoved { .. }));
        assert_eq!(events[1].call_id().as_str(), "call-7");
    }

    #[test]
    fn test_calls_compare_by_id() {
        let a = Call::new(CallId::from("same"), CallDirection::Outgoing);
        let b = Call::new(CallId::from("same"), CallDirection::Incoming);
        assert_eq!(a, b);
    }
}
