//! Chat-room conference description cache
//!
//! Room participants announce the conference call they host by attaching a
//! description to their presence, and withdraw it the same way. Servers
//! repeat presence freely, so announcements are collapsed here: one entry
//! per `(room, participant)`, added only by the first "available"
//! announcement and removed only by a withdrawal describing the same
//! conference.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::{EventBroadcaster, ListenerRef};

/// A conference call announced in a chat room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceDescription {
    /// Address to call to join the conference
    pub uri: String,
    /// Identifier of the call hosting the conference
    pub call_id: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
    /// `false` for a withdrawal
    pub available: bool,
    /// Supported transport namespaces
    pub transports: BTreeSet<String>,
}

impl ConferenceDescription {
    /// Create an available description without transports
    pub fn new(uri: impl Into<String>, call_id: Option<String>) -> Self {
        Self {
            uri: uri.into(),
            call_id,
            password: None,
            display_name: None,
            available: true,
            transports: BTreeSet::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transports.insert(transport.into());
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Copy of this description marked as withdrawn
    pub fn withdrawn(&self) -> Self {
        self.clone().with_available(false)
    }

    pub fn supports_transport(&self, transport: &str) -> bool {
        self.transports.contains(transport)
    }

    /// Whether both descriptions name the same conference
    ///
    /// Compares call id, URI and transport set. Availability, password and
    /// display name are ignored.
    pub fn is_same_conference(&self, other: &ConferenceDescription) -> bool {
        self.call_id == other.call_id && self.uri == other.uri && self.transports == other.transports
    }
}

impl fmt::Display for ConferenceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConferenceDescription(uri={}; callid={}; available={})",
            self.uri,
            self.call_id.as_deref().unwrap_or("-"),
            self.available
        )
    }
}

/// A participant in a chat room: room address plus occupant resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantKey {
    pub room: String,
    pub resource: String,
}

impl ParticipantKey {
    pub fn new(room: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room, self.resource)
    }
}

/// Who published the description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublicationKind {
    /// Announced by another participant
    Received,
    /// Announced by the local user
    Sent,
}

/// Accepted conference announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferencePublishedEvent {
    pub participant: ParticipantKey,
    pub description: ConferenceDescription,
    pub kind: PublicationKind,
}

/// Per-participant cache of announced conferences
#[derive(Debug)]
pub struct ConferenceDescriptionCache {
    cached: DashMap<ParticipantKey, ConferenceDescription>,
    published: DashMap<String, ConferenceDescription>,
    listeners: EventBroadcaster<ConferencePublishedEvent>,
}

impl ConferenceDescriptionCache {
    pub fn new() -> Self {
        Self {
            cached: DashMap::new(),
            published: DashMap::new(),
            listeners: EventBroadcaster::new("conference-published"),
        }
    }

    /// Apply an announcement received from `participant`
    ///
    /// An available description is accepted only if nothing is cached for
    /// the participant yet. A withdrawal is accepted only if the cached
    /// entry describes the same conference, in which case the entry is
    /// removed. Returns whether the announcement was accepted; accepted
    /// announcements are published to listeners as `Received`.
    pub fn process_announcement(
        &self,
        description: ConferenceDescription,
        participant: &ParticipantKey,
    ) -> bool {
        let accepted = if description.available {
            match self.cached.entry(participant.clone()) {
                Entry::Occupied(_) => {
                    debug!(participant = %participant, "Ignoring repeated conference announcement");
                    false
                }
                Entry::Vacant(slot) => {
                    slot.insert(description.clone());
                    true
                }
            }
        } else {
            let removed = self
                .cached
                .remove_if(participant, |_, cached| cached.is_same_conference(&description));
            if removed.is_none() {
                debug!(
                    participant = %participant,
                    "Ignoring withdrawal of a conference that is not cached"
                );
            }
            removed.is_some()
        };

        if accepted {
            debug!(participant = %participant, "Received {}", description);
            self.listeners.broadcast(&ConferencePublishedEvent {
                participant: participant.clone(),
                description,
                kind: PublicationKind::Received,
            });
        }
        accepted
    }

    /// Announce a conference on behalf of the local user in `own.room`
    ///
    /// If a conference is already published in that room it is withdrawn
    /// instead and `description` is ignored. Returns what was announced.
    pub fn publish(&self, own: &ParticipantKey, description: ConferenceDescription) -> ConferenceDescription {
        let announced = match self.published.remove(&own.room) {
            Some((_, previous)) => previous.withdrawn(),
            None => description,
        };
        if announced.available {
            self.published.insert(own.room.clone(), announced.clone());
        }

        debug!(participant = %own, "Sent {}", announced);
        self.listeners.broadcast(&ConferencePublishedEvent {
            participant: own.clone(),
            description: announced.clone(),
            kind: PublicationKind::Sent,
        });
        announced
    }

    /// Conference the local user currently publishes in `room`
    pub fn published(&self, room: &str) -> Option<ConferenceDescription> {
        self.published.get(room).map(|entry| entry.value().clone())
    }

    /// Cached description announced by `participant`
    pub fn cached_description(&self, participant: &ParticipantKey) -> Option<ConferenceDescription> {
        self.cached.get(participant).map(|entry| entry.value().clone())
    }

    /// Copy of the cache keyed by the participant's string form
    pub fn get_cached_descriptions(&self) -> HashMap<String, ConferenceDescription> {
        self.cached
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().clone()))
            .collect()
    }

    pub fn cached_count(&self) -> usize {
        self.cached.len()
    }

    /// Forget everything announced in `room`, including our own publication
    ///
    /// Returns the number of cached entries removed.
    pub fn clear_room(&self, room: &str) -> usize {
        let mut removed = 0;
        self.cached.retain(|key, _| {
            let keep = key.room != room;
            if !keep {
                removed += 1;
            }
            keep
        });
        self.published.remove(room);
        removed
    }

    /// Forget every announcement
    pub fn clear(&self) {
        self.cached.clear();
        self.published.clear();
    }

    pub fn subscribe(&self, listener: ListenerRef<ConferencePublishedEvent>) -> bool {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, listener: &ListenerRef<ConferencePublishedEvent>) -> bool {
        self.listeners.unsubscribe(listener)
    }

    /// Broadcaster carrying accepted announcements
    pub fn listeners(&self) -> &EventBroadcaster<ConferencePublishedEvent> {
        &self.listeners
    }
}

impl Default for ConferenceDescriptionCache {
    fn default() -> Self {
        Self::new()
    }
}
