//! # lifecycle-core
//!
//! Lifecycle tracking and event fan-out for the live entities of a
//! communication account: calls, file transfers, conference announcements
//! in chat rooms, and instant messages passing through transform layers.
//!
//! The protocol layer drives entities by reporting state changes; this
//! crate keeps the set of live entities consistent and tells every
//! interested listener exactly once about each change.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use lifecycle_core::{
//!     CallDirection, CallState, LifecycleConfig, LifecycleCoordinator, RepositoryEvent, Call, CallId,
//! };
//!
//! # fn main() -> lifecycle_core::Result<()> {
//! let coordinator = LifecycleCoordinator::new(LifecycleConfig::default())?;
//!
//! coordinator.calls().listeners().subscribe_fn(|event: &RepositoryEvent<CallId, Call>| {
//!     if event.is_ended() {
//!         println!("call {} ended", event.key());
//!     }
//! });
//!
//! let call = coordinator.create_call(CallDirection::Outgoing)?;
//! call.set_state(CallState::InProgress)?;
//! call.set_state(CallState::Ended)?;
//!
//! assert_eq!(coordinator.calls().count(), 0);
//! assert!(call.lifecycle().termination().is_complete());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`events`]: copy-on-write listener lists with per-listener failure
//!   isolation
//! - [`state`]: state tables, transition policy and the per-entity
//!   [`Lifecycle`] component
//! - [`repository`]: keyed set of live entities that drops an entity when
//!   it terminates
//! - [`conference`]: per-participant cache of conference announcements
//! - [`transform`] and [`messaging`]: priority-ordered message transforms
//!   and dispatch of their output
//! - [`coordinator`]: owns one of each, built from [`LifecycleConfig`]

pub mod call;
pub mod completion;
pub mod conference;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod file_transfer;
pub mod logging;
pub mod messaging;
pub mod repository;
pub mod state;
pub mod transform;

// Re-export main types
pub use call::{Call, CallDirection, CallId, CallPeer, CallPeerEvent, CallState};
pub use completion::Completion;
pub use conference::{
    ConferenceDescription, ConferenceDescriptionCache, ConferencePublishedEvent, ParticipantKey,
    PublicationKind,
};
pub use config::LifecycleConfig;
pub use coordinator::{CoordinatorStats, LifecycleCoordinator};
pub use errors::{LifecycleError, Result};
pub use events::{BroadcastOutcome, EventBroadcaster, EventListener, ListenerRef};
pub use file_transfer::{
    FileTransfer, FileTransferProgressEvent, FileTransferStatus, TransferDirection, TransferId,
};
pub use logging::{LoggingConfig, setup_logging};
pub use messaging::{MessageDispatcher, MessageEvent};
pub use repository::{
    ActiveCallsRepository, ActiveEntityRepository, ActiveFileTransfers, RepositoryEvent,
    RepositoryStats, TrackedEntity,
};
pub use state::{EntityState, Lifecycle, StateChange, StateMachine, TransitionPolicy};
pub use transform::{
    DEFAULT_TRANSFORM_PRIORITY, DeliveryFailure, LayerRef, Message, MessageDelivered,
    MessageDeliveryFailed, MessageReceived, TransformLayer, TransformPipeline,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
