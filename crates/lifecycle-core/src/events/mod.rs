//! Event fan-out
//!
//! Every component in this crate publishes through an [`EventBroadcaster`]
//! it owns, rather than keeping its own listener list.

pub mod broadcaster;

pub use broadcaster::{BroadcastOutcome, EventBroadcaster, EventListener, ListenerRef};
