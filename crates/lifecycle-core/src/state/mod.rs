//! Entity state machines and the lifecycle component built on them

pub mod lifecycle;
pub mod machine;

pub use lifecycle::Lifecycle;
pub use machine::{EntityState, StateChange, StateMachine, TransitionPolicy};
