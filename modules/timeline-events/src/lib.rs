//! Event model and predicate builder for combat-timeline analysis.
//!
//! Defines the `TimelineEvent` contract the engine dispatches over, the
//! concrete combat-log `Event` produced by log adapters, and the `Filter`
//! builder analysis modules use to describe which events they want.
//!
//! Zero knowledge of modules, hooks or the dispatch loop.

pub mod filter;
pub mod types;

pub use filter::{
    filter, from_fn, none_of, one_of, Filter, FnPredicate, Matcher, Narrowed, Predicate,
};
pub use types::{
    kind, ActionEvent, ActorId, DamageEvent, DeathEvent, Event, HealEvent, StatusEvent,
    TimelineEvent, Timestamp,
};
