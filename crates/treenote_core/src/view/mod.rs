//! Read-side projections the UI renders from.
//!
//! # Responsibility
//! - Restrict the visible tree to an isolated branch.
//! - Address every rendered occurrence of a node by its instance key.
//! - Flatten the visible tree into rows and carry addressable view state.
//!
//! # Invariants
//! - Nothing here mutates the node store.
//! - Per-occurrence UI state is keyed by `InstanceKey`, never by `NodeId`.

pub mod branch;
pub mod instance;
pub mod rows;
pub mod state;
