//! Change notification between contexts sharing one persisted store.
//!
//! # Responsibility
//! - Announce that persisted data changed so other contexts reload fully.
//!
//! # Invariants
//! - Notification is one-way and coarse: receivers reload everything,
//!   concurrent edits converge to the last writer.

pub mod notifier;
