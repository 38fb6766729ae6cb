//! Domain model for the note tree.
//!
//! # Responsibility
//! - Define the canonical node record shared by content nodes and symlinks.
//! - Keep one record per note; additional tree positions are separate
//!   lightweight symlink records that only carry a target id.
//!
//! # Invariants
//! - Every node is identified by a stable `NodeId`.
//! - Node type is explicit on every record; there is no implicit default.

pub mod node;
