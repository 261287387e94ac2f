//! # warden-audit
//!
//! Append-only, SHA-256 hash-chained audit trail of tool calls.
//!
//! Every call produces a decision record before it may run and an outcome
//! record after. Each record is wrapped in an `AuditEvent` linked to its
//! predecessor by hash, so any edit to a stored event is detected by
//! `verify_chain`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_audit::InMemoryAuditWriter;
//! use warden_core::traits::AuditWriter;
//!
//! let writer = InMemoryAuditWriter::new("run-001");
//! writer.write(&decision)?;
//! writer.write(&outcome)?;
//! assert!(writer.verify_integrity());
//! ```

pub mod chain;
pub mod event;
pub mod memory;

pub use chain::{hash_event, verify_chain};
pub use event::{AuditEvent, AuditLog};
pub use memory::InMemoryAuditWriter;

// ── Tests ─────────────────────────────────────────────────────────────────────
