//! # warden-policy
//!
//! A pure safety classifier for the warden runtime.
//!
//! ## Overview
//!
//! This crate provides [`SafetyPolicyEngine`], which implements the
//! [`PolicyEngine`](warden_core::traits::PolicyEngine) trait. It sorts every
//! shell command and write path into `Allow`, `Confirm`, or `Block`:
//!
//! - **Block**: host-destroying command signatures, writes that resolve
//!   into credential files or the `/proc`, `/sys`, `/dev` trees, and any
//!   input carrying a null byte. Not configurable.
//! - **Confirm**: destructive but legitimate commands and writes to
//!   secret-bearing paths, plus user-configured patterns.
//! - **Allow**: everything else.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use warden_policy::SafetyPolicyEngine;
//! use warden_core::traits::PolicyEngine;
//!
//! let engine = SafetyPolicyEngine::from_config(&config.safety);
//! if engine.evaluate_write_path(&target).is_blocked() { /* refuse */ }
//! ```

pub mod engine;
mod path;
mod rule;

pub use engine::{SafetyPolicyEngine, COMMAND_SUBJECT, WRITE_SUBJECT};

// ── Tests ─────────────────────────────────────────────────────────────────────
