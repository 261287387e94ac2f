//! # warden-contracts
//!
//! Shared types, error taxonomy, and configuration schema for the warden
//! tool-execution runtime.
//!
//! All crates in the workspace import from here. Apart from configuration
//! loading and small constructors, no behaviour lives in this crate.

pub mod approval;
pub mod config;
pub mod error;
pub mod execution;
pub mod message;
pub mod policy;
pub mod stream;
pub mod task;
pub mod tool;
pub mod verify;
