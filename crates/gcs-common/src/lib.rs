//! # gcs-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the guest compute service workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the request shapes the orchestrator sends
//! into the utility VM.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod config;
pub mod constants;
pub mod error;
pub mod oci;
pub mod types;
