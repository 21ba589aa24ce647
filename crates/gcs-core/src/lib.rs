//! # gcs-core
//!
//! Guest OS primitives for the guest compute service.
//!
//! This crate provides:
//! - **OS layer**: the [`OsLayer`](oslayer::OsLayer) capability trait and
//!   its Linux implementation over sysfs, `mount(2)`, and `kill(2)`.
//! - **Filesystem**: mount requests with timed retry, overlay mounts,
//!   Plan-9 shares, and unmount-and-remove.
//! - **Transport**: the byte-stream connections the host reaches the
//!   guest over, used for stdio and directory shares.
//!
//! The engine in `gcs-runtime` only ever talks to the guest through these
//! traits, so every operation can be exercised against a fake.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod filesystem;
pub mod oslayer;
pub mod transport;
