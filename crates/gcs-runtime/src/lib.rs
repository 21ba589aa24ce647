//! Host, container, and process coordination for the guest compute service.
//!
//! The [`Host`](host::Host) is the registry of containers and the entry
//! point for hot-plug requests. Each [`Container`](container::Container)
//! owns its init process and a table of exec'd processes, and every
//! [`ProcessHandle`](process::ProcessHandle) runs its own exit, wait, and
//! reclaim protocol on background threads.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod backend;
pub mod bridge;
pub mod container;
pub mod host;
pub mod modify;
pub mod process;
pub mod stdio;
pub mod sync;
