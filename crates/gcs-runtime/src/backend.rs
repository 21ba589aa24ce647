//! Container runtime abstraction.
//!
//! The engine never creates namespaces or processes itself. It asks a
//! [`Runtime`] to create containers from a bundle and then drives the
//! returned handles. Implementors wrap an OCI runtime such as runc.

use std::path::Path;
use std::sync::Arc;

use gcs_common::error::Result;
use gcs_common::oci;
use gcs_common::types::{ContainerId, Signal};

use crate::stdio::ConnectionSet;

/// Creates containers from OCI bundles.
pub trait Runtime: Send + Sync {
    /// Creates (but does not start) a container from the bundle at `bundle_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime rejects the bundle.
    fn create_container(
        &self,
        id: &ContainerId,
        bundle_path: &Path,
        spec: &oci::Spec,
    ) -> Result<Arc<dyn RuntimeContainer>>;
}

/// A container created by the runtime.
pub trait RuntimeContainer: Send + Sync {
    /// PID of the container's init process.
    fn pid(&self) -> u32;

    /// The container's init process.
    fn init_process(&self) -> Arc<dyn RuntimeProcess>;

    /// Starts the init process.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot start the container.
    fn start(&self) -> Result<()>;

    /// Starts an additional process inside the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot exec the process.
    fn exec_process(
        &self,
        spec: &oci::Process,
        stdio: Arc<ConnectionSet>,
    ) -> Result<Arc<dyn RuntimeProcess>>;

    /// Sends `signal` to the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot deliver the signal.
    fn kill(&self, signal: Signal) -> Result<()>;

    /// Terminal relay of the init process, if it has a terminal.
    fn tty(&self) -> Option<Arc<dyn TtyRelay>>;

    /// Pipe relay of the init process, if it uses pipes.
    fn pipe_relay(&self) -> Option<Arc<dyn PipeRelay>>;
}

/// A process started by the runtime.
pub trait RuntimeProcess: Send + Sync {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Blocks until the process exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit could not be observed.
    fn wait(&self) -> Result<i32>;

    /// Terminal relay, if the process has a terminal.
    fn tty(&self) -> Option<Arc<dyn TtyRelay>>;
}

/// Relays a pseudo-terminal to the host's stdio connections.
pub trait TtyRelay: Send + Sync {
    /// Points the relay at a new set of connections.
    fn replace_connection_set(&self, set: Arc<ConnectionSet>);

    /// Starts relaying.
    fn start(&self);

    /// Resizes the terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize ioctl fails.
    fn resize_console(&self, height: u16, width: u16) -> Result<()>;
}

/// Relays stdio pipes to the host's stdio connections.
pub trait PipeRelay: Send + Sync {
    /// Points the relay at a new set of connections.
    fn replace_connection_set(&self, set: Arc<ConnectionSet>);

    /// Closes pipe ends the host did not ask for.
    fn close_unused_pipes(&self);

    /// Starts relaying.
    fn start(&self);
}
