//! Byte-stream transport between the host and the guest.

use std::io;
use std::os::fd::RawFd;

/// A bidirectional stream opened by a [`Transport`].
pub trait Connection: io::Read + io::Write + Send {
    /// File descriptor of the underlying socket.
    fn raw_fd(&self) -> RawFd;

    /// Shuts the connection down in both directions.
    ///
    /// This acts on the socket, so every duplicate of the descriptor loses
    /// the stream. Dropping the connection only releases this descriptor.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket error.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens connections to the host, typically over a VM socket.
pub trait Transport: Send + Sync {
    /// Connects to the host listener on `port`.
    ///
    /// # Errors
    ///
    /// Returns the connection error.
    fn dial(&self, port: u32) -> io::Result<Box<dyn Connection>>;
}
