//! Stdio connections between a container process and the host.

use std::sync::Arc;

use gcs_common::error::{GcsError, Result};
use gcs_core::transport::{Connection, Transport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Transport ports the host listens on for each stdio stream.
///
/// A stream without a port is not connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionSettings {
    /// Port for stdin.
    pub stdin: Option<u32>,
    /// Port for stdout.
    pub stdout: Option<u32>,
    /// Port for stderr.
    pub stderr: Option<u32>,
}

/// The connected stdio streams of one process.
///
/// Shared between the relay that pumps data and the code path that may
/// need to tear the streams down, so any holder can close it.
#[derive(Default)]
pub struct ConnectionSet {
    stdin: Mutex<Option<Box<dyn Connection>>>,
    stdout: Mutex<Option<Box<dyn Connection>>>,
    stderr: Mutex<Option<Box<dyn Connection>>>,
}

impl std::fmt::Debug for ConnectionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSet")
            .field("stdin", &self.stdin.lock().is_some())
            .field("stdout", &self.stdout.lock().is_some())
            .field("stderr", &self.stderr.lock().is_some())
            .finish()
    }
}

impl ConnectionSet {
    /// Takes the stdin connection, leaving the slot empty.
    pub fn take_stdin(&self) -> Option<Box<dyn Connection>> {
        self.stdin.lock().take()
    }

    /// Takes the stdout connection, leaving the slot empty.
    pub fn take_stdout(&self) -> Option<Box<dyn Connection>> {
        self.stdout.lock().take()
    }

    /// Takes the stderr connection, leaving the slot empty.
    pub fn take_stderr(&self) -> Option<Box<dyn Connection>> {
        self.stderr.lock().take()
    }

    /// Returns `true` if no stream is still held by the set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stdin.lock().is_none() && self.stdout.lock().is_none() && self.stderr.lock().is_none()
    }

    /// Closes and drops every connection still held by the set.
    pub fn close(&self) {
        for (name, slot) in [
            ("stdin", &self.stdin),
            ("stdout", &self.stdout),
            ("stderr", &self.stderr),
        ] {
            if let Some(mut conn) = slot.lock().take() {
                if let Err(e) = conn.close() {
                    tracing::warn!(stream = name, error = %e, "failed to close stdio connection");
                }
            }
        }
    }
}

/// Dials every stream named in `settings`.
///
/// If any dial fails, the streams already connected are closed.
///
/// # Errors
///
/// Returns an error naming the stream and port that could not be dialed.
pub fn connect(
    transport: &dyn Transport,
    settings: &ConnectionSettings,
) -> Result<Arc<ConnectionSet>> {
    let set = ConnectionSet::default();
    for (name, port, slot) in [
        ("stdin", settings.stdin, &set.stdin),
        ("stdout", settings.stdout, &set.stdout),
        ("stderr", settings.stderr, &set.stderr),
    ] {
        let Some(port) = port else { continue };
        match transport.dial(port) {
            Ok(conn) => *slot.lock() = Some(conn),
            Err(e) => {
                set.close();
                return Err(GcsError::os(format!("connect {name} on port {port}"), e));
            }
        }
    }
    tracing::debug!(?settings, "stdio connected");
    Ok(Arc::new(set))
}
