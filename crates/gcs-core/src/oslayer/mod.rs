//! Capability interface over the guest operating system.
//!
//! Everything the engine needs from the kernel goes through [`OsLayer`]:
//! directory and file creation, external commands, mounts, SCSI and
//! `VMBus` device lookups, signals, and power-off. Methods return plain
//! [`std::io::Result`] so callers can inspect the error kind (a device that
//! has not enumerated yet reports [`std::io::ErrorKind::NotFound`]) before
//! wrapping it with their own context.

pub mod linux;

#[cfg(test)]
pub(crate) mod fake;

use std::io;
use std::path::Path;

use gcs_common::types::Signal;

use crate::filesystem::mount::MountRequest;

pub use linux::LinuxOs;

/// Result of running an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the command was terminated by a signal.
    pub code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

impl CommandOutput {
    /// Returns `true` if the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Guest OS operations used by the engine.
pub trait OsLayer: Send + Sync {
    /// Creates `path` and all missing parents with the given mode.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Creates or truncates `path` and writes `contents` to it.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Returns whether `path` exists.
    fn path_exists(&self, path: &Path) -> bool;

    /// Removes the empty directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Runs `program` with `args`, capturing combined output.
    ///
    /// A non-zero exit is reported in [`CommandOutput::code`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the program could not be started.
    fn run_command(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput>;

    /// Mounts `request` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns the `mount(2)` error.
    fn mount(&self, request: &MountRequest, target: &Path) -> io::Result<()>;

    /// Unmounts whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns the `umount(2)` error.
    fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Resolves a SCSI controller and LUN to its block device node.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotFound`] while the disk is not enumerated.
    fn scsi_device_name(&self, controller: u8, lun: u8) -> io::Result<String>;

    /// Detaches the SCSI disk at `address` (`host:channel:target:lun`).
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn unplug_scsi_disk(&self, address: &str) -> io::Result<()>;

    /// Resolves a `VMBus` instance id to its network interface name.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotFound`] while the adapter is not enumerated.
    fn instance_id_to_name(&self, instance_id: &str) -> io::Result<String>;

    /// Sends `signal` to the process `pid`.
    ///
    /// # Errors
    ///
    /// Returns the `kill(2)` error.
    fn kill(&self, pid: u32, signal: Signal) -> io::Result<()>;

    /// Powers off the VM.
    ///
    /// # Errors
    ///
    /// Returns the `reboot(2)` error; on success this does not return.
    fn power_off(&self) -> io::Result<()>;
}
