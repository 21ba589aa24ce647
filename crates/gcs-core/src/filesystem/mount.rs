//! Mount requests and mount/unmount helpers.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use gcs_common::config::GcsConfig;
use gcs_common::error::{GcsError, Result};

use crate::oslayer::OsLayer;

/// A filesystem to mount: source, type, read-only flag, and data options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Device, share, or pseudo-source to mount.
    pub source: String,
    /// Filesystem type.
    pub fstype: String,
    /// Mount with `MS_RDONLY`.
    pub read_only: bool,
    /// Filesystem-specific options, joined with commas.
    pub options: Vec<String>,
}

impl MountRequest {
    /// Creates a read-write request without options.
    #[must_use]
    pub fn new(source: impl Into<String>, fstype: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            fstype: fstype.into(),
            read_only: false,
            options: Vec::new(),
        }
    }

    /// Sets the read-only flag.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Appends a data option.
    #[must_use]
    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Data string passed to `mount(2)`.
    #[must_use]
    pub fn data(&self) -> String {
        self.options.join(",")
    }
}

/// Bounds on retrying a mount whose device has not appeared yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts.
    pub interval: Duration,
    /// Total time after which the last error is returned.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Builds the policy from the service configuration.
    #[must_use]
    pub const fn from_config(config: &GcsConfig) -> Self {
        Self {
            interval: config.mount_retry_interval(),
            timeout: config.mount_retry_timeout(),
        }
    }
}

/// Whether a mount error means the device is not enumerated yet.
fn is_device_pending(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENXIO)
}

fn mount_error(request: &MountRequest, target: &Path, source: io::Error) -> GcsError {
    GcsError::os(
        format!("mount {} on {}", request.source, target.display()),
        source,
    )
}

/// Mounts `request` on `target`, retrying while the device is not present.
///
/// Only "device pending" failures (`ENOENT`, `ENXIO`) are retried; any
/// other error fails immediately.
///
/// # Errors
///
/// Returns the last mount error once the retry deadline passes.
pub fn mount_with_timed_retry(
    os: &dyn OsLayer,
    request: &MountRequest,
    target: &Path,
    policy: RetryPolicy,
) -> Result<()> {
    let start = Instant::now();
    let mut attempts = 0_u32;
    loop {
        attempts += 1;
        match os.mount(request, target) {
            Ok(()) => {
                tracing::debug!(target = %target.display(), attempts, "mount succeeded");
                return Ok(());
            }
            Err(e) if is_device_pending(&e) && start.elapsed() < policy.timeout => {
                tracing::debug!(
                    target = %target.display(),
                    attempts,
                    error = %e,
                    "device not ready, retrying mount"
                );
                std::thread::sleep(policy.interval);
            }
            Err(e) => return Err(mount_error(request, target, e)),
        }
    }
}

/// Creates `target` and mounts `request` on it.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_layer(os: &dyn OsLayer, target: &Path, request: &MountRequest, mode: u32) -> Result<()> {
    os.mkdir_all(target, mode)
        .map_err(|e| GcsError::io(target, e))?;
    os.mount(request, target)
        .map_err(|e| mount_error(request, target, e))
}

/// Unmounts `path` and optionally removes the mount point.
///
/// A path that does not exist is treated as already unmounted.
///
/// # Errors
///
/// Returns an error if the unmount or the directory removal fails.
pub fn unmount_path(os: &dyn OsLayer, path: &Path, remove_target: bool) -> Result<()> {
    if !os.path_exists(path) {
        tracing::debug!(path = %path.display(), "unmount target absent, nothing to do");
        return Ok(());
    }
    os.unmount(path)
        .map_err(|e| GcsError::os(format!("unmount {}", path.display()), e))?;
    if remove_target {
        os.remove_dir(path).map_err(|e| GcsError::io(path, e))?;
    }
    Ok(())
}
