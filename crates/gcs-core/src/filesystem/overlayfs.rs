//! `OverlayFS` assembly of container root filesystems.
//!
//! Stacks the read-only layers a container image was mapped in as, with
//! an optional writable upper layer taken from the container's scratch.

use std::path::{Path, PathBuf};

use gcs_common::error::{GcsError, Result};

use super::mount::MountRequest;
use crate::oslayer::OsLayer;

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRequest {
    /// Read-only lower layers, topmost first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer and its work directory, if any.
    pub scratch: Option<OverlayScratch>,
    /// Final merged mount point.
    pub target: PathBuf,
}

/// Writable half of an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayScratch {
    /// Upper layer receiving writes.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
}

impl OverlayScratch {
    /// Lays out `upper` and `work` under a scratch directory.
    #[must_use]
    pub fn under(scratch: &Path) -> Self {
        Self {
            upper_dir: scratch.join("upper"),
            work_dir: scratch.join("work"),
        }
    }
}

impl OverlayRequest {
    /// Builds the `mount(2)` request; read-only when there is no scratch.
    #[must_use]
    pub fn mount_request(&self) -> MountRequest {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        let mut request = MountRequest::new("overlay", "overlay")
            .read_only(self.scratch.is_none())
            .option(format!("lowerdir={lowers}"));
        if let Some(scratch) = &self.scratch {
            request = request
                .option(format!("upperdir={}", scratch.upper_dir.display()))
                .option(format!("workdir={}", scratch.work_dir.display()));
        }
        request
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the upper and work directories when a scratch is given, then
/// mounts onto the (already created) target.
///
/// # Errors
///
/// Returns an error if there are no lower layers, directory creation
/// fails, or the mount fails.
pub fn mount_overlay(os: &dyn OsLayer, request: &OverlayRequest, mode: u32) -> Result<()> {
    if request.lower_dirs.is_empty() {
        return Err(GcsError::InvalidSettings {
            message: format!(
                "overlay at {} needs at least one lower layer",
                request.target.display()
            ),
        });
    }
    if let Some(scratch) = &request.scratch {
        for dir in [&scratch.upper_dir, &scratch.work_dir] {
            os.mkdir_all(dir, mode).map_err(|e| GcsError::io(dir, e))?;
        }
    }

    let mount = request.mount_request();
    os.mount(&mount, &request.target).map_err(|e| {
        GcsError::os(format!("overlay mount on {}", request.target.display()), e)
    })?;

    tracing::info!(
        target = %request.target.display(),
        layers = request.lower_dirs.len(),
        read_only = mount.read_only,
        "overlayfs mounted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oslayer::fake::{Call, RecordingOs};

    fn layers() -> Vec<PathBuf> {
        vec![PathBuf::from("/run/layers/l1"), PathBuf::from("/run/layers/l0")]
    }

    #[test]
    fn without_scratch_mount_is_read_only() {
        let req = OverlayRequest {
            lower_dirs: layers(),
            scratch: None,
            target: PathBuf::from("/run/c1/rootfs"),
        };
        let mount = req.mount_request();
        assert!(mount.read_only);
        assert_eq!(mount.data(), "lowerdir=/run/layers/l1:/run/layers/l0");
    }

    #[test]
    fn scratch_adds_upper_and_work() {
        let os = RecordingOs::default();
        let req = OverlayRequest {
            lower_dirs: layers(),
            scratch: Some(OverlayScratch::under(Path::new("/run/scratch/c1"))),
            target: PathBuf::from("/run/c1/rootfs"),
        };

        mount_overlay(&os, &req, 0o700).expect("mount");

        let calls = os.calls();
        assert_eq!(calls[0], Call::Mkdir(PathBuf::from("/run/scratch/c1/upper")));
        assert_eq!(calls[1], Call::Mkdir(PathBuf::from("/run/scratch/c1/work")));
        let (mount, target) = &os.mounts()[0];
        assert!(!mount.read_only);
        assert_eq!(target, &PathBuf::from("/run/c1/rootfs"));
        assert_eq!(
            mount.data(),
            "lowerdir=/run/layers/l1:/run/layers/l0,\
             upperdir=/run/scratch/c1/upper,workdir=/run/scratch/c1/work"
        );
    }

    #[test]
    fn no_layers_is_rejected() {
        let os = RecordingOs::default();
        let req = OverlayRequest {
            lower_dirs: Vec::new(),
            scratch: None,
            target: PathBuf::from("/run/c1/rootfs"),
        };
        let err = mount_overlay(&os, &req, 0o700).expect_err("empty");
        assert!(matches!(err, GcsError::InvalidSettings { .. }));
        assert!(os.calls().is_empty());
    }
}
