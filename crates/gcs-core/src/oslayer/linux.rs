//! Linux implementation of the OS layer.

use std::io;
use std::path::{Path, PathBuf};

use gcs_common::constants::{SYSFS_SCSI_DEVICES, SYSFS_VMBUS_DEVICES};
use gcs_common::types::Signal;

use super::{CommandOutput, OsLayer};
use crate::filesystem::mount::MountRequest;

/// OS layer backed by the running kernel.
///
/// The sysfs roots are configurable so lookups can run against a
/// directory tree in tests.
#[derive(Debug, Clone)]
pub struct LinuxOs {
    scsi_root: PathBuf,
    vmbus_root: PathBuf,
}

impl LinuxOs {
    /// Creates an OS layer reading the real sysfs.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sysfs_roots(SYSFS_SCSI_DEVICES, SYSFS_VMBUS_DEVICES)
    }

    /// Creates an OS layer reading device trees from custom roots.
    #[must_use]
    pub fn with_sysfs_roots(scsi_root: impl Into<PathBuf>, vmbus_root: impl Into<PathBuf>) -> Self {
        Self {
            scsi_root: scsi_root.into(),
            vmbus_root: vmbus_root.into(),
        }
    }
}

impl Default for LinuxOs {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the single entry of `dir`, or `NotFound` if it is empty or absent.
fn single_entry(dir: &Path) -> io::Result<String> {
    let mut entries = std::fs::read_dir(dir)?;
    let entry = entries.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no entries in {}", dir.display()),
        )
    })??;
    if entries.next().is_some() {
        return Err(io::Error::other(format!(
            "expected exactly one entry in {}",
            dir.display()
        )));
    }
    Ok(entry.file_name().to_string_lossy().into_owned())
}

impl OsLayer for LinuxOs {
    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::DirBuilderExt;

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        use std::io::Write;

        let file = std::fs::File::create(path)?;
        let mut writer = io::BufWriter::new(file);
        writer.write_all(contents)?;
        writer.flush()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }

    fn run_command(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput> {
        let output = std::process::Command::new(program).args(args).output()?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandOutput {
            code: output.status.code(),
            output: combined,
        })
    }

    #[cfg(target_os = "linux")]
    fn mount(&self, request: &MountRequest, target: &Path) -> io::Result<()> {
        use nix::mount::{MsFlags, mount};

        let mut flags = MsFlags::empty();
        if request.read_only {
            flags |= MsFlags::MS_RDONLY;
        }
        let data = request.data();
        mount(
            Some(request.source.as_str()),
            target,
            Some(request.fstype.as_str()),
            flags,
            (!data.is_empty()).then_some(data.as_str()),
        )
        .map_err(io::Error::from)?;
        tracing::info!(
            source = %request.source,
            target = %target.display(),
            fstype = %request.fstype,
            "mounted"
        );
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn mount(&self, _request: &MountRequest, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "mount requires Linux",
        ))
    }

    #[cfg(target_os = "linux")]
    fn unmount(&self, target: &Path) -> io::Result<()> {
        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(io::Error::from)?;
        tracing::info!(target = %target.display(), "unmounted");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn unmount(&self, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unmount requires Linux",
        ))
    }

    fn scsi_device_name(&self, controller: u8, lun: u8) -> io::Result<String> {
        let block = self
            .scsi_root
            .join(format!("0:0:{controller}:{lun}"))
            .join("block");
        let name = single_entry(&block)?;
        Ok(format!("/dev/{name}"))
    }

    fn unplug_scsi_disk(&self, address: &str) -> io::Result<()> {
        let delete = self.scsi_root.join(address).join("delete");
        std::fs::write(&delete, "1")?;
        tracing::info!(address, "scsi disk unplugged");
        Ok(())
    }

    fn instance_id_to_name(&self, instance_id: &str) -> io::Result<String> {
        single_entry(&self.vmbus_root.join(instance_id).join("net"))
    }

    fn kill(&self, pid: u32, signal: Signal) -> io::Result<()> {
        use nix::sys::signal::{Signal as NixSignal, kill};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        let signal = NixSignal::try_from(signal.0).map_err(io::Error::from)?;
        kill(Pid::from_raw(raw), signal).map_err(io::Error::from)
    }

    #[cfg(target_os = "linux")]
    fn power_off(&self) -> io::Result<()> {
        use nix::sys::reboot::{RebootMode, reboot};

        tracing::info!("powering off");
        nix::unistd::sync();
        reboot(RebootMode::RB_POWER_OFF)
            .map(|never| match never {})
            .map_err(io::Error::from)
    }

    #[cfg(not(target_os = "linux"))]
    fn power_off(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "power off requires Linux",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs() -> (tempfile::TempDir, LinuxOs) {
        let dir = tempfile::tempdir().expect("tempdir");
        let os = LinuxOs::with_sysfs_roots(dir.path().join("scsi"), dir.path().join("vmbus"));
        (dir, os)
    }

    #[test]
    fn scsi_lookup_resolves_block_device() {
        let (dir, os) = sysfs();
        std::fs::create_dir_all(dir.path().join("scsi/0:0:0:2/block/sdc")).expect("mkdir");

        assert_eq!(os.scsi_device_name(0, 2).expect("lookup"), "/dev/sdc");
    }

    #[test]
    fn scsi_lookup_missing_disk_is_not_found() {
        let (_dir, os) = sysfs();
        let err = os.scsi_device_name(1, 1).expect_err("missing");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn instance_id_resolves_interface_name() {
        let (dir, os) = sysfs();
        std::fs::create_dir_all(dir.path().join("vmbus/abc-123/net/eth1")).expect("mkdir");

        assert_eq!(os.instance_id_to_name("abc-123").expect("lookup"), "eth1");
    }

    #[test]
    fn instance_id_without_net_entry_is_not_found() {
        let (dir, os) = sysfs();
        std::fs::create_dir_all(dir.path().join("vmbus/abc-123/net")).expect("mkdir");

        let err = os.instance_id_to_name("abc-123").expect_err("empty");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn unplug_writes_delete_node() {
        let (dir, os) = sysfs();
        let device = dir.path().join("scsi/0:0:0:4");
        std::fs::create_dir_all(&device).expect("mkdir");

        os.unplug_scsi_disk("0:0:0:4").expect("unplug");
        assert_eq!(
            std::fs::read_to_string(device.join("delete")).expect("read"),
            "1"
        );
    }

    #[test]
    fn write_file_then_mkdir_all() {
        let dir = tempfile::tempdir().expect("tempdir");
        let os = LinuxOs::new();
        let bundle = dir.path().join("a/b");
        os.mkdir_all(&bundle, 0o700).expect("mkdir");
        os.write_file(&bundle.join("config.json"), b"{}").expect("write");
        assert!(os.path_exists(&bundle.join("config.json")));
    }

    #[test]
    fn run_command_captures_exit_code_and_output() {
        let os = LinuxOs::new();
        let out = os
            .run_command(
                Path::new("sh"),
                &["-c".into(), "echo out; echo err >&2; exit 3".into()],
            )
            .expect("run");
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }
}
