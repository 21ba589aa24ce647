//! Recording OS layer for unit tests.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use gcs_common::types::Signal;
use parking_lot::Mutex;

use super::{CommandOutput, OsLayer};
use crate::filesystem::mount::MountRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Mkdir(PathBuf),
    Mount(MountRequest, PathBuf),
    Unmount(PathBuf),
    RemoveDir(PathBuf),
}

#[derive(Default)]
pub(crate) struct RecordingOs {
    pub calls: Mutex<Vec<Call>>,
    pub existing: Mutex<Vec<PathBuf>>,
    /// Errors returned by successive mount calls before they start succeeding.
    pub mount_failures: Mutex<VecDeque<io::ErrorKind>>,
}

impl RecordingOs {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn mounts(&self) -> Vec<(MountRequest, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Mount(r, t) => Some((r, t)),
                _ => None,
            })
            .collect()
    }
}

impl OsLayer for RecordingOs {
    fn mkdir_all(&self, path: &Path, _mode: u32) -> io::Result<()> {
        self.calls.lock().push(Call::Mkdir(path.to_path_buf()));
        self.existing.lock().push(path.to_path_buf());
        Ok(())
    }

    fn write_file(&self, _path: &Path, _contents: &[u8]) -> io::Result<()> {
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.existing.lock().iter().any(|p| p == path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.calls.lock().push(Call::RemoveDir(path.to_path_buf()));
        self.existing.lock().retain(|p| p != path);
        Ok(())
    }

    fn run_command(&self, _program: &Path, _args: &[String]) -> io::Result<CommandOutput> {
        Ok(CommandOutput {
            code: Some(0),
            output: String::new(),
        })
    }

    fn mount(&self, request: &MountRequest, target: &Path) -> io::Result<()> {
        if let Some(kind) = self.mount_failures.lock().pop_front() {
            return Err(io::Error::from(kind));
        }
        self.calls
            .lock()
            .push(Call::Mount(request.clone(), target.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        self.calls.lock().push(Call::Unmount(target.to_path_buf()));
        Ok(())
    }

    fn scsi_device_name(&self, controller: u8, lun: u8) -> io::Result<String> {
        Ok(format!("/dev/sd{controller}{lun}"))
    }

    fn unplug_scsi_disk(&self, _address: &str) -> io::Result<()> {
        Ok(())
    }

    fn instance_id_to_name(&self, _instance_id: &str) -> io::Result<String> {
        Err(io::Error::from(io::ErrorKind::NotFound))
    }

    fn kill(&self, _pid: u32, _signal: Signal) -> io::Result<()> {
        Ok(())
    }

    fn power_off(&self) -> io::Result<()> {
        Ok(())
    }
}
