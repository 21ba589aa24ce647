//! Fake collaborators shared by the integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use gcs_common::config::GcsConfig;
use gcs_common::error::{GcsError, Result};
use gcs_common::oci;
use gcs_common::types::{ContainerId, ContainerSettings, NetworkAdapter, Signal};
use gcs_core::filesystem::mount::MountRequest;
use gcs_core::oslayer::{CommandOutput, OsLayer};
use gcs_core::transport::{Connection, Transport};
use gcs_runtime::backend::{
    PipeRelay, Runtime, RuntimeContainer, RuntimeProcess, TtyRelay,
};
use gcs_runtime::host::Host;
use gcs_runtime::stdio::ConnectionSet;
use parking_lot::Mutex;

/// Installs a test-writer subscriber once per test binary.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Runtime ──────────────────────────────────────────────────────────

/// Process whose exit is driven from the test through a channel.
pub struct FakeProcess {
    pid: u32,
    exit: flume::Receiver<i32>,
}

impl RuntimeProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn wait(&self) -> Result<i32> {
        self.exit.recv().map_err(|_| GcsError::Runtime {
            message: format!("process {} vanished", self.pid),
        })
    }

    fn tty(&self) -> Option<Arc<dyn TtyRelay>> {
        None
    }
}

#[derive(Default)]
pub struct FakeRelay {
    pub started: AtomicBool,
    pub pipes_closed: AtomicBool,
    pub connected: Mutex<Option<Arc<ConnectionSet>>>,
}

impl PipeRelay for FakeRelay {
    fn replace_connection_set(&self, set: Arc<ConnectionSet>) {
        *self.connected.lock() = Some(set);
    }

    fn close_unused_pipes(&self) {
        self.pipes_closed.store(true, Ordering::SeqCst);
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }
}

pub struct RuntimeState {
    next_pid: AtomicU32,
    exits: Mutex<HashMap<u32, flume::Sender<i32>>>,
    exec_pids: Mutex<VecDeque<u32>>,
    pub creates: AtomicUsize,
    pub fail_exec: AtomicBool,
    pub fail_start: AtomicBool,
    pub signals: Mutex<Vec<(ContainerId, Signal)>>,
    pub relay: Arc<FakeRelay>,
    pub exec_stdio: Mutex<Option<Arc<ConnectionSet>>>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(100),
            exits: Mutex::new(HashMap::new()),
            exec_pids: Mutex::new(VecDeque::new()),
            creates: AtomicUsize::new(0),
            fail_exec: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            signals: Mutex::new(Vec::new()),
            relay: Arc::new(FakeRelay::default()),
            exec_stdio: Mutex::new(None),
        }
    }
}

impl RuntimeState {
    fn new_process(&self, pid: u32) -> Arc<FakeProcess> {
        let (tx, rx) = flume::bounded(1);
        let _ = self.exits.lock().insert(pid, tx);
        Arc::new(FakeProcess { pid, exit: rx })
    }

    fn allocate_pid(&self) -> u32 {
        self.exec_pids
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.next_pid.fetch_add(1, Ordering::SeqCst))
    }
}

/// Runtime handing out fake containers and processes.
#[derive(Default)]
pub struct FakeRuntime {
    pub state: Arc<RuntimeState>,
}

impl FakeRuntime {
    /// Makes the process with `pid` exit with `code`.
    pub fn exit(&self, pid: u32, code: i32) {
        let sender = self
            .state
            .exits
            .lock()
            .remove(&pid)
            .expect("process is running");
        sender.send(code).expect("process is waiting");
    }

    /// Makes the next exec'd process get `pid`.
    pub fn queue_exec_pid(&self, pid: u32) {
        self.state.exec_pids.lock().push_back(pid);
    }

    pub fn creates(&self) -> usize {
        self.state.creates.load(Ordering::SeqCst)
    }
}

impl Runtime for FakeRuntime {
    fn create_container(
        &self,
        id: &ContainerId,
        _bundle_path: &Path,
        _spec: &oci::Spec,
    ) -> Result<Arc<dyn RuntimeContainer>> {
        let _ = self.state.creates.fetch_add(1, Ordering::SeqCst);
        let pid = self.state.allocate_pid();
        let init = self.state.new_process(pid);
        Ok(Arc::new(FakeContainer {
            id: id.clone(),
            init,
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeContainer {
    id: ContainerId,
    init: Arc<FakeProcess>,
    state: Arc<RuntimeState>,
}

impl RuntimeContainer for FakeContainer {
    fn pid(&self) -> u32 {
        self.init.pid
    }

    fn init_process(&self) -> Arc<dyn RuntimeProcess> {
        Arc::clone(&self.init) as Arc<dyn RuntimeProcess>
    }

    fn start(&self) -> Result<()> {
        if self.state.fail_start.load(Ordering::SeqCst) {
            return Err(GcsError::Runtime {
                message: "start refused".into(),
            });
        }
        Ok(())
    }

    fn exec_process(
        &self,
        _spec: &oci::Process,
        stdio: Arc<ConnectionSet>,
    ) -> Result<Arc<dyn RuntimeProcess>> {
        *self.state.exec_stdio.lock() = Some(stdio);
        if self.state.fail_exec.load(Ordering::SeqCst) {
            return Err(GcsError::Runtime {
                message: "exec refused".into(),
            });
        }
        let pid = self.state.allocate_pid();
        Ok(self.state.new_process(pid))
    }

    fn kill(&self, signal: Signal) -> Result<()> {
        self.state.signals.lock().push((self.id.clone(), signal));
        Ok(())
    }

    fn tty(&self) -> Option<Arc<dyn TtyRelay>> {
        None
    }

    fn pipe_relay(&self) -> Option<Arc<dyn PipeRelay>> {
        Some(Arc::clone(&self.state.relay) as Arc<dyn PipeRelay>)
    }
}

// ── OS layer ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsCall {
    Mkdir(PathBuf),
    WriteFile(PathBuf),
    Command(PathBuf, Vec<String>),
    Mount(MountRequest, PathBuf),
    Unmount(PathBuf),
    RemoveDir(PathBuf),
    Unplug(String),
    Kill(u32, Signal),
    PowerOff,
}

/// OS layer that records every call and resolves adapters from a table.
pub struct FakeOs {
    pub calls: Mutex<Vec<OsCall>>,
    pub existing: Mutex<Vec<PathBuf>>,
    pub files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    pub interfaces: Mutex<HashMap<String, String>>,
    pub command_result: Mutex<CommandOutput>,
}

impl Default for FakeOs {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            existing: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            interfaces: Mutex::new(HashMap::new()),
            command_result: Mutex::new(CommandOutput {
                code: Some(0),
                output: String::new(),
            }),
        }
    }
}

impl FakeOs {
    pub fn calls(&self) -> Vec<OsCall> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OsCall::Command(program, args) => Some((program, args)),
                _ => None,
            })
            .collect()
    }

    pub fn mounts(&self) -> Vec<(MountRequest, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OsCall::Mount(request, target) => Some((request, target)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&OsCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Makes the adapter with `instance_id` enumerate as `name`.
    pub fn enumerate(&self, instance_id: &str, name: &str) {
        let _ = self
            .interfaces
            .lock()
            .insert(instance_id.to_owned(), name.to_owned());
    }

    fn record(&self, call: OsCall) {
        self.calls.lock().push(call);
    }
}

impl OsLayer for FakeOs {
    fn mkdir_all(&self, path: &Path, _mode: u32) -> io::Result<()> {
        self.record(OsCall::Mkdir(path.to_path_buf()));
        self.existing.lock().push(path.to_path_buf());
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.record(OsCall::WriteFile(path.to_path_buf()));
        let _ = self
            .files
            .lock()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.existing.lock().iter().any(|p| p == path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.record(OsCall::RemoveDir(path.to_path_buf()));
        self.existing.lock().retain(|p| p != path);
        Ok(())
    }

    fn run_command(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput> {
        self.record(OsCall::Command(program.to_path_buf(), args.to_vec()));
        Ok(self.command_result.lock().clone())
    }

    fn mount(&self, request: &MountRequest, target: &Path) -> io::Result<()> {
        self.record(OsCall::Mount(request.clone(), target.to_path_buf()));
        self.existing.lock().push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        self.record(OsCall::Unmount(target.to_path_buf()));
        Ok(())
    }

    fn scsi_device_name(&self, controller: u8, lun: u8) -> io::Result<String> {
        Ok(format!("/dev/sd{controller}{lun}"))
    }

    fn unplug_scsi_disk(&self, address: &str) -> io::Result<()> {
        self.record(OsCall::Unplug(address.to_owned()));
        Ok(())
    }

    fn instance_id_to_name(&self, instance_id: &str) -> io::Result<String> {
        self.interfaces
            .lock()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn kill(&self, pid: u32, signal: Signal) -> io::Result<()> {
        self.record(OsCall::Kill(pid, signal));
        Ok(())
    }

    fn power_off(&self) -> io::Result<()> {
        self.record(OsCall::PowerOff);
        Ok(())
    }
}

// ── Transport ────────────────────────────────────────────────────────

pub struct NullConnection;

impl io::Read for NullConnection {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl io::Write for NullConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for NullConnection {
    fn raw_fd(&self) -> RawFd {
        -1
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Transport whose every dial succeeds.
#[derive(Default)]
pub struct FakeTransport {
    pub dials: Mutex<Vec<u32>>,
}

impl Transport for FakeTransport {
    fn dial(&self, port: u32) -> io::Result<Box<dyn Connection>> {
        self.dials.lock().push(port);
        Ok(Box::new(NullConnection))
    }
}

// ── Fixture ──────────────────────────────────────────────────────────

pub struct Fixture {
    pub host: Arc<Host>,
    pub runtime: Arc<FakeRuntime>,
    pub os: Arc<FakeOs>,
    pub transport: Arc<FakeTransport>,
}

/// Config with short mount retries so failing tests end quickly.
pub fn test_config() -> GcsConfig {
    GcsConfig {
        mount_retry_interval_ms: 1,
        mount_retry_timeout_ms: 50,
        ..GcsConfig::default()
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GcsConfig) -> Self {
        init_logging();
        let runtime = Arc::new(FakeRuntime::default());
        let os = Arc::new(FakeOs::default());
        let transport = Arc::new(FakeTransport::default());
        let host = Arc::new(Host::new(
            Arc::clone(&runtime) as Arc<dyn Runtime>,
            Arc::clone(&os) as Arc<dyn OsLayer>,
            Arc::clone(&transport) as Arc<dyn Transport>,
            config,
        ));
        Self {
            host,
            runtime,
            os,
            transport,
        }
    }
}

/// Settings for a container with an optional network namespace.
pub fn container_settings(name: &str, namespace: Option<&str>) -> ContainerSettings {
    let mut spec = oci::Spec {
        oci_version: "1.0.2".into(),
        process: Some(oci::Process {
            args: vec!["/bin/sh".into()],
            cwd: "/".into(),
            ..oci::Process::default()
        }),
        ..oci::Spec::default()
    };
    if let Some(namespace) = namespace {
        spec.windows = Some(oci::Windows {
            network: Some(oci::WindowsNetwork {
                network_namespace: namespace.into(),
            }),
        });
    }
    ContainerSettings {
        bundle_path: PathBuf::from(format!("/run/gcs/c/{name}")),
        spec,
    }
}

pub fn adapter(id: &str, namespace: &str) -> NetworkAdapter {
    NetworkAdapter {
        id: id.into(),
        namespace_id: namespace.into(),
        ip_address: "10.0.0.2".into(),
        prefix_length: 24,
        gateway_address: "10.0.0.1".into(),
        ..NetworkAdapter::default()
    }
}
