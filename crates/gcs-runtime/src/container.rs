//! A container created by the runtime and the processes running in it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gcs_common::config::GcsConfig;
use gcs_common::constants::UNKNOWN_EXIT_CODE;
use gcs_common::error::{GcsError, Result};
use gcs_common::oci;
use gcs_common::types::{ContainerId, LegacyNetworkAdapter, NetworkAdapter, Signal};
use gcs_core::oslayer::OsLayer;
use gcs_core::transport::Transport;

use crate::backend::RuntimeContainer;
use crate::process::{ProcessHandle, ProcessTable};
use crate::stdio::{self, ConnectionSettings};

/// A container instance with its init process and exec'd processes.
pub struct Container {
    id: ContainerId,
    spec: oci::Spec,
    bundle_path: PathBuf,
    created_at: DateTime<Utc>,
    runtime: Arc<dyn RuntimeContainer>,
    transport: Arc<dyn Transport>,
    config: Arc<GcsConfig>,
    init: Arc<ProcessHandle>,
    table: Arc<ProcessTable>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("bundle_path", &self.bundle_path)
            .field("created_at", &self.created_at)
            .field("init", &self.init)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Wraps a runtime container and starts watching its init process.
    ///
    /// The active-process counter starts at one for the init process.
    ///
    /// # Errors
    ///
    /// Returns an error if the init process watcher cannot be started.
    pub fn new(
        id: ContainerId,
        spec: oci::Spec,
        bundle_path: PathBuf,
        runtime: Arc<dyn RuntimeContainer>,
        transport: Arc<dyn Transport>,
        config: Arc<GcsConfig>,
    ) -> Result<Self> {
        let table = Arc::new(ProcessTable::new(1));
        let init = ProcessHandle::spawn(
            id.clone(),
            runtime.init_process(),
            spec.process.clone().unwrap_or_default(),
            Arc::clone(&table),
        )?;
        Ok(Self {
            id,
            spec,
            bundle_path,
            created_at: Utc::now(),
            runtime,
            transport,
            config,
            init,
            table,
        })
    }

    /// Container id.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// The OCI specification the container was created from.
    #[must_use]
    pub const fn spec(&self) -> &oci::Spec {
        &self.spec
    }

    /// Bundle directory holding the written specification.
    #[must_use]
    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    /// When the container was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The container's init process.
    #[must_use]
    pub const fn init_process(&self) -> &Arc<ProcessHandle> {
        &self.init
    }

    /// Connects stdio to the init process and starts it.
    ///
    /// The init process gets a terminal relay if its specification asks for
    /// a terminal, a pipe relay otherwise. Stdio is closed if the start fails.
    ///
    /// # Errors
    ///
    /// Returns an error if stdio cannot be connected or the runtime fails to
    /// start the container.
    pub fn start(&self, settings: &ConnectionSettings) -> Result<u32> {
        let stdio = stdio::connect(self.transport.as_ref(), settings)?;
        if self.spec.has_terminal() {
            if let Some(tty) = self.runtime.tty() {
                tty.replace_connection_set(Arc::clone(&stdio));
                tty.start();
            } else {
                tracing::warn!(cid = %self.id, "terminal requested but runtime has no tty relay");
            }
        } else if let Some(relay) = self.runtime.pipe_relay() {
            relay.replace_connection_set(Arc::clone(&stdio));
            relay.close_unused_pipes();
            relay.start();
        }

        if let Err(e) = self.runtime.start() {
            stdio.close();
            return Err(e);
        }
        let pid = self.init.pid();
        tracing::info!(cid = %self.id, pid, "container started");
        Ok(pid)
    }

    /// Starts an additional process in the container.
    ///
    /// The active-process counter is raised before the runtime is asked to
    /// exec, so an in-flight [`wait`](Self::wait) cannot drain in between.
    ///
    /// # Errors
    ///
    /// Returns an error if stdio cannot be connected or the runtime fails to
    /// exec the process; the counter and stdio are rolled back.
    pub fn exec_process(&self, spec: &oci::Process, settings: &ConnectionSettings) -> Result<u32> {
        let stdio = stdio::connect(self.transport.as_ref(), settings)?;
        self.table.active().add(1);

        let tracked = self
            .runtime
            .exec_process(spec, Arc::clone(&stdio))
            .and_then(|process| {
                ProcessHandle::spawn(
                    self.id.clone(),
                    process,
                    spec.clone(),
                    Arc::clone(&self.table),
                )
            });
        let handle = match tracked {
            Ok(handle) => handle,
            Err(e) => {
                let _ = self.table.active().done();
                stdio.close();
                tracing::warn!(cid = %self.id, error = %e, "exec failed, stdio closed");
                return Err(e);
            }
        };

        let pid = handle.pid();
        self.table.insert(handle);
        tracing::info!(cid = %self.id, pid, "process exec'd");
        Ok(pid)
    }

    /// Looks up the init process or an exec'd process by pid.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::NotFound`] if no such process is tracked.
    pub fn get_process(&self, pid: u32) -> Result<Arc<ProcessHandle>> {
        if pid == self.init.pid() {
            return Ok(Arc::clone(&self.init));
        }
        self.table
            .get(pid)
            .ok_or_else(|| GcsError::process_not_found(pid))
    }

    /// Sends `signal` to the whole container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot deliver the signal.
    pub fn kill(&self, signal: Signal) -> Result<()> {
        self.runtime.kill(signal)?;
        tracing::info!(cid = %self.id, %signal, "signalled container");
        Ok(())
    }

    /// Blocks until the init process and every exec'd process have exited,
    /// then returns the init process's exit code.
    pub fn wait(&self) -> i32 {
        self.table.active().wait();
        let code = self.init.exit_code().unwrap_or(UNKNOWN_EXIT_CODE);
        tracing::info!(cid = %self.id, exit_code = code, "container exited");
        code
    }

    /// Pids of the init process and every tracked exec'd process.
    #[must_use]
    pub fn process_pids(&self) -> Vec<u32> {
        let mut pids = vec![self.init.pid()];
        pids.extend(self.table.pids());
        pids
    }

    /// Number of processes the container tracks, init included.
    #[must_use]
    pub fn process_count(&self) -> usize {
        self.table.len() + 1
    }

    /// Number of processes that have not exited yet.
    #[must_use]
    pub fn active_process_count(&self) -> usize {
        self.table.active().count()
    }

    /// Moves a hot-plugged network adapter into the container's network
    /// namespace.
    ///
    /// Waits for the adapter's interface to be enumerated, then runs the
    /// namespace helper against the init process.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::Timeout`] if the interface does not appear in
    /// time, or [`GcsError::Command`] if the helper fails.
    pub fn add_network_adapter(&self, os: &dyn OsLayer, adapter: &NetworkAdapter) -> Result<()> {
        let legacy = serde_json::to_string(&LegacyNetworkAdapter::from(adapter))?;
        let adapter_id = adapter.id.to_lowercase();
        let interface = wait_for_interface(
            os,
            &adapter_id,
            self.config.adapter_poll_interval(),
            self.config.adapter_timeout(),
        )?;

        let helper = &self.config.netns_helper;
        let args = vec![
            "-if".to_owned(),
            interface.clone(),
            "-nspid".to_owned(),
            self.init.pid().to_string(),
            "-cfg".to_owned(),
            legacy,
        ];
        let output = os
            .run_command(helper, &args)
            .map_err(|e| GcsError::os(format!("run {}", helper.display()), e))?;
        if !output.success() {
            return Err(GcsError::Command {
                command: format!("{} {}", helper.display(), args.join(" ")),
                status: output.code,
                output: output.output,
            });
        }

        tracing::info!(
            cid = %self.id,
            adapter_id = %adapter_id,
            interface = %interface,
            "network adapter moved into container namespace"
        );
        Ok(())
    }

    /// Hot-removal of network adapters is not supported.
    ///
    /// # Errors
    ///
    /// Always returns [`GcsError::Unsupported`].
    pub fn remove_network_adapter(&self, _os: &dyn OsLayer, adapter_id: &str) -> Result<()> {
        Err(GcsError::Unsupported {
            message: format!(
                "removing network adapter {adapter_id} from container {} is not supported",
                self.id
            ),
        })
    }
}

/// Polls until the interface for `instance_id` is enumerated.
fn wait_for_interface(
    os: &dyn OsLayer,
    instance_id: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<String> {
    let start = Instant::now();
    loop {
        match os.instance_id_to_name(instance_id) {
            Ok(name) => return Ok(name),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(GcsError::os(
                    format!("resolve interface for adapter {instance_id}"),
                    e,
                ));
            }
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(GcsError::Timeout {
                operation: format!("waiting for interface of adapter {instance_id}"),
                elapsed,
            });
        }
        std::thread::sleep(interval);
    }
}
