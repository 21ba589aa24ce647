//! Maps host-facing requests onto host, container, and process operations.
//!
//! The wire encoding of the orchestration protocol lives outside this crate;
//! a listener decodes each message into a [`Request`] and hands it to
//! [`Bridge::handle`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use gcs_common::error::{GcsError, Result};
use gcs_common::oci;
use gcs_common::types::{ContainerId, ContainerSettings, ModifySettingRequest, Signal};

use crate::host::Host;
use crate::process::WaitCompletion;
use crate::stdio::ConnectionSettings;

/// A decoded request from the host orchestrator.
#[derive(Debug, Clone)]
pub enum Request {
    /// Create a container, or return the existing one with this id.
    CreateContainer {
        /// Id of the container.
        container_id: ContainerId,
        /// Bundle path and specification.
        settings: ContainerSettings,
    },
    /// Start a container's init process.
    StartContainer {
        /// Id of the container.
        container_id: ContainerId,
        /// Stdio ports.
        stdio: ConnectionSettings,
    },
    /// Start an additional process in a container.
    ExecProcess {
        /// Id of the container.
        container_id: ContainerId,
        /// Process to run.
        process: oci::Process,
        /// Stdio ports.
        stdio: ConnectionSettings,
    },
    /// Block until every process of a container has exited.
    WaitContainer {
        /// Id of the container.
        container_id: ContainerId,
    },
    /// Signal a whole container.
    KillContainer {
        /// Id of the container.
        container_id: ContainerId,
        /// Signal to deliver.
        signal: Signal,
    },
    /// Wait for one process's exit code.
    WaitProcess {
        /// Id of the container.
        container_id: ContainerId,
        /// Process id.
        pid: u32,
        /// Give up after this long; wait indefinitely when absent.
        timeout: Option<Duration>,
    },
    /// Signal a single process.
    SignalProcess {
        /// Id of the container.
        container_id: ContainerId,
        /// Process id.
        pid: u32,
        /// Signal to deliver.
        signal: Signal,
    },
    /// Resize a process's terminal.
    ResizeConsole {
        /// Id of the container.
        container_id: ContainerId,
        /// Process id.
        pid: u32,
        /// Rows.
        height: u16,
        /// Columns.
        width: u16,
    },
    /// Hot-plug a resource.
    ModifySettings {
        /// Target container; the reserved VM id addresses the VM itself.
        container_id: ContainerId,
        /// The modification.
        request: ModifySettingRequest,
    },
    /// List every known process id.
    GetProcessList,
    /// Power off the VM.
    Shutdown,
}

/// Payload of a successful reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Nothing to report.
    Empty,
    /// A process id.
    Pid(u32),
    /// An exit code.
    ExitCode(i32),
    /// A snapshot of process ids.
    ProcessList(Vec<u32>),
}

/// Outcome of a handled request.
#[derive(Debug)]
pub struct Reply {
    /// What to send back.
    pub response: Response,
    /// For a process wait, the completion to signal once the response has
    /// been delivered to the host.
    pub completion: Option<WaitCompletion>,
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            response,
            completion: None,
        }
    }
}

/// Dispatches requests to a [`Host`].
#[derive(Debug, Clone)]
pub struct Bridge {
    host: Arc<Host>,
}

impl Bridge {
    /// Creates a bridge over `host`.
    #[must_use]
    pub const fn new(host: Arc<Host>) -> Self {
        Self { host }
    }

    /// The host requests are dispatched to.
    #[must_use]
    pub const fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// Returns the error of the operation the request maps to.
    pub fn handle(&self, request: Request) -> Result<Reply> {
        match request {
            Request::CreateContainer {
                container_id,
                settings,
            } => {
                let _ = self.host.create_container(&container_id, settings)?;
                Ok(Response::Empty.into())
            }
            Request::StartContainer {
                container_id,
                stdio,
            } => {
                let pid = self.host.get_container(&container_id)?.start(&stdio)?;
                Ok(Response::Pid(pid).into())
            }
            Request::ExecProcess {
                container_id,
                process,
                stdio,
            } => {
                let pid = self
                    .host
                    .get_container(&container_id)?
                    .exec_process(&process, &stdio)?;
                Ok(Response::Pid(pid).into())
            }
            Request::WaitContainer { container_id } => {
                let code = self.host.get_container(&container_id)?.wait();
                Ok(Response::ExitCode(code).into())
            }
            Request::KillContainer {
                container_id,
                signal,
            } => {
                self.host.get_container(&container_id)?.kill(signal)?;
                Ok(Response::Empty.into())
            }
            Request::WaitProcess {
                container_id,
                pid,
                timeout,
            } => self.wait_process(&container_id, pid, timeout),
            Request::SignalProcess {
                container_id,
                pid,
                signal,
            } => {
                self.host
                    .get_container(&container_id)?
                    .get_process(pid)?
                    .kill(self.host.os(), signal)?;
                Ok(Response::Empty.into())
            }
            Request::ResizeConsole {
                container_id,
                pid,
                height,
                width,
            } => {
                self.host
                    .get_container(&container_id)?
                    .get_process(pid)?
                    .resize_console(height, width)?;
                Ok(Response::Empty.into())
            }
            Request::ModifySettings {
                container_id,
                request,
            } => {
                if !container_id.is_uvm() {
                    return Err(GcsError::Unsupported {
                        message: format!(
                            "modifying settings of container {container_id} is not supported"
                        ),
                    });
                }
                self.host.modify_host_settings(&request)?;
                Ok(Response::Empty.into())
            }
            Request::GetProcessList => {
                Ok(Response::ProcessList(self.host.get_all_process_pids()).into())
            }
            Request::Shutdown => {
                self.host.shutdown()?;
                Ok(Response::Empty.into())
            }
        }
    }

    fn wait_process(
        &self,
        container_id: &ContainerId,
        pid: u32,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        let process = self.host.get_container(container_id)?.get_process(pid)?;
        let (exit_code, completion) = process.wait()?;
        let start = Instant::now();

        let received = match timeout {
            Some(timeout) => exit_code.recv_timeout(timeout).map_err(|e| match e {
                flume::RecvTimeoutError::Timeout => GcsError::Timeout {
                    operation: format!("waiting for process {pid} in container {container_id}"),
                    elapsed: start.elapsed(),
                },
                flume::RecvTimeoutError::Disconnected => exit_channel_closed(pid),
            }),
            None => exit_code.recv().map_err(|_| exit_channel_closed(pid)),
        };
        match received {
            Ok(code) => Ok(Reply {
                response: Response::ExitCode(code),
                completion: Some(completion),
            }),
            Err(e) => {
                completion.complete();
                Err(e)
            }
        }
    }
}

fn exit_channel_closed(pid: u32) -> GcsError {
    GcsError::Runtime {
        message: format!("exit code channel of process {pid} closed before delivery"),
    }
}
