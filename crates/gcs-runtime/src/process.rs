//! Process handles and their exit, wait, and reclaim protocol.
//!
//! A handle moves through `Running -> Exited -> Reclaimable -> Reclaimed`.
//! Exit is observed by a watcher thread started with the handle. Any number
//! of callers may [`wait`](ProcessHandle::wait) for the exit code; the
//! handle stays in its container's table until every waiter has signalled
//! completion and at least one of them actually received the code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use gcs_common::constants::UNKNOWN_EXIT_CODE;
use gcs_common::error::{GcsError, Result};
use gcs_common::oci;
use gcs_common::types::{ContainerId, Signal};
use gcs_core::oslayer::OsLayer;
use parking_lot::Mutex;

use crate::backend::RuntimeProcess;
use crate::sync::WaitGroup;

/// Lifecycle state of a [`ProcessHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The OS process has not exited.
    Running,
    /// The exit code is known and some waiter references are outstanding.
    Exited,
    /// Every waiter reference is released; removal from the table is pending.
    Reclaimable,
    /// The handle has been removed from its container's table.
    Reclaimed,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Reclaimable => "reclaimable",
            Self::Reclaimed => "reclaimed",
        };
        f.write_str(s)
    }
}

/// A container's table of exec'd processes and its live-process counter.
///
/// The counter covers the init process too; the table never does.
#[derive(Debug)]
pub struct ProcessTable {
    processes: Mutex<HashMap<u32, Arc<ProcessHandle>>>,
    active: WaitGroup,
}

impl ProcessTable {
    /// Creates an empty table whose counter starts at `active`.
    #[must_use]
    pub fn new(active: usize) -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            active: WaitGroup::with_count(active),
        }
    }

    /// Counter of processes that have not exited yet.
    #[must_use]
    pub const fn active(&self) -> &WaitGroup {
        &self.active
    }

    /// Looks up an exec'd process.
    #[must_use]
    pub fn get(&self, pid: u32) -> Option<Arc<ProcessHandle>> {
        self.processes.lock().get(&pid).cloned()
    }

    /// Registers `handle` under its pid.
    pub fn insert(&self, handle: Arc<ProcessHandle>) {
        if let Some(previous) = self.processes.lock().insert(handle.pid(), handle) {
            tracing::warn!(
                pid = previous.pid(),
                state = %previous.state(),
                "process id reused before the previous handle was reclaimed"
            );
        }
    }

    /// Removes the entry for `pid` only if it is `handle` itself.
    ///
    /// Returns `true` if the entry was removed.
    pub fn remove_if_same(&self, pid: u32, handle: &Arc<ProcessHandle>) -> bool {
        let mut processes = self.processes.lock();
        match processes.get(&pid) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                let _ = processes.remove(&pid);
                true
            }
            _ => false,
        }
    }

    /// Pids of every registered process.
    #[must_use]
    pub fn pids(&self) -> Vec<u32> {
        self.processes.lock().keys().copied().collect()
    }

    /// Number of registered processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    /// Returns `true` if no process is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.lock().is_empty()
    }
}

/// Completion signal handed to each [`ProcessHandle::wait`] caller.
///
/// Calling [`complete`](Self::complete) or dropping the value both count as
/// completion. Completing before the exit code arrives cancels the wait.
#[derive(Debug)]
pub struct WaitCompletion {
    done: flume::Sender<()>,
}

impl WaitCompletion {
    /// Signals that the caller is done with this wait.
    pub fn complete(self) {
        let _ = self.done.send(());
    }
}

enum WaiterEvent {
    Exited,
    Cancelled,
}

/// One OS process running inside a container.
pub struct ProcessHandle {
    container_id: ContainerId,
    pid: u32,
    process: Arc<dyn RuntimeProcess>,
    spec: oci::Process,
    exit_code: OnceLock<i32>,
    exited: flume::Receiver<()>,
    waiters: WaitGroup,
    settled: AtomicBool,
    reclaimed: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("container_id", &self.container_id)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .field("waiter_refs", &self.waiters.count())
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Wraps a started runtime process and begins watching for its exit.
    ///
    /// When the process exits, `table`'s active counter is released. Once all
    /// waiter references are gone the handle removes itself from `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher thread cannot be spawned.
    pub fn spawn(
        container_id: ContainerId,
        process: Arc<dyn RuntimeProcess>,
        spec: oci::Process,
        table: Arc<ProcessTable>,
    ) -> Result<Arc<Self>> {
        let pid = process.pid();
        let (announce, exited) = flume::bounded::<()>(0);
        let handle = Arc::new(Self {
            container_id,
            pid,
            process,
            spec,
            exit_code: OnceLock::new(),
            exited,
            waiters: WaitGroup::with_count(1),
            settled: AtomicBool::new(false),
            reclaimed: AtomicBool::new(false),
            watcher: Mutex::new(None),
        });

        let watched = Arc::clone(&handle);
        let watcher = thread::Builder::new()
            .name(format!("gcs-exit-{pid}"))
            .spawn(move || watched.watch(announce, &table))
            .map_err(|e| GcsError::os(format!("spawn exit watcher for process {pid}"), e))?;
        *handle.watcher.lock() = Some(watcher);

        tracing::debug!(cid = %handle.container_id, pid, "process handle created");
        Ok(handle)
    }

    fn watch(self: Arc<Self>, announce: flume::Sender<()>, table: &ProcessTable) {
        let code = match self.process.wait() {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(
                    cid = %self.container_id,
                    pid = self.pid,
                    error = %e,
                    "failed to wait for process exit"
                );
                UNKNOWN_EXIT_CODE
            }
        };
        let _ = self.exit_code.set(code);
        drop(announce);
        tracing::info!(cid = %self.container_id, pid = self.pid, exit_code = code, "process exited");
        let _ = table.active.done();

        self.waiters.wait();
        let removed = table.remove_if_same(self.pid, &self);
        self.reclaimed.store(true, Ordering::Release);
        tracing::info!(
            cid = %self.container_id,
            pid = self.pid,
            removed,
            "process reclaimed"
        );
    }

    /// Registers a waiter for the exit code.
    ///
    /// The receiver yields the exit code once the process exits. The caller
    /// must signal the returned [`WaitCompletion`] exactly once, after it has
    /// consumed the code or when it gives up waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the waiter thread cannot be spawned; no reference
    /// is held in that case.
    pub fn wait(self: &Arc<Self>) -> Result<(flume::Receiver<i32>, WaitCompletion)> {
        self.waiters.add(1);
        let (code_tx, code_rx) = flume::bounded(1);
        let (done_tx, done_rx) = flume::bounded(1);

        let handle = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("gcs-wait-{}", self.pid))
            .spawn(move || handle.serve_waiter(&code_tx, &done_rx));
        if let Err(e) = spawned {
            let _ = self.waiters.done();
            return Err(GcsError::os(
                format!("spawn waiter for process {}", self.pid),
                e,
            ));
        }

        tracing::debug!(
            cid = %self.container_id,
            pid = self.pid,
            refs = self.waiters.count(),
            "waiter registered"
        );
        Ok((code_rx, WaitCompletion { done: done_tx }))
    }

    fn serve_waiter(&self, code_tx: &flume::Sender<i32>, done_rx: &flume::Receiver<()>) {
        // A completion that is already pending wins over an exit that
        // raced it.
        let event = if matches!(done_rx.try_recv(), Err(flume::TryRecvError::Empty)) {
            let exited = self.exited.clone();
            flume::Selector::new()
                .recv(&exited, |_| WaiterEvent::Exited)
                .recv(done_rx, |_| WaiterEvent::Cancelled)
                .wait()
        } else {
            WaiterEvent::Cancelled
        };

        match event {
            WaiterEvent::Exited => {
                let code = self.exit_code.get().copied().unwrap_or(UNKNOWN_EXIT_CODE);
                let _ = code_tx.send(code);
                let _ = done_rx.recv();
                self.release_waiter(true);
            }
            WaiterEvent::Cancelled => {
                tracing::debug!(
                    cid = %self.container_id,
                    pid = self.pid,
                    "waiter cancelled before exit"
                );
                self.release_waiter(false);
            }
        }
    }

    fn release_waiter(&self, delivered: bool) {
        let settles = delivered && !self.settled.swap(true, Ordering::AcqRel);
        let mut remaining = self.waiters.done();
        if settles {
            remaining = self.waiters.done();
            tracing::debug!(cid = %self.container_id, pid = self.pid, "first waiter settled");
        }
        tracing::debug!(
            cid = %self.container_id,
            pid = self.pid,
            remaining,
            "waiter released"
        );
    }

    /// OS process id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Id of the owning container.
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// The process specification it was started with.
    #[must_use]
    pub const fn spec(&self) -> &oci::Process {
        &self.spec
    }

    /// Exit code, once the exit has been observed.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied()
    }

    /// Outstanding waiter references, including the reserved one until it
    /// is settled.
    #[must_use]
    pub fn waiter_refs(&self) -> usize {
        self.waiters.count()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        if self.reclaimed.load(Ordering::Acquire) {
            ProcessState::Reclaimed
        } else if self.exit_code.get().is_none() {
            ProcessState::Running
        } else if self.waiters.count() == 0 {
            ProcessState::Reclaimable
        } else {
            ProcessState::Exited
        }
    }

    /// Sends `signal` to this process directly, bypassing the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    pub fn kill(&self, os: &dyn OsLayer, signal: Signal) -> Result<()> {
        os.kill(self.pid, signal)
            .map_err(|e| GcsError::os(format!("send {signal} to process {}", self.pid), e))?;
        tracing::info!(cid = %self.container_id, pid = self.pid, %signal, "signalled process");
        Ok(())
    }

    /// Resizes the process's terminal.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::Unsupported`] if the process has no terminal.
    pub fn resize_console(&self, height: u16, width: u16) -> Result<()> {
        let tty = self
            .process
            .tty()
            .filter(|_| self.spec.terminal)
            .ok_or_else(|| GcsError::Unsupported {
                message: format!("process {} has no terminal to resize", self.pid),
            })?;
        tty.resize_console(height, width)
    }

    /// Blocks until the watcher thread has reclaimed the handle.
    ///
    /// Must not be called from a waiter that still holds an uncompleted
    /// [`WaitCompletion`] for this handle.
    pub fn join_watcher(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            if watcher.join().is_err() {
                tracing::error!(pid = self.pid, "exit watcher panicked");
            }
        }
    }
}
