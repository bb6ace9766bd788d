//! # Managed Child Processes
//!
//! Each spawned process gets a supervisor task that owns the `Child` and waits for
//! whichever comes first: natural exit, the optional timeout, or a stop request.
//! A graceful stop asks the process to close (stdin closed, SIGTERM on unix) and
//! escalates to a kill once the grace period elapses or a forced stop arrives.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::stats::ResourceCounters;
use crate::error::{HostError, Result};

/// What to launch
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Exited { code: Option<i32> },
    Killed,
    TimedOut,
    Failed { message: String },
}

impl ProcessState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopMode {
    Graceful,
    Force,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagedProcessInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub program: String,
    pub started_at: DateTime<Utc>,
    pub timeout_ms: Option<u64>,
    pub state: ProcessState,
}

struct ManagedProcess {
    id: String,
    pid: Option<u32>,
    program: String,
    started_at: DateTime<Utc>,
    timeout: Option<Duration>,
    control: mpsc::UnboundedSender<StopMode>,
    state: watch::Receiver<ProcessState>,
}

impl ManagedProcess {
    fn info(&self) -> ManagedProcessInfo {
        ManagedProcessInfo {
            id: self.id.clone(),
            pid: self.pid,
            program: self.program.clone(),
            started_at: self.started_at,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
            state: self.state.borrow().clone(),
        }
    }
}

pub(crate) struct ProcessRegistry {
    processes: DashMap<String, ManagedProcess>,
    counters: Arc<ResourceCounters>,
    grace_period: Duration,
}

impl ProcessRegistry {
    pub(crate) fn new(grace_period: Duration, counters: Arc<ResourceCounters>) -> Self {
        Self {
            processes: DashMap::new(),
            counters,
            grace_period,
        }
    }

    pub(crate) fn start(
        &self,
        spec: &ProcessSpec,
        timeout: Option<Duration>,
    ) -> Result<ManagedProcessInfo> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            HostError::process(format!("failed to spawn {}: {e}", spec.program))
        })?;

        let id = Uuid::new_v4().to_string();
        let pid = child.id();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ProcessState::Running);

        tokio::spawn(supervise(
            child,
            id.clone(),
            timeout,
            self.grace_period,
            control_rx,
            state_tx,
            self.counters.clone(),
        ));

        let process = ManagedProcess {
            id: id.clone(),
            pid,
            program: spec.program.clone(),
            started_at: Utc::now(),
            timeout,
            control: control_tx,
            state: state_rx,
        };
        let info = process.info();
        self.processes.insert(id.clone(), process);
        self.counters.record_process_started();

        info!(
            process_id = %id,
            pid = ?pid,
            program = %spec.program,
            timeout_ms = ?timeout.map(|t| t.as_millis()),
            "RESOURCES: Started managed process"
        );
        Ok(info)
    }

    /// Request a stop and wait for the supervisor to report the final state
    pub(crate) async fn stop(&self, id: &str, force: bool) -> Result<ProcessState> {
        let (control, mut state) = {
            let process = self
                .processes
                .get(id)
                .ok_or_else(|| HostError::ProcessNotFound(id.to_string()))?;
            (process.control.clone(), process.state.clone())
        };

        if state.borrow().is_finished() {
            return Ok(state.borrow().clone());
        }

        let mode = if force {
            StopMode::Force
        } else {
            StopMode::Graceful
        };
        // The supervisor may have exited between the check and the send
        let _ = control.send(mode);

        let budget = self.grace_period + Duration::from_secs(2);
        let waited = tokio::time::timeout(budget, state.wait_for(ProcessState::is_finished))
            .await
            .map(|finished| finished.map(|s| s.clone()));
        match waited {
            Ok(Ok(final_state)) => Ok(final_state),
            Ok(Err(_)) => Ok(state.borrow().clone()),
            Err(_) => Err(HostError::timeout(
                format!("stopping process {id}"),
                budget.as_millis() as u64,
            )),
        }
    }

    /// Stop every running process concurrently; failures are logged
    pub(crate) async fn stop_all(&self, force: bool) -> usize {
        let running: Vec<String> = self
            .processes
            .iter()
            .filter(|p| !p.state.borrow().is_finished())
            .map(|p| p.id.clone())
            .collect();

        let results =
            futures::future::join_all(running.iter().map(|id| self.stop(id, force))).await;
        for (id, result) in running.iter().zip(&results) {
            if let Err(e) = result {
                warn!(process_id = %id, "RESOURCES: Failed to stop managed process: {}", e);
            }
        }
        running.len()
    }

    /// Forget processes that have finished
    pub(crate) fn reap(&self) -> usize {
        let before = self.processes.len();
        self.processes.retain(|_, p| !p.state.borrow().is_finished());
        before - self.processes.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<ManagedProcessInfo> {
        self.processes.get(id).map(|p| p.info())
    }

    pub(crate) fn list(&self) -> Vec<ManagedProcessInfo> {
        self.processes.iter().map(|p| p.info()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.processes.len()
    }

    pub(crate) fn running(&self) -> usize {
        self.processes
            .iter()
            .filter(|p| !p.state.borrow().is_finished())
            .count()
    }
}

enum Trigger {
    Exited(std::io::Result<ExitStatus>),
    Deadline,
    Stop(StopMode),
}

async fn supervise(
    mut child: Child,
    id: String,
    timeout: Option<Duration>,
    grace_period: Duration,
    mut control: mpsc::UnboundedReceiver<StopMode>,
    state: watch::Sender<ProcessState>,
    counters: Arc<ResourceCounters>,
) {
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let trigger = tokio::select! {
        status = child.wait() => Trigger::Exited(status),
        _ = &mut deadline => Trigger::Deadline,
        Some(mode) = control.recv() => Trigger::Stop(mode),
    };

    let final_state = match trigger {
        Trigger::Exited(status) => exit_state(status),
        Trigger::Deadline => {
            warn!(
                process_id = %id,
                timeout_ms = ?timeout.map(|t| t.as_millis()),
                "RESOURCES: Managed process exceeded its timeout, killing"
            );
            kill(&mut child, &id).await;
            counters.record_process_timed_out();
            ProcessState::TimedOut
        }
        Trigger::Stop(StopMode::Force) => {
            kill(&mut child, &id).await;
            counters.record_process_killed();
            ProcessState::Killed
        }
        Trigger::Stop(StopMode::Graceful) => {
            graceful_stop(&mut child, &id, grace_period, &mut control, &counters).await
        }
    };

    if matches!(final_state, ProcessState::Exited { .. }) {
        counters.record_process_exited();
    }
    debug!(process_id = %id, state = ?final_state, "RESOURCES: Managed process finished");
    let _ = state.send(final_state);
}

enum GraceOutcome {
    Exited(std::io::Result<ExitStatus>),
    Expired,
    Escalated,
}

async fn graceful_stop(
    child: &mut Child,
    id: &str,
    grace_period: Duration,
    control: &mut mpsc::UnboundedReceiver<StopMode>,
    counters: &ResourceCounters,
) -> ProcessState {
    request_close(child);

    let outcome = tokio::select! {
        status = child.wait() => GraceOutcome::Exited(status),
        _ = tokio::time::sleep(grace_period) => GraceOutcome::Expired,
        Some(StopMode::Force) = control.recv() => GraceOutcome::Escalated,
    };

    match outcome {
        GraceOutcome::Exited(status) => exit_state(status),
        GraceOutcome::Expired => {
            warn!(
                process_id = %id,
                "RESOURCES: Process did not close within grace period, killing"
            );
            kill(child, id).await;
            counters.record_process_killed();
            ProcessState::Killed
        }
        GraceOutcome::Escalated => {
            warn!(process_id = %id, "RESOURCES: Forced stop during grace period, killing");
            kill(child, id).await;
            counters.record_process_killed();
            ProcessState::Killed
        }
    }
}

/// Cooperative close: end of input, plus SIGTERM where available
fn request_close(child: &mut Child) {
    drop(child.stdin.take());

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a child we own; no memory is shared
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

async fn kill(child: &mut Child, id: &str) {
    if let Err(e) = child.kill().await {
        error!(process_id = %id, "RESOURCES: Failed to kill managed process: {}", e);
    }
}

fn exit_state(status: std::io::Result<ExitStatus>) -> ProcessState {
    match status {
        Ok(status) => ProcessState::Exited {
            code: status.code(),
        },
        Err(e) => ProcessState::Failed {
            message: e.to_string(),
        },
    }
}
