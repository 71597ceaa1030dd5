use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aurora_types::AuroraErrorKind;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Notify;

use crate::exec::{ExecOutcome, ExecResult, SandboxCommand};
use crate::policy::SandboxPolicy;

/// A pluggable sandbox implementation (spec §4.6: "implemented as a
/// process-isolation executor ... abstracted behind a `SandboxBackend`
/// trait"). Callers go through `SandboxExecutor`, which adds the
/// `SandboxUnavailable` retry policy on top of whichever backend is wired
/// in.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn run(
        &self,
        cmd: &SandboxCommand,
        policy: &SandboxPolicy,
    ) -> Result<ExecResult, AuroraErrorKind>;
}

const MEMORY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The shipped backend: runs the command as a plain child process on the
/// host, with best-effort policy enforcement (wall-clock timeout always
/// enforced; memory ceiling enforced via `/proc` polling on Linux;
/// capability drop via an unprivileged uid/gid when the policy names one).
/// True container-level isolation (namespaces, cgroups, image pulls) is not
/// implemented here — a `ContainerBackend` stands in for that path and
/// reports `SandboxUnavailable` until one is wired in, so callers retry
/// identically regardless of backend.
pub struct LocalProcessBackend;

impl LocalProcessBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxBackend for LocalProcessBackend {
    async fn run(
        &self,
        cmd: &SandboxCommand,
        policy: &SandboxPolicy,
    ) -> Result<ExecResult, AuroraErrorKind> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .current_dir(&cmd.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        if let Some(mount) = &policy.filesystem.secret_mount {
            for (key, value) in &mount.env {
                command.env(key, value);
            }
        }
        apply_capability_policy(&mut command, policy);

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                // Program missing / not executable is the command's own
                // failure, not sandbox infrastructure failure: still
                // returned as an ExecResult, never thrown.
                return Ok(ExecResult {
                    stdout: String::new(),
                    stderr: format!("failed to spawn sandboxed command: {err}"),
                    exit_code: None,
                    duration: start.elapsed(),
                    peak_mem_bytes: None,
                    outcome: ExecOutcome::Completed,
                });
            }
        };

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(stdout) = stdout_handle.as_mut() {
                let _ = stdout.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(stderr) = stderr_handle.as_mut() {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let peak_mem = Arc::new(AtomicU64::new(0));
        let memory_exceeded = Arc::new(Notify::new());
        let memory_limit_hit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let monitor = child.id().map(|pid| {
            tokio::spawn(monitor_memory(
                pid,
                policy.resources.memory_ceiling_bytes,
                peak_mem.clone(),
                memory_exceeded.clone(),
                memory_limit_hit.clone(),
            ))
        });

        let timeout = policy.resources.wall_clock_timeout;
        let outcome;
        let exit_code;
        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| AuroraErrorKind::SandboxUnavailable(e.to_string()))?;
                exit_code = status.code();
                outcome = if memory_limit_hit.load(Ordering::SeqCst) {
                    ExecOutcome::MemoryExceeded
                } else {
                    ExecOutcome::Completed
                };
            }
            _ = tokio::time::sleep(timeout) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                exit_code = None;
                outcome = ExecOutcome::TimedOut;
            }
            _ = memory_exceeded.notified() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                exit_code = None;
                outcome = ExecOutcome::MemoryExceeded;
            }
        }

        if let Some(monitor) = monitor {
            monitor.abort();
        }

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let peak_mem_bytes = match peak_mem.load(Ordering::SeqCst) {
            0 => None,
            bytes => Some(bytes),
        };

        Ok(ExecResult {
            stdout,
            stderr,
            exit_code,
            duration: start.elapsed(),
            peak_mem_bytes,
            outcome,
        })
    }
}

#[cfg(unix)]
fn apply_capability_policy(command: &mut Command, policy: &SandboxPolicy) {
    use std::os::unix::process::CommandExt;
    if let Some(uid) = policy.capabilities.unprivileged_uid {
        command.uid(uid);
    }
    if let Some(gid) = policy.capabilities.unprivileged_gid {
        command.gid(gid);
    }
}

#[cfg(not(unix))]
fn apply_capability_policy(_command: &mut Command, _policy: &SandboxPolicy) {}

/// Polls `/proc/{pid}/status` for peak resident set size, killing the
/// process once `ceiling` is crossed. Linux-only; elsewhere this never
/// fires and `peak_mem_bytes` stays `None`.
async fn monitor_memory(
    pid: u32,
    ceiling: Option<u64>,
    peak_mem: Arc<AtomicU64>,
    memory_exceeded: Arc<Notify>,
    memory_limit_hit: Arc<std::sync::atomic::AtomicBool>,
) {
    if !cfg!(target_os = "linux") {
        return;
    }
    loop {
        tokio::time::sleep(MEMORY_POLL_INTERVAL).await;
        let Ok(status) = tokio::fs::read_to_string(format!("/proc/{pid}/status")).await else {
            return; // process exited
        };
        let Some(bytes) = parse_vm_hwm_bytes(&status) else {
            continue;
        };
        let prev = peak_mem.load(Ordering::SeqCst);
        if bytes > prev {
            peak_mem.store(bytes, Ordering::SeqCst);
        }
        if let Some(ceiling) = ceiling {
            if bytes > ceiling {
                memory_limit_hit.store(true, Ordering::SeqCst);
                memory_exceeded.notify_one();
                return;
            }
        }
    }
}

fn parse_vm_hwm_bytes(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    let kb: u64 = line
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()?;
    Some(kb * 1024)
}

/// Stands in for a true container backend (namespaces, cgroups, image
/// pulls). Always reports `SandboxUnavailable` so callers exercise the same
/// retry-with-backoff path they would against a real daemon that is
/// unreachable.
pub struct ContainerBackend;

#[async_trait]
impl SandboxBackend for ContainerBackend {
    async fn run(
        &self,
        _cmd: &SandboxCommand,
        _policy: &SandboxPolicy,
    ) -> Result<ExecResult, AuroraErrorKind> {
        Err(AuroraErrorKind::SandboxUnavailable(
            "container backend not available in this build".to_string(),
        ))
    }
}
