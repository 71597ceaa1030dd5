use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A command handed to the sandbox by the self-correction loop (§4.4 Gate
/// 2) or any other caller that needs isolated execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxCommand {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl SandboxCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, workdir: PathBuf) -> Self {
        Self {
            program: program.into(),
            args,
            workdir,
            env: Vec::new(),
        }
    }
}

/// Why a sandboxed command's execution ended the way it did. `Completed`
/// carries whatever exit code the process returned; the others are the
/// "distinguishable error kind" spec §4.6 requires for resource-limit
/// breaches, encoded in-band rather than thrown, since the sandbox boundary
/// never throws for a command's own misbehavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    Completed,
    TimedOut,
    MemoryExceeded,
    ProcessLimitExceeded,
}

/// `run(cmd, workdir, policy) -> ExecResult` (spec §4.6 contract). Always
/// returned, never thrown, for any in-sandbox command failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub peak_mem_bytes: Option<u64>,
    pub outcome: ExecOutcome,
}

impl ExecResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == ExecOutcome::Completed && self.exit_code == Some(0)
    }
}
