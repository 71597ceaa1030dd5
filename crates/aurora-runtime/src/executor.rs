use std::sync::Arc;
use std::time::Duration;

use aurora_types::AuroraErrorKind;

use crate::backend::SandboxBackend;
use crate::exec::{ExecResult, SandboxCommand};
use crate::policy::SandboxPolicy;

/// Sandbox boundary retries bounded at 3 attempts (spec §7 Error kind
/// table: "SandboxUnavailable — infrastructural; retried at the sandbox
/// boundary with exponential backoff, bounded at 3").
const MAX_UNAVAILABLE_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Facade over a `SandboxBackend` that owns the `SandboxUnavailable` retry
/// policy, so every caller gets the same backoff behavior regardless of
/// which backend is wired in.
pub struct SandboxExecutor {
    backend: Arc<dyn SandboxBackend>,
}

impl SandboxExecutor {
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self { backend }
    }

    /// `run(cmd, workdir, policy) -> ExecResult` (spec §4.6 contract).
    /// `cmd.workdir` already carries the working directory; `policy` is
    /// passed separately so callers can vary it per invocation without
    /// rebuilding the command.
    pub async fn run(
        &self,
        cmd: &SandboxCommand,
        policy: &SandboxPolicy,
    ) -> Result<ExecResult, AuroraErrorKind> {
        let mut attempt = 0;
        loop {
            match self.backend.run(cmd, policy).await {
                Ok(result) => return Ok(result),
                Err(AuroraErrorKind::SandboxUnavailable(reason)) => {
                    attempt += 1;
                    if attempt >= MAX_UNAVAILABLE_RETRIES {
                        return Err(AuroraErrorKind::SandboxUnavailable(reason));
                    }
                    tracing::warn!(
                        target: "aurora.runtime",
                        attempt,
                        reason = %reason,
                        "sandbox unavailable, retrying with backoff"
                    );
                    tokio::time::sleep(backoff_for_attempt(attempt)).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ExecOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    struct FlakyBackend {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl SandboxBackend for FlakyBackend {
        async fn run(
            &self,
            _cmd: &SandboxCommand,
            _policy: &SandboxPolicy,
        ) -> Result<ExecResult, AuroraErrorKind> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(AuroraErrorKind::SandboxUnavailable("daemon unreachable".into()));
            }
            Ok(ExecResult {
                stdout: "ok".into(),
                stderr: String::new(),
                exit_code: Some(0),
                duration: StdDuration::from_millis(1),
                peak_mem_bytes: None,
                outcome: ExecOutcome::Completed,
            })
        }
    }

    struct AlwaysUnavailableBackend;

    #[async_trait]
    impl SandboxBackend for AlwaysUnavailableBackend {
        async fn run(
            &self,
            _cmd: &SandboxCommand,
            _policy: &SandboxPolicy,
        ) -> Result<ExecResult, AuroraErrorKind> {
            Err(AuroraErrorKind::SandboxUnavailable("daemon unreachable".into()))
        }
    }

    #[tokio::test]
    async fn retries_transient_unavailability_and_eventually_succeeds() {
        let backend = Arc::new(FlakyBackend {
            fail_times: AtomicU32::new(1),
        });
        let executor = SandboxExecutor::new(backend);
        let cmd = SandboxCommand::new("true", vec![], std::env::temp_dir());
        let policy = SandboxPolicy::scoped_to(std::env::temp_dir());

        let result = executor.run(&cmd, &policy).await.unwrap();
        assert!(result.succeeded());
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let executor = SandboxExecutor::new(Arc::new(AlwaysUnavailableBackend));
        let cmd = SandboxCommand::new("true", vec![], std::env::temp_dir());
        let policy = SandboxPolicy::scoped_to(std::env::temp_dir());

        let err = executor.run(&cmd, &policy).await.unwrap_err();
        assert!(matches!(err, AuroraErrorKind::SandboxUnavailable(_)));
    }
}
