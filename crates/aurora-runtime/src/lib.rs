pub mod backend;
pub mod exec;
pub mod executor;
pub mod policy;

pub use backend::{ContainerBackend, LocalProcessBackend, SandboxBackend};
pub use exec::{ExecOutcome, ExecResult, SandboxCommand};
pub use executor::SandboxExecutor;
pub use policy::{CapabilityPolicy, FilesystemPolicy, NetworkPolicy, ResourceLimits, SandboxPolicy, SecretMount};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_backend_runs_a_command_and_captures_stdout() {
        let dir = tempdir().unwrap();
        let executor = SandboxExecutor::new(Arc::new(LocalProcessBackend::new()));
        let cmd = SandboxCommand::new("echo", vec!["hello sandbox".to_string()], dir.path().to_path_buf());
        let policy = SandboxPolicy::scoped_to(dir.path().to_path_buf());

        let result = executor.run(&cmd, &policy).await.unwrap();
        assert!(result.succeeded());
        assert!(result.stdout.contains("hello sandbox"));
    }

    #[tokio::test]
    async fn wall_clock_timeout_is_enforced() {
        let dir = tempdir().unwrap();
        let executor = SandboxExecutor::new(Arc::new(LocalProcessBackend::new()));
        let cmd = SandboxCommand::new("sleep", vec!["5".to_string()], dir.path().to_path_buf());
        let mut policy = SandboxPolicy::scoped_to(dir.path().to_path_buf());
        policy.resources.wall_clock_timeout = std::time::Duration::from_millis(100);

        let result = executor.run(&cmd, &policy).await.unwrap();
        assert_eq!(result.outcome, ExecOutcome::TimedOut);
    }

    #[tokio::test]
    async fn missing_program_is_reported_as_exec_result_not_an_error() {
        let dir = tempdir().unwrap();
        let executor = SandboxExecutor::new(Arc::new(LocalProcessBackend::new()));
        let cmd = SandboxCommand::new(
            "definitely-not-a-real-binary-xyz",
            vec![],
            dir.path().to_path_buf(),
        );
        let policy = SandboxPolicy::scoped_to(dir.path().to_path_buf());

        let result = executor.run(&cmd, &policy).await.unwrap();
        assert!(!result.succeeded());
        assert!(result.exit_code.is_none());
    }

    #[tokio::test]
    async fn container_backend_reports_sandbox_unavailable() {
        let dir = tempdir().unwrap();
        let executor = SandboxExecutor::new(Arc::new(ContainerBackend));
        let cmd = SandboxCommand::new("echo", vec!["hi".to_string()], dir.path().to_path_buf());
        let policy = SandboxPolicy::scoped_to(dir.path().to_path_buf());

        let err = executor.run(&cmd, &policy).await.unwrap_err();
        assert!(matches!(err, aurora_types::AuroraErrorKind::SandboxUnavailable(_)));
    }
}
