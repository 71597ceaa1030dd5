use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which hosts a sandboxed command may reach (spec §4.6 policy dimensions).
/// Default is `Restricted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum NetworkPolicy {
    /// Drop all network access.
    Isolated,
    /// Loopback only.
    Internal,
    /// Whitelisted hosts: package registries, version-control hosts.
    Restricted { allowed_hosts: Vec<String> },
    /// Unrestricted network access.
    Open,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        NetworkPolicy::Restricted {
            allowed_hosts: default_allowed_hosts(),
        }
    }
}

fn default_allowed_hosts() -> Vec<String> {
    vec![
        "registry.npmjs.org".to_string(),
        "crates.io".to_string(),
        "pypi.org".to_string(),
        "github.com".to_string(),
        "index.crates.io".to_string(),
    ]
}

/// Filesystem exposure for a sandboxed command: a read-only rootfs, a
/// writable overlay scoped to the task's working directory, and an optional
/// secret-bearing tmpfs mount unmounted on exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemPolicy {
    pub readonly_rootfs: bool,
    pub writable_overlay: PathBuf,
    pub secret_mount: Option<SecretMount>,
}

impl FilesystemPolicy {
    pub fn scoped_to(workdir: PathBuf) -> Self {
        Self {
            readonly_rootfs: true,
            writable_overlay: workdir,
            secret_mount: None,
        }
    }
}

/// A secret-bearing mount injected for the duration of one invocation and
/// torn down on exit; never written to the writable overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMount {
    pub env: Vec<(String, String)>,
}

/// Resource ceilings for a sandboxed command. Exceeding memory or the
/// wall-clock timeout yields a distinguishable `ExecOutcome`, not a thrown
/// error (spec §4.6 Failure semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_quota_millis: Option<u32>,
    pub memory_ceiling_bytes: Option<u64>,
    pub max_processes: Option<u32>,
    pub wall_clock_timeout: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_quota_millis: None,
            memory_ceiling_bytes: None,
            max_processes: None,
            wall_clock_timeout: Duration::from_secs(600),
        }
    }
}

/// Linux capability drop: all capabilities dropped, no privilege escalation,
/// user namespace mapped to an unprivileged UID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityPolicy {
    pub drop_all: bool,
    pub no_new_privileges: bool,
    pub unprivileged_uid: Option<u32>,
    pub unprivileged_gid: Option<u32>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self {
            drop_all: true,
            no_new_privileges: true,
            unprivileged_uid: None,
            unprivileged_gid: None,
        }
    }
}

/// The full policy a sandboxed command runs under (spec §4.6 policy
/// dimensions: network, filesystem, resource, capability).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub network: NetworkPolicy,
    pub filesystem: FilesystemPolicy,
    pub resources: ResourceLimits,
    pub capabilities: CapabilityPolicy,
}

impl SandboxPolicy {
    pub fn scoped_to(workdir: PathBuf) -> Self {
        Self {
            network: NetworkPolicy::default(),
            filesystem: FilesystemPolicy::scoped_to(workdir),
            resources: ResourceLimits::default(),
            capabilities: CapabilityPolicy::default(),
        }
    }
}
