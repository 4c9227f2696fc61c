//! Configuration surface consumed by the orchestrators.
//!
//! Loading, merging, and validating configuration from flags/files/env is the excluded external
//! collaborator's job. This module only defines the shape that collaborator must hand
//! the core, plus the defaults the core falls back to when a field is left at its zero value.

use std::time::Duration;

/// Polling/timeout policy for a single convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        WaitOptions {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Backup policy consumed by the backup manager (C5).
#[derive(Debug, Clone, Default)]
pub struct BackupConfig {
    pub enabled: bool,
    /// Explicit backup directory. When absent, backups are written as siblings of the original
    /// snapshot file.
    pub directory: Option<String>,
    /// Filename prefix used only when `directory` is set.
    pub prefix: String,
}

/// Deployment name prefixes the UP orchestrator uses to order restoration.
#[derive(Debug, Clone)]
pub struct DeploymentPrefixes {
    pub monitor: String,
    pub osd: String,
    pub exporter: String,
    pub crashcollector: String,
}

impl Default for DeploymentPrefixes {
    fn default() -> Self {
        DeploymentPrefixes {
            monitor: "rook-ceph-mon".to_string(),
            osd: "rook-ceph-osd".to_string(),
            exporter: "rook-ceph-exporter".to_string(),
            crashcollector: "rook-ceph-crashcollector".to_string(),
        }
    }
}

/// Top-level configuration the core consumes for a single DOWN or UP run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the storage operator and its managed deployments live in.
    pub namespace: String,
    /// Name of the storage operator deployment itself (scaled to/from 0 around the workload
    /// deployments).
    pub operator_deployment_name: String,
    /// Name of the in-cluster tools pod used for `SetNoOut`/`UnsetNoOut`/quorum probes.
    pub tools_pod_name: String,
    pub backup: BackupConfig,
    /// Templated snapshot path, e.g. `./default-state-{{.Node}}.json`.
    pub path_template: String,
    pub wait: WaitOptions,
    pub api_timeout: Duration,
    pub storage_command_timeout: Duration,
    pub deployment_prefixes: DeploymentPrefixes,
    /// When true, a deployment present in the snapshot but missing from the cluster during UP
    /// becomes a skip event instead of a fatal `PolicyViolation`.
    pub skip_missing_deployments: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            namespace: "rook-ceph".to_string(),
            operator_deployment_name: "rook-ceph-operator".to_string(),
            tools_pod_name: "rook-ceph-tools".to_string(),
            backup: BackupConfig {
                enabled: true,
                directory: None,
                prefix: "state".to_string(),
            },
            path_template: "./default-state-{{.Node}}.json".to_string(),
            wait: WaitOptions::default(),
            api_timeout: Duration::from_secs(30),
            storage_command_timeout: Duration::from_secs(60),
            deployment_prefixes: DeploymentPrefixes::default(),
            skip_missing_deployments: false,
        }
    }
}
