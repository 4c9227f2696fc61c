//! DOWN orchestrator (C6): quiesces a node ahead of maintenance.
//!
//! `Init -> PreFlight -> Cordon -> SetNoOut -> SaveState -> ScaleOperatorDown ->
//! DiscoverDeployments -> ScaleDeploymentsDown -> Complete | Error`

use chrono::Utc;

use crate::cancel::{self, CancellationToken};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::orchestrator::state::{self, DownState};
use crate::progress::{ProgressSink, Stage};
use crate::snapshot::backup::{self, BackupOptions};
use crate::snapshot::codec;
use crate::snapshot::model::{ResourceEntry, Snapshot};
use crate::snapshot::path;

/// Per-run knobs not already carried by [`Config`]: the progress sink and cancellation token.
pub struct DownOptions<'a> {
    pub progress: &'a mut dyn ProgressSink,
    pub cancel: CancellationToken,
    /// Overrides `cfg.path_template` resolution when set (mirrors an explicit `--state-file`
    /// flag on the excluded CLI collaborator).
    pub explicit_path: Option<String>,
}

/// What DOWN produced, for the caller to report or chain into a subsequent UP.
#[derive(Debug, Clone)]
pub struct DownOutcome {
    pub snapshot: Snapshot,
    pub snapshot_path: std::path::PathBuf,
}

pub async fn execute_down_phase(
    gateway: &dyn Gateway,
    cfg: &Config,
    node: &str,
    opts: DownOptions<'_>,
) -> Result<DownOutcome> {
    let DownOptions {
        progress,
        cancel,
        explicit_path,
    } = opts;
    let mut state = DownState::Init;

    let result = run(gateway, cfg, node, progress, &cancel, explicit_path.as_deref()).await;
    state = if result.is_ok() {
        DownState::Complete
    } else {
        DownState::Error
    };
    match &result {
        Ok(_) => state::emit(progress, Stage::Complete, "DOWN phase complete"),
        Err(e) => state::emit(progress, Stage::Warning, format!("DOWN phase failed: {e}")),
    }
    tracing::debug!(?state, "DOWN orchestrator terminal state");
    result
}

async fn run(
    gateway: &dyn Gateway,
    cfg: &Config,
    node: &str,
    progress: &mut dyn ProgressSink,
    cancel: &CancellationToken,
    explicit_path: Option<&str>,
) -> Result<DownOutcome> {
    // PreFlight
    cancel::check(cancel, "pre-flight")?;
    state::emit(progress, Stage::PreFlight, "verifying cluster reachability");
    if !gateway.node_exists(node, cancel).await? {
        return Err(Error::Precondition(format!("node {node} does not exist")));
    }
    if !gateway.tools_pod_ready(&cfg.namespace, cancel).await? {
        return Err(Error::Precondition("tools pod is not ready".to_string()));
    }
    let operator_before = gateway
        .get_deployment(&cfg.namespace, &cfg.operator_deployment_name, cancel)
        .await?
        .ok_or_else(|| {
            Error::Precondition(format!(
                "operator deployment {} not found",
                cfg.operator_deployment_name
            ))
        })?;

    // Cordon
    cancel::check(cancel, "cordon")?;
    state::emit(progress, Stage::Cordon, format!("cordoning node {node}"));
    gateway.cordon_node(node, cancel).await?;

    // SetNoOut
    cancel::check(cancel, "set-noout")?;
    state::emit(progress, Stage::SetNoOut, "setting noout flag");
    gateway.set_noout(&cfg.namespace, cancel).await?;

    // DiscoverDeployments
    cancel::check(cancel, "discover")?;
    state::emit(progress, Stage::Discover, format!("discovering deployments pinned to {node}"));
    let discovered = gateway
        .list_node_pinned_deployments(&cfg.namespace, node, cancel)
        .await?;

    // SaveState
    cancel::check(cancel, "save-state")?;
    state::emit(progress, Stage::SaveState, "saving maintenance snapshot");
    let resources: Vec<ResourceEntry> = discovered
        .iter()
        .map(|d| ResourceEntry {
            kind: "Deployment".to_string(),
            namespace: d.namespace.clone(),
            name: d.name.clone(),
            replicas: d.desired_replicas,
        })
        .collect();
    let snapshot = Snapshot {
        version: crate::snapshot::model::SNAPSHOT_VERSION.to_string(),
        node: node.to_string(),
        timestamp: Utc::now(),
        operator_replicas: operator_before.desired_replicas,
        resources,
    }
    .sorted();

    let snapshot_path = path::resolve_path_with_override(explicit_path, &cfg.path_template, node)?;
    backup::backup_file(
        &snapshot_path,
        &BackupOptions {
            enabled: cfg.backup.enabled,
            directory: cfg.backup.directory.clone(),
            prefix: cfg.backup.prefix.clone(),
            node: Some(node.to_string()),
            now: Utc::now(),
        },
    )?;
    codec::write_file(&snapshot_path, snapshot.clone())?;

    // ScaleOperatorDown
    cancel::check(cancel, "operator")?;
    state::emit(progress, Stage::Operator, "scaling operator deployment to 0");
    gateway
        .scale_deployment(&cfg.namespace, &cfg.operator_deployment_name, 0, cancel)
        .await?;
    gateway
        .wait_for_deployment_scale(
            &cfg.namespace,
            &cfg.operator_deployment_name,
            0,
            cfg.wait,
            cancel,
        )
        .await?;

    // ScaleDeploymentsDown, in reverse of the UP restoration order
    for d in scale_down_order(&discovered, cfg) {
        cancel::check(cancel, "scale-down")?;
        state::emit_for_deployment(
            progress,
            Stage::ScaleDown,
            format!("scaling {} to 0", d.name),
            d.name.clone(),
        );
        gateway
            .scale_deployment(&d.namespace, &d.name, 0, cancel)
            .await?;
        gateway
            .wait_for_deployment_scale(&d.namespace, &d.name, 0, cfg.wait, cancel)
            .await?;
    }

    Ok(DownOutcome {
        snapshot,
        snapshot_path,
    })
}

/// Groups discovered deployments by the same name-prefix buckets UP restores by, then reverses
/// both the group order and each group's membership order, so monitors (restored first by UP)
/// are scaled down last.
fn scale_down_order(
    discovered: &[crate::gateway::DeploymentInfo],
    cfg: &Config,
) -> Vec<crate::gateway::DeploymentInfo> {
    let prefixes = &cfg.deployment_prefixes;
    let group = |name: &str| -> u8 {
        if name.starts_with(&prefixes.monitor) {
            0
        } else if name.starts_with(&prefixes.osd) {
            1
        } else if name.starts_with(&prefixes.exporter) {
            2
        } else if name.starts_with(&prefixes.crashcollector) {
            3
        } else {
            4
        }
    };
    let mut ordered: Vec<_> = discovered.to_vec();
    ordered.sort_by_key(|d| std::cmp::Reverse(group(&d.name)));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{FakeGateway, SeedDeployment};
    use crate::progress::NullProgressSink;

    fn cfg(namespace_dir: &std::path::Path) -> Config {
        Config {
            path_template: namespace_dir.join("state-{{.Node}}.json").to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn happy_path_writes_snapshot_and_scales_everything_down() {
        let dir = tempfile::tempdir().unwrap();
        let gw = FakeGateway::new();
        gw.seed([
            SeedDeployment {
                namespace: "rook-ceph".to_string(),
                name: "rook-ceph-operator".to_string(),
                replicas: 1,
                node_pinned: false,
            },
            SeedDeployment {
                namespace: "rook-ceph".to_string(),
                name: "rook-ceph-osd-2".to_string(),
                replicas: 3,
                node_pinned: true,
            },
            SeedDeployment {
                namespace: "rook-ceph".to_string(),
                name: "rook-ceph-mon-a".to_string(),
                replicas: 1,
                node_pinned: true,
            },
        ]);

        let cfg = cfg(dir.path());
        let mut sink = NullProgressSink;
        let outcome = execute_down_phase(
            &gw,
            &cfg,
            "w-01",
            DownOptions {
                progress: &mut sink,
                cancel: CancellationToken::new(),
                explicit_path: None,
            },
        )
        .await
        .unwrap();

        assert!(gw.is_cordoned());
        assert!(gw.is_noout_set());
        assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-operator"), Some(0));
        assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-osd-2"), Some(0));
        assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-mon-a"), Some(0));
        assert_eq!(outcome.snapshot.operator_replicas, 1);
        assert_eq!(outcome.snapshot.resources.len(), 2);
        assert!(outcome.snapshot_path.exists());
    }

    #[tokio::test]
    async fn missing_node_fails_before_any_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let gw = FakeGateway::new();
        gw.set_node_known(false);
        gw.seed([SeedDeployment {
            namespace: "rook-ceph".to_string(),
            name: "rook-ceph-operator".to_string(),
            replicas: 1,
            node_pinned: false,
        }]);

        let cfg = cfg(dir.path());
        let mut sink = NullProgressSink;
        let err = execute_down_phase(
            &gw,
            &cfg,
            "w-404",
            DownOptions {
                progress: &mut sink,
                cancel: CancellationToken::new(),
                explicit_path: None,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Precondition(_)));
        assert!(!gw.is_cordoned());
        assert!(!gw.is_noout_set());
    }
}
