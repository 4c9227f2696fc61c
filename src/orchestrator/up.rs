//! UP orchestrator (C7): restores a node after maintenance.
//!
//! `Init -> LoadingState -> Confirm -> PreFlight -> Uncordon -> RestoreDeployments ->
//! ScaleOperatorUp -> UnsetNoOut -> Complete | Error`

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cancel::{self, CancellationToken};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::orchestrator::state::{self, UpState};
use crate::progress::{ProgressSink, Stage};
use crate::snapshot::model::{RestorePlanItem, RestoreStatus, Snapshot};
use crate::snapshot::path;
use crate::snapshot::validator::{self, ValidateOptions, Warning};

/// Per-run knobs not already carried by [`Config`].
pub struct UpOptions<'a> {
    pub progress: &'a mut dyn ProgressSink,
    pub cancel: CancellationToken,
    pub explicit_path: Option<String>,
    /// Snapshots older than this raise an `AgeExceeded` warning. Zero disables the check.
    pub max_age: Duration,
    /// Injectable "now" for deterministic age-check tests; `None` uses the wall clock.
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct UpOutcome {
    pub snapshot: Snapshot,
    pub restore_plan: Vec<RestorePlanItem>,
    pub warnings: Vec<Warning>,
}

pub async fn execute_up_phase(
    gateway: &dyn Gateway,
    cfg: &Config,
    node: &str,
    opts: UpOptions<'_>,
) -> Result<UpOutcome> {
    let UpOptions {
        progress,
        cancel,
        explicit_path,
        max_age,
        now,
    } = opts;

    let result = run(
        gateway,
        cfg,
        node,
        progress,
        &cancel,
        explicit_path.as_deref(),
        max_age,
        now,
    )
    .await;
    let state = if result.is_ok() {
        UpState::Complete
    } else {
        UpState::Error
    };
    match &result {
        Ok(_) => state::emit(progress, Stage::Complete, "UP phase complete"),
        Err(e) => state::emit(progress, Stage::Warning, format!("UP phase failed: {e}")),
    }
    tracing::debug!(?state, "UP orchestrator terminal state");
    result
}

async fn run(
    gateway: &dyn Gateway,
    cfg: &Config,
    node: &str,
    progress: &mut dyn ProgressSink,
    cancel: &CancellationToken,
    explicit_path: Option<&str>,
    max_age: Duration,
    now: Option<DateTime<Utc>>,
) -> Result<UpOutcome> {
    // LoadingState
    cancel::check(cancel, "loading-state")?;
    state::emit(progress, Stage::PreFlight, "loading maintenance snapshot");
    let snapshot_path = path::resolve_path_with_override(explicit_path, &cfg.path_template, node)?;
    let snapshot = crate::snapshot::codec::parse_file(&snapshot_path)?;
    if snapshot.node != node {
        return Err(Error::PolicyViolation(format!(
            "snapshot is for node {} but UP target is {node}",
            snapshot.node
        )));
    }

    let validate_opts = ValidateOptions {
        max_age,
        now: now.unwrap_or_else(Utc::now),
    };
    let mut warnings = validator::validate_state(&snapshot, validate_opts);

    let mut plan = Vec::with_capacity(snapshot.resources.len());
    for resource in &snapshot.resources {
        cancel::check(cancel, "validate-deployments")?;
        let observed = gateway
            .get_deployment(&resource.namespace, &resource.name, cancel)
            .await?;
        let (current_replicas, status) = match observed {
            Some(d) => (d.observed_replicas as i64, RestoreStatus::Pending),
            None => (-1, RestoreStatus::Missing),
        };
        if status == RestoreStatus::Missing {
            warnings.push(Warning::MissingResource {
                resource: resource.clone(),
                requires_confirmation: false,
            });
        }
        plan.push(RestorePlanItem {
            namespace: resource.namespace.clone(),
            name: resource.name.clone(),
            target_replicas: resource.replicas,
            current_replicas,
            status,
        });
    }

    for w in &warnings {
        state::emit(progress, Stage::Warning, describe_warning(w));
    }

    // Confirm: under the non-interactive policy, missing resources are either fatal or become
    // skip events; there is no UI collaborator here to block on, and confirmation UX is out of
    // scope for this core.
    let missing: Vec<_> = plan.iter().filter(|p| p.is_missing()).collect();
    if !missing.is_empty() {
        if !cfg.skip_missing_deployments {
            return Err(Error::PolicyViolation(format!(
                "validate-deployments: {} deployment(s) from the snapshot are missing from the cluster",
                missing.len()
            )));
        }
        for item in &missing {
            state::emit_for_deployment(
                progress,
                Stage::Skip,
                format!("{} missing from cluster, skipping", item.name),
                item.name.clone(),
            );
        }
    }

    // PreFlight
    cancel::check(cancel, "pre-flight")?;
    state::emit(progress, Stage::PreFlight, "verifying cluster reachability");
    if !gateway.node_exists(node, cancel).await? {
        return Err(Error::Precondition(format!("node {node} does not exist")));
    }
    if !gateway.tools_pod_ready(&cfg.namespace, cancel).await? {
        return Err(Error::Precondition("tools pod is not ready".to_string()));
    }

    // Uncordon
    cancel::check(cancel, "uncordon")?;
    state::emit(progress, Stage::Uncordon, format!("uncordoning node {node}"));
    gateway.uncordon_node(node, cancel).await?;

    // RestoreDeployments
    let restorable: Vec<&RestorePlanItem> = plan.iter().filter(|p| !p.is_missing()).collect();
    let (monitors, others): (Vec<_>, Vec<_>) = restorable
        .into_iter()
        .partition(|p| p.name.starts_with(&cfg.deployment_prefixes.monitor));

    for item in &monitors {
        scale_up(gateway, cfg, progress, cancel, item).await?;
    }

    cancel::check(cancel, "quorum")?;
    state::emit(progress, Stage::Quorum, "waiting for monitor quorum");
    gateway
        .wait_for_monitor_quorum(&cfg.namespace, cfg.wait, cancel)
        .await?;
    state::emit(progress, Stage::QuorumOk, "monitor quorum established");

    for item in restore_order(&others, cfg) {
        scale_up(gateway, cfg, progress, cancel, item).await?;
    }

    // ScaleOperatorUp
    cancel::check(cancel, "operator")?;
    state::emit(
        progress,
        Stage::Operator,
        format!("scaling operator deployment to {}", snapshot.operator_replicas),
    );
    gateway
        .scale_deployment(
            &cfg.namespace,
            &cfg.operator_deployment_name,
            snapshot.operator_replicas,
            cancel,
        )
        .await?;
    gateway
        .wait_for_deployment_scale(
            &cfg.namespace,
            &cfg.operator_deployment_name,
            snapshot.operator_replicas,
            cfg.wait,
            cancel,
        )
        .await?;

    // UnsetNoOut
    cancel::check(cancel, "unset-noout")?;
    state::emit(progress, Stage::UnsetNoOut, "clearing noout flag");
    gateway.unset_noout(&cfg.namespace, cancel).await?;

    Ok(UpOutcome {
        snapshot,
        restore_plan: plan,
        warnings,
    })
}

async fn scale_up(
    gateway: &dyn Gateway,
    cfg: &Config,
    progress: &mut dyn ProgressSink,
    cancel: &CancellationToken,
    item: &RestorePlanItem,
) -> Result<()> {
    cancel::check(cancel, "scale-up")?;
    state::emit_for_deployment(
        progress,
        Stage::ScaleUp,
        format!("scaling {} to {}", item.name, item.target_replicas),
        item.name.clone(),
    );
    gateway
        .scale_deployment(&item.namespace, &item.name, item.target_replicas, cancel)
        .await?;
    gateway
        .wait_for_deployment_scale(&item.namespace, &item.name, item.target_replicas, cfg.wait, cancel)
        .await
}

/// Orders non-monitor deployments `osd`, `exporter`, `crashcollector`, then anything else in
/// snapshot order.
fn restore_order<'a>(items: &[&'a RestorePlanItem], cfg: &Config) -> Vec<&'a RestorePlanItem> {
    let prefixes = &cfg.deployment_prefixes;
    let group = |name: &str| -> u8 {
        if name.starts_with(&prefixes.osd) {
            0
        } else if name.starts_with(&prefixes.exporter) {
            1
        } else if name.starts_with(&prefixes.crashcollector) {
            2
        } else {
            3
        }
    };
    let mut ordered: Vec<&RestorePlanItem> = items.to_vec();
    ordered.sort_by_key(|p| group(&p.name));
    ordered
}

fn describe_warning(w: &Warning) -> String {
    match w {
        Warning::AgeExceeded { age, max_age, .. } => {
            format!("snapshot age {age:?} exceeds max age {max_age:?}")
        }
        Warning::MissingResource { resource, .. } => {
            format!("{} not found in cluster", resource.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::{FakeGateway, SeedDeployment};
    use crate::progress::{NullProgressSink, RecordingProgressSink};
    use crate::snapshot::model::ResourceEntry;

    fn cfg(dir: &std::path::Path) -> Config {
        Config {
            path_template: dir.join("state-{{.Node}}.json").to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    fn write_snapshot(dir: &std::path::Path, node: &str, resources: Vec<ResourceEntry>) -> std::path::PathBuf {
        let path = dir.join(format!("state-{node}.json"));
        let snapshot = Snapshot {
            version: crate::snapshot::model::SNAPSHOT_VERSION.to_string(),
            node: node.to_string(),
            timestamp: Utc::now(),
            operator_replicas: 1,
            resources,
        };
        crate::snapshot::codec::write_file(&path, snapshot).unwrap();
        path
    }

    fn resource(name: &str, replicas: u32) -> ResourceEntry {
        ResourceEntry {
            kind: "Deployment".to_string(),
            namespace: "rook-ceph".to_string(),
            name: name.to_string(),
            replicas,
        }
    }

    #[tokio::test]
    async fn quorum_barrier_precedes_non_monitor_restoration() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(
            dir.path(),
            "w-01",
            vec![
                resource("rook-ceph-osd-a", 3),
                resource("rook-ceph-mon-a", 1),
                resource("rook-ceph-exporter", 1),
                resource("rook-ceph-mon-b", 1),
            ],
        );

        let gw = FakeGateway::new();
        gw.seed([
            SeedDeployment { namespace: "rook-ceph".into(), name: "rook-ceph-operator".into(), replicas: 0, node_pinned: false },
            SeedDeployment { namespace: "rook-ceph".into(), name: "rook-ceph-osd-a".into(), replicas: 0, node_pinned: true },
            SeedDeployment { namespace: "rook-ceph".into(), name: "rook-ceph-mon-a".into(), replicas: 0, node_pinned: true },
            SeedDeployment { namespace: "rook-ceph".into(), name: "rook-ceph-exporter".into(), replicas: 0, node_pinned: true },
            SeedDeployment { namespace: "rook-ceph".into(), name: "rook-ceph-mon-b".into(), replicas: 0, node_pinned: true },
        ]);

        let cfg = cfg(dir.path());
        let mut sink = RecordingProgressSink::default();
        execute_up_phase(
            &gw,
            &cfg,
            "w-01",
            UpOptions {
                progress: &mut sink,
                cancel: CancellationToken::new(),
                explicit_path: None,
                max_age: Duration::ZERO,
                now: None,
            },
        )
        .await
        .unwrap();

        let sequence = sink.stage_sequence();
        let quorum_idx = sequence.iter().position(|s| *s == "quorum").unwrap();
        let quorum_ok_idx = sequence.iter().position(|s| *s == "quorum-ok").unwrap();
        let osd_idx = sequence
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == "scale-up")
            .map(|(i, _)| i)
            .last()
            .unwrap();
        assert!(quorum_idx < quorum_ok_idx);
        assert!(quorum_ok_idx < osd_idx);
        assert_eq!(sequence.last(), Some(&"complete"));
    }

    #[tokio::test]
    async fn node_mismatch_fails_before_any_mutation() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "w-01", vec![]);

        let gw = FakeGateway::new();
        let cfg = cfg(dir.path());
        let mut sink = NullProgressSink;
        let err = execute_up_phase(
            &gw,
            &cfg,
            "w-02",
            UpOptions {
                progress: &mut sink,
                cancel: CancellationToken::new(),
                explicit_path: None,
                max_age: Duration::ZERO,
                now: None,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::PolicyViolation(_)));
        assert!(!gw.is_cordoned());
    }

    #[tokio::test]
    async fn missing_deployment_with_skip_false_is_fatal_before_uncordon() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "w-01", vec![resource("rook-ceph-osd-a", 3)]);

        let gw = FakeGateway::new();
        let cfg = cfg(dir.path());
        let mut sink = NullProgressSink;
        let err = execute_up_phase(
            &gw,
            &cfg,
            "w-01",
            UpOptions {
                progress: &mut sink,
                cancel: CancellationToken::new(),
                explicit_path: None,
                max_age: Duration::ZERO,
                now: None,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::PolicyViolation(_)));
        assert!(!gw.is_cordoned());
    }

    #[tokio::test]
    async fn missing_deployment_with_skip_true_emits_skip_event() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "w-01", vec![resource("rook-ceph-osd-a", 3)]);

        let gw = FakeGateway::new();
        gw.seed([SeedDeployment {
            namespace: "rook-ceph".into(),
            name: "rook-ceph-operator".into(),
            replicas: 0,
            node_pinned: false,
        }]);
        let mut cfg = cfg(dir.path());
        cfg.skip_missing_deployments = true;
        let mut sink = RecordingProgressSink::default();
        execute_up_phase(
            &gw,
            &cfg,
            "w-01",
            UpOptions {
                progress: &mut sink,
                cancel: CancellationToken::new(),
                explicit_path: None,
                max_age: Duration::ZERO,
                now: None,
            },
        )
        .await
        .unwrap();

        assert!(sink.stage_sequence().contains(&"skip"));
    }
}
