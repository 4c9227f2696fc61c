//! Black-box scenarios driving `execute_down_phase`/`execute_up_phase` against `FakeGateway`
//! end to end, matching the documented end-to-end scenarios.

use std::time::Duration;

use ceph_node_maintenance::cancel::CancellationToken;
use ceph_node_maintenance::config::Config;
use ceph_node_maintenance::gateway::fake::{FakeGateway, SeedDeployment};
use ceph_node_maintenance::progress::{NullProgressSink, RecordingProgressSink};
use ceph_node_maintenance::gateway::Gateway;
use ceph_node_maintenance::{execute_down_phase, execute_up_phase, DownOptions, Error, UpOptions};

fn cfg(dir: &std::path::Path) -> Config {
    Config {
        path_template: dir.join("state-{{.Node}}.json").to_string_lossy().to_string(),
        ..Config::default()
    }
}

fn seed_rook_cluster(gw: &FakeGateway) {
    gw.seed([
        SeedDeployment {
            namespace: "rook-ceph".to_string(),
            name: "rook-ceph-operator".to_string(),
            replicas: 1,
            node_pinned: false,
        },
        SeedDeployment {
            namespace: "rook-ceph".to_string(),
            name: "rook-ceph-mon-a".to_string(),
            replicas: 1,
            node_pinned: true,
        },
        SeedDeployment {
            namespace: "rook-ceph".to_string(),
            name: "rook-ceph-osd-2".to_string(),
            replicas: 3,
            node_pinned: true,
        },
        SeedDeployment {
            namespace: "rook-ceph".to_string(),
            name: "rook-ceph-exporter".to_string(),
            replicas: 1,
            node_pinned: true,
        },
    ]);
}

#[tokio::test]
async fn down_then_up_round_trips_replica_counts() {
    let dir = tempfile::tempdir().unwrap();
    let gw = FakeGateway::new();
    seed_rook_cluster(&gw);
    let cfg = cfg(dir.path());

    let mut sink = NullProgressSink;
    execute_down_phase(
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

    assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-operator"), Some(0));
    assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-mon-a"), Some(0));
    assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-osd-2"), Some(0));

    let mut sink = NullProgressSink;
    let outcome = execute_up_phase(
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

    assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-operator"), Some(1));
    assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-mon-a"), Some(1));
    assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-osd-2"), Some(3));
    assert!(!gw.is_cordoned());
    assert!(!gw.is_noout_set());
    assert_eq!(outcome.restore_plan.len(), 3);
}

#[tokio::test]
async fn up_fails_fatally_on_node_mismatch_without_uncordoning() {
    let dir = tempfile::tempdir().unwrap();
    let gw = FakeGateway::new();
    seed_rook_cluster(&gw);
    let cfg = cfg(dir.path());

    let mut sink = NullProgressSink;
    execute_down_phase(
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
    gw.set_node_known(true);

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
    assert!(gw.is_cordoned(), "node mismatch must be caught before Uncordon");
}

#[tokio::test]
async fn up_ordering_emits_quorum_barrier_before_non_monitor_scale_up() {
    let dir = tempfile::tempdir().unwrap();
    let gw = FakeGateway::new();
    seed_rook_cluster(&gw);
    let cfg = cfg(dir.path());

    let mut sink = NullProgressSink;
    execute_down_phase(
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

    gw.set_quorum_delay(2);
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
    let quorum_ok = sequence.iter().position(|s| *s == "quorum-ok").unwrap();
    let last_scale_up = sequence
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == "scale-up")
        .map(|(i, _)| i)
        .last()
        .unwrap();
    let unset_noout = sequence.iter().position(|s| *s == "unset-noout").unwrap();
    assert!(quorum_ok < last_scale_up);
    assert!(last_scale_up < unset_noout);
    assert_eq!(sequence.last(), Some(&"complete"));
}

#[tokio::test]
async fn scale_deployment_reports_conflict_on_concurrent_mutation() {
    let gw = FakeGateway::new();
    seed_rook_cluster(&gw);
    gw.set_force_conflict("rook-ceph", "rook-ceph-operator");

    let err = gw
        .scale_deployment(
            "rook-ceph",
            "rook-ceph-operator",
            0,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    // One-shot: the deployment is untouched and a retry succeeds.
    assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-operator"), Some(1));
    gw.scale_deployment(
        "rook-ceph",
        "rook-ceph-operator",
        0,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(gw.desired_replicas("rook-ceph", "rook-ceph-operator"), Some(0));
}

#[tokio::test]
async fn down_phase_surfaces_conflict_from_operator_scale_down() {
    let dir = tempfile::tempdir().unwrap();
    let gw = FakeGateway::new();
    seed_rook_cluster(&gw);
    let cfg = cfg(dir.path());
    gw.set_force_conflict("rook-ceph", "rook-ceph-operator");

    let mut sink = NullProgressSink;
    let err = execute_down_phase(
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
    .unwrap_err();

    assert!(matches!(err, Error::Conflict(_)));
}
